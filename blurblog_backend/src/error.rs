use crate::index::IndexError;

/// Errors surfaced by the social services.
///
/// Authoritative-store failures are fatal to the calling mutation. Secondary
/// index failures after a successful store write never reach the caller;
/// they are logged and left for the next repair pass. `Index` is only
/// returned by operations whose whole job is the index, such as repair.
#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("user {0} cannot follow themselves")]
    SelfFollow(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authoritative store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl SocialError {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        SocialError::StoreUnavailable(err)
    }
}

pub type SocialResult<T> = Result<T, SocialError>;
