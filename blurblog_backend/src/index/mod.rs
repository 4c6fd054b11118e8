//! Set-valued secondary indexes.
//!
//! The index is a cache derived from the authoritative store. It holds
//! integer-member sets under string keys:
//!
//! - `F:<user>:F` -- ids `<user>` follows (the friend ring)
//! - `F:<user>:f` -- ids following `<user>`
//! - `S:<feed>:<fingerprint>` -- ids that shared a story
//! - `C:<feed>:<fingerprint>` -- ids that shared it with a comment
//!
//! Only the mutation paths in `profiles`/`shares` and the repair pass write
//! to it. Every write is a set add or remove, so replays and interleavings
//! converge on the same membership.

pub mod graph;
pub mod memory;
pub mod shares;

pub use graph::{GraphIndex, GraphSet};
pub use memory::InMemorySetIndex;
pub use shares::{ShareIndex, ShareSet, StoryKey};

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The index backend cannot be reached.
    #[error("index store unavailable")]
    Unavailable,

    /// The index did not answer within the configured client timeout.
    #[error("index operation on {key} timed out after {waited_ms}ms")]
    Timeout { key: String, waited_ms: u64 },
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Set store keyed by string, members are user ids.
///
/// Missing keys behave as empty sets. Removing the last member of a set
/// removes the key.
pub trait SetIndex: Send + Sync {
    /// Add `member` to the set at `key`. Returns `true` if it was not present.
    fn add(&self, key: &str, member: i64) -> IndexResult<bool>;

    /// Remove `member` from the set at `key`. Returns `true` if it was present.
    fn remove(&self, key: &str, member: i64) -> IndexResult<bool>;

    fn contains(&self, key: &str, member: i64) -> IndexResult<bool>;

    fn members(&self, key: &str) -> IndexResult<BTreeSet<i64>>;

    /// Members present in both sets.
    fn intersect(&self, left: &str, right: &str) -> IndexResult<BTreeSet<i64>>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> IndexResult<Vec<String>>;

    /// Drop every key. Used by tests and operators to simulate index loss.
    fn clear(&self) -> IndexResult<()>;

    /// Full copy of the index contents.
    fn snapshot(&self) -> IndexResult<BTreeMap<String, BTreeSet<i64>>>;
}
