use std::collections::BTreeSet;
use std::sync::Arc;

use super::{IndexResult, SetIndex};

/// Which side of a user's relationships a graph key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSet {
    Following,
    Followers,
}

impl GraphSet {
    fn suffix(self) -> char {
        match self {
            GraphSet::Following => 'F',
            GraphSet::Followers => 'f',
        }
    }

    pub fn key(self, user_id: i64) -> String {
        format!("F:{}:{}", user_id, self.suffix())
    }

    /// Inverse of [`GraphSet::key`].
    pub fn parse_key(key: &str) -> Option<(i64, GraphSet)> {
        let rest = key.strip_prefix("F:")?;
        let (user, suffix) = rest.rsplit_once(':')?;
        let set = match suffix {
            "F" => GraphSet::Following,
            "f" => GraphSet::Followers,
            _ => return None,
        };
        Some((user.parse().ok()?, set))
    }
}

pub const GRAPH_KEY_PREFIX: &str = "F:";

/// Following/follower sets per user.
#[derive(Clone)]
pub struct GraphIndex {
    index: Arc<dyn SetIndex>,
}

impl GraphIndex {
    pub fn new(index: Arc<dyn SetIndex>) -> Self {
        Self { index }
    }

    pub fn add_follow(&self, follower_id: i64, followee_id: i64) -> IndexResult<()> {
        self.index
            .add(&GraphSet::Following.key(follower_id), followee_id)?;
        self.index
            .add(&GraphSet::Followers.key(followee_id), follower_id)?;
        Ok(())
    }

    pub fn remove_follow(&self, follower_id: i64, followee_id: i64) -> IndexResult<()> {
        self.index
            .remove(&GraphSet::Following.key(follower_id), followee_id)?;
        self.index
            .remove(&GraphSet::Followers.key(followee_id), follower_id)?;
        Ok(())
    }

    pub fn is_following(&self, follower_id: i64, followee_id: i64) -> IndexResult<bool> {
        self.index
            .contains(&GraphSet::Following.key(follower_id), followee_id)
    }

    pub fn following(&self, user_id: i64) -> IndexResult<BTreeSet<i64>> {
        self.index.members(&GraphSet::Following.key(user_id))
    }

    pub fn followers(&self, user_id: i64) -> IndexResult<BTreeSet<i64>> {
        self.index.members(&GraphSet::Followers.key(user_id))
    }
}
