use std::collections::BTreeSet;
use std::sync::Arc;

use super::graph::GraphSet;
use super::{IndexResult, SetIndex};

/// Index key component for one story: origin feed plus guid fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoryKey {
    pub feed_id: i64,
    pub guid_hash: String,
}

impl StoryKey {
    pub fn new(feed_id: i64, guid_hash: impl Into<String>) -> Self {
        Self {
            feed_id,
            guid_hash: guid_hash.into(),
        }
    }

    pub fn key(&self, set: ShareSet) -> String {
        format!("{}:{}:{}", set.prefix(), self.feed_id, self.guid_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareSet {
    Sharers,
    Commenters,
}

impl ShareSet {
    pub fn prefix(self) -> &'static str {
        match self {
            ShareSet::Sharers => "S",
            ShareSet::Commenters => "C",
        }
    }

    pub fn parse_key(key: &str) -> Option<(StoryKey, ShareSet)> {
        let mut parts = key.splitn(3, ':');
        let set = match parts.next()? {
            "S" => ShareSet::Sharers,
            "C" => ShareSet::Commenters,
            _ => return None,
        };
        let feed_id = parts.next()?.parse().ok()?;
        let guid_hash = parts.next()?;
        if guid_hash.is_empty() {
            return None;
        }
        Some((StoryKey::new(feed_id, guid_hash), set))
    }
}

/// Sharer and commenter sets per story.
#[derive(Clone)]
pub struct ShareIndex {
    index: Arc<dyn SetIndex>,
}

impl ShareIndex {
    pub fn new(index: Arc<dyn SetIndex>) -> Self {
        Self { index }
    }

    /// Record a share. Commenter membership follows `has_comments`, so a
    /// re-share with an empty comment retracts the comment.
    pub fn record_share(&self, story: &StoryKey, user_id: i64, has_comments: bool) -> IndexResult<()> {
        self.index.add(&story.key(ShareSet::Sharers), user_id)?;
        let commenters = story.key(ShareSet::Commenters);
        if has_comments {
            self.index.add(&commenters, user_id)?;
        } else {
            self.index.remove(&commenters, user_id)?;
        }
        Ok(())
    }

    /// Remove a share. Commenter membership is removed explicitly; nothing
    /// cascades between keys.
    pub fn remove_share(&self, story: &StoryKey, user_id: i64) -> IndexResult<()> {
        self.index.remove(&story.key(ShareSet::Sharers), user_id)?;
        self.index.remove(&story.key(ShareSet::Commenters), user_id)?;
        Ok(())
    }

    pub fn sharers(&self, story: &StoryKey) -> IndexResult<BTreeSet<i64>> {
        self.index.members(&story.key(ShareSet::Sharers))
    }

    pub fn commenters(&self, story: &StoryKey) -> IndexResult<BTreeSet<i64>> {
        self.index.members(&story.key(ShareSet::Commenters))
    }

    /// Sharers of `story` that `user_id` follows.
    pub fn friends_with_shares(&self, story: &StoryKey, user_id: i64) -> IndexResult<BTreeSet<i64>> {
        self.index.intersect(
            &story.key(ShareSet::Sharers),
            &GraphSet::Following.key(user_id),
        )
    }

    /// Commenters on `story` that `user_id` follows.
    pub fn friends_with_comments(
        &self,
        story: &StoryKey,
        user_id: i64,
    ) -> IndexResult<BTreeSet<i64>> {
        self.index.intersect(
            &story.key(ShareSet::Commenters),
            &GraphSet::Following.key(user_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{GraphIndex, InMemorySetIndex};

    #[test]
    fn story_keys_round_trip() {
        let story = StoryKey::new(12, "ab12");
        assert_eq!(story.key(ShareSet::Sharers), "S:12:ab12");
        assert_eq!(story.key(ShareSet::Commenters), "C:12:ab12");
        assert_eq!(
            ShareSet::parse_key("C:12:ab12"),
            Some((story, ShareSet::Commenters))
        );
        assert_eq!(ShareSet::parse_key("F:1:F"), None);
        assert_eq!(ShareSet::parse_key("S:12:"), None);
    }

    #[test]
    fn empty_comment_reshare_retracts_commenter() {
        let shares = ShareIndex::new(Arc::new(InMemorySetIndex::default()));
        let story = StoryKey::new(3, "feedface");
        shares.record_share(&story, 5, true).unwrap();
        assert!(shares.commenters(&story).unwrap().contains(&5));

        shares.record_share(&story, 5, false).unwrap();
        assert!(shares.sharers(&story).unwrap().contains(&5));
        assert!(shares.commenters(&story).unwrap().is_empty());

        shares.remove_share(&story, 5).unwrap();
        assert!(shares.sharers(&story).unwrap().is_empty());
    }

    #[test]
    fn friend_intersections_use_the_following_set() {
        let backing: Arc<dyn SetIndex> = Arc::new(InMemorySetIndex::default());
        let graph = GraphIndex::new(backing.clone());
        let shares = ShareIndex::new(backing);
        let story = StoryKey::new(1, "cafe");
        for sharer in [10, 11, 12] {
            shares.record_share(&story, sharer, sharer != 12).unwrap();
        }
        graph.add_follow(99, 11).unwrap();
        graph.add_follow(99, 12).unwrap();

        let sharing: Vec<_> = shares.friends_with_shares(&story, 99).unwrap().into_iter().collect();
        let commenting: Vec<_> = shares
            .friends_with_comments(&story, 99)
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(sharing, vec![11, 12]);
        assert_eq!(commenting, vec![11]);
    }
}
