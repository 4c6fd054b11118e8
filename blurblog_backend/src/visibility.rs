//! Read-time partition of a story's sharers and commenters into the
//! querying user's friends and everyone else.
//!
//! Membership comes from the set index only; identities are then hydrated
//! from the store. The index may lag the store by up to one repair
//! interval, in which case friend attribution is under- or over-reported
//! for that window. An unreachable index degrades to "no friends" for the
//! affected story rather than failing the batch.

use crate::database::models::ProfileRow;
use crate::database::repositories::{ProfileRepository, SharedStoryRepository};
use crate::database::Database;
use crate::index::{IndexResult, ShareIndex, StoryKey};
use crate::profiles::{ProfileCompact, ProfileView};
use crate::shares::CommentEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A story as listed to a reader, plus the friend/public annotations filled
/// in by [`VisibilityEngine::annotate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySummary {
    pub story_feed_id: i64,
    /// Story guid.
    pub id: String,
    pub guid_hash: String,
    pub share_count: i64,
    pub comment_count: i64,
    #[serde(default)]
    pub share_user_ids: Vec<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count_public: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count_friends: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_by_public: Option<Vec<ProfileCompact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_by_friends: Option<Vec<ProfileCompact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_count_public: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_count_friends: Option<i64>,
}

impl StorySummary {
    pub fn new(story_feed_id: i64, guid: impl Into<String>) -> Self {
        let id = guid.into();
        Self {
            story_feed_id,
            guid_hash: crate::shares::fingerprint(&id),
            id,
            ..Default::default()
        }
    }

    fn story_key(&self) -> StoryKey {
        StoryKey::new(self.story_feed_id, self.guid_hash.clone())
    }
}

/// Stateless and read-only; safe to call repeatedly or abandon midway.
#[derive(Clone)]
pub struct VisibilityEngine {
    database: Database,
    index: ShareIndex,
}

impl VisibilityEngine {
    pub fn new(database: Database, index: ShareIndex) -> Self {
        Self { database, index }
    }

    /// Annotate every story in the batch for `user_id`. Stories are handled
    /// independently; the batch order is preserved.
    pub fn annotate(&self, mut stories: Vec<StorySummary>, user_id: i64) -> Vec<StorySummary> {
        for story in &mut stories {
            if story.comment_count > 0 {
                self.annotate_comments(story, user_id);
            }
            if story.share_count > 0 {
                self.annotate_shares(story, user_id);
            }
        }
        stories
    }

    fn annotate_comments(&self, story: &mut StorySummary, user_id: i64) {
        let key = story.story_key();
        let friends = self.degrade(
            self.index.friends_with_comments(&key, user_id),
            &key,
            "commenters",
        );

        let mut comments = Vec::new();
        if !friends.is_empty() {
            let ids: Vec<i64> = friends.into_iter().collect();
            let hydrated = self.database.with_repositories(|repos| {
                let records = repos
                    .shared_stories()
                    .list_for_story(key.feed_id, &key.guid_hash, &ids)?;
                let author_ids: Vec<i64> = records.iter().map(|record| record.user_id).collect();
                let authors = repos.profiles().get_rows(&author_ids)?;
                Ok((records, authors))
            });
            match hydrated {
                Ok((records, authors)) => {
                    let authors = by_user(authors);
                    comments = records
                        .iter()
                        .map(|record| {
                            let author = authors.get(&record.user_id).map(|row| {
                                ProfileView::Compact(ProfileCompact::from_row(row))
                            });
                            CommentEntry::from_record(record, author)
                        })
                        .collect();
                }
                Err(err) => {
                    tracing::warn!(
                        feed_id = key.feed_id,
                        guid_hash = %key.guid_hash,
                        error = %err,
                        "failed to load friend comments"
                    );
                }
            }
        }

        let friend_count = comments.len() as i64;
        story.comment_count_public = Some(story.comment_count - friend_count);
        story.comment_count_friends = Some(friend_count);
        story.comments = Some(comments);
    }

    fn annotate_shares(&self, story: &mut StorySummary, user_id: i64) {
        let key = story.story_key();
        let friends = self.degrade(
            self.index.friends_with_shares(&key, user_id),
            &key,
            "sharers",
        );
        let public: BTreeSet<i64> = story
            .share_user_ids
            .iter()
            .copied()
            .filter(|id| !friends.contains(id))
            .collect();

        let friend_ids: Vec<i64> = friends.into_iter().collect();
        let public_ids: Vec<i64> = public.into_iter().collect();
        let hydrated = self.database.with_repositories(|repos| {
            let profiles = repos.profiles();
            Ok((profiles.get_rows(&friend_ids)?, profiles.get_rows(&public_ids)?))
        });
        let (friend_rows, public_rows) = match hydrated {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(
                    feed_id = key.feed_id,
                    guid_hash = %key.guid_hash,
                    error = %err,
                    "failed to load sharer profiles"
                );
                (Vec::new(), Vec::new())
            }
        };

        let friend_count = friend_rows.len() as i64;
        story.shared_by_friends = Some(friend_rows.iter().map(ProfileCompact::from_row).collect());
        story.shared_by_public = Some(public_rows.iter().map(ProfileCompact::from_row).collect());
        story.share_count_public = Some(story.share_count - friend_count);
        story.share_count_friends = Some(friend_count);
    }

    fn degrade(&self, result: IndexResult<BTreeSet<i64>>, key: &StoryKey, set: &str) -> BTreeSet<i64> {
        result.unwrap_or_else(|err| {
            tracing::warn!(
                feed_id = key.feed_id,
                guid_hash = %key.guid_hash,
                set,
                error = %err,
                "index unavailable; reporting no friends"
            );
            BTreeSet::new()
        })
    }
}

fn by_user(rows: Vec<ProfileRow>) -> HashMap<i64, ProfileRow> {
    rows.into_iter().map(|row| (row.user_id, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::index::{GraphIndex, InMemorySetIndex, SetIndex};
    use crate::profiles::ProfileService;
    use crate::shares::{ShareInput, ShareService, StoryMetadata};
    use std::sync::Arc;

    struct Fixture {
        profiles: ProfileService,
        shares: ShareService,
        engine: VisibilityEngine,
        index: Arc<InMemorySetIndex>,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(InMemorySetIndex::default());
        let backing: Arc<dyn SetIndex> = index.clone();
        let database = Database::open_in_memory().unwrap();
        let collaborators = Collaborators::default();
        let profiles = ProfileService::new(
            database.clone(),
            GraphIndex::new(backing.clone()),
            collaborators.clone(),
        );
        let share_index = ShareIndex::new(backing);
        let shares = ShareService::new(
            database.clone(),
            share_index.clone(),
            profiles.clone(),
            collaborators.codec,
        );
        Fixture {
            profiles,
            shares,
            engine: VisibilityEngine::new(database, share_index),
            index,
        }
    }

    fn share(fx: &Fixture, user_id: i64, comment: Option<&str>) {
        fx.shares
            .share(ShareInput {
                sharer_id: user_id,
                feed_id: 9,
                guid: "story-s".into(),
                metadata: StoryMetadata::default(),
                comment: comment.map(str::to_string),
            })
            .unwrap();
    }

    fn summary(share_user_ids: Vec<i64>, comment_count: i64) -> StorySummary {
        StorySummary {
            share_count: share_user_ids.len() as i64,
            comment_count,
            share_user_ids,
            ..StorySummary::new(9, "story-s")
        }
    }

    #[test]
    fn splits_friends_from_public() {
        let fx = fixture();
        let (a, b, c, d, u) = (1, 2, 3, 4, 100);
        share(&fx, a, None);
        share(&fx, b, Some("worth it"));
        share(&fx, c, Some("meh"));
        share(&fx, d, None);
        fx.profiles.follow(u, a, false).unwrap();
        fx.profiles.follow(u, b, false).unwrap();

        let annotated = fx.engine.annotate(vec![summary(vec![a, b, c, d], 2)], u);
        let story = &annotated[0];
        assert_eq!(story.share_count_friends, Some(2));
        assert_eq!(story.share_count_public, Some(2));
        assert_eq!(story.comment_count_friends, Some(1));
        assert_eq!(story.comment_count_public, Some(1));

        let friend_ids: Vec<i64> = story
            .shared_by_friends
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.user_id)
            .collect();
        let public_ids: Vec<i64> = story
            .shared_by_public
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(friend_ids, vec![a, b]);
        assert_eq!(public_ids, vec![c, d]);
        let comments = story.comments.as_ref().unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].user_id, b);
        assert_eq!(comments[0].comments, "worth it");
    }

    #[test]
    fn empty_friend_ring_attributes_nothing_to_friends() {
        let fx = fixture();
        share(&fx, 1, Some("hello"));
        let annotated = fx.engine.annotate(vec![summary(vec![1], 1)], 50);
        assert_eq!(annotated[0].comment_count_friends, Some(0));
        assert_eq!(annotated[0].comment_count_public, Some(1));
        assert_eq!(annotated[0].share_count_friends, Some(0));
        assert_eq!(annotated[0].comments.as_deref(), Some(&[][..]));
    }

    #[test]
    fn untouched_counts_leave_annotations_unset() {
        let fx = fixture();
        let annotated = fx.engine.annotate(vec![summary(vec![], 0)], 50);
        assert_eq!(annotated[0].comments, None);
        assert_eq!(annotated[0].share_count_public, None);
    }

    #[test]
    fn offline_index_degrades_to_no_friends() {
        let fx = fixture();
        share(&fx, 1, Some("hello"));
        fx.profiles.follow(50, 1, false).unwrap();
        fx.index.set_online(false);

        let annotated = fx.engine.annotate(vec![summary(vec![1], 1)], 50);
        assert_eq!(annotated[0].comment_count_friends, Some(0));
        assert_eq!(annotated[0].share_count_friends, Some(0));
        assert_eq!(annotated[0].share_count_public, Some(1));
        let public = annotated[0].shared_by_public.as_ref().unwrap();
        assert_eq!(public[0].user_id, 1);
    }

    #[test]
    fn annotate_is_repeatable() {
        let fx = fixture();
        share(&fx, 1, Some("hello"));
        fx.profiles.follow(50, 1, false).unwrap();
        let batch = vec![summary(vec![1], 1)];
        let once = fx.engine.annotate(batch.clone(), 50);
        let twice = fx.engine.annotate(once.clone(), 50);
        assert_eq!(once, twice);
    }
}
