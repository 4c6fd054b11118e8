use crate::collaborators::ContentCodec;
use crate::database::models::SharedStoryRecord;
use crate::database::repositories::{ProfileRepository, SharedStoryRepository};
use crate::database::Database;
use crate::error::{SocialError, SocialResult};
use crate::index::{ShareIndex, StoryKey};
use crate::profiles::{ProfileService, ProfileView, Projection};
use crate::utils::{now_utc_iso, relative_timesince};
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Index fingerprint of a story guid: lowercase hex BLAKE3 of the raw bytes.
///
/// Deterministic across processes and restarts. Two guids with the same
/// fingerprint would share index keys; at 256 bits that is not expected to
/// happen and is not handled.
pub fn fingerprint(guid: &str) -> String {
    blake3::hash(guid.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub permalink: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Story body as edited by the sharer.
    pub content: Option<String>,
    pub original_content: Option<String>,
    pub content_type: Option<String>,
    pub story_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInput {
    pub sharer_id: i64,
    pub feed_id: i64,
    pub guid: String,
    #[serde(default)]
    pub metadata: StoryMetadata,
    pub comment: Option<String>,
}

/// A shared story with its content decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedStory {
    pub user_id: i64,
    pub story_feed_id: i64,
    pub story_guid: String,
    pub guid_hash: String,
    pub shared_date: String,
    pub comments: String,
    pub has_comments: bool,
    pub story_title: Option<String>,
    pub story_author_name: Option<String>,
    pub story_permalink: Option<String>,
    pub story_tags: Vec<String>,
    pub story_content: Option<String>,
    pub story_original_content: Option<String>,
    pub story_content_type: Option<String>,
    pub story_date: Option<String>,
}

/// One comment as presented next to a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEntry {
    pub user_id: i64,
    pub comments: String,
    /// Age of the share, e.g. "3 hours".
    pub shared_date: String,
    pub author: Option<ProfileView>,
}

impl CommentEntry {
    pub fn from_record(record: &SharedStoryRecord, author: Option<ProfileView>) -> Self {
        Self {
            user_id: record.user_id,
            comments: record.comments.clone(),
            shared_date: relative_timesince(&record.shared_date),
            author,
        }
    }
}

/// Share Store mutations and reads. Writes the store first, then the share
/// index.
#[derive(Clone)]
pub struct ShareService {
    database: Database,
    index: ShareIndex,
    profiles: ProfileService,
    codec: std::sync::Arc<dyn ContentCodec>,
}

impl ShareService {
    pub fn new(
        database: Database,
        index: ShareIndex,
        profiles: ProfileService,
        codec: std::sync::Arc<dyn ContentCodec>,
    ) -> Self {
        Self {
            database,
            index,
            profiles,
            codec,
        }
    }

    /// Create or overwrite the sharer's share of `guid`. An empty comment
    /// retracts any earlier one. The guid is stored and fingerprinted
    /// byte for byte; only a blank guid is rejected.
    pub fn share(&self, input: ShareInput) -> SocialResult<SharedStory> {
        let guid = input.guid.as_str();
        if guid.trim().is_empty() {
            return Err(SocialError::InvalidInput("story guid is empty".into()));
        }
        let comments = input
            .comment
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let record = SharedStoryRecord {
            user_id: input.sharer_id,
            story_guid: guid.to_string(),
            guid_hash: fingerprint(guid),
            story_feed_id: input.feed_id,
            shared_date: now_utc_iso(),
            has_comments: !comments.is_empty(),
            comments,
            story_date: input.metadata.story_date,
            story_title: input.metadata.title,
            story_content_z: self.encode(input.metadata.content.as_deref())?,
            story_original_content_z: self.encode(input.metadata.original_content.as_deref())?,
            story_content_type: input.metadata.content_type,
            story_author_name: input.metadata.author,
            story_permalink: input.metadata.permalink,
            story_tags: input.metadata.tags,
        };

        let subscriptions = self.profiles.subscription_count(record.user_id);
        let previous = self
            .database
            .with_transaction(|repos| {
                self.profiles.ensure_profile(&repos, record.user_id)?;
                let stories = repos.shared_stories();
                let previous = stories.get(record.user_id, &record.story_guid)?;
                stories.upsert(&record)?;
                repos
                    .profiles()
                    .recompute_counts(record.user_id, subscriptions)?;
                Ok(previous)
            })
            .map_err(SocialError::store)?;

        let story = StoryKey::new(record.story_feed_id, record.guid_hash.clone());
        if let Some(previous) = previous.filter(|prev| prev.story_feed_id != record.story_feed_id) {
            let old = StoryKey::new(previous.story_feed_id, previous.guid_hash);
            if let Err(err) = self.index.remove_share(&old, record.user_id) {
                tracing::warn!(
                    user_id = record.user_id,
                    feed_id = old.feed_id,
                    error = %err,
                    "failed to drop share from previous feed key; awaiting repair"
                );
            }
        }
        if let Err(err) = self
            .index
            .record_share(&story, record.user_id, record.has_comments)
        {
            tracing::warn!(
                user_id = record.user_id,
                feed_id = story.feed_id,
                guid_hash = %story.guid_hash,
                error = %err,
                "share index update failed; awaiting repair"
            );
        }
        tracing::info!(
            user_id = record.user_id,
            feed_id = story.feed_id,
            has_comments = record.has_comments,
            "story shared"
        );
        self.decode(record)
    }

    /// Delete the share. Returns whether one existed. The index entries are
    /// removed either way.
    pub fn unshare(&self, sharer_id: i64, feed_id: i64, guid: &str) -> SocialResult<bool> {
        let subscriptions = self.profiles.subscription_count(sharer_id);
        let removed = self
            .database
            .with_transaction(|repos| {
                let stories = repos.shared_stories();
                let removed = stories.get(sharer_id, guid)?;
                if removed.is_some() {
                    stories.delete(sharer_id, guid)?;
                    repos.profiles().recompute_counts(sharer_id, subscriptions)?;
                }
                Ok(removed)
            })
            .map_err(SocialError::store)?;

        let mut keys = vec![StoryKey::new(feed_id, fingerprint(guid))];
        if let Some(stored) = &removed {
            let stored_key = StoryKey::new(stored.story_feed_id, stored.guid_hash.clone());
            if !keys.contains(&stored_key) {
                keys.push(stored_key);
            }
        }
        for story in &keys {
            if let Err(err) = self.index.remove_share(story, sharer_id) {
                tracing::warn!(
                    user_id = sharer_id,
                    feed_id = story.feed_id,
                    error = %err,
                    "share index removal failed; awaiting repair"
                );
            }
        }
        tracing::info!(user_id = sharer_id, feed_id, existed = removed.is_some(), "story unshared");
        Ok(removed.is_some())
    }

    pub fn get_share(&self, sharer_id: i64, guid: &str) -> SocialResult<Option<SharedStory>> {
        let record = self
            .database
            .with_repositories(|repos| repos.shared_stories().get(sharer_id, guid))
            .map_err(SocialError::store)?;
        record.map(|record| self.decode(record)).transpose()
    }

    /// Newest first.
    pub fn list_for_user(&self, sharer_id: i64, limit: usize) -> SocialResult<Vec<SharedStory>> {
        let records = self
            .database
            .with_repositories(|repos| repos.shared_stories().list_for_user(sharer_id, limit))
            .map_err(SocialError::store)?;
        records.into_iter().map(|record| self.decode(record)).collect()
    }

    /// The share's comment with its author in the requested projection.
    pub fn comment_with_author(
        &self,
        share: &SharedStory,
        projection: Projection,
    ) -> SocialResult<CommentEntry> {
        let author = self.profiles.view(share.user_id, projection)?;
        Ok(CommentEntry {
            user_id: share.user_id,
            comments: share.comments.clone(),
            shared_date: relative_timesince(&share.shared_date),
            author,
        })
    }

    fn encode(&self, text: Option<&str>) -> SocialResult<Option<Vec<u8>>> {
        text.map(|text| self.codec.compress(text))
            .transpose()
            .map_err(SocialError::store)
    }

    fn decode(&self, record: SharedStoryRecord) -> SocialResult<SharedStory> {
        let decompress = |bytes: Option<Vec<u8>>, column: &str| {
            bytes
                .map(|bytes| {
                    self.codec.decompress(&bytes).with_context(|| {
                        format!(
                            "failed to decode {column} for user {} guid {}",
                            record.user_id, record.story_guid
                        )
                    })
                })
                .transpose()
                .map_err(SocialError::store)
        };
        let story_content = decompress(record.story_content_z.clone(), "story_content")?;
        let story_original_content =
            decompress(record.story_original_content_z.clone(), "story_original_content")?;
        Ok(SharedStory {
            user_id: record.user_id,
            story_feed_id: record.story_feed_id,
            story_guid: record.story_guid,
            guid_hash: record.guid_hash,
            shared_date: record.shared_date,
            comments: record.comments,
            has_comments: record.has_comments,
            story_title: record.story_title,
            story_author_name: record.story_author_name,
            story_permalink: record.story_permalink,
            story_tags: record.story_tags,
            story_content,
            story_original_content,
            story_content_type: record.story_content_type,
            story_date: record.story_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, StaticAccountDirectory};
    use crate::index::{GraphIndex, InMemorySetIndex, SetIndex};
    use std::sync::Arc;

    struct Fixture {
        shares: ShareService,
        profiles: ProfileService,
        index: Arc<InMemorySetIndex>,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(StaticAccountDirectory::default());
        accounts.insert(7, "uma", "uma@example.com");
        let collaborators = Collaborators {
            accounts,
            ..Collaborators::default()
        };
        let index = Arc::new(InMemorySetIndex::default());
        let backing: Arc<dyn SetIndex> = index.clone();
        let database = Database::open_in_memory().unwrap();
        let profiles = ProfileService::new(
            database.clone(),
            GraphIndex::new(backing.clone()),
            collaborators.clone(),
        );
        let shares = ShareService::new(
            database,
            ShareIndex::new(backing),
            profiles.clone(),
            collaborators.codec,
        );
        Fixture {
            shares,
            profiles,
            index,
        }
    }

    fn input(sharer_id: i64, feed_id: i64, guid: &str, comment: Option<&str>) -> ShareInput {
        ShareInput {
            sharer_id,
            feed_id,
            guid: guid.into(),
            metadata: StoryMetadata {
                title: Some("Borrowing without tears".into()),
                content: Some("<p>body</p>".repeat(20)),
                tags: vec!["rust".into()],
                ..Default::default()
            },
            comment: comment.map(str::to_string),
        }
    }

    #[test]
    fn fingerprint_is_fixed_width_and_deterministic() {
        let long_guid = "https://example.com/posts/".repeat(40);
        assert_eq!(fingerprint(&long_guid), fingerprint(&long_guid));
        assert_eq!(fingerprint(&long_guid).len(), 64);
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }

    #[test]
    fn share_writes_store_and_index() {
        let fx = fixture();
        let shared = fx.shares.share(input(7, 3, "guid-1", Some(" nice "))).unwrap();
        assert!(shared.has_comments);
        assert_eq!(shared.comments, "nice");
        assert_eq!(shared.story_content.as_deref(), Some("<p>body</p>".repeat(20).as_str()));

        let hash = fingerprint("guid-1");
        assert!(fx.index.contains(&format!("S:3:{hash}"), 7).unwrap());
        assert!(fx.index.contains(&format!("C:3:{hash}"), 7).unwrap());
        let profile = fx.profiles.get(7).unwrap().unwrap();
        assert_eq!(profile.row.shared_stories_count, 1);
        assert_eq!(profile.row.username.as_deref(), Some("uma"));
    }

    #[test]
    fn reshare_overwrites_and_retracts_comment() {
        let fx = fixture();
        fx.shares.share(input(7, 3, "guid-1", Some("nice"))).unwrap();
        fx.shares.share(input(7, 3, "guid-1", Some(""))).unwrap();

        assert_eq!(fx.shares.list_for_user(7, 10).unwrap().len(), 1);
        let hash = fingerprint("guid-1");
        assert!(fx.index.contains(&format!("S:3:{hash}"), 7).unwrap());
        assert!(!fx.index.contains(&format!("C:3:{hash}"), 7).unwrap());
        assert_eq!(fx.profiles.get(7).unwrap().unwrap().row.shared_stories_count, 1);
    }

    #[test]
    fn whitespace_only_comment_counts_as_no_comment() {
        let fx = fixture();
        let shared = fx.shares.share(input(7, 3, "guid-1", Some(" \n\t "))).unwrap();
        assert!(!shared.has_comments);
        assert_eq!(shared.comments, "");

        let hash = fingerprint("guid-1");
        assert!(fx.index.contains(&format!("S:3:{hash}"), 7).unwrap());
        assert!(!fx.index.contains(&format!("C:3:{hash}"), 7).unwrap());
    }

    #[test]
    fn guid_with_surrounding_whitespace_is_kept_verbatim() {
        let fx = fixture();
        let guid = " http://example.com/post ";
        let shared = fx.shares.share(input(7, 5, guid, Some("nice"))).unwrap();
        assert_eq!(shared.story_guid, guid);
        assert_eq!(shared.guid_hash, fingerprint(guid));

        let hash = fingerprint(guid);
        assert!(fx.index.contains(&format!("S:5:{hash}"), 7).unwrap());
        assert!(fx.index.contains(&format!("C:5:{hash}"), 7).unwrap());
        assert!(fx.shares.get_share(7, guid).unwrap().is_some());
        assert!(fx.shares.get_share(7, guid.trim()).unwrap().is_none());

        assert!(fx.shares.unshare(7, 5, guid).unwrap());
        assert!(fx.shares.get_share(7, guid).unwrap().is_none());
        assert!(fx.index.is_empty());
    }

    #[test]
    fn reshare_to_another_feed_moves_index_entries() {
        let fx = fixture();
        fx.shares.share(input(7, 3, "guid-1", Some("nice"))).unwrap();
        fx.shares.share(input(7, 4, "guid-1", Some("nice"))).unwrap();

        let hash = fingerprint("guid-1");
        assert!(!fx.index.contains(&format!("S:3:{hash}"), 7).unwrap());
        assert!(!fx.index.contains(&format!("C:3:{hash}"), 7).unwrap());
        assert!(fx.index.contains(&format!("S:4:{hash}"), 7).unwrap());
    }

    #[test]
    fn unshare_removes_both_index_sets() {
        let fx = fixture();
        fx.shares.share(input(7, 3, "guid-1", Some("nice"))).unwrap();
        assert!(fx.shares.unshare(7, 3, "guid-1").unwrap());
        assert!(!fx.shares.unshare(7, 3, "guid-1").unwrap());

        assert!(fx.index.is_empty());
        assert!(fx.shares.get_share(7, "guid-1").unwrap().is_none());
        assert_eq!(fx.profiles.get(7).unwrap().unwrap().row.shared_stories_count, 0);
    }

    #[test]
    fn empty_guid_is_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.shares.share(input(7, 3, "  ", None)),
            Err(SocialError::InvalidInput(_))
        ));
    }

    #[test]
    fn comment_entry_carries_author() {
        let fx = fixture();
        let shared = fx.shares.share(input(7, 3, "guid-1", Some("nice"))).unwrap();
        let entry = fx
            .shares
            .comment_with_author(&shared, Projection::Compact)
            .unwrap();
        assert_eq!(entry.comments, "nice");
        assert_eq!(entry.shared_date, "just now");
        assert_eq!(entry.author.map(|author| author.user_id()), Some(7));
    }
}
