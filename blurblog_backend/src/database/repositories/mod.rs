mod profiles;
mod shared_stories;
mod social_services;
mod social_subscriptions;

use super::models::{
    LinkKind, ProfileRecord, ProfileRow, ShareMembership, SharedStoryRecord, SocialNetwork,
    SocialServicesRecord, SocialSubscriptionRecord,
};
use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeSet;

pub trait ProfileRepository {
    /// Insert an empty profile unless one exists. Returns `true` if created.
    fn ensure(&self, user_id: i64) -> Result<bool>;
    fn get(&self, user_id: i64) -> Result<Option<ProfileRecord>>;
    fn get_rows(&self, user_ids: &[i64]) -> Result<Vec<ProfileRow>>;
    fn list_ids(&self) -> Result<Vec<i64>>;
    /// Persist the display fields (identity, bio, photo, location, website).
    fn update_fields(&self, row: &ProfileRow) -> Result<()>;
    /// Set-add. Returns `true` if the member was not present.
    fn add_link(&self, user_id: i64, kind: LinkKind, other_id: i64) -> Result<bool>;
    /// Set-remove. Returns `true` if the member was present.
    fn remove_link(&self, user_id: i64, kind: LinkKind, other_id: i64) -> Result<bool>;
    fn has_link(&self, user_id: i64, kind: LinkKind, other_id: i64) -> Result<bool>;
    fn links(&self, user_id: i64, kind: LinkKind) -> Result<BTreeSet<i64>>;
    /// Every `(user_id, other_id)` pair of one kind.
    fn all_links(&self, kind: LinkKind) -> Result<Vec<(i64, i64)>>;
    /// Recompute all four counters in one statement; the relationship and
    /// shared-story counts are derived from their rows, the subscription
    /// count is supplied by the caller (`None` keeps the stored value).
    fn recompute_counts(&self, user_id: i64, subscription_count: Option<i64>) -> Result<()>;
}

pub trait SharedStoryRepository {
    /// Insert or overwrite the row keyed by `(user_id, story_guid)`.
    fn upsert(&self, record: &SharedStoryRecord) -> Result<()>;
    fn get(&self, user_id: i64, story_guid: &str) -> Result<Option<SharedStoryRecord>>;
    fn delete(&self, user_id: i64, story_guid: &str) -> Result<bool>;
    fn list_for_user(&self, user_id: i64, limit: usize) -> Result<Vec<SharedStoryRecord>>;
    /// Shares of one story restricted to `user_ids`.
    fn list_for_story(
        &self,
        story_feed_id: i64,
        guid_hash: &str,
        user_ids: &[i64],
    ) -> Result<Vec<SharedStoryRecord>>;
    fn count_for_user(&self, user_id: i64) -> Result<i64>;
    fn all_memberships(&self) -> Result<Vec<ShareMembership>>;
    /// `Some(has_comments)` if `user_id` currently shares the story.
    fn membership(&self, user_id: i64, story_feed_id: i64, guid_hash: &str)
        -> Result<Option<bool>>;
}

pub trait SocialSubscriptionRepository {
    /// Returns `true` if a new record was inserted.
    fn create_if_missing(&self, record: &SocialSubscriptionRecord) -> Result<bool>;
    fn get(&self, user_id: i64, subscription_user_id: i64)
        -> Result<Option<SocialSubscriptionRecord>>;
    fn delete(&self, user_id: i64, subscription_user_id: i64) -> Result<bool>;
    fn list_for_user(&self, user_id: i64) -> Result<Vec<SocialSubscriptionRecord>>;
}

pub trait SocialServicesRepository {
    fn get(&self, user_id: i64) -> Result<Option<SocialServicesRecord>>;
    fn upsert(&self, record: &SocialServicesRecord) -> Result<()>;
    /// Replace the imported friend list for one network.
    fn set_friend_ids(&self, user_id: i64, network: SocialNetwork, ids: &[String]) -> Result<()>;
    fn friend_ids(&self, user_id: i64, network: SocialNetwork) -> Result<Vec<String>>;
    /// Local users connected to `network` under `uid`.
    fn users_with_uid(&self, network: SocialNetwork, uid: &str) -> Result<Vec<i64>>;
    /// Local users whose imported friend list on `network` contains `foreign_id`.
    fn users_with_friend(&self, network: SocialNetwork, foreign_id: &str) -> Result<Vec<i64>>;
}

/// Hands out rusqlite-backed repositories borrowing one connection.
pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn profiles(&self) -> impl ProfileRepository + '_ {
        profiles::SqliteProfileRepository { conn: self.conn }
    }

    pub fn shared_stories(&self) -> impl SharedStoryRepository + '_ {
        shared_stories::SqliteSharedStoryRepository { conn: self.conn }
    }

    pub fn social_subscriptions(&self) -> impl SocialSubscriptionRepository + '_ {
        social_subscriptions::SqliteSocialSubscriptionRepository { conn: self.conn }
    }

    pub fn social_services(&self) -> impl SocialServicesRepository + '_ {
        social_services::SqliteSocialServicesRepository { conn: self.conn }
    }

    pub fn conn(&self) -> &'conn Connection {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MIGRATIONS;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        conn.execute_batch(MIGRATIONS).expect("migrations");
        conn
    }

    fn share(user_id: i64, guid: &str, feed: i64, comments: &str) -> SharedStoryRecord {
        SharedStoryRecord {
            user_id,
            story_guid: guid.into(),
            guid_hash: format!("hash-{guid}"),
            story_feed_id: feed,
            shared_date: "2024-01-01T00:00:00Z".into(),
            comments: comments.into(),
            has_comments: !comments.is_empty(),
            story_tags: vec!["rust".into()],
            ..Default::default()
        }
    }

    #[test]
    fn profile_links_behave_as_sets() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let profiles = repos.profiles();

        assert!(profiles.ensure(1).unwrap());
        assert!(!profiles.ensure(1).unwrap());
        profiles.ensure(2).unwrap();

        assert!(profiles.add_link(1, LinkKind::Following, 2).unwrap());
        assert!(!profiles.add_link(1, LinkKind::Following, 2).unwrap());
        profiles.add_link(2, LinkKind::Follower, 1).unwrap();
        profiles.recompute_counts(1, Some(4)).unwrap();
        profiles.recompute_counts(2, None).unwrap();

        let one = profiles.get(1).unwrap().unwrap();
        assert_eq!(one.following_user_ids.len(), 1);
        assert_eq!(one.row.following_count, 1);
        assert_eq!(one.row.subscription_count, 4);
        let two = profiles.get(2).unwrap().unwrap();
        assert_eq!(two.row.follower_count, 1);

        assert!(profiles.remove_link(1, LinkKind::Following, 2).unwrap());
        assert!(!profiles.remove_link(1, LinkKind::Following, 2).unwrap());
        assert!(profiles.get(3).unwrap().is_none());
    }

    #[test]
    fn shared_story_upsert_is_unique_per_user_and_guid() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let stories = repos.shared_stories();

        stories.upsert(&share(1, "guid-a", 10, "first")).unwrap();
        stories.upsert(&share(1, "guid-a", 10, "")).unwrap();
        stories.upsert(&share(2, "guid-a", 10, "hi")).unwrap();

        assert_eq!(stories.count_for_user(1).unwrap(), 1);
        let stored = stories.get(1, "guid-a").unwrap().unwrap();
        assert!(!stored.has_comments);
        assert_eq!(stored.story_tags, vec!["rust".to_string()]);

        let friends = stories.list_for_story(10, "hash-guid-a", &[2, 3]).unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].user_id, 2);
        assert_eq!(stories.membership(2, 10, "hash-guid-a").unwrap(), Some(true));

        assert!(stories.delete(1, "guid-a").unwrap());
        assert!(!stories.delete(1, "guid-a").unwrap());
        assert_eq!(stories.all_memberships().unwrap().len(), 1);
    }

    #[test]
    fn social_service_friend_lookup() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let services = repos.social_services();

        let mut record = SocialServicesRecord::new(1);
        record.twitter.uid = Some("tw-1".into());
        services.upsert(&record).unwrap();
        services
            .set_friend_ids(1, SocialNetwork::Twitter, &["tw-2".into(), "tw-3".into()])
            .unwrap();

        assert_eq!(services.users_with_uid(SocialNetwork::Twitter, "tw-1").unwrap(), vec![1]);
        assert_eq!(
            services.users_with_friend(SocialNetwork::Twitter, "tw-3").unwrap(),
            vec![1]
        );
        assert!(services
            .users_with_friend(SocialNetwork::Facebook, "tw-3")
            .unwrap()
            .is_empty());
        assert_eq!(
            services.friend_ids(1, SocialNetwork::Twitter).unwrap(),
            vec!["tw-2".to_string(), "tw-3".to_string()]
        );
    }
}
