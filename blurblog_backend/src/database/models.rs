use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scalar columns of a social profile. The relationship sets live in
/// `profile_links` and are loaded into [`ProfileRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub user_id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub photo_url: Option<String>,
    pub photo_service: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub subscription_count: i64,
    pub shared_stories_count: i64,
    pub following_count: i64,
    pub follower_count: i64,
    pub stories_last_month: i64,
    pub average_stories_per_month: i64,
    pub favicon_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(flatten)]
    pub row: ProfileRow,
    pub following_user_ids: BTreeSet<i64>,
    pub follower_user_ids: BTreeSet<i64>,
    pub unfollowed_user_ids: BTreeSet<i64>,
}

/// Membership kinds stored in `profile_links`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Following,
    Follower,
    Unfollowed,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Following => "following",
            LinkKind::Follower => "follower",
            LinkKind::Unfollowed => "unfollowed",
        }
    }
}

/// One (sharer, guid) row. Content columns hold codec output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedStoryRecord {
    pub user_id: i64,
    pub story_guid: String,
    pub guid_hash: String,
    pub story_feed_id: i64,
    pub shared_date: String,
    pub comments: String,
    pub has_comments: bool,
    pub story_date: Option<String>,
    pub story_title: Option<String>,
    pub story_content_z: Option<Vec<u8>>,
    pub story_original_content_z: Option<Vec<u8>>,
    pub story_content_type: Option<String>,
    pub story_author_name: Option<String>,
    pub story_permalink: Option<String>,
    pub story_tags: Vec<String>,
}

/// The index-relevant projection of a shared story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareMembership {
    pub user_id: i64,
    pub story_feed_id: i64,
    pub guid_hash: String,
    pub has_comments: bool,
}

/// Join record created by a follow; carries the follower's read state for
/// the followee's blurblog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialSubscriptionRecord {
    pub user_id: i64,
    pub subscription_user_id: i64,
    pub last_read_date: String,
    pub mark_read_date: String,
    pub unread_count_neutral: i64,
    pub unread_count_positive: i64,
    pub unread_count_negative: i64,
    pub unread_count_updated: Option<String>,
    pub oldest_unread_story_date: Option<String>,
    pub needs_unread_recalc: bool,
    pub feed_opens: i64,
    pub is_trained: bool,
}

impl SocialSubscriptionRecord {
    /// Fresh subscription with read markers set to now.
    pub fn new(user_id: i64, subscription_user_id: i64) -> Self {
        let now = crate::utils::now_utc_iso();
        Self {
            user_id,
            subscription_user_id,
            last_read_date: now.clone(),
            mark_read_date: now,
            unread_count_neutral: 0,
            unread_count_positive: 0,
            unread_count_negative: 0,
            unread_count_updated: None,
            oldest_unread_story_date: None,
            needs_unread_recalc: false,
            feed_opens: 0,
            is_trained: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialNetwork {
    Twitter,
    Facebook,
}

impl SocialNetwork {
    pub fn as_str(self) -> &'static str {
        match self {
            SocialNetwork::Twitter => "twitter",
            SocialNetwork::Facebook => "facebook",
        }
    }
}

/// Per-network connection details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAccount {
    pub uid: Option<String>,
    pub picture_url: Option<String>,
    pub username: Option<String>,
    pub refresh_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialServicesRecord {
    pub user_id: i64,
    pub autofollow: bool,
    pub twitter: NetworkAccount,
    pub facebook: NetworkAccount,
    pub upload_picture_url: Option<String>,
}

impl SocialServicesRecord {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            autofollow: true,
            twitter: NetworkAccount::default(),
            facebook: NetworkAccount::default(),
            upload_picture_url: None,
        }
    }

    pub fn account(&self, network: SocialNetwork) -> &NetworkAccount {
        match network {
            SocialNetwork::Twitter => &self.twitter,
            SocialNetwork::Facebook => &self.facebook,
        }
    }

    pub fn account_mut(&mut self, network: SocialNetwork) -> &mut NetworkAccount {
        match network {
            SocialNetwork::Twitter => &mut self.twitter,
            SocialNetwork::Facebook => &mut self.facebook,
        }
    }
}
