use crate::database::repositories::{ProfileRepository, SocialSubscriptionRepository};
use crate::database::Database;
use crate::error::{SocialError, SocialResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One followed blurblog as it appears in the follower's feed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialFeed {
    pub user_id: i64,
    pub subscription_user_id: i64,
    pub username: Option<String>,
    pub photo_url: Option<String>,
    pub feed_title: String,
    pub nt: i64,
    pub ps: i64,
    pub ng: i64,
    pub is_trained: bool,
}

#[derive(Clone)]
pub struct SubscriptionService {
    database: Database,
}

impl SubscriptionService {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Blurblogs `user_id` follows that have at least one shared story.
    pub fn feeds(&self, user_id: i64) -> SocialResult<Vec<SocialFeed>> {
        let (subscriptions, targets) = self
            .database
            .with_repositories(|repos| {
                let subscriptions = repos.social_subscriptions().list_for_user(user_id)?;
                let ids: Vec<i64> = subscriptions
                    .iter()
                    .map(|sub| sub.subscription_user_id)
                    .collect();
                let targets = repos.profiles().get_rows(&ids)?;
                Ok((subscriptions, targets))
            })
            .map_err(SocialError::store)?;

        let targets: HashMap<_, _> = targets
            .into_iter()
            .filter(|row| row.shared_stories_count >= 1)
            .map(|row| (row.user_id, row))
            .collect();

        Ok(subscriptions
            .into_iter()
            .filter_map(|sub| {
                let target = targets.get(&sub.subscription_user_id)?;
                let username = target.username.clone();
                Some(SocialFeed {
                    user_id: sub.user_id,
                    subscription_user_id: sub.subscription_user_id,
                    feed_title: format!(
                        "{}'s blurblog",
                        username.as_deref().unwrap_or("anonymous")
                    ),
                    username,
                    photo_url: target.photo_url.clone(),
                    nt: sub.unread_count_neutral,
                    ps: sub.unread_count_positive,
                    ng: sub.unread_count_negative,
                    is_trained: sub.is_trained,
                })
            })
            .collect())
    }
}
