use crate::collaborators::Collaborators;
use crate::database::models::{LinkKind, ProfileRecord, ProfileRow, SocialSubscriptionRecord};
use crate::database::repositories::{
    ProfileRepository, SocialSubscriptionRepository, SqliteRepositories,
};
use crate::database::Database;
use crate::error::{SocialError, SocialResult};
use crate::index::GraphIndex;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub(crate) const MAX_BIO_CHARS: usize = 80;
pub(crate) const MAX_LOCATION_CHARS: usize = 40;
pub(crate) const MAX_WEBSITE_CHARS: usize = 200;

/// Authoritative profile operations. Every mutation writes the store first
/// and then the graph index; index failures are logged and left for repair.
#[derive(Clone)]
pub struct ProfileService {
    database: Database,
    graph: GraphIndex,
    collaborators: Collaborators,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowOutcome {
    Followed,
    AlreadyFollowing,
    /// The follower explicitly unfollowed this user before and the caller
    /// asked to respect that.
    Suppressed,
}

impl ProfileService {
    pub fn new(database: Database, graph: GraphIndex, collaborators: Collaborators) -> Self {
        Self {
            database,
            graph,
            collaborators,
        }
    }

    /// Existing profile, or a freshly created zero-valued one.
    pub fn get_or_create(&self, user_id: i64) -> SocialResult<ProfileRecord> {
        self.database
            .with_repositories(|repos| {
                self.ensure_profile(&repos, user_id)?;
                repos
                    .profiles()
                    .get(user_id)?
                    .ok_or_else(|| anyhow::anyhow!("profile {user_id} vanished after insert"))
            })
            .map_err(SocialError::store)
    }

    pub fn get(&self, user_id: i64) -> SocialResult<Option<ProfileRecord>> {
        self.database
            .with_repositories(|repos| repos.profiles().get(user_id))
            .map_err(SocialError::store)
    }

    /// Refresh all four counters. Following/follower counts come from the
    /// profile's own sets, shared stories from the share store, and the
    /// subscription count from the reader's subscription source.
    pub fn recompute_counts(&self, user_id: i64) -> SocialResult<()> {
        let subscriptions = self.subscription_count(user_id);
        self.database
            .with_repositories(|repos| {
                self.ensure_profile(&repos, user_id)?;
                repos.profiles().recompute_counts(user_id, subscriptions)
            })
            .map_err(SocialError::store)
    }

    pub fn follow(
        &self,
        follower_id: i64,
        followee_id: i64,
        suppress_if_unfollowed: bool,
    ) -> SocialResult<FollowOutcome> {
        if follower_id == followee_id {
            return Err(SocialError::SelfFollow(follower_id));
        }
        let follower_subscriptions = self.subscription_count(follower_id);
        let followee_subscriptions = self.subscription_count(followee_id);

        let outcome = self
            .database
            .with_transaction(|repos| {
                self.ensure_profile(&repos, follower_id)?;
                self.ensure_profile(&repos, followee_id)?;
                let profiles = repos.profiles();

                if suppress_if_unfollowed
                    && profiles.has_link(follower_id, LinkKind::Unfollowed, followee_id)?
                {
                    return Ok(FollowOutcome::Suppressed);
                }

                let added = profiles.add_link(follower_id, LinkKind::Following, followee_id)?;
                profiles.remove_link(follower_id, LinkKind::Unfollowed, followee_id)?;
                profiles.add_link(followee_id, LinkKind::Follower, follower_id)?;
                profiles.recompute_counts(follower_id, follower_subscriptions)?;
                profiles.recompute_counts(followee_id, followee_subscriptions)?;

                repos
                    .social_subscriptions()
                    .create_if_missing(&SocialSubscriptionRecord::new(follower_id, followee_id))?;

                Ok(if added {
                    FollowOutcome::Followed
                } else {
                    FollowOutcome::AlreadyFollowing
                })
            })
            .map_err(SocialError::store)?;

        if outcome == FollowOutcome::Suppressed {
            tracing::debug!(follower_id, followee_id, "follow suppressed by earlier unfollow");
            return Ok(outcome);
        }

        if let Err(err) = self.graph.add_follow(follower_id, followee_id) {
            tracing::warn!(
                follower_id,
                followee_id,
                error = %err,
                "graph index update failed after follow; awaiting repair"
            );
        }
        tracing::info!(follower_id, followee_id, ?outcome, "follow");
        Ok(outcome)
    }

    /// Remove the relationship and remember the unfollow so automatic
    /// follows never re-add it. Unfollowing a relationship that does not
    /// exist is a no-op apart from recording the unfollow. Returns whether
    /// the follower was following.
    pub fn unfollow(&self, follower_id: i64, followee_id: i64) -> SocialResult<bool> {
        if follower_id == followee_id {
            return Ok(false);
        }
        let follower_subscriptions = self.subscription_count(follower_id);
        let followee_subscriptions = self.subscription_count(followee_id);

        let was_following = self
            .database
            .with_transaction(|repos| {
                self.ensure_profile(&repos, follower_id)?;
                let profiles = repos.profiles();

                let was_following =
                    profiles.remove_link(follower_id, LinkKind::Following, followee_id)?;
                profiles.add_link(follower_id, LinkKind::Unfollowed, followee_id)?;
                profiles.remove_link(followee_id, LinkKind::Follower, follower_id)?;
                profiles.recompute_counts(follower_id, follower_subscriptions)?;
                // No-op when the followee never had a profile.
                profiles.recompute_counts(followee_id, followee_subscriptions)?;

                repos
                    .social_subscriptions()
                    .delete(follower_id, followee_id)?;
                Ok(was_following)
            })
            .map_err(SocialError::store)?;

        if let Err(err) = self.graph.remove_follow(follower_id, followee_id) {
            tracing::warn!(
                follower_id,
                followee_id,
                error = %err,
                "graph index update failed after unfollow; awaiting repair"
            );
        }
        tracing::info!(follower_id, followee_id, was_following, "unfollow");
        Ok(was_following)
    }

    /// Profile in the requested shape, or `None` if the user has no profile.
    pub fn view(&self, user_id: i64, projection: Projection) -> SocialResult<Option<ProfileView>> {
        Ok(self
            .get(user_id)?
            .map(|record| ProfileView::from_record(&record, projection)))
    }

    /// Compact projections for the given users; unknown ids are skipped.
    pub fn profiles(&self, user_ids: &[i64]) -> SocialResult<Vec<ProfileCompact>> {
        let rows = self
            .database
            .with_repositories(|repos| repos.profiles().get_rows(user_ids))
            .map_err(SocialError::store)?;
        Ok(rows.iter().map(ProfileCompact::from_row).collect())
    }

    pub fn update_profile(&self, user_id: i64, update: ProfileUpdate) -> SocialResult<ProfileRecord> {
        update.validate()?;
        let mut record = self.get_or_create(user_id)?;
        if let Some(bio) = update.bio {
            record.row.bio = non_empty(bio);
        }
        if let Some(location) = update.location {
            record.row.location = non_empty(location);
        }
        if let Some(website) = update.website {
            record.row.website = non_empty(website);
        }
        self.database
            .with_repositories(|repos| repos.profiles().update_fields(&record.row))
            .map_err(SocialError::store)?;
        Ok(record)
    }

    /// Follower/following/shared counters. Does not create a profile.
    pub fn user_statistics(&self, user_id: i64) -> SocialResult<Option<UserStatistics>> {
        Ok(self.get(user_id)?.map(|record| UserStatistics {
            followers: record.row.follower_count,
            following: record.row.following_count,
            shared_stories: record.row.shared_stories_count,
        }))
    }

    /// Create the profile row if missing and fill identity fields from the
    /// account directory when they are still empty. A failed directory
    /// lookup leaves them empty for a later attempt.
    pub(crate) fn ensure_profile(&self, repos: &SqliteRepositories<'_>, user_id: i64) -> Result<()> {
        let profiles = repos.profiles();
        profiles.ensure(user_id)?;
        let Some(mut row) = profiles.get_rows(&[user_id])?.into_iter().next() else {
            return Ok(());
        };
        if row.username.is_some() {
            return Ok(());
        }
        match self.collaborators.accounts.lookup(user_id) {
            Ok(Some(account)) => {
                row.username = Some(account.username);
                row.email = Some(account.email);
                profiles.update_fields(&row)?;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(user_id, error = %err, "account lookup failed; profile left anonymous");
            }
        }
        Ok(())
    }

    /// `None` when the subscription source is unreachable, which keeps the
    /// stored count.
    pub(crate) fn subscription_count(&self, user_id: i64) -> Option<i64> {
        match self.collaborators.subscriptions.subscription_count(user_id) {
            Ok(count) => Some(count as i64),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "subscription count unavailable");
                None
            }
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

impl ProfileUpdate {
    fn validate(&self) -> SocialResult<()> {
        let checks = [
            ("bio", &self.bio, MAX_BIO_CHARS),
            ("location", &self.location, MAX_LOCATION_CHARS),
            ("website", &self.website, MAX_WEBSITE_CHARS),
        ];
        for (field, value, limit) in checks {
            if let Some(value) = value {
                if value.trim().chars().count() > limit {
                    return Err(SocialError::InvalidInput(format!(
                        "{field} is limited to {limit} characters"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatistics {
    pub followers: i64,
    pub following: i64,
    pub shared_stories: i64,
}

/// Which result shape a profile lookup produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    Compact,
    #[default]
    Standard,
    Full,
}

impl std::str::FromStr for Projection {
    type Err = SocialError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "compact" => Ok(Projection::Compact),
            "standard" => Ok(Projection::Standard),
            "full" => Ok(Projection::Full),
            other => Err(SocialError::InvalidInput(format!("unknown projection {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCompact {
    pub user_id: i64,
    pub username: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileCompact {
    pub fn from_row(row: &ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            username: row.username.clone(),
            photo_url: row.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStandard {
    pub user_id: i64,
    pub username: Option<String>,
    pub photo_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub subscription_count: i64,
    pub shared_stories_count: i64,
    pub following_count: i64,
    pub follower_count: i64,
}

impl ProfileStandard {
    pub fn from_row(row: &ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            username: row.username.clone(),
            photo_url: row.photo_url.clone(),
            bio: row.bio.clone(),
            location: row.location.clone(),
            website: row.website.clone(),
            subscription_count: row.subscription_count,
            shared_stories_count: row.shared_stories_count,
            following_count: row.following_count,
            follower_count: row.follower_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFull {
    #[serde(flatten)]
    pub standard: ProfileStandard,
    pub photo_service: Option<String>,
    pub following_user_ids: Vec<i64>,
    pub follower_user_ids: Vec<i64>,
    pub unfollowed_user_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileView {
    Full(ProfileFull),
    Standard(ProfileStandard),
    Compact(ProfileCompact),
}

impl ProfileView {
    pub fn from_record(record: &ProfileRecord, projection: Projection) -> Self {
        match projection {
            Projection::Compact => ProfileView::Compact(ProfileCompact::from_row(&record.row)),
            Projection::Standard => ProfileView::Standard(ProfileStandard::from_row(&record.row)),
            Projection::Full => ProfileView::Full(ProfileFull {
                standard: ProfileStandard::from_row(&record.row),
                photo_service: record.row.photo_service.clone(),
                following_user_ids: record.following_user_ids.iter().copied().collect(),
                follower_user_ids: record.follower_user_ids.iter().copied().collect(),
                unfollowed_user_ids: record.unfollowed_user_ids.iter().copied().collect(),
            }),
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            ProfileView::Full(full) => full.standard.user_id,
            ProfileView::Standard(standard) => standard.user_id,
            ProfileView::Compact(compact) => compact.user_id,
        }
    }
}
