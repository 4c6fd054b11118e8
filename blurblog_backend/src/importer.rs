//! Friend import from third-party networks.
//!
//! The OAuth exchange and network API calls happen elsewhere; this module
//! receives the resulting friend-id list and profile hints, stores them,
//! and turns them into follows between local users.

use crate::collaborators::AccountDirectory;
use crate::database::models::{ProfileRecord, SocialNetwork, SocialServicesRecord};
use crate::database::repositories::{ProfileRepository, SocialServicesRepository};
use crate::database::Database;
use crate::error::{SocialError, SocialResult};
use crate::profiles::{
    FollowOutcome, ProfileService, MAX_BIO_CHARS, MAX_LOCATION_CHARS, MAX_WEBSITE_CHARS,
};
use crate::utils::now_utc_iso;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const GRAVATAR_BASE: &str = "https://www.gravatar.com/avatar/";

/// Where a profile's avatar comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoService {
    Twitter,
    Facebook,
    Upload,
    Gravatar,
}

impl PhotoService {
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoService::Twitter => "twitter",
            PhotoService::Facebook => "facebook",
            PhotoService::Upload => "upload",
            PhotoService::Gravatar => "gravatar",
        }
    }
}

impl From<SocialNetwork> for PhotoService {
    fn from(network: SocialNetwork) -> Self {
        match network {
            SocialNetwork::Twitter => PhotoService::Twitter,
            SocialNetwork::Facebook => PhotoService::Facebook,
        }
    }
}

/// Profile fields reported by the network for the importing user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileHints {
    pub username: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub picture_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FriendImport {
    /// Foreign ids in the order the network returned them.
    pub friend_ids: Vec<String>,
    #[serde(default)]
    pub hints: ProfileHints,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Local users the importing user now follows.
    pub following: Vec<i64>,
    /// Local users that started following the importing user.
    pub followers: usize,
}

#[derive(Clone)]
pub struct FriendImporter {
    database: Database,
    profiles: ProfileService,
    accounts: Arc<dyn AccountDirectory>,
}

impl FriendImporter {
    pub fn new(
        database: Database,
        profiles: ProfileService,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            database,
            profiles,
            accounts,
        }
    }

    pub fn services(&self, user_id: i64) -> SocialResult<Option<SocialServicesRecord>> {
        self.database
            .with_repositories(|repos| repos.social_services().get(user_id))
            .map_err(SocialError::store)
    }

    /// Record the user's foreign id on `network`.
    pub fn connect(
        &self,
        user_id: i64,
        network: SocialNetwork,
        uid: &str,
    ) -> SocialResult<SocialServicesRecord> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(SocialError::InvalidInput(format!(
                "{} uid is empty",
                network.as_str()
            )));
        }
        self.update_services(user_id, |record| {
            record.account_mut(network).uid = Some(uid.to_string());
        })
    }

    /// Forget the foreign id. The imported friend list and existing follows
    /// stay.
    pub fn disconnect(&self, user_id: i64, network: SocialNetwork) -> SocialResult<()> {
        self.update_services(user_id, |record| {
            record.account_mut(network).uid = None;
        })?;
        tracing::info!(user_id, network = network.as_str(), "network disconnected");
        Ok(())
    }

    pub fn set_autofollow(&self, user_id: i64, autofollow: bool) -> SocialResult<()> {
        self.update_services(user_id, |record| record.autofollow = autofollow)?;
        Ok(())
    }

    pub fn set_upload_picture(&self, user_id: i64, url: &str) -> SocialResult<()> {
        self.update_services(user_id, |record| {
            record.upload_picture_url = Some(url.to_string());
        })?;
        Ok(())
    }

    /// Store a freshly fetched friend list, follow the friends that are
    /// already local users, and fill empty profile fields from the hints.
    /// An empty list changes nothing.
    pub fn import_friends(
        &self,
        user_id: i64,
        network: SocialNetwork,
        import: FriendImport,
    ) -> SocialResult<ImportReport> {
        let connected = self
            .services(user_id)?
            .is_some_and(|record| record.account(network).uid.is_some());
        if !connected {
            return Err(SocialError::NotFound(format!(
                "{} connection for user {user_id}",
                network.as_str()
            )));
        }
        if import.friend_ids.is_empty() {
            return Ok(ImportReport::default());
        }

        let hints = import.hints;
        self.database
            .with_repositories(|repos| {
                repos
                    .social_services()
                    .set_friend_ids(user_id, network, &import.friend_ids)
            })
            .map_err(SocialError::store)?;
        self.update_services(user_id, |record| {
            let account = record.account_mut(network);
            account.refresh_date = Some(now_utc_iso());
            if hints.picture_url.is_some() {
                account.picture_url = hints.picture_url.clone();
            }
            if hints.username.is_some() {
                account.username = hints.username.clone();
            }
        })?;

        let report = self.follow_imported_friends(user_id, network)?;

        let mut profile = self.profiles.get_or_create(user_id)?;
        let row = &mut profile.row;
        fill_empty(&mut row.bio, hints.bio, MAX_BIO_CHARS);
        fill_empty(&mut row.location, hints.location, MAX_LOCATION_CHARS);
        fill_empty(&mut row.website, hints.website, MAX_WEBSITE_CHARS);
        self.save_profile(&profile)?;
        self.profiles.recompute_counts(user_id)?;

        if profile.row.photo_url.is_none() || profile.row.photo_service.is_none() {
            self.set_photo(user_id, network.into())?;
        }
        Ok(report)
    }

    /// Follow every imported friend that maps to a local user, then have
    /// every autofollowing local user who lists this user as a friend
    /// follow back. Previous explicit unfollows are respected both ways.
    pub fn follow_imported_friends(
        &self,
        user_id: i64,
        network: SocialNetwork,
    ) -> SocialResult<ImportReport> {
        let mut report = ImportReport::default();
        let Some(record) = self.services(user_id)? else {
            return Ok(report);
        };
        if !record.autofollow {
            return Ok(report);
        }

        let friend_ids = self
            .database
            .with_repositories(|repos| repos.social_services().friend_ids(user_id, network))
            .map_err(SocialError::store)?;
        for foreign_id in &friend_ids {
            let mapped = self
                .database
                .with_repositories(|repos| repos.social_services().users_with_uid(network, foreign_id))
                .map_err(SocialError::store)?;
            let Some(followee_id) = mapped.into_iter().find(|id| *id != user_id) else {
                continue;
            };
            if self.profiles.follow(user_id, followee_id, true)? != FollowOutcome::Suppressed {
                report.following.push(followee_id);
            }
        }

        if let Some(uid) = record.account(network).uid.as_deref() {
            let reciprocal = self
                .database
                .with_repositories(|repos| repos.social_services().users_with_friend(network, uid))
                .map_err(SocialError::store)?;
            for follower_id in reciprocal.into_iter().filter(|id| *id != user_id) {
                let autofollow = self
                    .services(follower_id)?
                    .is_some_and(|services| services.autofollow);
                if !autofollow {
                    continue;
                }
                if self.profiles.follow(follower_id, user_id, true)? != FollowOutcome::Suppressed {
                    report.followers += 1;
                }
            }
        }

        tracing::info!(
            user_id,
            network = network.as_str(),
            following = report.following.len(),
            followers = report.followers,
            "friend import finished"
        );
        Ok(report)
    }

    /// Point the profile avatar at `service`.
    pub fn set_photo(&self, user_id: i64, service: PhotoService) -> SocialResult<ProfileRecord> {
        let services = self
            .services(user_id)?
            .unwrap_or_else(|| SocialServicesRecord::new(user_id));
        let photo_url = match service {
            PhotoService::Twitter => services.twitter.picture_url,
            PhotoService::Facebook => services.facebook.picture_url,
            PhotoService::Upload => services.upload_picture_url,
            PhotoService::Gravatar => {
                let account = self
                    .accounts
                    .lookup(user_id)
                    .map_err(SocialError::store)?
                    .ok_or_else(|| SocialError::NotFound(format!("account {user_id}")))?;
                Some(gravatar_url(&account.email))
            }
        };

        let mut profile = self.profiles.get_or_create(user_id)?;
        profile.row.photo_service = Some(service.as_str().to_string());
        profile.row.photo_url = photo_url;
        self.save_profile(&profile)?;
        Ok(profile)
    }

    fn update_services<F>(&self, user_id: i64, apply: F) -> SocialResult<SocialServicesRecord>
    where
        F: FnOnce(&mut SocialServicesRecord),
    {
        self.database
            .with_transaction(|repos| {
                let services = repos.social_services();
                let mut record = services
                    .get(user_id)?
                    .unwrap_or_else(|| SocialServicesRecord::new(user_id));
                apply(&mut record);
                services.upsert(&record)?;
                Ok(record)
            })
            .map_err(SocialError::store)
    }

    fn save_profile(&self, profile: &ProfileRecord) -> SocialResult<()> {
        self.database
            .with_repositories(|repos| repos.profiles().update_fields(&profile.row))
            .map_err(SocialError::store)
    }
}

pub fn gravatar_url(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!("{GRAVATAR_BASE}{digest:x}")
}

fn fill_empty(field: &mut Option<String>, hint: Option<String>, limit: usize) {
    if field.as_deref().is_some_and(|value| !value.is_empty()) {
        return;
    }
    if let Some(hint) = hint.map(|hint| hint.trim().chars().take(limit).collect::<String>()) {
        if !hint.is_empty() {
            *field = Some(hint);
        }
    }
}
