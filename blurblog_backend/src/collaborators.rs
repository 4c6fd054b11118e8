//! Interfaces to systems this crate does not own: the account directory,
//! reader feed subscriptions and the story-body codec.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub email: String,
}

/// Username/email lookup by numeric user id.
pub trait AccountDirectory: Send + Sync {
    fn lookup(&self, user_id: i64) -> Result<Option<Account>>;
}

/// Number of reader feeds a user subscribes to.
pub trait SubscriptionCounter: Send + Sync {
    fn subscription_count(&self, user_id: i64) -> Result<u64>;
}

/// Opaque encoding for long story bodies at the persistence boundary.
pub trait ContentCodec: Send + Sync {
    fn compress(&self, text: &str) -> Result<Vec<u8>>;
    fn decompress(&self, bytes: &[u8]) -> Result<String>;
}

/// Injected handles to every external collaborator.
#[derive(Clone)]
pub struct Collaborators {
    pub accounts: Arc<dyn AccountDirectory>,
    pub subscriptions: Arc<dyn SubscriptionCounter>,
    pub codec: Arc<dyn ContentCodec>,
}

impl Collaborators {
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        subscriptions: Arc<dyn SubscriptionCounter>,
        codec: Arc<dyn ContentCodec>,
    ) -> Self {
        Self {
            accounts,
            subscriptions,
            codec,
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(
            Arc::new(StaticAccountDirectory::default()),
            Arc::new(StaticSubscriptionCounter::default()),
            Arc::new(ZstdCodec::default()),
        )
    }
}

/// In-memory account directory.
#[derive(Default)]
pub struct StaticAccountDirectory {
    accounts: RwLock<HashMap<i64, Account>>,
}

impl StaticAccountDirectory {
    pub fn insert(&self, user_id: i64, username: &str, email: &str) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(
                user_id,
                Account {
                    username: username.to_string(),
                    email: email.to_string(),
                },
            );
        }
    }
}

impl AccountDirectory for StaticAccountDirectory {
    fn lookup(&self, user_id: i64) -> Result<Option<Account>> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| anyhow::anyhow!("account directory lock poisoned"))?;
        Ok(accounts.get(&user_id).cloned())
    }
}

/// In-memory subscription counts; unknown users have none.
#[derive(Default)]
pub struct StaticSubscriptionCounter {
    counts: RwLock<HashMap<i64, u64>>,
}

impl StaticSubscriptionCounter {
    pub fn set(&self, user_id: i64, count: u64) {
        if let Ok(mut counts) = self.counts.write() {
            counts.insert(user_id, count);
        }
    }
}

impl SubscriptionCounter for StaticSubscriptionCounter {
    fn subscription_count(&self, user_id: i64) -> Result<u64> {
        let counts = self
            .counts
            .read()
            .map_err(|_| anyhow::anyhow!("subscription counter lock poisoned"))?;
        Ok(counts.get(&user_id).copied().unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ContentCodec for ZstdCodec {
    fn compress(&self, text: &str) -> Result<Vec<u8>> {
        zstd::encode_all(text.as_bytes(), self.level).context("zstd compression failed")
    }

    fn decompress(&self, bytes: &[u8]) -> Result<String> {
        let raw = zstd::decode_all(bytes).context("zstd decompression failed")?;
        String::from_utf8(raw).context("story content is not valid UTF-8")
    }
}
