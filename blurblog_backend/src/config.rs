use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BlurblogConfig {
    pub paths: BlurblogPaths,
    pub store: StoreConfig,
    pub index: IndexConfig,
    pub repair: RepairConfig,
}

impl BlurblogConfig {
    pub fn from_env() -> Result<Self> {
        let paths = match env::var("BLURBLOG_HOME") {
            Ok(raw) if !raw.trim().is_empty() => BlurblogPaths::from_base_dir(raw.trim())?,
            _ => BlurblogPaths::discover()?,
        };
        Ok(Self {
            paths,
            store: StoreConfig::from_env(),
            index: IndexConfig::from_env(),
            repair: RepairConfig::from_env(),
        })
    }

    pub fn new(paths: BlurblogPaths) -> Self {
        Self {
            paths,
            store: StoreConfig::default(),
            index: IndexConfig::default(),
            repair: RepairConfig::default(),
        }
    }
}

/// Client-side policy for the authoritative (SQLite) store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(250),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            busy_timeout: env_millis("BLURBLOG_STORE_BUSY_TIMEOUT_MS")
                .unwrap_or(defaults.busy_timeout),
        }
    }
}

/// Client-side policy for the set index.
///
/// Query-path reads use a short timeout so an unreachable or congested index
/// degrades a visibility query instead of blocking it.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub query_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_millis(500),
        }
    }
}

impl IndexConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            query_timeout: env_millis("BLURBLOG_INDEX_QUERY_TIMEOUT_MS")
                .unwrap_or(defaults.query_timeout),
            write_timeout: env_millis("BLURBLOG_INDEX_WRITE_TIMEOUT_MS")
                .unwrap_or(defaults.write_timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Period of the background repair task. `None` disables it.
    pub interval: Option<Duration>,
    /// Run one repair pass during node start, which also warms the index.
    pub on_start: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(3600)),
            on_start: true,
        }
    }
}

impl RepairConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = match env::var("BLURBLOG_REPAIR_INTERVAL_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.interval,
        };

        // Enabled by default unless explicitly disabled
        let on_start = env::var("BLURBLOG_REPAIR_ON_START")
            .ok()
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(defaults.on_start);

        Self { interval, on_start }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BlurblogPaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl BlurblogPaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("blurblog.db");

        Ok(Self {
            base,
            data_dir,
            db_path,
        })
    }
}
