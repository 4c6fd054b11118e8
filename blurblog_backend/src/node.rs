use crate::bootstrap::{self, BootstrapResources};
use crate::collaborators::Collaborators;
use crate::config::BlurblogConfig;
use crate::database::Database;
use crate::error::{SocialError, SocialResult};
use crate::importer::FriendImporter;
use crate::index::{GraphIndex, InMemorySetIndex, SetIndex, ShareIndex};
use crate::profiles::ProfileService;
use crate::repair::{InvariantRepair, RepairReport};
use crate::shares::ShareService;
use crate::subscriptions::SubscriptionService;
use crate::visibility::VisibilityEngine;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Every service wired to the same store and index handles.
#[derive(Clone)]
pub struct Services {
    pub profiles: ProfileService,
    pub shares: ShareService,
    pub visibility: VisibilityEngine,
    pub subscriptions: SubscriptionService,
    pub importer: FriendImporter,
    pub repair: InvariantRepair,
}

impl Services {
    pub fn new(database: Database, index: Arc<dyn SetIndex>, collaborators: Collaborators) -> Self {
        let share_index = ShareIndex::new(index.clone());
        let profiles = ProfileService::new(
            database.clone(),
            GraphIndex::new(index.clone()),
            collaborators.clone(),
        );
        Self {
            shares: ShareService::new(
                database.clone(),
                share_index.clone(),
                profiles.clone(),
                collaborators.codec.clone(),
            ),
            visibility: VisibilityEngine::new(database.clone(), share_index),
            subscriptions: SubscriptionService::new(database.clone()),
            importer: FriendImporter::new(
                database.clone(),
                profiles.clone(),
                collaborators.accounts.clone(),
            ),
            repair: InvariantRepair::new(database, index, profiles.clone()),
            profiles,
        }
    }
}

/// Owns the store, the index and the background repair task for the
/// lifetime of the process.
pub struct BlurblogNode {
    config: BlurblogConfig,
    bootstrap: BootstrapResources,
    index: Arc<InMemorySetIndex>,
    services: Services,
    cancel: CancellationToken,
    repair_task: Option<JoinHandle<()>>,
}

impl BlurblogNode {
    /// Opens the store, builds the index (warming it with a repair pass
    /// when configured) and starts the periodic repair task.
    pub async fn start(config: BlurblogConfig, collaborators: Collaborators) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config)?;
        let index = Arc::new(InMemorySetIndex::new(&config.index));
        let backing: Arc<dyn SetIndex> = index.clone();
        let services = Services::new(bootstrap.database.clone(), backing, collaborators);

        if config.repair.on_start {
            match run_repair(services.repair.clone()).await {
                Ok(report) => tracing::info!(
                    members_added = report.members_added,
                    "index warmed from store"
                ),
                Err(err) => tracing::warn!(error = %err, "startup repair failed"),
            }
        }

        let cancel = CancellationToken::new();
        let repair_task = config.repair.interval.map(|period| {
            spawn_repair_task(services.repair.clone(), period, cancel.child_token())
        });

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            database_initialized = bootstrap.database_initialized,
            db_path = %config.paths.db_path.display(),
            repair_interval_secs = config.repair.interval.map(|period| period.as_secs()),
            "blurblog node initialized"
        );

        Ok(Self {
            config,
            bootstrap,
            index,
            services,
            cancel,
            repair_task,
        })
    }

    pub fn config(&self) -> &BlurblogConfig {
        &self.config
    }

    pub fn database(&self) -> Database {
        self.bootstrap.database.clone()
    }

    pub fn index(&self) -> Arc<InMemorySetIndex> {
        self.index.clone()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// One repair pass outside the periodic schedule.
    pub async fn repair_now(&self) -> SocialResult<RepairReport> {
        run_repair(self.services.repair.clone()).await
    }

    /// Stops the repair task and waits for an in-flight pass to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.repair_task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "repair task ended abnormally");
            }
        }
        tracing::info!("blurblog node stopped");
    }
}

async fn run_repair(repair: InvariantRepair) -> SocialResult<RepairReport> {
    tokio::task::spawn_blocking(move || repair.run())
        .await
        .map_err(|err| SocialError::store(anyhow::anyhow!("repair task panicked: {err}")))?
}

fn spawn_repair_task(
    repair: InvariantRepair,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; startup already covered it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = run_repair(repair.clone()).await {
                        tracing::warn!(error = %err, "periodic repair failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlurblogPaths;

    #[tokio::test]
    async fn start_warms_index_from_existing_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BlurblogConfig::new(BlurblogPaths::from_base_dir(dir.path()).unwrap());
        config.repair.interval = None;

        let first = BlurblogNode::start(config.clone(), Collaborators::default())
            .await
            .unwrap();
        first.services().profiles.follow(1, 2, false).unwrap();
        first.shutdown().await;

        let second = BlurblogNode::start(config, Collaborators::default())
            .await
            .unwrap();
        assert!(second.index().contains("F:1:F", 2).unwrap());
        second.shutdown().await;
    }

    #[tokio::test]
    async fn periodic_task_rebuilds_a_cleared_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BlurblogConfig::new(BlurblogPaths::from_base_dir(dir.path()).unwrap());
        config.repair.interval = Some(Duration::from_millis(10));
        config.repair.on_start = false;

        let node = BlurblogNode::start(config, Collaborators::default())
            .await
            .unwrap();
        node.services().profiles.follow(3, 4, false).unwrap();
        node.index().clear().unwrap();
        let mut restored = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if node.index().contains("F:4:f", 3).unwrap() {
                restored = true;
                break;
            }
        }
        assert!(restored, "periodic repair never rebuilt the index");
        node.shutdown().await;
    }
}
