//! Periodic drift check of every server

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::resources::ResourceCatalog;
use crate::scheduler::{ReconcileScheduler, ReconcileTask};

/// Submits a server sync for every known server once per interval
pub struct DriftMonitor {
    catalog: Arc<dyn ResourceCatalog>,
    scheduler: ReconcileScheduler,
    interval: Duration,
}

impl DriftMonitor {
    pub fn new(
        catalog: Arc<dyn ResourceCatalog>,
        scheduler: ReconcileScheduler,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            scheduler,
            interval,
        }
    }

    /// Run forever; spawn this in its own task
    pub async fn start(&self) {
        info!(
            "Network drift monitor started (interval: {}s)",
            self.interval.as_secs()
        );
        loop {
            sleep(self.interval).await;
            self.tick().await;
        }
    }

    /// One pass over all servers. Returns how many syncs were scheduled.
    pub async fn tick(&self) -> usize {
        let servers = match self.catalog.servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Drift monitor could not list servers: {}", e);
                return 0;
            }
        };

        let mut scheduled = 0;
        for server in servers {
            if self
                .scheduler
                .submit(ReconcileTask::Server(server.id))
                .await
                .is_scheduled()
            {
                scheduled += 1;
            } else {
                debug!(server_id = server.id, "Sync already running, skipping");
            }
        }
        scheduled
    }
}
