use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{record_attachments, AttachmentPlan, ReconcileStrategy, StrategyReport};
use crate::driver::{DockerNetworkDriver, OperationOutcome};
use crate::resources::ResourceCatalog;
use crate::NetworkError;

/// Connects each running container of a resource individually
pub struct StandaloneStrategy {
    driver: Arc<DockerNetworkDriver>,
    catalog: Arc<dyn ResourceCatalog>,
}

impl StandaloneStrategy {
    pub fn new(driver: Arc<DockerNetworkDriver>, catalog: Arc<dyn ResourceCatalog>) -> Self {
        Self { driver, catalog }
    }
}

#[async_trait]
impl ReconcileStrategy for StandaloneStrategy {
    fn name(&self) -> &'static str {
        "standalone"
    }

    async fn apply(&self, plan: &AttachmentPlan) -> Result<StrategyReport, NetworkError> {
        let containers = self.catalog.container_names(&plan.resource).await?;
        let mut report = StrategyReport {
            targets: containers.len(),
            ..Default::default()
        };

        if containers.is_empty() {
            debug!(resource = %plan.resource, "No running containers to attach");
            return Ok(report);
        }

        for container in &containers {
            for network in &plan.networks {
                let outcome = self
                    .driver
                    .connect(
                        &plan.server,
                        &network.docker_network_name,
                        container,
                        &plan.aliases,
                        None,
                    )
                    .await
                    .required("connect", &network.docker_network_name)?;
                if outcome == OperationOutcome::Applied {
                    report.engine_calls += 1;
                }
            }

            if let Some(default_network) = &plan.leave_network {
                let outcome = self
                    .driver
                    .disconnect(&plan.server, default_network, container, true)
                    .await
                    .required("disconnect", default_network)?;
                if outcome == OperationOutcome::Applied {
                    report.engine_calls += 1;
                    info!(
                        server_id = plan.server.id,
                        container = %container,
                        network = %default_network,
                        "Disconnected container from default network"
                    );
                }
            }
        }

        report.attached_networks = record_attachments(self.driver.registry(), plan).await?;
        Ok(report)
    }
}
