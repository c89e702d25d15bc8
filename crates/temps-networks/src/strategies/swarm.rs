use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{record_attachments, AttachmentPlan, ReconcileStrategy, StrategyReport};
use crate::driver::{DockerNetworkDriver, ServiceNetworkAdd, ServiceNetworkAttachment};
use crate::resources::ResourceCatalog;
use crate::NetworkError;

/// Updates swarm service specs. Every network change rolls the service, so
/// all additions and removals for a service go into a single update.
pub struct SwarmStrategy {
    driver: Arc<DockerNetworkDriver>,
    catalog: Arc<dyn ResourceCatalog>,
}

impl SwarmStrategy {
    pub fn new(driver: Arc<DockerNetworkDriver>, catalog: Arc<dyn ResourceCatalog>) -> Self {
        Self { driver, catalog }
    }

    /// Names and ids the default network may appear under in a service spec
    async fn default_network_targets(&self, plan: &AttachmentPlan) -> Vec<String> {
        let Some(name) = &plan.leave_network else {
            return Vec::new();
        };
        let mut targets = vec![name.clone()];
        match self.driver.inspect(&plan.server, name).await {
            Ok(Some(details)) => targets.push(details.id),
            Ok(None) => {}
            Err(e) => warn!(
                server_id = plan.server.id,
                network = %name,
                "Could not inspect default network: {}",
                e
            ),
        }
        targets
    }
}

fn references(current: &[ServiceNetworkAttachment], candidates: &[&str]) -> bool {
    current
        .iter()
        .any(|attachment| candidates.iter().any(|c| !c.is_empty() && attachment.target == *c))
}

#[async_trait]
impl ReconcileStrategy for SwarmStrategy {
    fn name(&self) -> &'static str {
        "swarm"
    }

    async fn apply(&self, plan: &AttachmentPlan) -> Result<StrategyReport, NetworkError> {
        let services = self.catalog.service_names(&plan.resource).await?;
        let mut report = StrategyReport {
            targets: services.len(),
            ..Default::default()
        };

        if services.is_empty() {
            debug!(resource = %plan.resource, "No swarm services to attach");
            return Ok(report);
        }

        let default_targets = self.default_network_targets(plan).await;

        for service in &services {
            let current = self.driver.service_networks(&plan.server, service).await?;

            let add: Vec<ServiceNetworkAdd> = plan
                .networks
                .iter()
                .filter(|network| {
                    let id = network.docker_id.as_deref().unwrap_or_default();
                    !references(&current, &[network.docker_network_name.as_str(), id])
                })
                .map(|network| ServiceNetworkAdd {
                    network: network.docker_network_name.clone(),
                    aliases: plan.aliases.clone(),
                })
                .collect();

            let default_refs: Vec<&str> = default_targets.iter().map(String::as_str).collect();
            let remove: Vec<String> = match &plan.leave_network {
                Some(name) if references(&current, &default_refs) => vec![name.clone()],
                _ => Vec::new(),
            };

            if add.is_empty() && remove.is_empty() {
                debug!(service = %service, "Service networks already up to date");
                continue;
            }

            self.driver
                .update_service_networks(&plan.server, service, &add, &remove)
                .await
                .required("service update", service)?;
            report.engine_calls += 1;
            info!(
                server_id = plan.server.id,
                service = %service,
                added = add.len(),
                removed = remove.len(),
                "Updated service networks"
            );
        }

        report.attached_networks = record_attachments(self.driver.registry(), plan).await?;
        Ok(report)
    }
}
