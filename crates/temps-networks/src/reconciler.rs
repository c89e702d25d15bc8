//! Reconciliation of resources and servers against the engine

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use temps_core::docker_label;
use temps_database::DbConnection;
use temps_entities::{
    managed_networks, resource_networks,
    types::{NetworkDriver, NetworkScope, NetworkStatus},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{DockerNetworkDriver, NetworkSummary, OperationOutcome, ServiceNetworkAdd};
use crate::executor::CommandExecutor;
use crate::provisioner::ScopeProvisioner;
use crate::registry::{AttachmentUpdate, NetworkRegistry, NetworkSelector};
use crate::resources::{ClusterCapability, ResourceCatalog, ResourceRef, Server};
use crate::settings::{IsolationMode, NetworkSettings};
use crate::strategies::{
    AttachmentPlan, ReconcileStrategy, StandaloneStrategy, StrategyReport, SwarmStrategy,
};
use crate::topology::TopologyCache;
use crate::NetworkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do: management disabled, isolation off, or no environment
    Skipped(&'static str),
    Reconciled(StrategyReport),
}

/// Result of comparing registry rows with the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub checked: usize,
    pub refreshed: usize,
    pub recreated: usize,
    pub reattached: usize,
    pub orphaned: usize,
    pub failed: usize,
    pub unreachable: usize,
}

/// Result of importing engine networks into the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReverseSyncReport {
    pub seen: usize,
    pub discovered: usize,
    pub refreshed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerSyncReport {
    pub server_id: i32,
    pub drift: DriftReport,
    pub reverse: ReverseSyncReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FullReconcileReport {
    pub sync: ServerSyncReport,
    pub resources: usize,
    pub failed_resources: Vec<String>,
}

pub struct NetworkReconciler {
    catalog: Arc<dyn ResourceCatalog>,
    driver: Arc<DockerNetworkDriver>,
    provisioner: Arc<ScopeProvisioner>,
    topology: Arc<TopologyCache>,
    settings: Arc<NetworkSettings>,
    standalone: StandaloneStrategy,
    swarm: SwarmStrategy,
}

impl NetworkReconciler {
    pub fn new(
        db: Arc<DbConnection>,
        executor: Arc<dyn CommandExecutor>,
        catalog: Arc<dyn ResourceCatalog>,
        cluster: Arc<dyn ClusterCapability>,
        settings: NetworkSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let registry = NetworkRegistry::new(db);
        let driver = Arc::new(DockerNetworkDriver::new(
            executor,
            registry,
            settings.command_timeout(),
        ));
        let topology = Arc::new(TopologyCache::new(cluster, settings.topology_cache_ttl()));
        let provisioner = Arc::new(ScopeProvisioner::new(
            driver.clone(),
            topology.clone(),
            settings.clone(),
        ));

        Self {
            standalone: StandaloneStrategy::new(driver.clone(), catalog.clone()),
            swarm: SwarmStrategy::new(driver.clone(), catalog.clone()),
            catalog,
            driver,
            provisioner,
            topology,
            settings,
        }
    }

    pub fn registry(&self) -> &NetworkRegistry {
        self.driver.registry()
    }

    pub fn driver(&self) -> &DockerNetworkDriver {
        &self.driver
    }

    pub fn provisioner(&self) -> &ScopeProvisioner {
        &self.provisioner
    }

    pub fn topology(&self) -> &TopologyCache {
        &self.topology
    }

    pub fn catalog(&self) -> &Arc<dyn ResourceCatalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    /// Bring one resource's attachments in line with the isolation policy.
    ///
    /// Networks are created or confirmed before anything connects to them.
    pub async fn reconcile_resource(
        &self,
        resource: &ResourceRef,
    ) -> Result<ReconcileOutcome, NetworkError> {
        if !self.settings.enabled {
            return Ok(ReconcileOutcome::Skipped("network management disabled"));
        }
        if !self.settings.isolation_mode.auto_provisions() {
            return Ok(ReconcileOutcome::Skipped("isolation mode is none"));
        }

        let server = self.catalog.server(resource).await?;
        let Some(environment) = self.catalog.environment(resource).await? else {
            debug!(resource = %resource, "Resource has no environment, skipping");
            return Ok(ReconcileOutcome::Skipped("resource has no environment"));
        };

        let mut networks = vec![
            self.provisioner
                .ensure_environment_network(&environment, &server)
                .await?,
        ];
        if self.settings.proxy_isolation && self.catalog.is_externally_reachable(resource).await?
        {
            networks.push(self.provisioner.ensure_proxy_network(&server).await?);
        }

        let orchestrated = self.topology.is_orchestrated(&server).await?;
        let leave_network = (self.settings.isolation_mode == IsolationMode::Strict)
            .then(|| self.settings.default_network_for(orchestrated).to_string());

        let plan = AttachmentPlan {
            resource: *resource,
            aliases: self.catalog.network_aliases(resource).await?,
            server,
            networks,
            leave_network,
        };

        let strategy: &dyn ReconcileStrategy = if orchestrated {
            &self.swarm
        } else {
            &self.standalone
        };
        let report = strategy.apply(&plan).await?;
        info!(
            resource = %resource,
            server_id = plan.server.id,
            strategy = strategy.name(),
            targets = report.targets,
            engine_calls = report.engine_calls,
            "Reconciled resource networks"
        );
        Ok(ReconcileOutcome::Reconciled(report))
    }

    /// Sync the resource's server, then reconcile every resource on it
    pub async fn reconcile_full(
        &self,
        resource: &ResourceRef,
    ) -> Result<FullReconcileReport, NetworkError> {
        let server = self.catalog.server(resource).await?;
        let sync = self.sync_server(&server).await?;

        let mut report = FullReconcileReport {
            sync,
            ..Default::default()
        };
        for resource in self.catalog.resources_on_server(server.id).await? {
            report.resources += 1;
            if let Err(e) = self.reconcile_resource(&resource).await {
                warn!(resource = %resource, "Reconciliation failed: {}", e);
                report.failed_resources.push(resource.to_string());
            }
        }
        Ok(report)
    }

    /// Compare every registry row on a server with the engine.
    ///
    /// Rows whose network exists are refreshed. A missing `active` network is
    /// recreated unless it is unused and stale, in which case it is orphaned.
    pub async fn reconcile_server(&self, server: &Server) -> Result<DriftReport, NetworkError> {
        let mut report = DriftReport::default();
        let cutoff = Utc::now() - ChronoDuration::days(self.settings.orphan_retention_days);

        for network in self.registry().list_networks(Some(server.id)).await? {
            report.checked += 1;
            let name = network.docker_network_name.clone();

            match self.driver.inspect(server, &name).await {
                Ok(Some(details)) => {
                    self.registry().mark_active(network.id, &details.id).await?;
                    report.refreshed += 1;
                }
                Ok(None) => {
                    if network.status == NetworkStatus::Orphaned {
                        continue;
                    }

                    let attachments = self.registry().attachments_for_network(network.id).await?;
                    let last_seen = network.last_synced_at.unwrap_or(network.updated_at);
                    if attachments.is_empty() && last_seen < cutoff {
                        self.registry().mark_orphaned(network.id).await?;
                        info!(server_id = server.id, network = %name, "Marked network orphaned");
                        report.orphaned += 1;
                        continue;
                    }

                    if !attachments.is_empty() {
                        self.registry().mark_network_disconnected(network.id).await?;
                    }
                    if network.status != NetworkStatus::Active {
                        continue;
                    }

                    warn!(server_id = server.id, network = %name, "Network missing on engine, recreating");
                    match self.driver.create(server, &network).await? {
                        OperationOutcome::Failed(_) => report.failed += 1,
                        _ => {
                            report.recreated += 1;
                            let network = self.registry().find_by_id(network.id).await?;
                            report.reattached +=
                                self.reattach(server, &network, &attachments).await?;
                        }
                    }
                }
                Err(e) => {
                    warn!(server_id = server.id, network = %name, "Could not inspect network: {}", e);
                    report.unreachable += 1;
                }
            }
        }

        info!(
            server_id = server.id,
            checked = report.checked,
            recreated = report.recreated,
            reattached = report.reattached,
            orphaned = report.orphaned,
            failed = report.failed,
            "Drift check complete"
        );
        Ok(report)
    }

    /// Restore the memberships a recreated network lost. Attachments that
    /// cannot be restored stay disconnected until the resource reconciles.
    async fn reattach(
        &self,
        server: &Server,
        network: &managed_networks::Model,
        attachments: &[resource_networks::Model],
    ) -> Result<usize, NetworkError> {
        let mut reattached = 0;
        for attachment in attachments {
            let resource = ResourceRef::new(attachment.resource_type, attachment.resource_id);
            let aliases = attachment.alias_list();
            if let Err(e) = self
                .connect_resource(server, &resource, network, &aliases)
                .await
            {
                warn!(
                    resource = %resource,
                    network = %network.docker_network_name,
                    "Could not reattach resource: {}", e
                );
                continue;
            }
            self.registry()
                .upsert_attachment(
                    &resource,
                    network.id,
                    AttachmentUpdate {
                        aliases,
                        ipv4_address: None,
                        is_auto_attached: attachment.is_auto_attached,
                        is_connected: true,
                    },
                )
                .await?;
            reattached += 1;
        }
        Ok(reattached)
    }

    /// Import engine networks carrying our ownership label
    pub async fn sync_from_docker(
        &self,
        server: &Server,
    ) -> Result<ReverseSyncReport, NetworkError> {
        let mut report = ReverseSyncReport::default();

        for summary in self.driver.list(server, true).await? {
            if !summary.is_managed() {
                continue;
            }
            report.seen += 1;

            match self
                .registry()
                .find_by_engine_name(server.id, &summary.name)
                .await?
            {
                Some(existing) => {
                    if existing.status == NetworkStatus::Active
                        && existing.docker_id.as_deref() == Some(summary.id.as_str())
                    {
                        self.registry().touch_synced(existing.id, None).await?;
                    } else {
                        self.registry().mark_active(existing.id, &summary.id).await?;
                    }
                    report.refreshed += 1;
                }
                None => {
                    let selector = self.selector_from_labels(server, &summary).await?;
                    let model = self
                        .registry()
                        .register_discovered(selector, &summary.id)
                        .await?;
                    info!(
                        server_id = server.id,
                        network = %model.docker_network_name,
                        scope = %model.scope,
                        "Discovered managed network on engine"
                    );
                    report.discovered += 1;
                }
            }
        }

        Ok(report)
    }

    async fn selector_from_labels(
        &self,
        server: &Server,
        summary: &NetworkSummary,
    ) -> Result<NetworkSelector, NetworkError> {
        let scope = summary
            .label("scope")
            .and_then(NetworkScope::from_str)
            .unwrap_or(NetworkScope::Shared);
        let team_id = summary
            .label("team.id")
            .and_then(|v| v.parse().ok())
            .unwrap_or(server.team_id);

        let mut selector =
            NetworkSelector::new(summary.name.clone(), summary.name.clone(), server.id, team_id, scope);
        selector.driver = NetworkDriver::from_str(&summary.driver).unwrap_or(NetworkDriver::Bridge);
        selector.is_attachable = selector.driver == NetworkDriver::Overlay;
        selector.is_proxy_network = scope == NetworkScope::Proxy;
        selector.environment_id = summary.label("environment.id").and_then(|v| v.parse().ok());
        selector.project_id = summary.label("project.id").and_then(|v| v.parse().ok());

        if let Some(environment_uuid) = summary
            .label("environment")
            .and_then(|v| Uuid::parse_str(v).ok())
        {
            selector.labels = json!({ docker_label("environment"): environment_uuid.to_string() });
            if selector.environment_id.is_none() {
                if let Some(environment) = self.catalog.find_environment(environment_uuid).await? {
                    selector.name = environment.name;
                    selector.environment_id = Some(environment.id);
                    selector.project_id = Some(environment.project_id);
                }
            }
        }

        Ok(selector)
    }

    /// Drift check followed by reverse sync
    pub async fn sync_server(&self, server: &Server) -> Result<ServerSyncReport, NetworkError> {
        self.topology.invalidate(server.id).await;
        let drift = self.reconcile_server(server).await?;
        let reverse = self.sync_from_docker(server).await?;
        Ok(ServerSyncReport {
            server_id: server.id,
            drift,
            reverse,
        })
    }

    /// Delete orphaned rows that stayed unused past the retention window
    pub async fn prune_orphans(&self, server: &Server) -> Result<usize, NetworkError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.settings.orphan_retention_days);
        let mut pruned = 0;

        for network in self.registry().orphaned_before(server.id, cutoff).await? {
            if !self
                .registry()
                .attachments_for_network(network.id)
                .await?
                .is_empty()
            {
                continue;
            }
            self.registry().delete_network(network.id).await?;
            info!(server_id = server.id, network = %network.docker_network_name, "Pruned orphaned network");
            pruned += 1;
        }
        Ok(pruned)
    }

    /// Forget every attachment of a destroyed resource
    pub async fn detach_deleted_resource(&self, resource: &ResourceRef) -> Result<u64, NetworkError> {
        let removed = self
            .registry()
            .remove_attachments_for_resource(resource)
            .await?;
        if removed > 0 {
            info!(resource = %resource, removed, "Removed attachments of deleted resource");
        }
        Ok(removed)
    }

    /// Rows whose status is not `active`, for operator reporting
    pub async fn unhealthy_networks(
        &self,
        server_id: i32,
    ) -> Result<Vec<managed_networks::Model>, NetworkError> {
        Ok(self
            .registry()
            .list_networks(Some(server_id))
            .await?
            .into_iter()
            .filter(|network| !network.is_active())
            .collect())
    }

    /// Connect a resource's containers, or add the network to its swarm
    /// services
    pub async fn connect_resource(
        &self,
        server: &Server,
        resource: &ResourceRef,
        network: &managed_networks::Model,
        aliases: &[String],
    ) -> Result<(), NetworkError> {
        let catalog = &self.catalog;
        if self.topology.is_orchestrated(server).await? {
            let services = catalog.service_names(resource).await?;
            return self.add_to_services(server, &services, network, aliases).await;
        }

        for container in catalog.container_names(resource).await? {
            self.driver
                .connect(
                    server,
                    &network.docker_network_name,
                    &container,
                    aliases,
                    None,
                )
                .await
                .required("connect", &network.docker_network_name)?;
        }
        Ok(())
    }

    pub async fn add_to_services(
        &self,
        server: &Server,
        services: &[String],
        network: &managed_networks::Model,
        aliases: &[String],
    ) -> Result<(), NetworkError> {
        let driver = &self.driver;
        for service in services {
            let current = driver.service_networks(server, service).await?;
            let id = network.docker_id.as_deref().unwrap_or_default();
            if current
                .iter()
                .any(|a| a.target == network.docker_network_name || (!id.is_empty() && a.target == id))
            {
                continue;
            }
            let add = [ServiceNetworkAdd {
                network: network.docker_network_name.clone(),
                aliases: aliases.to_vec(),
            }];
            driver
                .update_service_networks(server, service, &add, &[])
                .await
                .required("service update", service)?;
        }
        Ok(())
    }

    pub async fn disconnect_resource(
        &self,
        server: &Server,
        resource: &ResourceRef,
        network: &managed_networks::Model,
    ) -> Result<(), NetworkError> {
        let name = network.docker_network_name.as_str();

        if self.topology.is_orchestrated(server).await? {
            let services = self.catalog.service_names(resource).await?;
            return self.remove_from_services(server, &services, network).await;
        }

        for container in self.catalog.container_names(resource).await? {
            self.driver
                .disconnect(server, name, &container, false)
                .await
                .required("disconnect", name)?;
        }
        Ok(())
    }

    /// Drop the network from every listed service spec that still has it
    pub async fn remove_from_services(
        &self,
        server: &Server,
        services: &[String],
        network: &managed_networks::Model,
    ) -> Result<(), NetworkError> {
        let name = network.docker_network_name.as_str();
        let id = network.docker_id.as_deref().unwrap_or_default();
        for service in services {
            let current = self.driver.service_networks(server, service).await?;
            if !current
                .iter()
                .any(|a| a.target == name || (!id.is_empty() && a.target == id))
            {
                continue;
            }
            self.driver
                .update_service_networks(server, service, &[], &[name.to_string()])
                .await
                .required("service update", service)?;
        }
        Ok(())
    }
}
