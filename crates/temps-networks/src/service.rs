//! Administrative surface of the network engine
//!
//! Configuration errors are returned synchronously here and never queued.

use serde::Serialize;
use std::sync::Arc;
use temps_entities::{managed_networks, resource_networks, types::NetworkScope};
use tracing::{debug, info, warn};

use crate::driver::OperationOutcome;
use crate::provisioner::SharedNetworkRequest;
use crate::reconciler::{NetworkReconciler, ServerSyncReport};
use crate::registry::AttachmentUpdate;
use crate::resources::{ResourceRef, Server};
use crate::scheduler::{ReconcileScheduler, ReconcileTask, Submission};
use crate::NetworkError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxyMigrationReport {
    pub network_id: i32,
    pub network_name: String,
    pub proxy_connected: bool,
    pub resources_attached: usize,
    pub failed_resources: Vec<String>,
}

pub struct NetworkService {
    reconciler: Arc<NetworkReconciler>,
    scheduler: ReconcileScheduler,
}

impl NetworkService {
    pub fn new(reconciler: Arc<NetworkReconciler>, scheduler: ReconcileScheduler) -> Self {
        Self {
            reconciler,
            scheduler,
        }
    }

    pub fn reconciler(&self) -> &Arc<NetworkReconciler> {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &ReconcileScheduler {
        &self.scheduler
    }

    fn ensure_enabled(&self) -> Result<(), NetworkError> {
        if self.reconciler.settings().enabled {
            Ok(())
        } else {
            Err(NetworkError::Disabled)
        }
    }

    pub async fn list_networks(
        &self,
        server_id: Option<i32>,
    ) -> Result<Vec<managed_networks::Model>, NetworkError> {
        self.reconciler.registry().list_networks(server_id).await
    }

    pub async fn list_attachments(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<resource_networks::Model>, NetworkError> {
        self.reconciler.registry().list_attachments(resource).await
    }

    pub async fn create_shared_network(
        &self,
        server_id: i32,
        team_id: i32,
        request: SharedNetworkRequest,
    ) -> Result<managed_networks::Model, NetworkError> {
        self.ensure_enabled()?;
        if request.name.trim().is_empty() {
            return Err(NetworkError::Validation {
                message: "Network name is required".to_string(),
            });
        }
        if request.gateway.is_some() && request.subnet.is_none() {
            return Err(NetworkError::Validation {
                message: "A gateway requires a subnet".to_string(),
            });
        }

        let server = self.reconciler.catalog().find_server(server_id).await?;
        let network = self
            .reconciler
            .provisioner()
            .ensure_shared_network(&request, &server, team_id)
            .await?;
        info!(
            server_id,
            network = %network.docker_network_name,
            "Created shared network"
        );
        Ok(network)
    }

    /// Delete a shared, project or proxy network. On swarm the network is
    /// first dropped from the service specs using it, then every endpoint
    /// still reported by the engine is disconnected.
    pub async fn delete_network(&self, network_id: i32) -> Result<(), NetworkError> {
        self.ensure_enabled()?;
        let network = self.reconciler.registry().find_by_id(network_id).await?;
        if !network.scope.is_deletable() {
            return Err(NetworkError::ProtectedNetwork {
                scope: network.scope,
            });
        }

        let server = self
            .reconciler
            .catalog()
            .find_server(network.server_id)
            .await?;
        let driver = self.reconciler.driver();
        let name = network.docker_network_name.as_str();

        if self.reconciler.topology().is_orchestrated(&server).await? {
            let services = self.services_using(&network).await?;
            self.reconciler
                .remove_from_services(&server, &services, &network)
                .await?;
        }

        if let Some(details) = driver.inspect(&server, name).await? {
            for endpoint in &details.endpoints {
                driver
                    .disconnect(&server, name, &endpoint.name, true)
                    .await
                    .required("disconnect", name)?;
            }
        }

        driver
            .delete(&server, &network)
            .await?
            .required("rm", name)?;
        self.reconciler.registry().delete_network(network.id).await?;
        info!(server_id = server.id, network = %name, "Deleted network");
        Ok(())
    }

    /// Swarm services whose specs may reference the network: those of every
    /// attached resource, plus the proxy for a proxy network
    async fn services_using(
        &self,
        network: &managed_networks::Model,
    ) -> Result<Vec<String>, NetworkError> {
        let catalog = self.reconciler.catalog();
        let mut services = Vec::new();
        for attachment in self
            .reconciler
            .registry()
            .attachments_for_network(network.id)
            .await?
        {
            let resource = ResourceRef::new(attachment.resource_type, attachment.resource_id);
            match catalog.service_names(&resource).await {
                Ok(names) => services.extend(names),
                Err(NetworkError::NotFound(_)) => {
                    debug!(resource = %resource, "Attached resource no longer exists")
                }
                Err(e) => return Err(e),
            }
        }
        if network.is_proxy_network {
            services.push(self.reconciler.settings().proxy_container_name.clone());
        }
        services.sort();
        services.dedup();
        Ok(services)
    }

    /// Drift check and reverse sync, run now
    pub async fn sync_server(&self, server_id: i32) -> Result<ServerSyncReport, NetworkError> {
        self.ensure_enabled()?;
        let server = self.reconciler.catalog().find_server(server_id).await?;
        self.reconciler.sync_server(&server).await
    }

    /// Drift check and reverse sync, queued
    pub async fn request_server_sync(&self, server_id: i32) -> Result<Submission, NetworkError> {
        self.ensure_enabled()?;
        Ok(self.scheduler.submit(ReconcileTask::Server(server_id)).await)
    }

    /// Manually attach a resource to a network on its server
    pub async fn attach_resource(
        &self,
        resource: &ResourceRef,
        network_id: i32,
        aliases: Option<Vec<String>>,
    ) -> Result<resource_networks::Model, NetworkError> {
        self.ensure_enabled()?;
        let network = self.reconciler.registry().find_by_id(network_id).await?;
        let server = self.reconciler.catalog().server(resource).await?;
        if server.id != network.server_id {
            return Err(NetworkError::Validation {
                message: format!(
                    "{} runs on server {} but network {} belongs to server {}",
                    resource, server.id, network.docker_network_name, network.server_id
                ),
            });
        }

        let network = self.ready(&server, network).await?;
        let aliases = match aliases {
            Some(aliases) => aliases,
            None => self.reconciler.catalog().network_aliases(resource).await?,
        };

        self.reconciler.connect_resource(&server, resource, &network, &aliases)
            .await?;
        self.reconciler
            .registry()
            .upsert_attachment(
                resource,
                network.id,
                AttachmentUpdate {
                    aliases,
                    ipv4_address: None,
                    is_auto_attached: false,
                    is_connected: true,
                },
            )
            .await
    }

    /// Manually detach a resource. Auto-attached environment links are
    /// rejected and left untouched.
    pub async fn detach_resource(
        &self,
        resource: &ResourceRef,
        network_id: i32,
    ) -> Result<(), NetworkError> {
        self.ensure_enabled()?;
        let registry = self.reconciler.registry();
        let network = registry.find_by_id(network_id).await?;
        let attachment = registry
            .find_attachment(resource, network_id)
            .await?
            .ok_or_else(|| {
                NetworkError::NotFound(format!(
                    "attachment of {} to network {}",
                    resource, network.docker_network_name
                ))
            })?;

        if attachment.is_auto_attached && network.scope == NetworkScope::Environment {
            return Err(NetworkError::AutoAttachedEnvironment);
        }

        let server = self
            .reconciler
            .catalog()
            .find_server(network.server_id)
            .await?;
        self.reconciler.disconnect_resource(&server, resource, &network).await?;
        registry.remove_attachment(resource, network_id).await?;
        info!(
            resource = %resource,
            network = %network.docker_network_name,
            "Detached resource from network"
        );
        Ok(())
    }

    /// Create the proxy network, connect the proxy to it and attach every
    /// externally reachable resource. Existing networks are left in place.
    pub async fn migrate_to_proxy_isolation(
        &self,
        server_id: i32,
    ) -> Result<ProxyMigrationReport, NetworkError> {
        self.ensure_enabled()?;
        let catalog = self.reconciler.catalog().clone();
        let server = catalog.find_server(server_id).await?;
        let network = self
            .reconciler
            .provisioner()
            .ensure_proxy_network(&server)
            .await?;

        let mut report = ProxyMigrationReport {
            network_id: network.id,
            network_name: network.docker_network_name.clone(),
            ..Default::default()
        };

        let proxy = self.reconciler.settings().proxy_container_name.clone();
        let orchestrated = self.reconciler.topology().is_orchestrated(&server).await?;
        if orchestrated {
            self.reconciler.add_to_services(&server, &[proxy], &network, &[]).await?;
        } else {
            self.reconciler
                .driver()
                .connect(&server, &network.docker_network_name, &proxy, &[], None)
                .await
                .required("connect", &network.docker_network_name)?;
        }
        report.proxy_connected = true;

        for resource in catalog.resources_on_server(server.id).await? {
            match self.attach_to_proxy(&server, &resource, &network).await {
                Ok(true) => report.resources_attached += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(resource = %resource, "Could not attach to proxy network: {}", e);
                    report.failed_resources.push(resource.to_string());
                }
            }
        }

        info!(
            server_id,
            attached = report.resources_attached,
            failed = report.failed_resources.len(),
            "Migrated server to proxy isolation"
        );
        Ok(report)
    }

    async fn attach_to_proxy(
        &self,
        server: &Server,
        resource: &ResourceRef,
        network: &managed_networks::Model,
    ) -> Result<bool, NetworkError> {
        let catalog = self.reconciler.catalog();
        if !catalog.is_externally_reachable(resource).await? {
            return Ok(false);
        }
        let aliases = catalog.network_aliases(resource).await?;
        self.reconciler.connect_resource(server, resource, network, &aliases)
            .await?;
        self.reconciler
            .registry()
            .upsert_attachment(
                resource,
                network.id,
                AttachmentUpdate {
                    aliases,
                    ipv4_address: None,
                    is_auto_attached: true,
                    is_connected: true,
                },
            )
            .await?;
        Ok(true)
    }

    /// Deploy trigger. Skipped when auto-provisioning is off.
    pub async fn on_resource_deployed(&self, resource: ResourceRef) -> Option<Submission> {
        if !self.reconciler.settings().auto_provisioning_enabled() {
            debug!(resource = %resource, "Auto-provisioning disabled, ignoring deploy");
            return None;
        }
        let delay = self.reconciler.settings().post_deploy_delay();
        Some(
            self.scheduler
                .submit_after(ReconcileTask::Resource(resource), delay)
                .await,
        )
    }

    /// Delete trigger
    pub async fn on_resource_deleted(&self, resource: ResourceRef) -> Submission {
        self.scheduler.submit(ReconcileTask::Cleanup(resource)).await
    }

    /// Materialize a network that is not active yet
    async fn ready(
        &self,
        server: &Server,
        network: managed_networks::Model,
    ) -> Result<managed_networks::Model, NetworkError> {
        if !network.status.needs_materialization() {
            return Ok(network);
        }
        match self.reconciler.driver().create(server, &network).await? {
            OperationOutcome::Failed(message) => Err(NetworkError::NetworkNotReady {
                network: network.docker_network_name,
                message,
            }),
            _ => self.reconciler.registry().find_by_id(network.id).await,
        }
    }
}
