//! Scope provisioner
//!
//! Resolves the one network a scope maps to on a server. The registry row is
//! claimed first, so concurrent callers agree on the network before it
//! exists on the engine; the engine object is created only while the row
//! still needs it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use temps_core::{docker_label, generate_slug, random_identifier};
use temps_entities::{
    managed_networks,
    types::{NetworkDriver, NetworkScope},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::driver::{DockerNetworkDriver, OperationOutcome};
use crate::registry::NetworkSelector;
use crate::resources::{EnvironmentRef, ProjectRef, Server};
use crate::settings::NetworkSettings;
use crate::topology::TopologyCache;
use crate::NetworkError;

/// User-supplied shape of a shared network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedNetworkRequest {
    pub name: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

pub struct ScopeProvisioner {
    driver: Arc<DockerNetworkDriver>,
    topology: Arc<TopologyCache>,
    settings: Arc<NetworkSettings>,
}

impl ScopeProvisioner {
    pub fn new(
        driver: Arc<DockerNetworkDriver>,
        topology: Arc<TopologyCache>,
        settings: Arc<NetworkSettings>,
    ) -> Self {
        Self {
            driver,
            topology,
            settings,
        }
    }

    /// Engine name for a scope: `{prefix}-{scope}-{identifier}`
    pub fn network_name(&self, scope: NetworkScope, identifier: &str) -> String {
        format!(
            "{}-{}-{}",
            self.settings.name_prefix,
            scope.name_token(),
            identifier
        )
    }

    pub async fn ensure_environment_network(
        &self,
        environment: &EnvironmentRef,
        server: &Server,
    ) -> Result<managed_networks::Model, NetworkError> {
        let docker_name =
            self.network_name(NetworkScope::Environment, &short_uuid(&environment.uuid));
        let mut selector = NetworkSelector::new(
            environment.name.clone(),
            docker_name,
            server.id,
            environment.team_id,
            NetworkScope::Environment,
        );
        selector.project_id = Some(environment.project_id);
        selector.environment_id = Some(environment.id);
        selector.labels = json!({ docker_label("environment"): environment.uuid.to_string() });

        self.ensure(server, selector).await
    }

    pub async fn ensure_project_network(
        &self,
        project: &ProjectRef,
        server: &Server,
    ) -> Result<managed_networks::Model, NetworkError> {
        let docker_name = self.network_name(NetworkScope::Project, &short_uuid(&project.uuid));
        let mut selector = NetworkSelector::new(
            project.name.clone(),
            docker_name,
            server.id,
            project.team_id,
            NetworkScope::Project,
        );
        selector.project_id = Some(project.id);

        self.ensure(server, selector).await
    }

    /// One proxy network per server
    pub async fn ensure_proxy_network(
        &self,
        server: &Server,
    ) -> Result<managed_networks::Model, NetworkError> {
        let docker_name = self.network_name(NetworkScope::Proxy, &server.id.to_string());
        let mut selector = NetworkSelector::new(
            "proxy",
            docker_name,
            server.id,
            server.team_id,
            NetworkScope::Proxy,
        );
        selector.is_proxy_network = true;

        self.ensure(server, selector).await
    }

    /// A user-named network. Asking again for the same name on the same
    /// server returns the existing network.
    pub async fn ensure_shared_network(
        &self,
        request: &SharedNetworkRequest,
        server: &Server,
        team_id: i32,
    ) -> Result<managed_networks::Model, NetworkError> {
        let slug = generate_slug(&request.name);
        if slug.is_empty() {
            return Err(NetworkError::Validation {
                message: format!("'{}' is not a usable network name", request.name),
            });
        }

        let existing = self
            .driver
            .registry()
            .find_by_scope_name(server.id, team_id, NetworkScope::Shared, &request.name)
            .await?;
        if let Some(network) = existing {
            debug!(server_id = server.id, network = %network.docker_network_name, "Shared network already registered");
            return self.materialize(server, network).await;
        }

        let identifier = format!("{}-{}", slug, random_identifier(6));
        let mut selector = NetworkSelector::new(
            request.name.clone(),
            self.network_name(NetworkScope::Shared, &identifier),
            server.id,
            team_id,
            NetworkScope::Shared,
        );
        selector.is_internal = request.internal;
        selector.subnet = request.subnet.clone();
        selector.gateway = request.gateway.clone();

        self.ensure(server, selector).await
    }

    /// Register the server's default network as a `system` row. It is never
    /// deleted through the normal delete path.
    pub async fn ensure_system_network(
        &self,
        server: &Server,
    ) -> Result<managed_networks::Model, NetworkError> {
        let orchestrated = self.topology.is_orchestrated(server).await?;
        let docker_name = self.settings.default_network_for(orchestrated).to_string();
        let selector = NetworkSelector::new(
            "default",
            docker_name,
            server.id,
            server.team_id,
            NetworkScope::System,
        );

        self.ensure(server, selector).await
    }

    async fn ensure(
        &self,
        server: &Server,
        mut selector: NetworkSelector,
    ) -> Result<managed_networks::Model, NetworkError> {
        if !self.settings.enabled {
            return Err(NetworkError::Disabled);
        }

        if self.topology.is_orchestrated(server).await? {
            selector.driver = NetworkDriver::Overlay;
            selector.is_attachable = true;
            selector.is_encrypted_overlay = self.settings.swarm_overlay_encryption;
        }

        let (network, created) = self
            .driver
            .registry()
            .find_or_create_network(selector, Some(self.settings.max_networks_per_server))
            .await?;
        if created {
            info!(
                server_id = server.id,
                network = %network.docker_network_name,
                scope = %network.scope,
                "Provisioning network"
            );
        }

        self.materialize(server, network).await
    }

    /// Create the engine object if the row is not `active` yet
    async fn materialize(
        &self,
        server: &Server,
        network: managed_networks::Model,
    ) -> Result<managed_networks::Model, NetworkError> {
        if !network.status.needs_materialization() {
            return Ok(network);
        }

        match self.driver.create(server, &network).await? {
            OperationOutcome::Failed(message) => Err(NetworkError::NetworkNotReady {
                network: network.docker_network_name,
                message,
            }),
            _ => self.driver.registry().find_by_id(network.id).await,
        }
    }
}

/// First 12 hex characters of a uuid, stable for the lifetime of the entity
fn short_uuid(uuid: &Uuid) -> String {
    uuid.simple().to_string()[..12].to_string()
}
