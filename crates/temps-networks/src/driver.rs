//! Docker network driver
//!
//! Every primitive is idempotent: "already exists", "already connected" and
//! "not connected" answers from the engine are reported as
//! [`OperationOutcome::AlreadySatisfied`]. Engine failures are returned as
//! [`OperationOutcome::Failed`], never as `Err`; only registry writes can fail
//! with an error.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use temps_core::docker_label;
use temps_entities::{managed_networks, types::NetworkDriver};
use tracing::{debug, info, warn};

use crate::executor::{CommandExecutor, CommandOutput, ExecutorError, RemoteCommand};
use crate::registry::NetworkRegistry;
use crate::resources::Server;
use crate::NetworkError;

/// Result of an idempotent engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Applied,
    AlreadySatisfied,
    Failed(String),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, OperationOutcome::Failed(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            OperationOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Turn a failure into an error for callers that cannot continue without
    /// the operation.
    pub fn required(self, operation: &str, network: &str) -> Result<Self, NetworkError> {
        match self {
            OperationOutcome::Failed(message) => Err(NetworkError::Driver {
                operation: operation.to_string(),
                network: network.to_string(),
                message,
            }),
            other => Ok(other),
        }
    }
}

/// A container attached to a network, as reported by inspect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub name: String,
    pub ipv4_address: Option<String>,
}

/// Parsed `docker network inspect` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDetails {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub internal: bool,
    pub attachable: bool,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    pub labels: HashMap<String, String>,
    pub endpoints: Vec<NetworkEndpoint>,
}

/// One line of `docker network ls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub labels: HashMap<String, String>,
}

impl NetworkSummary {
    pub fn is_managed(&self) -> bool {
        self.labels
            .get(&docker_label("managed"))
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(&docker_label(key)).map(String::as_str)
    }
}

/// A network in a swarm service spec
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceNetworkAttachment {
    pub target: String,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
}

/// A network to add to a swarm service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNetworkAdd {
    pub network: String,
    pub aliases: Vec<String>,
}

impl ServiceNetworkAdd {
    fn to_arg(&self) -> String {
        let mut arg = format!("name={}", self.network);
        for alias in &self.aliases {
            arg.push_str(",alias=");
            arg.push_str(alias);
        }
        arg
    }
}

pub struct DockerNetworkDriver {
    executor: Arc<dyn CommandExecutor>,
    registry: NetworkRegistry,
    timeout: Duration,
}

impl DockerNetworkDriver {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        registry: NetworkRegistry,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            registry,
            timeout,
        }
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    async fn run(
        &self,
        server: &Server,
        command: RemoteCommand,
    ) -> Result<CommandOutput, ExecutorError> {
        self.executor.execute(server, &command, self.timeout).await
    }

    /// Create the engine network for a registry row and record the result.
    ///
    /// On success the engine id is captured by inspection and the row becomes
    /// `active`; any failure is persisted on the row as `error`.
    pub async fn create(
        &self,
        server: &Server,
        network: &managed_networks::Model,
    ) -> Result<OperationOutcome, NetworkError> {
        let name = network.docker_network_name.as_str();
        let outcome = match self.run(server, create_command(network)).await {
            Ok(output) => classify(&output, &["already exists"]),
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };

        if let OperationOutcome::Failed(reason) = &outcome {
            warn!(server_id = server.id, network = %name, "Failed to create network: {}", reason);
            self.registry.mark_error(network.id, reason).await?;
            return Ok(outcome);
        }

        match self.inspect(server, name).await {
            Ok(Some(details)) => {
                self.registry.mark_active(network.id, &details.id).await?;
                info!(
                    server_id = server.id,
                    network = %name,
                    docker_id = %details.id,
                    "Network is active"
                );
                Ok(outcome)
            }
            Ok(None) => {
                let reason = "network missing after create".to_string();
                self.registry.mark_error(network.id, &reason).await?;
                Ok(OperationOutcome::Failed(reason))
            }
            Err(e) => {
                let reason = e.to_string();
                self.registry.mark_error(network.id, &reason).await?;
                Ok(OperationOutcome::Failed(reason))
            }
        }
    }

    /// Remove the engine network and reset the row to `pending`.
    pub async fn delete(
        &self,
        server: &Server,
        network: &managed_networks::Model,
    ) -> Result<OperationOutcome, NetworkError> {
        let outcome = self
            .remove_network(server, &network.docker_network_name)
            .await;
        if outcome.is_success() {
            self.registry.reset_pending(network.id).await?;
        }
        Ok(outcome)
    }

    /// `docker network rm` without touching the registry
    pub async fn remove_network(&self, server: &Server, network_name: &str) -> OperationOutcome {
        let command = RemoteCommand::docker().args(["network", "rm", network_name]);
        let outcome = match self.run(server, command).await {
            Ok(output) => classify(&output, &["no such network", "not found"]),
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };
        log_outcome(server, network_name, "rm", &outcome);
        outcome
    }

    pub async fn connect(
        &self,
        server: &Server,
        network_name: &str,
        container: &str,
        aliases: &[String],
        ipv4_address: Option<&str>,
    ) -> OperationOutcome {
        let mut command = RemoteCommand::docker().args(["network", "connect"]);
        for alias in aliases {
            command = command.arg("--alias").arg(alias.as_str());
        }
        if let Some(ip) = ipv4_address {
            command = command.arg("--ip").arg(ip);
        }
        command = command.arg(network_name).arg(container);

        let outcome = match self.run(server, command).await {
            Ok(output) => classify(
                &output,
                &["already exists in network", "already attached", "already connected"],
            ),
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };
        debug!(
            server_id = server.id,
            network = %network_name,
            container = %container,
            "connect: {:?}",
            outcome
        );
        log_outcome(server, network_name, "connect", &outcome);
        outcome
    }

    pub async fn disconnect(
        &self,
        server: &Server,
        network_name: &str,
        container: &str,
        force: bool,
    ) -> OperationOutcome {
        let mut command = RemoteCommand::docker().args(["network", "disconnect"]);
        if force {
            command = command.arg("-f");
        }
        command = command.arg(network_name).arg(container);

        let outcome = match self.run(server, command).await {
            Ok(output) => classify(
                &output,
                &["is not connected", "no such container", "no such network", "not found"],
            ),
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };
        log_outcome(server, network_name, "disconnect", &outcome);
        outcome
    }

    /// `Ok(None)` means the network does not exist on the engine. Any other
    /// failure is an `Err` that callers treat as a warning.
    pub async fn inspect(
        &self,
        server: &Server,
        network_name: &str,
    ) -> Result<Option<NetworkDetails>, NetworkError> {
        let command = RemoteCommand::docker().args(["network", "inspect", network_name]);
        let output = self.run(server, command).await?;

        if !output.is_success() {
            let text = output.error_text().to_lowercase();
            if text.contains("no such network") || text.contains("not found") {
                return Ok(None);
            }
            return Err(NetworkError::Driver {
                operation: "inspect".to_string(),
                network: network_name.to_string(),
                message: output.error_text().to_string(),
            });
        }

        parse_inspect(&output.stdout).map_err(|e| NetworkError::Driver {
            operation: "inspect".to_string(),
            network: network_name.to_string(),
            message: format!("unreadable inspect output: {}", e),
        })
    }

    /// Enumerate engine networks, optionally only the ones we manage
    pub async fn list(
        &self,
        server: &Server,
        managed_only: bool,
    ) -> Result<Vec<NetworkSummary>, NetworkError> {
        let mut command = RemoteCommand::docker().args(["network", "ls"]);
        if managed_only {
            command = command
                .arg("--filter")
                .arg(format!("label={}=true", docker_label("managed")));
        }
        command = command.args(["--format", "{{json .}}"]);

        let output = self.run(server, command).await?;
        if !output.is_success() {
            return Err(NetworkError::Driver {
                operation: "list".to_string(),
                network: "*".to_string(),
                message: output.error_text().to_string(),
            });
        }
        Ok(parse_network_list(&output.stdout))
    }

    /// Networks currently in a swarm service spec
    pub async fn service_networks(
        &self,
        server: &Server,
        service: &str,
    ) -> Result<Vec<ServiceNetworkAttachment>, NetworkError> {
        let command = RemoteCommand::docker().args([
            "service",
            "inspect",
            service,
            "--format",
            "{{json .Spec.TaskTemplate.Networks}}",
        ]);
        let output = self.run(server, command).await?;
        if !output.is_success() {
            return Err(NetworkError::Driver {
                operation: "service inspect".to_string(),
                network: service.to_string(),
                message: output.error_text().to_string(),
            });
        }

        let trimmed = output.stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        serde_json::from_str(trimmed).map_err(|e| NetworkError::Driver {
            operation: "service inspect".to_string(),
            network: service.to_string(),
            message: format!("unreadable service networks: {}", e),
        })
    }

    /// One `docker service update` carrying every network change for the
    /// service. Each call rolls the service, so callers batch.
    pub async fn update_service_networks(
        &self,
        server: &Server,
        service: &str,
        add: &[ServiceNetworkAdd],
        remove: &[String],
    ) -> OperationOutcome {
        if add.is_empty() && remove.is_empty() {
            return OperationOutcome::AlreadySatisfied;
        }

        let mut command = RemoteCommand::docker().args(["service", "update", "--detach"]);
        for network in add {
            command = command.arg("--network-add").arg(network.to_arg());
        }
        for network in remove {
            command = command.arg("--network-rm").arg(network.as_str());
        }
        command = command.arg(service);

        let outcome = match self.run(server, command).await {
            Ok(output) => classify(&output, &[]),
            Err(e) => OperationOutcome::Failed(e.to_string()),
        };
        log_outcome(server, service, "service update", &outcome);
        outcome
    }
}

/// Build the `docker network create` command for a registry row
pub fn create_command(network: &managed_networks::Model) -> RemoteCommand {
    let mut command = RemoteCommand::docker()
        .args(["network", "create", "--driver"])
        .arg(network.driver.as_str());

    if network.is_internal {
        command = command.arg("--internal");
    }
    if network.driver == NetworkDriver::Overlay && network.is_attachable {
        command = command.arg("--attachable");
    }
    if let Some(subnet) = &network.subnet {
        command = command.arg("--subnet").arg(subnet.as_str());
    }
    if let Some(gateway) = &network.gateway {
        command = command.arg("--gateway").arg(gateway.as_str());
    }

    let mut options: BTreeMap<String, String> = network.option_pairs().into_iter().collect();
    if network.driver == NetworkDriver::Overlay && network.is_encrypted_overlay {
        options.insert("encrypted".to_string(), "true".to_string());
    }
    for (key, value) in options {
        command = command.arg("--opt").arg(format!("{}={}", key, value));
    }

    for (key, value) in ownership_labels(network) {
        command = command.arg("--label").arg(format!("{}={}", key, value));
    }

    command.arg(network.docker_network_name.as_str())
}

/// Labels identifying a network as ours; extra row labels are merged in
pub fn ownership_labels(network: &managed_networks::Model) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = network.label_pairs().into_iter().collect();
    labels.insert(docker_label("managed"), "true".to_string());
    labels.insert(docker_label("scope"), network.scope.as_str().to_string());
    labels.insert(docker_label("team.id"), network.team_id.to_string());
    labels.insert(docker_label("network"), network.uuid.to_string());
    if let Some(environment_id) = network.environment_id {
        labels.insert(docker_label("environment.id"), environment_id.to_string());
    }
    if let Some(project_id) = network.project_id {
        labels.insert(docker_label("project.id"), project_id.to_string());
    }
    labels
}

fn classify(output: &CommandOutput, satisfied: &[&str]) -> OperationOutcome {
    if output.is_success() {
        return OperationOutcome::Applied;
    }
    let text = output.error_text();
    let lowered = text.to_lowercase();
    if satisfied.iter().any(|needle| lowered.contains(needle)) {
        OperationOutcome::AlreadySatisfied
    } else if text.is_empty() {
        OperationOutcome::Failed(format!("exit code {}", output.exit_code))
    } else {
        OperationOutcome::Failed(text.to_string())
    }
}

fn log_outcome(server: &Server, network: &str, operation: &str, outcome: &OperationOutcome) {
    if let OperationOutcome::Failed(reason) = outcome {
        warn!(
            server_id = server.id,
            server = %server.name,
            network = %network,
            "docker {} failed: {}",
            operation,
            reason
        );
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetwork {
    id: String,
    name: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    internal: bool,
    #[serde(default)]
    attachable: bool,
    #[serde(default, rename = "IPAM")]
    ipam: Option<InspectedIpam>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(default)]
    containers: Option<HashMap<String, InspectedEndpoint>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedIpam {
    #[serde(default)]
    config: Option<Vec<InspectedIpamConfig>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedIpamConfig {
    #[serde(default)]
    subnet: Option<String>,
    #[serde(default)]
    gateway: Option<String>,
}

#[derive(Deserialize)]
struct InspectedEndpoint {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "IPv4Address", default)]
    ipv4_address: Option<String>,
}

/// Parse `docker network inspect` output (a JSON array)
pub fn parse_inspect(stdout: &str) -> Result<Option<NetworkDetails>, serde_json::Error> {
    let networks: Vec<InspectedNetwork> = serde_json::from_str(stdout.trim())?;
    Ok(networks.into_iter().next().map(|network| {
        let ipam = network
            .ipam
            .and_then(|ipam| ipam.config)
            .and_then(|config| config.into_iter().next());
        let mut endpoints: Vec<NetworkEndpoint> = network
            .containers
            .unwrap_or_default()
            .into_values()
            .filter(|endpoint| !endpoint.name.is_empty())
            .map(|endpoint| NetworkEndpoint {
                name: endpoint.name,
                ipv4_address: endpoint
                    .ipv4_address
                    .filter(|ip| !ip.is_empty())
                    .map(|ip| ip.split('/').next().unwrap_or_default().to_string()),
            })
            .collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));

        NetworkDetails {
            id: network.id,
            name: network.name,
            driver: network.driver,
            internal: network.internal,
            attachable: network.attachable,
            subnet: ipam.as_ref().and_then(|c| c.subnet.clone()),
            gateway: ipam.and_then(|c| c.gateway),
            labels: network.labels.unwrap_or_default(),
            endpoints,
        }
    }))
}

#[derive(Deserialize)]
struct ListedNetwork {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Driver", default)]
    driver: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

/// Parse `docker network ls --format '{{json .}}'` output, one object per line
pub fn parse_network_list(stdout: &str) -> Vec<NetworkSummary> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<ListedNetwork>(line) {
            Ok(network) => Some(NetworkSummary {
                id: network.id,
                name: network.name,
                driver: network.driver,
                labels: parse_label_string(&network.labels),
            }),
            Err(e) => {
                warn!("Skipping unreadable network list line: {}", e);
                None
            }
        })
        .collect()
}

/// `a=1,b=2` as printed by `docker network ls`
fn parse_label_string(labels: &str) -> HashMap<String, String> {
    labels
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}
