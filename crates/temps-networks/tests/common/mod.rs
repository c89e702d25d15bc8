//! Shared fixtures: an in-process docker engine, a static resource catalog
//! and a fully wired reconciler over a migrated in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use temps_database::test_utils::TestDatabase;
use temps_networks::{
    ClusterCapability, CommandExecutor, CommandOutput, EnvironmentRef, ExecutorError,
    NetworkError, NetworkReconciler, NetworkService, NetworkSettings, ReconcileScheduler,
    RemoteCommand, ResourceCatalog, ResourceRef, Server,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FakeNetwork {
    pub id: String,
    pub driver: String,
    pub internal: bool,
    pub attachable: bool,
    pub labels: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    pub containers: BTreeSet<String>,
}

#[derive(Default)]
struct EngineState {
    networks: BTreeMap<String, FakeNetwork>,
    /// service name -> network ids in its spec
    services: BTreeMap<String, Vec<String>>,
    commands: Vec<RemoteCommand>,
    /// (substring of the command line, stderr) failing once each
    failures: Vec<(String, String)>,
    unreachable: bool,
    next_id: u32,
}

/// Docker daemon double that understands the network and service commands
/// the driver issues.
#[derive(Default)]
pub struct FakeDockerEngine {
    state: Mutex<EngineState>,
}

impl FakeDockerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing network, e.g. the default network
    pub fn add_network(&self, name: &str, driver: &str) -> String {
        let mut state = self.state.lock().unwrap();
        Self::insert_network(&mut state, name, driver, BTreeMap::new())
    }

    pub fn add_labeled_network(&self, name: &str, labels: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::insert_network(&mut state, name, "bridge", labels)
    }

    /// Simulate an out-of-band `docker network rm`
    pub fn remove_network_externally(&self, name: &str) {
        self.state.lock().unwrap().networks.remove(name);
    }

    pub fn add_container(&self, network: &str, container: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(net) = state.networks.get_mut(network) {
            net.containers.insert(container.to_string());
        }
    }

    pub fn add_service(&self, service: &str, networks: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let ids = networks
            .iter()
            .filter_map(|name| state.networks.get(*name).map(|n| n.id.clone()))
            .collect();
        state.services.insert(service.to_string(), ids);
    }

    pub fn network(&self, name: &str) -> Option<FakeNetwork> {
        self.state.lock().unwrap().networks.get(name).cloned()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.network(name).is_some()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state.lock().unwrap().networks.keys().cloned().collect()
    }

    pub fn is_connected(&self, network: &str, container: &str) -> bool {
        self.network(network)
            .map(|n| n.containers.contains(container))
            .unwrap_or(false)
    }

    /// Network names in a service spec
    pub fn service_network_names(&self, service: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let ids = state.services.get(service).cloned().unwrap_or_default();
        ids.iter()
            .filter_map(|id| {
                state
                    .networks
                    .iter()
                    .find(|(_, n)| &n.id == id)
                    .map(|(name, _)| name.clone())
            })
            .collect()
    }

    /// Fail the next command whose command line contains `pattern`
    pub fn fail_next(&self, pattern: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), stderr.to_string()));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Commands starting with the given docker arguments
    pub fn commands_starting_with(&self, prefix: &[&str]) -> Vec<RemoteCommand> {
        self.commands()
            .into_iter()
            .filter(|c| {
                c.args.len() >= prefix.len() && c.args.iter().zip(prefix).all(|(a, p)| a == p)
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.lock().unwrap().commands.clear();
    }

    fn insert_network(
        state: &mut EngineState,
        name: &str,
        driver: &str,
        labels: BTreeMap<String, String>,
    ) -> String {
        state.next_id += 1;
        let id = format!("{:012x}", 0xabc000 + state.next_id);
        state.networks.insert(
            name.to_string(),
            FakeNetwork {
                id: id.clone(),
                driver: driver.to_string(),
                internal: false,
                attachable: driver == "overlay",
                labels,
                options: BTreeMap::new(),
                containers: BTreeSet::new(),
            },
        );
        id
    }

    fn handle(&self, command: &RemoteCommand) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.clone());

        let line = command.to_shell();
        if let Some(index) = state
            .failures
            .iter()
            .position(|(pattern, _)| line.contains(pattern.as_str()))
        {
            let (_, stderr) = state.failures.remove(index);
            return CommandOutput::failure(1, stderr);
        }

        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["network", "create", rest @ ..] => Self::create(&mut state, rest),
            ["network", "rm", name] => {
                let in_use = state.networks.get(*name).and_then(|net| {
                    state
                        .services
                        .iter()
                        .find(|(_, ids)| ids.contains(&net.id))
                        .map(|(service, _)| service.clone())
                });
                if let Some(service) = in_use {
                    return CommandOutput::failure(
                        1,
                        format!(
                            "Error response from daemon: rpc error: code = FailedPrecondition desc = network {} is in use by service {}",
                            name, service
                        ),
                    );
                }
                match state.networks.remove(*name) {
                    Some(_) => CommandOutput::success(format!("{}\n", name)),
                    None => not_found(name),
                }
            }
            ["network", "connect", rest @ ..] => {
                let (network, container) = positional_pair(rest, &["--alias", "--ip"]);
                match state.networks.get_mut(network) {
                    None => not_found(network),
                    Some(net) if net.containers.contains(container) => CommandOutput::failure(
                        1,
                        format!(
                            "Error response from daemon: endpoint with name {} already exists in network {}",
                            container, network
                        ),
                    ),
                    Some(net) => {
                        net.containers.insert(container.to_string());
                        CommandOutput::success("")
                    }
                }
            }
            ["network", "disconnect", rest @ ..] => {
                let (network, container) = positional_pair(rest, &[]);
                match state.networks.get_mut(network) {
                    None => not_found(network),
                    Some(net) => {
                        if net.containers.remove(container) {
                            CommandOutput::success("")
                        } else {
                            CommandOutput::failure(
                                1,
                                format!(
                                    "Error response from daemon: container {} is not connected to network {}",
                                    container, network
                                ),
                            )
                        }
                    }
                }
            }
            ["network", "inspect", name] => match state.networks.get(*name) {
                None => CommandOutput {
                    exit_code: 1,
                    stdout: "[]\n".to_string(),
                    stderr: format!("Error: No such network: {}", name),
                },
                Some(net) => CommandOutput::success(inspect_json(name, net)),
            },
            ["network", "ls", rest @ ..] => {
                let filter = rest
                    .windows(2)
                    .find(|w| w[0] == "--filter")
                    .and_then(|w| w[1].strip_prefix("label="))
                    .and_then(|f| f.split_once('='));
                let lines: Vec<String> = state
                    .networks
                    .iter()
                    .filter(|(_, net)| match filter {
                        Some((key, value)) => net.labels.get(key).map(String::as_str) == Some(value),
                        None => true,
                    })
                    .map(|(name, net)| ls_json(name, net))
                    .collect();
                CommandOutput::success(lines.join("\n"))
            }
            ["service", "inspect", service, ..] => match state.services.get(*service) {
                None => CommandOutput::failure(
                    1,
                    format!("Error response from daemon: service {} not found", service),
                ),
                Some(ids) if ids.is_empty() => CommandOutput::success("null\n"),
                Some(ids) => {
                    let spec: Vec<_> = ids
                        .iter()
                        .map(|id| json!({ "Target": id, "Aliases": [] }))
                        .collect();
                    CommandOutput::success(format!("{}\n", json!(spec)))
                }
            },
            ["service", "update", rest @ ..] => Self::update_service(&mut state, rest),
            _ => CommandOutput::failure(127, format!("unsupported command: {}", line)),
        }
    }

    fn create(state: &mut EngineState, rest: &[&str]) -> CommandOutput {
        let Some(name) = rest.last() else {
            return CommandOutput::failure(1, "network name required");
        };
        if state.networks.contains_key(*name) {
            return CommandOutput::failure(
                1,
                format!(
                    "Error response from daemon: network with name {} already exists",
                    name
                ),
            );
        }

        let mut driver = "bridge".to_string();
        let mut labels = BTreeMap::new();
        let mut options = BTreeMap::new();
        let mut internal = false;
        let mut attachable = false;
        let mut i = 0;
        while i + 1 < rest.len() {
            match rest[i] {
                "--internal" => internal = true,
                "--attachable" => attachable = true,
                flag @ ("--driver" | "--label" | "--opt" | "--subnet" | "--gateway") => {
                    let value = rest[i + 1];
                    match flag {
                        "--driver" => driver = value.to_string(),
                        "--label" | "--opt" => {
                            if let Some((k, v)) = value.split_once('=') {
                                let map = if flag == "--label" {
                                    &mut labels
                                } else {
                                    &mut options
                                };
                                map.insert(k.to_string(), v.to_string());
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                _ => {}
            }
            i += 1;
        }

        let id = Self::insert_network(state, name, &driver, labels);
        if let Some(net) = state.networks.get_mut(*name) {
            net.internal = internal;
            net.attachable = attachable;
            net.options = options;
        }
        CommandOutput::success(format!("{}\n", id))
    }

    fn update_service(state: &mut EngineState, rest: &[&str]) -> CommandOutput {
        let Some(service) = rest.last() else {
            return CommandOutput::failure(1, "service name required");
        };
        if !state.services.contains_key(*service) {
            return CommandOutput::failure(
                1,
                format!("Error response from daemon: service {} not found", service),
            );
        }

        let mut add = Vec::new();
        let mut remove = Vec::new();
        for pair in rest.windows(2) {
            match pair[0] {
                "--network-add" => {
                    let name = pair[1]
                        .split(',')
                        .find_map(|part| part.strip_prefix("name="))
                        .unwrap_or(pair[1]);
                    match state.networks.get(name) {
                        Some(net) => add.push(net.id.clone()),
                        None => return not_found(name),
                    }
                }
                "--network-rm" => match state.networks.get(pair[1]) {
                    Some(net) => remove.push(net.id.clone()),
                    None => return not_found(pair[1]),
                },
                _ => {}
            }
        }

        if let Some(ids) = state.services.get_mut(*service) {
            ids.retain(|id| !remove.contains(id));
            for id in add {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        CommandOutput::success(format!("{}\n", service))
    }
}

fn not_found(name: &str) -> CommandOutput {
    CommandOutput::failure(
        1,
        format!("Error response from daemon: network {} not found", name),
    )
}

/// Last two positional arguments, skipping flags and their values
fn positional_pair<'a>(args: &[&'a str], valued_flags: &[&str]) -> (&'a str, &'a str) {
    let mut positional = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if valued_flags.contains(&args[i]) {
            i += 2;
            continue;
        }
        if !args[i].starts_with('-') {
            positional.push(args[i]);
        }
        i += 1;
    }
    match positional.as_slice() {
        [.., network, container] => (*network, *container),
        _ => ("", ""),
    }
}

fn inspect_json(name: &str, net: &FakeNetwork) -> String {
    let containers: serde_json::Map<String, serde_json::Value> = net
        .containers
        .iter()
        .enumerate()
        .map(|(i, c)| {
            (
                format!("cid{}", i),
                json!({ "Name": c, "IPv4Address": format!("172.30.0.{}/16", i + 2) }),
            )
        })
        .collect();
    json!([{
        "Name": name,
        "Id": net.id,
        "Driver": net.driver,
        "Internal": net.internal,
        "Attachable": net.attachable,
        "IPAM": { "Config": [] },
        "Containers": containers,
        "Labels": net.labels,
    }])
    .to_string()
}

fn ls_json(name: &str, net: &FakeNetwork) -> String {
    let labels = net
        .labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    json!({
        "ID": net.id,
        "Name": name,
        "Driver": net.driver,
        "Labels": labels,
        "Scope": "local",
    })
    .to_string()
}

#[async_trait]
impl CommandExecutor for FakeDockerEngine {
    async fn execute(
        &self,
        _server: &Server,
        command: &RemoteCommand,
        _timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        if self.state.lock().unwrap().unreachable {
            return Err(ExecutorError::Unavailable(
                "ssh: connect to host port 22: Connection refused".to_string(),
            ));
        }
        Ok(self.handle(command))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeResource {
    pub server_id: i32,
    pub environment: Option<EnvironmentRef>,
    pub containers: Vec<String>,
    pub services: Vec<String>,
    pub reachable: bool,
    pub aliases: Vec<String>,
}

/// Static catalog of servers, environments and resources
#[derive(Default)]
pub struct FakeCatalog {
    servers: Mutex<Vec<Server>>,
    resources: Mutex<HashMap<ResourceRef, FakeResource>>,
}

impl FakeCatalog {
    pub fn add_server(&self, server: Server) {
        self.servers.lock().unwrap().push(server);
    }

    pub fn add_resource(&self, resource: ResourceRef, details: FakeResource) {
        self.resources.lock().unwrap().insert(resource, details);
    }

    pub fn remove_resource(&self, resource: &ResourceRef) {
        self.resources.lock().unwrap().remove(resource);
    }

    fn resource(&self, resource: &ResourceRef) -> Result<FakeResource, NetworkError> {
        self.resources
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(resource.to_string()))
    }
}

#[async_trait]
impl ResourceCatalog for FakeCatalog {
    async fn server(&self, resource: &ResourceRef) -> Result<Server, NetworkError> {
        let server_id = self.resource(resource)?.server_id;
        self.find_server(server_id).await
    }

    async fn environment(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<EnvironmentRef>, NetworkError> {
        Ok(self.resource(resource)?.environment)
    }

    async fn container_names(&self, resource: &ResourceRef) -> Result<Vec<String>, NetworkError> {
        Ok(self.resource(resource)?.containers)
    }

    async fn service_names(&self, resource: &ResourceRef) -> Result<Vec<String>, NetworkError> {
        Ok(self.resource(resource)?.services)
    }

    async fn is_externally_reachable(&self, resource: &ResourceRef) -> Result<bool, NetworkError> {
        Ok(self.resource(resource)?.reachable)
    }

    async fn network_aliases(&self, resource: &ResourceRef) -> Result<Vec<String>, NetworkError> {
        Ok(self.resource(resource)?.aliases)
    }

    async fn resources_on_server(&self, server_id: i32) -> Result<Vec<ResourceRef>, NetworkError> {
        let mut resources: Vec<ResourceRef> = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.server_id == server_id)
            .map(|(resource, _)| *resource)
            .collect();
        resources.sort_by_key(|r| (r.kind.as_str(), r.id));
        Ok(resources)
    }

    async fn find_server(&self, server_id: i32) -> Result<Server, NetworkError> {
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == server_id)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(format!("server {}", server_id)))
    }

    async fn servers(&self) -> Result<Vec<Server>, NetworkError> {
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn find_environment(&self, uuid: Uuid) -> Result<Option<EnvironmentRef>, NetworkError> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .values()
            .filter_map(|r| r.environment.clone())
            .find(|e| e.uuid == uuid))
    }
}

pub struct FakeCluster {
    pub orchestrated: bool,
}

#[async_trait]
impl ClusterCapability for FakeCluster {
    async fn is_orchestrated(&self, _server: &Server) -> Result<bool, NetworkError> {
        Ok(self.orchestrated)
    }
}

pub fn server(id: i32) -> Server {
    Server {
        id,
        uuid: Uuid::new_v4(),
        name: format!("server-{}", id),
        team_id: 1,
        ssh_target: None,
    }
}

pub fn environment(id: i32, name: &str) -> EnvironmentRef {
    EnvironmentRef {
        id,
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        project_id: 10,
        team_id: 1,
    }
}

pub fn fast_settings() -> NetworkSettings {
    NetworkSettings {
        default_network: "temps-app-network".to_string(),
        default_swarm_network: "temps-app-overlay".to_string(),
        post_deploy_delay: 0,
        retry_base_delay_ms: 1,
        ..NetworkSettings::default()
    }
}

/// Everything wired together over one server
pub struct TestContext {
    pub db: TestDatabase,
    pub engine: Arc<FakeDockerEngine>,
    pub catalog: Arc<FakeCatalog>,
    pub reconciler: Arc<NetworkReconciler>,
    pub scheduler: ReconcileScheduler,
    pub service: Arc<NetworkService>,
    pub server: Server,
}

impl TestContext {
    pub async fn new(settings: NetworkSettings, orchestrated: bool) -> anyhow::Result<Self> {
        let db = TestDatabase::new().await?;
        let engine = Arc::new(FakeDockerEngine::new());
        engine.add_network(
            settings.default_network_for(orchestrated),
            if orchestrated { "overlay" } else { "bridge" },
        );

        let catalog = Arc::new(FakeCatalog::default());
        let server = server(1);
        catalog.add_server(server.clone());

        let reconciler = Arc::new(NetworkReconciler::new(
            db.db.clone(),
            engine.clone(),
            catalog.clone(),
            Arc::new(FakeCluster { orchestrated }),
            settings.clone(),
        ));
        let scheduler = ReconcileScheduler::new(reconciler.clone(), &settings);
        let service = Arc::new(NetworkService::new(reconciler.clone(), scheduler.clone()));

        Ok(Self {
            db,
            engine,
            catalog,
            reconciler,
            scheduler,
            service,
            server,
        })
    }

    /// Register a resource with containers on the default network
    pub fn add_app(&self, id: i32, environment: &EnvironmentRef, containers: &[&str]) -> ResourceRef {
        let resource = ResourceRef::application(id);
        for container in containers {
            self.engine.add_container("temps-app-network", container);
        }
        self.catalog.add_resource(
            resource,
            FakeResource {
                server_id: self.server.id,
                environment: Some(environment.clone()),
                containers: containers.iter().map(|c| c.to_string()).collect(),
                aliases: vec![format!("app-{}", id)],
                ..Default::default()
            },
        );
        resource
    }
}
