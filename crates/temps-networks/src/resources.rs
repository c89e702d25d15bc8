//! Collaborator interfaces: servers, resources and cluster topology.
//!
//! Resources are a tagged union of `{kind, id}`; everything the engine needs
//! to know about a resource is answered by a [`ResourceCatalog`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use temps_entities::types::ResourceKind;
use uuid::Uuid;

use crate::NetworkError;

/// Reference to a deployable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: i32,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: i32) -> Self {
        Self { kind, id }
    }

    pub fn application(id: i32) -> Self {
        Self::new(ResourceKind::Application, id)
    }

    pub fn service(id: i32) -> Self {
        Self::new(ResourceKind::Service, id)
    }

    pub fn database(id: i32) -> Self {
        Self::new(ResourceKind::Database, id)
    }

    /// Parse a `kind` string as carried by queue jobs
    pub fn parse(kind: &str, id: i32) -> Result<Self, NetworkError> {
        ResourceKind::from_str(kind)
            .map(|kind| Self::new(kind, id))
            .ok_or_else(|| NetworkError::Validation {
                message: format!("Unknown resource kind '{}'", kind),
            })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A docker host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub team_id: i32,
    /// `user@host` for remote servers, `None` for the local daemon
    #[serde(default)]
    pub ssh_target: Option<String>,
}

/// The environment a resource is deployed into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRef {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub project_id: i32,
    pub team_id: i32,
}

/// A project, for project-scoped networks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub team_id: i32,
}

/// Resolves facts about resources. Implemented once per platform; every
/// resource kind answers the same questions.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// The server the resource is deployed on
    async fn server(&self, resource: &ResourceRef) -> Result<Server, NetworkError>;

    /// The environment the resource belongs to, if any
    async fn environment(&self, resource: &ResourceRef)
        -> Result<Option<EnvironmentRef>, NetworkError>;

    /// Running container names on a standalone host
    async fn container_names(&self, resource: &ResourceRef) -> Result<Vec<String>, NetworkError>;

    /// Swarm service names on an orchestrated host
    async fn service_names(&self, resource: &ResourceRef) -> Result<Vec<String>, NetworkError>;

    /// Whether the resource has a routable name behind the proxy
    async fn is_externally_reachable(&self, resource: &ResourceRef) -> Result<bool, NetworkError>;

    /// DNS aliases to register when attaching the resource
    async fn network_aliases(&self, resource: &ResourceRef) -> Result<Vec<String>, NetworkError>;

    /// Every resource deployed on a server
    async fn resources_on_server(&self, server_id: i32) -> Result<Vec<ResourceRef>, NetworkError>;

    /// Look up a server by id
    async fn find_server(&self, server_id: i32) -> Result<Server, NetworkError>;

    /// All servers, for periodic drift checks
    async fn servers(&self) -> Result<Vec<Server>, NetworkError>;

    /// Resolve an environment from the uuid carried in engine labels
    async fn find_environment(&self, uuid: Uuid) -> Result<Option<EnvironmentRef>, NetworkError>;
}

/// The only fact needed from the cluster subsystem
#[async_trait]
pub trait ClusterCapability: Send + Sync {
    async fn is_orchestrated(&self, server: &Server) -> Result<bool, NetworkError>;
}
