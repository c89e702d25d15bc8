use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Ownership tier of a managed network.
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum NetworkScope {
    #[sea_orm(string_value = "environment")]
    Environment,
    #[sea_orm(string_value = "project")]
    Project,
    #[sea_orm(string_value = "shared")]
    Shared,
    #[sea_orm(string_value = "proxy")]
    Proxy,
    #[sea_orm(string_value = "system")]
    System,
}

impl Display for NetworkScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl NetworkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkScope::Environment => "environment",
            NetworkScope::Project => "project",
            NetworkScope::Shared => "shared",
            NetworkScope::Proxy => "proxy",
            NetworkScope::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "environment" => Some(NetworkScope::Environment),
            "project" => Some(NetworkScope::Project),
            "shared" => Some(NetworkScope::Shared),
            "proxy" => Some(NetworkScope::Proxy),
            "system" => Some(NetworkScope::System),
            _ => None,
        }
    }

    /// Short token used inside generated engine network names
    pub fn name_token(&self) -> &'static str {
        match self {
            NetworkScope::Environment => "env",
            NetworkScope::Project => "project",
            NetworkScope::Shared => "shared",
            NetworkScope::Proxy => "proxy",
            NetworkScope::System => "system",
        }
    }

    /// Environment and system networks are owned by the platform and can
    /// never be removed through the delete path.
    pub fn is_deletable(&self) -> bool {
        !matches!(self, NetworkScope::Environment | NetworkScope::System)
    }
}

/// Lifecycle status of a managed network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "error")]
    Error,
    #[sea_orm(string_value = "orphaned")]
    Orphaned,
}

impl Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::Pending => "pending",
            NetworkStatus::Active => "active",
            NetworkStatus::Error => "error",
            NetworkStatus::Orphaned => "orphaned",
        }
    }

    /// Whether the engine object still has to be (re)materialized.
    pub fn needs_materialization(&self) -> bool {
        !matches!(self, NetworkStatus::Active)
    }
}

/// Docker network driver.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    #[sea_orm(string_value = "bridge")]
    Bridge,
    #[sea_orm(string_value = "overlay")]
    Overlay,
    #[sea_orm(string_value = "macvlan")]
    Macvlan,
}

impl Display for NetworkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl NetworkDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkDriver::Bridge => "bridge",
            NetworkDriver::Overlay => "overlay",
            NetworkDriver::Macvlan => "macvlan",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bridge" => Some(NetworkDriver::Bridge),
            "overlay" => Some(NetworkDriver::Overlay),
            "macvlan" => Some(NetworkDriver::Macvlan),
            _ => None,
        }
    }
}

/// Kind of resource an attachment belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[sea_orm(string_value = "application")]
    Application,
    #[sea_orm(string_value = "service")]
    Service,
    #[sea_orm(string_value = "database")]
    Database,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Application => "application",
            ResourceKind::Service => "service",
            ResourceKind::Database => "database",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "application" => Some(ResourceKind::Application),
            "service" => Some(ResourceKind::Service),
            "database" => Some(ResourceKind::Database),
            _ => None,
        }
    }
}
