//! Network isolation settings

use serde::{Deserialize, Serialize};
use std::time::Duration;
use temps_core::{is_dns_safe_name, NETWORK_NAME};

use crate::NetworkError;

/// Policy controlling whether resources auto-join scoped networks and
/// whether they leave the default network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// No auto-provisioning; networks are managed by hand only
    None,
    /// Auto-create and auto-join the per-environment network
    #[default]
    Environment,
    /// Like `Environment`, and force-leave the default network
    Strict,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::None => "none",
            IsolationMode::Environment => "environment",
            IsolationMode::Strict => "strict",
        }
    }

    pub fn auto_provisions(&self) -> bool {
        !matches!(self, IsolationMode::None)
    }
}

/// Settings for the network reconciliation engine.
/// All fields have defaults so partial documents deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub enabled: bool,
    pub isolation_mode: IsolationMode,
    pub proxy_isolation: bool,
    pub max_networks_per_server: u32,
    pub name_prefix: String,
    /// Seconds to wait after a deploy before auto-attaching
    pub post_deploy_delay: u64,
    pub swarm_overlay_encryption: bool,
    pub default_network: String,
    pub default_swarm_network: String,
    pub proxy_container_name: String,
    /// Seconds before a remote command is considered failed
    pub command_timeout: u64,
    pub topology_cache_ttl: u64,
    pub drift_check_interval: u64,
    pub orphan_retention_days: i64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub worker_concurrency: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            isolation_mode: IsolationMode::Environment,
            proxy_isolation: false,
            max_networks_per_server: 200,
            name_prefix: "temps".to_string(),
            post_deploy_delay: 5,
            swarm_overlay_encryption: false,
            default_network: NETWORK_NAME.clone(),
            default_swarm_network: "temps-app-overlay".to_string(),
            proxy_container_name: "temps-proxy".to_string(),
            command_timeout: 30,
            topology_cache_ttl: 60,
            drift_check_interval: 300,
            orphan_retention_days: 7,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            worker_concurrency: 8,
        }
    }
}

impl NetworkSettings {
    /// Create settings from JSON value, using defaults for missing fields
    pub fn from_json(value: serde_json::Value) -> Result<Self, NetworkError> {
        let settings: Self = serde_json::from_value(value).map_err(|e| NetworkError::Validation {
            message: format!("Invalid network settings: {}", e),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Convert settings to JSON value
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn validate(&self) -> Result<(), NetworkError> {
        if !is_dns_safe_name(&self.name_prefix) {
            return Err(NetworkError::Validation {
                message: format!(
                    "name_prefix '{}' must be lowercase alphanumerics and '-'",
                    self.name_prefix
                ),
            });
        }
        if self.max_networks_per_server == 0 {
            return Err(NetworkError::Validation {
                message: "max_networks_per_server must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(NetworkError::Validation {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.worker_concurrency == 0 {
            return Err(NetworkError::Validation {
                message: "worker_concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Whether reconciliation should do anything at all
    pub fn auto_provisioning_enabled(&self) -> bool {
        self.enabled && self.isolation_mode.auto_provisions()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    pub fn post_deploy_delay(&self) -> Duration {
        Duration::from_secs(self.post_deploy_delay)
    }

    pub fn topology_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.topology_cache_ttl)
    }

    pub fn drift_check_interval(&self) -> Duration {
        Duration::from_secs(self.drift_check_interval)
    }

    /// The network a container lands on when nothing else is configured
    pub fn default_network_for(&self, orchestrated: bool) -> &str {
        if orchestrated {
            &self.default_swarm_network
        } else {
            &self.default_network
        }
    }
}
