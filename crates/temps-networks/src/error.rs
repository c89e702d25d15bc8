use sea_orm::DbErr;
use temps_core::{summarize_error, ServiceError};
use temps_entities::types::NetworkScope;
use thiserror::Error;

use crate::executor::ExecutorError;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network management is disabled")]
    Disabled,

    #[error("Network isolation is disabled (isolation_mode = none)")]
    IsolationDisabled,

    #[error("Server {server_id} reached the limit of {limit} managed networks")]
    LimitReached { server_id: i32, limit: u32 },

    #[error("{scope} networks cannot be deleted")]
    ProtectedNetwork { scope: NetworkScope },

    #[error("Auto-attached environment networks cannot be detached while the resource remains in the environment")]
    AutoAttachedEnvironment,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Network {network} is not ready: {message}")]
    NetworkNotReady { network: String, message: String },

    #[error("{operation} failed on network {network}: {message}")]
    Driver {
        operation: String,
        network: String,
        message: String,
    },

    #[error("Remote command failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Resource catalog error: {0}")]
    Catalog(String),

    #[error("Database error: {reason}")]
    Database { reason: String },
}

impl From<DbErr> for NetworkError {
    fn from(error: DbErr) -> Self {
        match error {
            DbErr::RecordNotFound(_) => NetworkError::NotFound(error.to_string()),
            _ => NetworkError::Database {
                reason: error.to_string(),
            },
        }
    }
}

impl From<NetworkError> for ServiceError {
    fn from(error: NetworkError) -> Self {
        match error {
            NetworkError::NotFound(resource) => ServiceError::NotFound { resource },
            NetworkError::Database { reason } => ServiceError::Database(reason),
            NetworkError::Disabled
            | NetworkError::IsolationDisabled
            | NetworkError::LimitReached { .. } => ServiceError::Configuration {
                message: error.to_string(),
            },
            NetworkError::ProtectedNetwork { .. }
            | NetworkError::AutoAttachedEnvironment
            | NetworkError::Validation { .. } => ServiceError::Validation {
                message: error.to_string(),
            },
            other => ServiceError::ExternalService {
                service: "docker".to_string(),
                message: other.user_message(),
            },
        }
    }
}

impl NetworkError {
    /// Transient engine and database failures are worth another attempt;
    /// configuration errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Driver { .. }
                | NetworkError::Executor(_)
                | NetworkError::NetworkNotReady { .. }
                | NetworkError::Database { .. }
                | NetworkError::Catalog(_)
        )
    }

    /// Message safe to show to end users: raw engine output is reduced to
    /// its first line.
    pub fn user_message(&self) -> String {
        match self {
            NetworkError::Driver {
                operation,
                network,
                message,
            } => format!(
                "{} failed on network {}: {}",
                operation,
                network,
                summarize_error(message, 120)
            ),
            NetworkError::NetworkNotReady { network, .. } => {
                format!("Network {} is not ready", network)
            }
            NetworkError::Executor(_) => "The docker host could not be reached".to_string(),
            NetworkError::Database { .. } => "Internal database error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(NetworkError::Executor(ExecutorError::Timeout { seconds: 30 }).is_retryable());
        assert!(NetworkError::Driver {
            operation: "create".to_string(),
            network: "n".to_string(),
            message: "daemon down".to_string(),
        }
        .is_retryable());
        assert!(!NetworkError::Disabled.is_retryable());
        assert!(!NetworkError::LimitReached {
            server_id: 1,
            limit: 2
        }
        .is_retryable());
        assert!(!NetworkError::AutoAttachedEnvironment.is_retryable());
    }

    #[test]
    fn test_user_message_hides_raw_engine_output() {
        let error = NetworkError::Driver {
            operation: "create".to_string(),
            network: "temps-env-1".to_string(),
            message: "Error response from daemon: pool overlaps\ngoroutine 1 [running]: ...".to_string(),
        };
        let message = error.user_message();
        assert_eq!(message, "create failed on network temps-env-1: pool overlaps");
        assert!(!message.contains("goroutine"));
    }

    #[test]
    fn test_db_not_found_maps_to_not_found() {
        let error: NetworkError = DbErr::RecordNotFound("network 3".to_string()).into();
        assert!(matches!(error, NetworkError::NotFound(_)));
    }

    #[test]
    fn test_service_error_conversion() {
        let error: ServiceError = NetworkError::ProtectedNetwork {
            scope: NetworkScope::Environment,
        }
        .into();
        assert!(matches!(error, ServiceError::Validation { .. }));

        let error: ServiceError = NetworkError::LimitReached {
            server_id: 1,
            limit: 1,
        }
        .into();
        assert!(matches!(error, ServiceError::Configuration { .. }));
    }
}
