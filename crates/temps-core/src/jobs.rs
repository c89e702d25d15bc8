use serde::{Deserialize, Serialize};
use std::fmt;

/// Job for when a resource finished deploying and should join its networks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDeployedJob {
    /// `application`, `service` or `database`
    pub resource_kind: String,
    pub resource_id: i32,
}

/// Job for when a resource was destroyed and its attachments must be dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDeletedJob {
    pub resource_kind: String,
    pub resource_id: i32,
}

/// Job for a host-wide network sync (drift repair + reverse sync)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerNetworkSyncJob {
    pub server_id: i32,
}

/// Core job enum containing all possible job types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    ResourceDeployed(ResourceDeployedJob),
    ResourceDeleted(ResourceDeletedJob),
    ServerNetworkSyncRequested(ServerNetworkSyncJob),
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::ResourceDeployed(job) => write!(
                f,
                "ResourceDeployed(kind: {}, id: {})",
                job.resource_kind, job.resource_id
            ),
            Job::ResourceDeleted(job) => write!(
                f,
                "ResourceDeleted(kind: {}, id: {})",
                job.resource_kind, job.resource_id
            ),
            Job::ServerNetworkSyncRequested(job) => {
                write!(f, "ServerNetworkSyncRequested(server_id: {})", job.server_id)
            }
        }
    }
}

// Core queue abstraction - temps-queue implements this
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to send job: {0}")]
    SendError(String),
    #[error("Failed to receive job: {0}")]
    ReceiveError(String),
    #[error("Queue channel closed")]
    ChannelClosed,
    #[error("Invalid job data: {0}")]
    InvalidData(String),
}

/// Core trait for job queue operations
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Send a job to the queue
    async fn send(&self, job: Job) -> Result<(), QueueError>;

    /// Create a new receiver for jobs
    fn subscribe(&self) -> Box<dyn JobReceiver>;
}

/// Core trait for receiving jobs
#[async_trait]
pub trait JobReceiver: Send {
    /// Receive the next job
    async fn recv(&mut self) -> Result<Job, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_display() {
        let job = Job::ResourceDeployed(ResourceDeployedJob {
            resource_kind: "application".to_string(),
            resource_id: 7,
        });
        assert_eq!(job.to_string(), "ResourceDeployed(kind: application, id: 7)");

        let job = Job::ServerNetworkSyncRequested(ServerNetworkSyncJob { server_id: 3 });
        assert_eq!(job.to_string(), "ServerNetworkSyncRequested(server_id: 3)");
    }

    #[test]
    fn test_job_serde_shape() {
        let job = Job::ResourceDeleted(ResourceDeletedJob {
            resource_kind: "database".to_string(),
            resource_id: 12,
        });
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["ResourceDeleted"]["resource_kind"], "database");
        assert_eq!(value["ResourceDeleted"]["resource_id"], 12);
    }
}
