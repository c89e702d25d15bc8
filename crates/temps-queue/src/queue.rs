use std::sync::Arc;

use temps_core::async_trait::async_trait;
use temps_core::{
    Job, JobQueue, JobReceiver, QueueError, ResourceDeletedJob, ResourceDeployedJob,
    ServerNetworkSyncJob,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum QueueServiceError {
    #[error("Failed to send job to queue: {details}")]
    QueueSendError { details: String, job_type: String },

    #[error("Invalid job data: {details}")]
    InvalidJobData { details: String, job_type: String },
}

#[derive(Clone)]
pub struct BroadcastQueueService {
    broadcast_sender: broadcast::Sender<Job>,
}

// Wrapper for broadcast::Receiver to implement JobReceiver trait
pub struct BroadcastJobReceiver {
    receiver: broadcast::Receiver<Job>,
}

#[async_trait]
impl JobReceiver for BroadcastJobReceiver {
    async fn recv(&mut self) -> Result<Job, QueueError> {
        let result = self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => {
                error!("Broadcast channel closed");
                QueueError::ChannelClosed
            }
            broadcast::error::RecvError::Lagged(n) => {
                error!("Receiver lagged by {} messages", n);
                QueueError::ReceiveError(format!("Receiver lagged by {} messages", n))
            }
        });

        if let Ok(job) = &result {
            debug!("Received job: {}", job);
        }

        result
    }
}

#[async_trait]
impl JobQueue for BroadcastQueueService {
    async fn send(&self, job: Job) -> Result<(), QueueError> {
        let subscriber_count = self.broadcast_sender.receiver_count();
        debug!(
            "Broadcasting job {} to {} subscribers",
            job, subscriber_count
        );

        if subscriber_count == 0 {
            error!(
                "No subscribers listening to broadcast channel, job will be lost: {}",
                job
            );
        }

        self.broadcast_sender.send(job.clone()).map_err(|e| {
            error!("Failed to broadcast job {}: {}", job, e);
            QueueError::SendError(format!("Broadcast send failed: {}", e))
        })?;
        Ok(())
    }

    fn subscribe(&self) -> Box<dyn JobReceiver> {
        Box::new(BroadcastJobReceiver {
            receiver: self.broadcast_sender.subscribe(),
        })
    }
}

impl BroadcastQueueService {
    pub fn new(broadcast_sender: broadcast::Sender<Job>) -> Self {
        Self { broadcast_sender }
    }

    pub fn create_broadcast_channel(
        buffer_size: usize,
    ) -> (BroadcastQueueService, broadcast::Receiver<Job>) {
        let (sender, receiver) = broadcast::channel(buffer_size);
        (BroadcastQueueService::new(sender), receiver)
    }

    /// Create a new broadcast queue that implements the JobQueue trait
    /// Returns (queue, keep_alive_receiver) - the receiver must be kept alive!
    pub fn create_job_queue_arc_with_receiver(
        buffer_size: usize,
    ) -> (Arc<dyn JobQueue>, broadcast::Receiver<Job>) {
        let (sender, receiver) = broadcast::channel(buffer_size);
        (Arc::new(BroadcastQueueService::new(sender)), receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.broadcast_sender.subscribe()
    }

    pub async fn launch_resource_deployed(
        &self,
        data: ResourceDeployedJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Broadcasting resource deployed job for {}:{}",
            data.resource_kind, data.resource_id
        );
        if data.resource_kind.is_empty() {
            return Err(QueueServiceError::InvalidJobData {
                details: "Resource kind cannot be empty".to_string(),
                job_type: "resource_deployed".to_string(),
            });
        }
        self.broadcast(Job::ResourceDeployed(data), "resource_deployed")
    }

    pub async fn launch_resource_deleted(
        &self,
        data: ResourceDeletedJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Broadcasting resource deleted job for {}:{}",
            data.resource_kind, data.resource_id
        );
        if data.resource_kind.is_empty() {
            return Err(QueueServiceError::InvalidJobData {
                details: "Resource kind cannot be empty".to_string(),
                job_type: "resource_deleted".to_string(),
            });
        }
        self.broadcast(Job::ResourceDeleted(data), "resource_deleted")
    }

    pub async fn launch_server_network_sync(
        &self,
        data: ServerNetworkSyncJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Broadcasting network sync job for server {}",
            data.server_id
        );
        self.broadcast(Job::ServerNetworkSyncRequested(data), "server_network_sync")
    }

    fn broadcast(&self, job: Job, job_type: &str) -> Result<(), QueueServiceError> {
        self.broadcast_sender.send(job).map_err(|e| {
            error!("Failed to broadcast {} job: {}", job_type, e);
            QueueServiceError::QueueSendError {
                details: e.to_string(),
                job_type: job_type.to_string(),
            }
        })?;
        Ok(())
    }
}
