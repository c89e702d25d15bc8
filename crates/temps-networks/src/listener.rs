//! Job queue listener that turns deploy and delete events into reconciliation
//! triggers.

use std::sync::Arc;
use std::time::Duration;
use temps_core::{Job, JobQueue, JobReceiver, QueueError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::resources::ResourceRef;
use crate::service::NetworkService;
use crate::NetworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTrigger {
    Deployed(ResourceRef),
    Deleted(ResourceRef),
    ServerSync(i32),
}

impl NetworkTrigger {
    pub fn from_job(job: &Job) -> Result<Self, NetworkError> {
        match job {
            Job::ResourceDeployed(event) => Ok(NetworkTrigger::Deployed(ResourceRef::parse(
                &event.resource_kind,
                event.resource_id,
            )?)),
            Job::ResourceDeleted(event) => Ok(NetworkTrigger::Deleted(ResourceRef::parse(
                &event.resource_kind,
                event.resource_id,
            )?)),
            Job::ServerNetworkSyncRequested(event) => {
                Ok(NetworkTrigger::ServerSync(event.server_id))
            }
        }
    }
}

/// Next usable trigger, or `None` once the channel is closed.
/// Jobs that do not map to a trigger are skipped.
pub async fn next_trigger(receiver: &mut dyn JobReceiver) -> Option<NetworkTrigger> {
    loop {
        match receiver.recv().await {
            Ok(job) => match NetworkTrigger::from_job(&job) {
                Ok(trigger) => return Some(trigger),
                Err(e) => warn!("Ignoring job {}: {}", job, e),
            },
            Err(QueueError::ChannelClosed) => return None,
            Err(e) => {
                warn!("Failed to receive job from queue: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

pub struct NetworkJobListener {
    service: Arc<NetworkService>,
    queue: Arc<dyn JobQueue>,
    running: Arc<RwLock<bool>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl NetworkJobListener {
    pub fn new(service: Arc<NetworkService>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            service,
            queue,
            running: Arc::new(RwLock::new(false)),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let mut receiver = self.queue.subscribe();
        let service = self.service.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            info!("Network job listener started");
            let mut handled = 0u64;
            while *running.read().await {
                let Some(trigger) = next_trigger(receiver.as_mut()).await else {
                    break;
                };
                handled += 1;
                debug!("Handling network trigger #{}: {:?}", handled, trigger);
                Self::dispatch(&service, trigger).await;
            }
            *running.write().await = false;
            info!("Network job listener stopped after {} triggers", handled);
        });

        *self.task_handle.write().await = Some(handle);
    }

    /// Stop listening. The loop exits once the current receive returns.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.task_handle.write().await.take() {
            handle.abort();
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn dispatch(service: &NetworkService, trigger: NetworkTrigger) {
        match trigger {
            NetworkTrigger::Deployed(resource) => {
                service.on_resource_deployed(resource).await;
            }
            NetworkTrigger::Deleted(resource) => {
                service.on_resource_deleted(resource).await;
            }
            NetworkTrigger::ServerSync(server_id) => {
                if let Err(e) = service.request_server_sync(server_id).await {
                    warn!(server_id, "Server sync request rejected: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use std::collections::VecDeque;
    use temps_core::{ResourceDeletedJob, ResourceDeployedJob, ServerNetworkSyncJob};

    mock! {
        Receiver {}

        #[async_trait]
        impl JobReceiver for Receiver {
            async fn recv(&mut self) -> Result<Job, QueueError>;
        }
    }

    fn deployed(kind: &str, id: i32) -> Job {
        Job::ResourceDeployed(ResourceDeployedJob {
            resource_kind: kind.to_string(),
            resource_id: id,
        })
    }

    #[test]
    fn test_jobs_map_to_triggers() {
        assert_eq!(
            NetworkTrigger::from_job(&deployed("application", 4)).unwrap(),
            NetworkTrigger::Deployed(ResourceRef::application(4))
        );
        assert_eq!(
            NetworkTrigger::from_job(&Job::ResourceDeleted(ResourceDeletedJob {
                resource_kind: "database".to_string(),
                resource_id: 2,
            }))
            .unwrap(),
            NetworkTrigger::Deleted(ResourceRef::database(2))
        );
        assert_eq!(
            NetworkTrigger::from_job(&Job::ServerNetworkSyncRequested(ServerNetworkSyncJob {
                server_id: 9
            }))
            .unwrap(),
            NetworkTrigger::ServerSync(9)
        );
        assert!(NetworkTrigger::from_job(&deployed("volume", 1)).is_err());
    }

    #[tokio::test]
    async fn test_next_trigger_skips_bad_jobs_and_stops_on_close() {
        let mut jobs: VecDeque<Result<Job, QueueError>> = VecDeque::from(vec![
            Ok(deployed("volume", 1)),
            Ok(deployed("service", 8)),
        ]);
        let mut receiver = MockReceiver::new();
        receiver
            .expect_recv()
            .returning(move || jobs.pop_front().unwrap_or(Err(QueueError::ChannelClosed)));

        assert_eq!(
            next_trigger(&mut receiver).await,
            Some(NetworkTrigger::Deployed(ResourceRef::service(8)))
        );
        assert_eq!(next_trigger(&mut receiver).await, None);
    }
}
