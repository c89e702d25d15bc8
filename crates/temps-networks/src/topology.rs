//! Server topology: whether a host runs swarm services or plain containers.
//!
//! The TTL cache is owned by the reconciler that uses it; nothing here is
//! process-global.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::executor::{CommandExecutor, ExecutorError, RemoteCommand};
use crate::resources::{ClusterCapability, Server};
use crate::NetworkError;

pub struct TopologyCache {
    cluster: Arc<dyn ClusterCapability>,
    ttl: Duration,
    entries: Mutex<HashMap<i32, (bool, Instant)>>,
}

impl TopologyCache {
    pub fn new(cluster: Arc<dyn ClusterCapability>, ttl: Duration) -> Self {
        Self {
            cluster,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_orchestrated(&self, server: &Server) -> Result<bool, NetworkError> {
        {
            let entries = self.entries.lock().await;
            if let Some((value, fetched_at)) = entries.get(&server.id) {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(*value);
                }
            }
        }

        let value = self.cluster.is_orchestrated(server).await?;
        debug!(server_id = server.id, orchestrated = value, "Refreshed server topology");
        self.entries
            .lock()
            .await
            .insert(server.id, (value, Instant::now()));
        Ok(value)
    }

    pub async fn invalidate(&self, server_id: i32) {
        self.entries.lock().await.remove(&server_id);
    }
}

/// Asks the engine itself whether it is a swarm node
pub struct SwarmProbe {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl SwarmProbe {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }
}

#[async_trait]
impl ClusterCapability for SwarmProbe {
    async fn is_orchestrated(&self, server: &Server) -> Result<bool, NetworkError> {
        let command = RemoteCommand::docker().args(["info", "--format", "{{.Swarm.LocalNodeState}}"]);
        let output = self.executor.execute(server, &command, self.timeout).await?;
        if !output.is_success() {
            return Err(ExecutorError::Unavailable(format!(
                "docker info failed: {}",
                output.error_text()
            ))
            .into());
        }
        Ok(output.stdout.trim() == "active")
    }
}
