//! Attachment strategies
//!
//! A standalone host attaches containers one by one; an orchestrated host
//! changes service specs, one batched update per service.

mod standalone;
mod swarm;

pub use standalone::StandaloneStrategy;
pub use swarm::SwarmStrategy;

use async_trait::async_trait;
use serde::Serialize;
use temps_entities::managed_networks;

use crate::registry::{AttachmentUpdate, NetworkRegistry};
use crate::resources::{ResourceRef, Server};
use crate::NetworkError;

/// What one resource should look like on one server
#[derive(Debug, Clone)]
pub struct AttachmentPlan {
    pub resource: ResourceRef,
    pub server: Server,
    /// Networks to join, already materialized on the engine
    pub networks: Vec<managed_networks::Model>,
    pub aliases: Vec<String>,
    /// Network to leave, set in strict isolation
    pub leave_network: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StrategyReport {
    /// Containers or services that were reconciled
    pub targets: usize,
    /// Mutating engine commands issued
    pub engine_calls: usize,
    pub attached_networks: Vec<i32>,
}

#[async_trait]
pub trait ReconcileStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, plan: &AttachmentPlan) -> Result<StrategyReport, NetworkError>;
}

/// Record every planned network as auto-attached and connected
pub(crate) async fn record_attachments(
    registry: &NetworkRegistry,
    plan: &AttachmentPlan,
) -> Result<Vec<i32>, NetworkError> {
    let mut attached = Vec::with_capacity(plan.networks.len());
    for network in &plan.networks {
        registry
            .upsert_attachment(
                &plan.resource,
                network.id,
                AttachmentUpdate {
                    aliases: plan.aliases.clone(),
                    ipv4_address: None,
                    is_auto_attached: true,
                    is_connected: true,
                },
            )
            .await?;
        attached.push(network.id);
    }
    Ok(attached)
}
