//! # temps-networks
//!
//! Network reconciliation engine for managed docker networks.
//!
//! This crate provides functionality for:
//! - Tracking managed networks and resource attachments
//! - Creating scoped networks (environment, project, shared, proxy, system) exactly once
//! - Attaching resources on standalone hosts and swarm clusters
//! - Drift repair, reverse sync and orphan cleanup
//! - Retried, mutually exclusive reconciliation tasks

pub mod driver;
pub mod error;
pub mod executor;
pub mod listener;
pub mod monitor;
pub mod provisioner;
pub mod reconciler;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod strategies;
pub mod topology;

pub use driver::{DockerNetworkDriver, NetworkDetails, NetworkSummary, OperationOutcome};
pub use error::NetworkError;
pub use executor::{CommandExecutor, CommandOutput, ExecutorError, RemoteCommand, ShellExecutor};
pub use listener::{NetworkJobListener, NetworkTrigger};
pub use monitor::DriftMonitor;
pub use provisioner::{ScopeProvisioner, SharedNetworkRequest};
pub use reconciler::{
    DriftReport, FullReconcileReport, NetworkReconciler, ReconcileOutcome, ReverseSyncReport,
    ServerSyncReport,
};
pub use registry::{AttachmentUpdate, NetworkRegistry, NetworkSelector};
pub use resources::{
    ClusterCapability, EnvironmentRef, ProjectRef, ResourceCatalog, ResourceRef, Server,
};
pub use scheduler::{
    ReconcileRunner, ReconcileScheduler, ReconcileTask, Submission, TaskHandle, TaskState,
    OPS_LOG_TARGET,
};
pub use service::{NetworkService, ProxyMigrationReport};
pub use settings::{IsolationMode, NetworkSettings};
pub use topology::{SwarmProbe, TopologyCache};
