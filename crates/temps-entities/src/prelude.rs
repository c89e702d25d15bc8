pub use super::managed_networks::Entity as ManagedNetworks;
pub use super::resource_networks::Entity as ResourceNetworks;
pub use super::types::{NetworkDriver, NetworkScope, NetworkStatus, ResourceKind};
