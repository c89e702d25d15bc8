//! sea-orm entities for the network reconciliation registry

pub mod types;

pub mod managed_networks;
pub mod resource_networks;

pub mod prelude;
