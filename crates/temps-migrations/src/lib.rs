//! Database migrations for the network reconciliation registry

pub use sea_orm_migration::prelude::*;

mod migration;

pub use migration::Migrator;
