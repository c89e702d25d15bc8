//! Core utilities and types shared across all Temps crates

pub mod error;
pub mod jobs;
pub mod types;
pub mod utils;
mod constants;

// Re-export commonly used types
pub use constants::*;
pub use error::*;
pub use jobs::*;
pub use utils::*;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;

// Re-export standard datetime types for use across all crates
pub use types::DBDateTime;
