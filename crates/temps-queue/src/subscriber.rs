// Re-export for convenience - consumer modules can just subscribe directly
pub use temps_core::Job;
pub use tokio::sync::broadcast;
