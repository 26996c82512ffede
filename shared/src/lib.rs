//! Shared data structures and utilities for the Koji scheduler
//!
//! This crate contains the wire/data model, configuration structures, and
//! utilities used by both the hub (`kojihub`) and build host (`kojid`)
//! crates.

pub mod api;
pub mod config;
pub mod defaults;
pub mod error;
pub mod model;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::ApiResponse;
pub use config::{HostConfig, HubConfig, SchedulerConfig};
pub use error::{Fault, FaultCode};
pub use model::{Host, HostCapabilities, Refusal, RunState, Task, TaskRun, TaskState};

/// Result type alias used throughout the shared crate.
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test to ensure all modules can be imported.
    }
}
