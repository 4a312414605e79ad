//! Bulk lifecycle orchestration for containerized instances.

pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod ops;
pub mod orchestrator;
pub mod ports;
pub mod provision;
pub mod registry;
pub mod runtime;
pub mod sidecar;
pub mod store;
pub mod task;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::OrchestratorConfig;
pub use error::{RuntimeError, StoreError};
pub use orchestrator::Orchestrator;
pub use runtime::{ContainerRuntime, ContainerSpec};
pub use store::{InstanceStore, MemoryInstanceStore};
pub use task::{Operation, Task, TaskId, TaskStatus};
