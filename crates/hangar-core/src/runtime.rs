use async_trait::async_trait;
use hangar_instance::{ContainerRef, ContainerStatus, Instance, InstanceConfig};

use crate::error::RuntimeError;

/// What the runtime needs to (re)create an instance's container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub instance_name: String,
    pub service_port: u16,
    pub http_port: u16,
    pub ws_port: u16,
    pub config: InstanceConfig,
}

impl ContainerSpec {
    pub fn for_instance(instance: &Instance) -> Self {
        Self {
            instance_name: instance.name.clone(),
            service_port: instance.service_port,
            http_port: instance.http_port,
            ws_port: instance.ws_port,
            config: instance.config.clone(),
        }
    }
}

/// Low-level container primitives.
///
/// Implementations must be safe to call concurrently for different containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError>;

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError>;

    async fn exists(&self, container: &ContainerRef) -> Result<bool, RuntimeError>;

    async fn status(&self, container: &ContainerRef) -> Result<ContainerStatus, RuntimeError>;

    async fn copy_file_in(
        &self,
        container: &ContainerRef,
        content: &[u8],
        path: &str,
    ) -> Result<(), RuntimeError>;

    /// Fails with [`RuntimeError::FileNotFound`] when `path` does not exist.
    async fn copy_file_out(&self, container: &ContainerRef, path: &str)
    -> Result<Vec<u8>, RuntimeError>;
}
