use hangar_instance::{ContainerRef, InstanceId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("instance not found: {0}")]
    NotFound(InstanceId),
    #[error("instance already exists: {0}")]
    AlreadyExists(InstanceId),
    #[error("instance store: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(ContainerRef),
    #[error("file not found in container {container}: {path}")]
    FileNotFound { container: ContainerRef, path: String },
    #[error("container {op} failed: {message}")]
    Command { op: &'static str, message: String },
}

impl RuntimeError {
    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Command {
            op,
            message: message.into(),
        }
    }
}
