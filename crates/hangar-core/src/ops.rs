use std::{sync::Arc, time::Duration};

use hangar_instance::{ContainerRef, Instance, InstanceId, InstanceStatus};

use crate::{
    error::{RuntimeError, StoreError},
    health::{HealthChecker, RepairError},
    runtime::ContainerRuntime,
    store::InstanceStore,
    task::Operation,
};

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("container repair failed: {0}")]
    Repair(#[from] RepairError),
}

/// Per-instance lifecycle handlers. Each one drives the instance's own status.
#[derive(Clone)]
pub struct InstanceOps {
    store: Arc<dyn InstanceStore>,
    runtime: Arc<dyn ContainerRuntime>,
    health: HealthChecker,
    restart_pause: Duration,
}

impl InstanceOps {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        runtime: Arc<dyn ContainerRuntime>,
        health: HealthChecker,
        restart_pause: Duration,
    ) -> Self {
        Self {
            store,
            runtime,
            health,
            restart_pause,
        }
    }

    pub async fn apply(&self, operation: Operation, id: &InstanceId) -> Result<(), OperationError> {
        match operation {
            Operation::Start => self.start(id).await,
            Operation::Stop => self.stop(id).await,
            Operation::Restart => self.restart(id).await,
            Operation::Delete => self.delete(id).await,
        }
    }

    pub async fn start(&self, id: &InstanceId) -> Result<(), OperationError> {
        let inst = self.store.get(id).await?;
        if inst.status == InstanceStatus::Running {
            tracing::debug!(instance_id = %id, "instance already running");
            return Ok(());
        }

        let container = match self.ensure_container(&inst).await {
            Ok(c) => c,
            Err(e) => {
                self.mark_error(id).await;
                return Err(e);
            }
        };

        // Repair may have rewritten the record.
        self.record_status(id, InstanceStatus::Starting).await?;

        match self.runtime.start(&container).await {
            Ok(()) => {
                let inst = self.record_status(id, InstanceStatus::Running).await?;
                tracing::info!(instance_id = %id, name = %inst.name, "instance started");
                Ok(())
            }
            Err(e) => {
                self.mark_error(id).await;
                Err(e.into())
            }
        }
    }

    pub async fn stop(&self, id: &InstanceId) -> Result<(), OperationError> {
        let mut inst = self.store.get(id).await?;
        if inst.status == InstanceStatus::Stopped {
            tracing::debug!(instance_id = %id, "instance already stopped");
            return Ok(());
        }

        let Some(container) = inst.container_ref.clone() else {
            inst.set_status(InstanceStatus::Stopped);
            self.store.update(&inst).await?;
            return Ok(());
        };

        self.record_status(id, InstanceStatus::Stopping).await?;

        match self.runtime.stop(&container).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                tracing::warn!(instance_id = %id, %container, "container vanished before stop");
            }
            Err(e) => {
                self.mark_error(id).await;
                return Err(e.into());
            }
        }

        let inst = self.record_status(id, InstanceStatus::Stopped).await?;
        tracing::info!(instance_id = %id, name = %inst.name, "instance stopped");
        Ok(())
    }

    pub async fn restart(&self, id: &InstanceId) -> Result<(), OperationError> {
        self.stop(id).await?;
        tokio::time::sleep(self.restart_pause).await;
        self.start(id).await
    }

    pub async fn delete(&self, id: &InstanceId) -> Result<(), OperationError> {
        let inst = self.store.get(id).await?;
        if inst.status == InstanceStatus::Running {
            self.stop(id).await?;
        }

        if let Some(container) = &inst.container_ref
            && self.runtime.exists(container).await?
        {
            self.runtime.remove(container).await?;
        }

        self.store.remove(id).await?;
        tracing::info!(instance_id = %id, name = %inst.name, "instance deleted");
        Ok(())
    }

    /// Reconciles the stored status with what the runtime reports.
    pub async fn refresh_status(&self, id: &InstanceId) -> Result<InstanceStatus, OperationError> {
        let mut inst = self.store.get(id).await?;
        let Some(container) = &inst.container_ref else {
            return Ok(inst.status);
        };

        let observed = InstanceStatus::from(self.runtime.status(container).await?);
        if observed != inst.status {
            tracing::info!(
                instance_id = %id,
                from = %inst.status,
                to = %observed,
                "instance status reconciled"
            );
            inst.set_status(observed);
            self.store.update(&inst).await?;
        }
        Ok(observed)
    }

    async fn ensure_container(&self, inst: &Instance) -> Result<ContainerRef, OperationError> {
        if let Some(container) = &inst.container_ref
            && self.runtime.exists(container).await?
        {
            return Ok(container.clone());
        }
        let outcome = self.health.try_repair(&inst.id).await?;
        Ok(outcome.container().clone())
    }

    /// Sets the status on the current record, not on a copy held across an await.
    async fn record_status(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<Instance, StoreError> {
        let mut inst = self.store.get(id).await?;
        inst.set_status(status);
        self.store.update(&inst).await?;
        Ok(inst)
    }

    async fn mark_error(&self, id: &InstanceId) {
        if let Err(e) = self.record_status(id, InstanceStatus::Error).await {
            tracing::warn!(instance_id = %id, error = %e, "failed to record instance error");
        }
    }
}
