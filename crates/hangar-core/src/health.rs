use std::{sync::Arc, time::Duration};

use hangar_instance::{ContainerRef, Instance, InstanceId, InstanceStatus};

use crate::{
    error::{RuntimeError, StoreError},
    runtime::{ContainerRuntime, ContainerSpec},
    sidecar::{SidecarConfig, SidecarError},
    store::InstanceStore,
};

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("sidecar config: {0}")]
    Sidecar(#[from] SidecarError),
}

/// Totals from one startup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub drifted: usize,
    pub downgraded: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Container was present; nothing changed.
    Healthy(ContainerRef),
    Recreated(ContainerRef),
}

impl RepairOutcome {
    pub fn container(&self) -> &ContainerRef {
        match self {
            RepairOutcome::Healthy(c) | RepairOutcome::Recreated(c) => c,
        }
    }
}

/// Detects instances whose container disappeared and rebuilds them on demand.
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn InstanceStore>,
    runtime: Arc<dyn ContainerRuntime>,
    sidecar: SidecarConfig,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        runtime: Arc<dyn ContainerRuntime>,
        sidecar: SidecarConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            sidecar,
        }
    }

    /// Marks drifted RUNNING instances STOPPED. Never recreates containers.
    pub async fn run_startup_check(&self) -> Result<HealthReport, StoreError> {
        let instances = self.store.list().await?;
        let mut report = HealthReport {
            total: instances.len(),
            ..HealthReport::default()
        };

        for inst in instances {
            let drifted = match &inst.container_ref {
                None => true,
                Some(container) => match self.runtime.exists(container).await {
                    Ok(exists) => !exists,
                    Err(e) => {
                        tracing::warn!(instance_id = %inst.id, error = %e, "container probe failed");
                        report.errors += 1;
                        continue;
                    }
                },
            };
            if !drifted {
                continue;
            }

            report.drifted += 1;
            tracing::warn!(
                instance_id = %inst.id,
                name = %inst.name,
                container = ?inst.container_ref,
                "instance container missing"
            );
            if inst.status != InstanceStatus::Running {
                continue;
            }

            match self.downgrade(&inst).await {
                Ok(true) => report.downgraded += 1,
                Ok(false) => {
                    tracing::info!(instance_id = %inst.id, "instance changed during check; leaving it");
                }
                Err(e) => {
                    tracing::warn!(instance_id = %inst.id, error = %e, "failed to downgrade drifted instance");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            total = report.total,
            drifted = report.drifted,
            downgraded = report.downgraded,
            errors = report.errors,
            "startup health check finished"
        );
        Ok(report)
    }

    /// Writes STOPPED onto the current record, but only if it still matches
    /// the probed snapshot. Returns whether the record was changed.
    async fn downgrade(&self, probed: &Instance) -> Result<bool, StoreError> {
        let mut current = self.store.get(&probed.id).await?;
        if current.status != InstanceStatus::Running
            || current.container_ref != probed.container_ref
        {
            return Ok(false);
        }
        current.set_status(InstanceStatus::Stopped);
        self.store.update(&current).await?;
        Ok(true)
    }

    pub fn spawn_startup_check(&self, grace: Duration) -> tokio::task::JoinHandle<()> {
        let checker = self.clone();
        tokio::spawn(async move {
            tracing::info!(grace_secs = grace.as_secs(), "startup health check scheduled");
            tokio::time::sleep(grace).await;
            if let Err(e) = checker.run_startup_check().await {
                tracing::error!(error = %e, "startup health check failed");
            }
        })
    }

    pub async fn repair_instance(&self, id: &InstanceId) -> bool {
        match self.try_repair(id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(instance_id = %id, error = %e, "instance repair failed");
                false
            }
        }
    }

    /// Recreates a missing container from the instance's stored template.
    ///
    /// On failure the instance record is left as it was.
    pub async fn try_repair(&self, id: &InstanceId) -> Result<RepairOutcome, RepairError> {
        let mut inst = self.store.get(id).await?;

        if let Some(container) = &inst.container_ref
            && self.runtime.exists(container).await?
        {
            return Ok(RepairOutcome::Healthy(container.clone()));
        }

        tracing::info!(instance_id = %inst.id, name = %inst.name, "recreating instance container");
        let spec = ContainerSpec::for_instance(&inst);
        let container = self.runtime.create(&inst.name, &spec).await?;

        if let Err(e) = self.finish_repair(&mut inst, &container).await {
            if let Err(cleanup) = self.runtime.remove(&container).await {
                tracing::warn!(%container, error = %cleanup, "failed to remove half-built container");
            }
            return Err(e);
        }

        tracing::info!(instance_id = %inst.id, %container, "instance container recreated");
        Ok(RepairOutcome::Recreated(container))
    }

    async fn finish_repair(
        &self,
        inst: &mut Instance,
        container: &ContainerRef,
    ) -> Result<(), RepairError> {
        if let Some(account) = inst.account() {
            let artifact = self.sidecar.artifact(account)?;
            self.runtime
                .copy_file_in(container, &artifact.content, &artifact.path)
                .await?;
        }
        inst.container_ref = Some(container.clone());
        inst.set_status(InstanceStatus::Stopped);
        self.store.update(inst).await?;
        Ok(())
    }
}
