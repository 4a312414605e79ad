use std::sync::Arc;

use hangar_instance::{InstanceId, InstanceStatus};
use tokio::task::JoinHandle;

use crate::{
    config::OrchestratorConfig,
    error::{RuntimeError, StoreError},
    executor::BulkExecutor,
    health::{HealthChecker, HealthReport},
    ops::{InstanceOps, OperationError},
    ports::PortAllocator,
    provision::{BatchCreateReport, BatchCreateRequest, ProvisionError, Provisioner},
    registry::{TaskError, TaskRegistry},
    runtime::ContainerRuntime,
    store::InstanceStore,
    task::{Operation, Task, TaskId},
    validate::{InvalidStateReport, StateValidator},
};

pub const LOGIN_QRCODE_PATH: &str = "/app/napcat/cache/qrcode.png";

#[derive(Debug, thiserror::Error)]
pub enum QrCodeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("instance {0} has no container")]
    NoContainer(InstanceId),
    #[error("login qr code not available yet for instance {0}")]
    NotReady(InstanceId),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// An accepted bulk request. The task runs whether or not `handle` is awaited.
pub struct SubmittedTask {
    pub task: Task,
    pub handle: JoinHandle<Result<Task, TaskError>>,
}

pub struct BackgroundTasks {
    pub sweeper: JoinHandle<()>,
    pub startup_check: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn abort(&self) {
        self.sweeper.abort();
        self.startup_check.abort();
    }
}

/// Entry point for embedding layers: wires every engine component to one store
/// and one runtime.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn InstanceStore>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: TaskRegistry,
    validator: StateValidator,
    executor: BulkExecutor,
    health: HealthChecker,
    ops: InstanceOps,
    provisioner: Provisioner,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn InstanceStore>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let registry = TaskRegistry::new();
        let validator = StateValidator::new(store.clone());
        let health = HealthChecker::new(store.clone(), runtime.clone(), config.sidecar.clone());
        let ops = InstanceOps::new(
            store.clone(),
            runtime.clone(),
            health.clone(),
            config.restart_pause,
        );
        let executor = BulkExecutor::new(
            registry.clone(),
            ops.clone(),
            config.concurrency,
            config.task_timeout,
        );
        let provisioner = Provisioner::new(
            store.clone(),
            runtime.clone(),
            PortAllocator::new(config.base_port, config.port_window),
            config.sidecar.clone(),
            ops.clone(),
            config.max_instances,
        );

        Self {
            config,
            store,
            runtime,
            registry,
            validator,
            executor,
            health,
            ops,
            provisioner,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Validates the whole batch, then starts it in the background.
    pub async fn submit(
        &self,
        operation: Operation,
        target_ids: Vec<InstanceId>,
    ) -> Result<SubmittedTask, InvalidStateReport> {
        self.validator.validate(operation, &target_ids).await?;

        let task = self.registry.create(operation, target_ids.clone());
        let handle = self.executor.execute(task.id.clone(), operation, target_ids);
        Ok(SubmittedTask { task, handle })
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.registry.get(id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.registry.list()
    }

    pub async fn create_batch(
        &self,
        req: BatchCreateRequest,
    ) -> Result<BatchCreateReport, ProvisionError> {
        self.provisioner.create_batch(req).await
    }

    pub async fn repair(&self, id: &InstanceId) -> bool {
        self.health.repair_instance(id).await
    }

    pub async fn health_check(&self) -> Result<HealthReport, StoreError> {
        self.health.run_startup_check().await
    }

    pub async fn refresh_status(&self, id: &InstanceId) -> Result<InstanceStatus, OperationError> {
        self.ops.refresh_status(id).await
    }

    pub async fn fetch_login_qrcode(&self, id: &InstanceId) -> Result<Vec<u8>, QrCodeError> {
        let inst = self.store.get(id).await?;
        let Some(container) = &inst.container_ref else {
            return Err(QrCodeError::NoContainer(id.clone()));
        };
        match self.runtime.copy_file_out(container, LOGIN_QRCODE_PATH).await {
            Ok(bytes) => {
                tracing::debug!(instance_id = %id, size = bytes.len(), "login qr code fetched");
                Ok(bytes)
            }
            Err(RuntimeError::FileNotFound { .. }) => Err(QrCodeError::NotReady(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Starts the retention sweeper and the delayed startup health check.
    pub fn spawn_background(&self) -> BackgroundTasks {
        BackgroundTasks {
            sweeper: self
                .registry
                .spawn_sweeper(self.config.sweep_interval, self.config.task_retention),
            startup_check: self.health.spawn_startup_check(self.config.startup_grace),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        store::MemoryInstanceStore,
        task::TaskStatus,
        test_support::{FakeRuntime, seed},
    };

    fn orchestrator(store: &MemoryInstanceStore, runtime: &Arc<FakeRuntime>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig {
                restart_pause: Duration::from_millis(1),
                ..OrchestratorConfig::default()
            },
            Arc::new(store.clone()),
            runtime.clone(),
        )
    }

    #[tokio::test]
    async fn submitted_task_is_queryable_and_completes() {
        let store = MemoryInstanceStore::new();
        let runtime = FakeRuntime::new();
        let a = seed(&store, &runtime, "a", None, InstanceStatus::Running, true).await;
        let b = seed(&store, &runtime, "b", None, InstanceStatus::Stopped, true).await;
        let orch = orchestrator(&store, &runtime);

        let submitted = orch
            .submit(Operation::Restart, vec![a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert_eq!(submitted.task.status, TaskStatus::Pending);

        let done = submitted.handle.await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.success_count, 2);

        let queried = orch.get_task(&submitted.task.id).unwrap();
        assert_eq!(queried.status, TaskStatus::Completed);
        assert_eq!(store.get(&b.id).await.unwrap().status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn rejected_batch_creates_no_task() {
        let store = MemoryInstanceStore::new();
        let runtime = FakeRuntime::new();
        let a = seed(&store, &runtime, "a", None, InstanceStatus::Stopped, true).await;
        let b = seed(&store, &runtime, "b", None, InstanceStatus::Running, true).await;
        let orch = orchestrator(&store, &runtime);

        let Err(report) = orch.submit(Operation::Start, vec![a.id.clone(), b.id]).await else {
            panic!("batch should be rejected");
        };
        assert_eq!(report.invalid.len(), 1);
        assert!(orch.list_tasks().is_empty());
        assert_eq!(store.get(&a.id).await.unwrap().status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn qrcode_is_copied_out_of_the_container() {
        let store = MemoryInstanceStore::new();
        let runtime = FakeRuntime::new();
        let ready = seed(&store, &runtime, "ready", None, InstanceStatus::Running, true).await;
        let waiting = seed(&store, &runtime, "waiting", None, InstanceStatus::Running, true).await;
        let bare = seed(&store, &runtime, "bare", None, InstanceStatus::Stopped, false).await;
        runtime.put_file(ready.container_ref.as_ref().unwrap(), LOGIN_QRCODE_PATH, b"\x89PNG");
        let orch = orchestrator(&store, &runtime);

        assert_eq!(orch.fetch_login_qrcode(&ready.id).await.unwrap(), b"\x89PNG");
        assert!(matches!(
            orch.fetch_login_qrcode(&waiting.id).await,
            Err(QrCodeError::NotReady(_))
        ));
        assert!(matches!(
            orch.fetch_login_qrcode(&bare.id).await,
            Err(QrCodeError::NoContainer(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn background_tasks_run_startup_check_after_grace() {
        let store = MemoryInstanceStore::new();
        let runtime = FakeRuntime::new();
        let inst = seed(&store, &runtime, "a", None, InstanceStatus::Running, false).await;
        let orch = orchestrator(&store, &runtime);

        let background = orch.spawn_background();
        tokio::time::sleep(orch.config().startup_grace + Duration::from_secs(1)).await;

        assert_eq!(store.get(&inst.id).await.unwrap().status, InstanceStatus::Stopped);
        background.abort();
    }
}
