use std::{any::Any, sync::Arc, time::Duration};

use futures_util::future::join_all;
use hangar_instance::InstanceId;
use tokio::{sync::Semaphore, task::JoinHandle};

use crate::{
    ops::InstanceOps,
    registry::{TaskError, TaskRegistry},
    task::{Operation, OperationResult, Task, TaskId},
};

/// Runs bulk tasks on a worker pool shared by every task.
#[derive(Clone)]
pub struct BulkExecutor {
    registry: TaskRegistry,
    ops: InstanceOps,
    pool: Arc<Semaphore>,
    timeout: Duration,
}

impl BulkExecutor {
    pub fn new(registry: TaskRegistry, ops: InstanceOps, concurrency: usize, timeout: Duration) -> Self {
        Self {
            registry,
            ops,
            pool: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
        }
    }

    /// Spawns the task run. The handle resolves to the finalized task record.
    ///
    /// Dropping the handle does not cancel the run.
    pub fn execute(
        &self,
        task_id: TaskId,
        operation: Operation,
        target_ids: Vec<InstanceId>,
    ) -> JoinHandle<Result<Task, TaskError>> {
        let executor = self.clone();
        tokio::spawn(async move { executor.run(task_id, operation, target_ids).await })
    }

    async fn run(
        self,
        task_id: TaskId,
        operation: Operation,
        target_ids: Vec<InstanceId>,
    ) -> Result<Task, TaskError> {
        self.registry.mark_running(&task_id)?;
        tracing::info!(%task_id, %operation, targets = target_ids.len(), "task running");

        let units: Vec<JoinHandle<OperationResult>> = target_ids
            .iter()
            .cloned()
            .map(|id| self.spawn_unit(&task_id, operation, id))
            .collect();

        let joined = match tokio::time::timeout(self.timeout, join_all(units)).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    %task_id,
                    %operation,
                    timeout = ?self.timeout,
                    "task timed out; in-flight operations keep running"
                );
                return self.registry.finalize_failure(
                    &task_id,
                    format!("operation timed out after {:?}", self.timeout),
                );
            }
        };

        let results: Vec<OperationResult> = joined
            .into_iter()
            .zip(target_ids)
            .map(|(joined, id)| match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let reason = format!("operation panicked: {}", panic_message(e.into_panic()));
                    tracing::error!(%task_id, instance_id = %id, %reason, "operation unit panicked");
                    OperationResult::failure(id, reason)
                }
                Err(_) => OperationResult::failure(id, "operation cancelled"),
            })
            .collect();

        let task = self.registry.finalize_success(&task_id, results)?;
        tracing::info!(
            %task_id,
            %operation,
            success = task.success_count,
            failed = task.failed_count,
            "task completed"
        );
        Ok(task)
    }

    fn spawn_unit(
        &self,
        task_id: &TaskId,
        operation: Operation,
        id: InstanceId,
    ) -> JoinHandle<OperationResult> {
        let ops = self.ops.clone();
        let pool = self.pool.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return OperationResult::failure(id, "worker pool closed");
            };
            match ops.apply(operation, &id).await {
                Ok(()) => OperationResult::success(id),
                Err(e) => {
                    tracing::warn!(%task_id, %operation, instance_id = %id, error = %e, "operation failed");
                    OperationResult::failure(id, e.to_string())
                }
            }
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use hangar_instance::InstanceStatus;

    use super::*;
    use crate::{
        health::HealthChecker,
        runtime::ContainerRuntime,
        sidecar::SidecarConfig,
        store::{InstanceStore, MemoryInstanceStore},
        task::TaskStatus,
        test_support::{FakeRuntime, seed},
    };

    struct Harness {
        store: MemoryInstanceStore,
        runtime: Arc<FakeRuntime>,
        registry: TaskRegistry,
        executor: BulkExecutor,
    }

    fn harness(concurrency: usize, timeout: Duration) -> Harness {
        let store = MemoryInstanceStore::new();
        let runtime = FakeRuntime::new();
        let registry = TaskRegistry::new();
        let dyn_store: Arc<dyn InstanceStore> = Arc::new(store.clone());
        let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        let health = HealthChecker::new(dyn_store.clone(), dyn_runtime.clone(), SidecarConfig::default());
        let ops = InstanceOps::new(dyn_store, dyn_runtime, health, Duration::from_millis(1));
        let executor = BulkExecutor::new(registry.clone(), ops, concurrency, timeout);
        Harness {
            store,
            runtime,
            registry,
            executor,
        }
    }

    async fn seed_many(h: &Harness, n: usize, status: InstanceStatus) -> Vec<InstanceId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let inst = seed(&h.store, &h.runtime, &format!("bot-{i}"), None, status, true).await;
            ids.push(inst.id);
        }
        ids
    }

    #[tokio::test]
    async fn start_batch_completes_with_every_target_running() {
        let h = harness(10, Duration::from_secs(60));
        let ids = seed_many(&h, 5, InstanceStatus::Stopped).await;
        let task = h.registry.create(Operation::Start, ids.clone());

        let done = h
            .executor
            .execute(task.id.clone(), Operation::Start, ids.clone())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.success_count, done.total_count);
        assert_eq!(done.failed_count, 0);
        for id in &ids {
            assert_eq!(h.store.get(id).await.unwrap().status, InstanceStatus::Running);
        }
        assert_eq!(h.registry.get(&task.id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn unit_failures_and_panics_stay_inside_their_unit() {
        let h = harness(10, Duration::from_secs(60));
        let ids = seed_many(&h, 3, InstanceStatus::Stopped).await;
        h.runtime.fail("start", Some("bot-1"));
        h.runtime.panic_on("start", "bot-2");
        let task = h.registry.create(Operation::Start, ids.clone());

        let done = h
            .executor
            .execute(task.id.clone(), Operation::Start, ids.clone())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.success_count, 1);
        assert_eq!(done.failed_count, 2);
        assert!(done.success_ids.contains(&ids[0]));
        assert!(done.failed_details[&ids[1]].contains("injected failure"));
        assert!(done.failed_details[&ids[2]].contains("panicked"));
        assert_eq!(h.store.get(&ids[1]).await.unwrap().status, InstanceStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let h = harness(10, Duration::from_secs(600));
        let ids = seed_many(&h, 25, InstanceStatus::Stopped).await;
        h.runtime.delay("start", Duration::from_secs(1));
        let task = h.registry.create(Operation::Start, ids.clone());

        let done = h
            .executor
            .execute(task.id.clone(), Operation::Start, ids)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.success_count, 25);
        assert_eq!(h.runtime.peak_in_flight(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_task_once_and_late_units_still_land() {
        let h = harness(10, Duration::from_secs(60));
        let ids = seed_many(&h, 2, InstanceStatus::Stopped).await;
        h.runtime.delay("start", Duration::from_secs(120));
        let task = h.registry.create(Operation::Start, ids.clone());

        let failed = h
            .executor
            .execute(task.id.clone(), Operation::Start, ids.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("operation timed out after 60s")
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        for id in &ids {
            assert_eq!(h.store.get(id).await.unwrap().status, InstanceStatus::Running);
        }

        let after = h.registry.get(&task.id).unwrap();
        assert_eq!(after.status, TaskStatus::Failed);
        assert_eq!(after.success_count, 0);
        assert_eq!(after.completed_at, failed.completed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_timeout_is_reported_precisely() {
        let h = harness(10, Duration::from_millis(250));
        let ids = seed_many(&h, 1, InstanceStatus::Stopped).await;
        h.runtime.delay("start", Duration::from_secs(1));
        let task = h.registry.create(Operation::Start, ids.clone());

        let failed = h
            .executor
            .execute(task.id.clone(), Operation::Start, ids)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            failed.error_message.as_deref(),
            Some("operation timed out after 250ms")
        );
    }

    #[tokio::test]
    async fn unknown_task_is_not_run() {
        let h = harness(10, Duration::from_secs(60));
        let ids = seed_many(&h, 1, InstanceStatus::Stopped).await;

        let err = h
            .executor
            .execute(TaskId::from("missing"), Operation::Start, ids.clone())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, TaskError::NotFound(_)));
        assert_eq!(h.store.get(&ids[0]).await.unwrap().status, InstanceStatus::Stopped);
    }
}
