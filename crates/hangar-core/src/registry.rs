use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use hangar_instance::InstanceId;

use crate::task::{Operation, OperationResult, Task, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task {id} already finalized as {status:?}")]
    AlreadyFinalized { id: TaskId, status: TaskStatus },
}

/// Process-scoped, in-memory store of bulk task records.
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, operation: Operation, target_ids: Vec<InstanceId>) -> Task {
        let task = Task::new(operation, target_ids);
        self.write().insert(task.id.clone(), task.clone());
        tracing::info!(
            task_id = %task.id,
            %operation,
            targets = task.total_count,
            "task created"
        );
        task
    }

    pub fn get(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    pub fn list(&self) -> Vec<Task> {
        let mut out: Vec<Task> = self.read().values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_running(&self, id: &TaskId) -> Result<(), TaskError> {
        let mut map = self.write();
        let task = map
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        if task.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                id: id.clone(),
                from: task.status,
                to: TaskStatus::Running,
            });
        }
        task.status = TaskStatus::Running;
        Ok(())
    }

    /// Records per-unit outcomes and marks the task COMPLETED. Callable once per task.
    pub fn finalize_success(
        &self,
        id: &TaskId,
        results: Vec<OperationResult>,
    ) -> Result<Task, TaskError> {
        let mut map = self.write();
        let task = map
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        ensure_open(task)?;

        for r in results {
            if r.succeeded {
                task.success_count += 1;
                task.success_ids.insert(r.instance_id);
            } else {
                task.failed_count += 1;
                task.failed_details.insert(
                    r.instance_id,
                    r.reason.unwrap_or_else(|| "unknown error".to_string()),
                );
            }
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Marks the task FAILED with an infrastructure-level error. Callable once per task.
    pub fn finalize_failure(
        &self,
        id: &TaskId,
        error_message: impl Into<String>,
    ) -> Result<Task, TaskError> {
        let mut map = self.write();
        let task = map
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.clone()))?;
        ensure_open(task)?;

        task.status = TaskStatus::Failed;
        task.error_message = Some(error_message.into());
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Drops tasks created before `now - retention`. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };

        let mut map = self.write();
        let before = map.len();
        map.retain(|_, task| task.created_at >= cutoff);
        before - map.len()
    }

    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        retention: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = registry.sweep_expired(Utc::now(), retention);
                if removed > 0 {
                    tracing::info!(removed, remaining = registry.len(), "expired tasks swept");
                }
            }
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaskId, Task>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TaskId, Task>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn ensure_open(task: &Task) -> Result<(), TaskError> {
    if task.status.is_terminal() {
        tracing::error!(
            task_id = %task.id,
            status = ?task.status,
            "refusing to finalize task twice"
        );
        return Err(TaskError::AlreadyFinalized {
            id: task.id.clone(),
            status: task.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<InstanceId> {
        raw.iter().map(|s| InstanceId::from(*s)).collect()
    }

    fn backdate(registry: &TaskRegistry, id: &TaskId, by: chrono::Duration) {
        let mut map = registry.write();
        let task = map.get_mut(id).unwrap();
        task.created_at -= by;
    }

    #[test]
    fn create_and_get() {
        let registry = TaskRegistry::new();
        let task = registry.create(Operation::Start, ids(&["a", "b"]));

        let got = registry.get(&task.id).unwrap();
        assert_eq!(got.status, TaskStatus::Pending);
        assert_eq!(got.total_count, 2);
        assert_eq!(got.target_ids, ids(&["a", "b"]));
    }

    #[test]
    fn get_unknown_task() {
        let registry = TaskRegistry::new();
        let id = TaskId::from("nope");
        assert_eq!(registry.get(&id).unwrap_err(), TaskError::NotFound(id));
    }

    #[test]
    fn mark_running_only_from_pending() {
        let registry = TaskRegistry::new();
        let task = registry.create(Operation::Stop, ids(&["a"]));
        registry.mark_running(&task.id).unwrap();
        assert_eq!(registry.get(&task.id).unwrap().status, TaskStatus::Running);

        let err = registry.mark_running(&task.id).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[test]
    fn finalize_success_tallies_every_unit() {
        let registry = TaskRegistry::new();
        let task = registry.create(Operation::Start, ids(&["a", "a", "b"]));
        registry.mark_running(&task.id).unwrap();

        let done = registry
            .finalize_success(
                &task.id,
                vec![
                    OperationResult::success("a".into()),
                    OperationResult::success("a".into()),
                    OperationResult::failure("b".into(), "boom"),
                ],
            )
            .unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.success_count, 2);
        assert_eq!(done.failed_count, 1);
        assert_eq!(done.success_count + done.failed_count, done.total_count);
        assert_eq!(done.failed_details.get(&InstanceId::from("b")).unwrap(), "boom");
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[test]
    fn finalize_twice_is_rejected_without_overwrite() {
        let registry = TaskRegistry::new();
        let task = registry.create(Operation::Delete, ids(&["a"]));
        registry.mark_running(&task.id).unwrap();
        registry.finalize_failure(&task.id, "timed out").unwrap();
        let first = registry.get(&task.id).unwrap();

        let err = registry
            .finalize_success(&task.id, vec![OperationResult::success("a".into())])
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::AlreadyFinalized {
                status: TaskStatus::Failed,
                ..
            }
        ));
        assert!(registry.finalize_failure(&task.id, "again").is_err());

        let after = registry.get(&task.id).unwrap();
        assert_eq!(after.status, TaskStatus::Failed);
        assert_eq!(after.error_message.as_deref(), Some("timed out"));
        assert_eq!(after.success_count, 0);
        assert_eq!(after.completed_at, first.completed_at);
    }

    #[test]
    fn sweep_removes_only_expired_tasks() {
        let registry = TaskRegistry::new();
        let old = registry.create(Operation::Start, ids(&["a"]));
        let recent = registry.create(Operation::Start, ids(&["b"]));
        backdate(&registry, &old.id, chrono::Duration::hours(25));
        backdate(&registry, &recent.id, chrono::Duration::hours(1));

        let removed = registry.sweep_expired(Utc::now(), Duration::from_secs(24 * 60 * 60));

        assert_eq!(removed, 1);
        assert!(registry.get(&old.id).is_err());
        assert!(registry.get(&recent.id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically() {
        let registry = TaskRegistry::new();
        let task = registry.create(Operation::Stop, ids(&["a"]));
        backdate(&registry, &task.id, chrono::Duration::hours(48));

        let handle = registry.spawn_sweeper(Duration::from_secs(60), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(registry.is_empty());
        handle.abort();
    }
}
