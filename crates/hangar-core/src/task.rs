use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use hangar_instance::{InstanceId, InstanceStatus};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Bulk lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Start,
        Operation::Stop,
        Operation::Restart,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "START",
            Operation::Stop => "STOP",
            Operation::Restart => "RESTART",
            Operation::Delete => "DELETE",
        }
    }

    /// Why `current` is incompatible with this operation, or `None` if it is allowed.
    pub fn rejects(&self, current: InstanceStatus) -> Option<&'static str> {
        use InstanceStatus::*;
        match (self, current) {
            (Operation::Start, Running) => Some("instance is already running"),
            (Operation::Start, Starting) => Some("instance is already starting"),
            (Operation::Stop, Stopped) => Some("instance is already stopped"),
            (Operation::Stop, Stopping) => Some("instance is already stopping"),
            (Operation::Restart, Starting | Stopping) => {
                Some("instance is mid-transition, cannot restart")
            }
            (Operation::Delete, Starting | Stopping) => {
                Some("instance is mid-transition, cannot delete")
            }
            _ => None,
        }
    }

    /// Human readable status precondition.
    pub fn required_status(&self) -> &'static str {
        match self {
            Operation::Start => "STOPPED",
            Operation::Stop => "RUNNING",
            Operation::Restart => "RUNNING or STOPPED",
            Operation::Delete => "STOPPED or RUNNING",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Record of one bulk request and its aggregate outcome.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub operation: Operation,
    pub status: TaskStatus,
    pub target_ids: Vec<InstanceId>,
    pub total_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub success_ids: BTreeSet<InstanceId>,
    pub failed_details: BTreeMap<InstanceId, String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Task {
    pub(crate) fn new(operation: Operation, target_ids: Vec<InstanceId>) -> Self {
        Self {
            id: TaskId::new(),
            operation,
            status: TaskStatus::Pending,
            total_count: target_ids.len(),
            target_ids,
            success_count: 0,
            failed_count: 0,
            success_ids: BTreeSet::new(),
            failed_details: BTreeMap::new(),
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// Outcome of one per-instance unit of a bulk run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub instance_id: InstanceId,
    pub succeeded: bool,
    pub reason: Option<String>,
}

impl OperationResult {
    pub fn success(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            succeeded: true,
            reason: None,
        }
    }

    pub fn failure(instance_id: InstanceId, reason: impl Into<String>) -> Self {
        Self {
            instance_id,
            succeeded: false,
            reason: Some(reason.into()),
        }
    }
}
