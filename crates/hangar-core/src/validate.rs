use std::{fmt, sync::Arc};

use hangar_instance::{InstanceId, InstanceStatus};

use crate::{store::InstanceStore, task::Operation};

/// One target that cannot take part in a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidState {
    pub instance_id: InstanceId,
    pub current_status: InstanceStatus,
    pub required_status: String,
    pub reason: String,
}

/// Rejection of a whole bulk request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidStateReport {
    pub operation: Operation,
    pub invalid: Vec<InvalidState>,
}

impl fmt::Display for InvalidStateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.invalid.is_empty() {
            return write!(f, "{}: no target instances given", self.operation);
        }
        write!(
            f,
            "{}: {} instance(s) in an invalid state",
            self.operation,
            self.invalid.len()
        )?;
        for entry in &self.invalid {
            write!(
                f,
                "; {} is {} ({})",
                entry.instance_id, entry.current_status, entry.reason
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for InvalidStateReport {}

/// All-or-nothing pre-flight gate for bulk requests.
#[derive(Clone)]
pub struct StateValidator {
    store: Arc<dyn InstanceStore>,
}

impl StateValidator {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    pub async fn validate(
        &self,
        operation: Operation,
        target_ids: &[InstanceId],
    ) -> Result<(), InvalidStateReport> {
        if target_ids.is_empty() {
            return Err(InvalidStateReport {
                operation,
                invalid: Vec::new(),
            });
        }

        let mut invalid = Vec::new();
        for id in target_ids {
            let current = match self.store.get(id).await {
                Ok(instance) => instance.status,
                Err(e) => {
                    invalid.push(InvalidState {
                        instance_id: id.clone(),
                        current_status: InstanceStatus::Unknown,
                        required_status: operation.required_status().to_string(),
                        reason: format!("cannot read instance status: {e}"),
                    });
                    continue;
                }
            };

            if let Some(reason) = operation.rejects(current) {
                invalid.push(InvalidState {
                    instance_id: id.clone(),
                    current_status: current,
                    required_status: operation.required_status().to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        if invalid.is_empty() {
            Ok(())
        } else {
            tracing::info!(
                %operation,
                rejected = invalid.len(),
                targets = target_ids.len(),
                "bulk request rejected by state validation"
            );
            Err(InvalidStateReport { operation, invalid })
        }
    }
}
