use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use hangar_instance::{ContainerRef, Instance, InstanceConfig};

use crate::{
    error::{RuntimeError, StoreError},
    ops::InstanceOps,
    ports::{PortAllocator, PortError},
    runtime::{ContainerRuntime, ContainerSpec},
    sidecar::{SidecarConfig, SidecarError},
    store::InstanceStore,
};

pub const MAX_BATCH_SIZE: usize = 10;
pub const MAX_NAME_LEN: usize = 100;
pub const DEFAULT_NAME_PREFIX: &str = "hangar";

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("creating {requested} instances would exceed the limit of {max} (currently {current})")]
    LimitExceeded {
        current: usize,
        requested: usize,
        max: usize,
    },
    #[error(transparent)]
    Ports(#[from] PortError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct BatchCreateRequest {
    pub count: usize,
    pub name_prefix: String,
    /// One per instance, or none at all.
    pub account_ids: Option<Vec<String>>,
    pub template: InstanceConfig,
    pub auto_start: bool,
}

impl Default for BatchCreateRequest {
    fn default() -> Self {
        Self {
            count: 1,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            account_ids: None,
            template: InstanceConfig::default(),
            auto_start: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateReport {
    pub total_requested: usize,
    pub created: Vec<Instance>,
    pub failed: Vec<FailedCreate>,
}

#[derive(Debug, thiserror::Error)]
enum CreateError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Rejected(String),
}

/// Creates batches of instances on freshly reserved port blocks.
#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn InstanceStore>,
    runtime: Arc<dyn ContainerRuntime>,
    allocator: PortAllocator,
    sidecar: SidecarConfig,
    ops: InstanceOps,
    max_instances: usize,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        runtime: Arc<dyn ContainerRuntime>,
        allocator: PortAllocator,
        sidecar: SidecarConfig,
        ops: InstanceOps,
        max_instances: usize,
    ) -> Self {
        Self {
            store,
            runtime,
            allocator,
            sidecar,
            ops,
            max_instances,
        }
    }

    pub async fn create_batch(
        &self,
        req: BatchCreateRequest,
    ) -> Result<BatchCreateReport, ProvisionError> {
        validate_request(&req)?;

        let reservation = self.allocator.reserve(self.store.as_ref(), req.count).await?;
        let existing = self.store.list().await?;
        if existing.len() + req.count > self.max_instances {
            return Err(ProvisionError::LimitExceeded {
                current: existing.len(),
                requested: req.count,
                max: self.max_instances,
            });
        }
        let mut names: HashSet<String> = existing.into_iter().map(|i| i.name).collect();

        let stamp = Utc::now().timestamp_millis().rem_euclid(100_000);
        let mut report = BatchCreateReport {
            total_requested: req.count,
            created: Vec::new(),
            failed: Vec::new(),
        };

        for (i, port) in reservation.ports.iter().copied().enumerate() {
            let name = format!("{}-{stamp:05}-{}", req.name_prefix, i + 1);
            let account = req
                .account_ids
                .as_ref()
                .and_then(|a| a.get(i))
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());

            let result = if names.contains(&name) {
                Err(CreateError::Rejected(format!("instance name already exists: {name}")))
            } else {
                self.create_one(&name, account.clone(), port, &req.template)
                    .await
            };

            match result {
                Ok(inst) => {
                    tracing::info!(instance_id = %inst.id, %name, port, "instance created");
                    names.insert(name);
                    report.created.push(inst);
                }
                Err(e) => {
                    tracing::error!(%name, port, error = %e, "instance creation failed");
                    report.failed.push(FailedCreate {
                        name,
                        account_id: account,
                        reason: e.to_string(),
                    });
                }
            }
        }
        drop(reservation);

        if req.auto_start {
            for inst in &mut report.created {
                if let Err(e) = self.ops.start(&inst.id).await {
                    tracing::warn!(instance_id = %inst.id, error = %e, "auto-start failed");
                }
                match self.store.get(&inst.id).await {
                    Ok(current) => *inst = current,
                    Err(e) => {
                        tracing::warn!(instance_id = %inst.id, error = %e, "failed to reload started instance");
                    }
                }
            }
        }

        tracing::info!(
            requested = report.total_requested,
            created = report.created.len(),
            failed = report.failed.len(),
            "batch creation finished"
        );
        Ok(report)
    }

    async fn create_one(
        &self,
        name: &str,
        account: Option<String>,
        port: u16,
        template: &InstanceConfig,
    ) -> Result<Instance, CreateError> {
        let Some(mut inst) = Instance::new(name, account, port, template.clone()) else {
            return Err(CreateError::Rejected(format!("port {port} out of range")));
        };

        let container = self
            .runtime
            .create(name, &ContainerSpec::for_instance(&inst))
            .await?;

        if let Err(e) = self.attach(&mut inst, &container).await {
            if let Err(cleanup) = self.runtime.remove(&container).await {
                tracing::warn!(%container, error = %cleanup, "failed to remove orphaned container");
            }
            return Err(e);
        }
        Ok(inst)
    }

    async fn attach(&self, inst: &mut Instance, container: &ContainerRef) -> Result<(), CreateError> {
        if let Some(account) = inst.account() {
            let artifact = self.sidecar.artifact(account)?;
            self.runtime
                .copy_file_in(container, &artifact.content, &artifact.path)
                .await?;
        }
        inst.container_ref = Some(container.clone());
        self.store.insert(inst).await?;
        Ok(())
    }
}

fn validate_request(req: &BatchCreateRequest) -> Result<(), ProvisionError> {
    let invalid = |msg: String| -> Result<(), ProvisionError> {
        Err(ProvisionError::InvalidRequest(msg))
    };

    if req.count == 0 {
        return invalid("instance count must be greater than 0".to_string());
    }
    if req.count > MAX_BATCH_SIZE {
        return invalid(format!("at most {MAX_BATCH_SIZE} instances per batch"));
    }
    if let Some(accounts) = &req.account_ids
        && accounts.len() != req.count
    {
        return invalid(format!(
            "got {} account ids for {} instances",
            accounts.len(),
            req.count
        ));
    }
    if !is_valid_prefix(&req.name_prefix) {
        return invalid(format!("invalid name prefix: {:?}", req.name_prefix));
    }
    Ok(())
}

/// `[A-Za-z0-9][A-Za-z0-9_-]*`, leaving room for the generated suffix.
fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    // "-NNNNN-NN"
    prefix.len() + 9 <= MAX_NAME_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
