use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use hangar_instance::{Instance, InstanceId};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Owner of instance records. The engine only reads and rewrites orchestration fields.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, id: &InstanceId) -> Result<Instance, StoreError>;

    /// Replaces an existing record.
    async fn update(&self, instance: &Instance) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<Instance>, StoreError>;

    async fn insert(&self, instance: &Instance) -> Result<(), StoreError>;

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryInstanceStore {
    inner: Arc<RwLock<HashMap<InstanceId, Instance>>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn get(&self, id: &InstanceId) -> Result<Instance, StoreError> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        let Some(slot) = map.get_mut(&instance.id) else {
            return Err(StoreError::NotFound(instance.id.clone()));
        };
        *slot = instance.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>, StoreError> {
        let mut out: Vec<Instance> = self.inner.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        if map.contains_key(&instance.id) {
            return Err(StoreError::AlreadyExists(instance.id.clone()));
        }
        map.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
