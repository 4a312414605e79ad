use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use hangar_core::{InstanceStore, StoreError};
use hangar_instance::{Instance, InstanceId};
use tokio::{io::AsyncWriteExt, sync::RwLock};

const INSTANCES_DIR: &str = "instances";

/// One JSON file per instance under `<data_root>/instances/`, cached in memory.
pub struct JsonInstanceStore {
    dir: PathBuf,
    cache: RwLock<HashMap<InstanceId, Instance>>,
}

impl JsonInstanceStore {
    /// Loads every record already on disk. Unreadable files are skipped.
    pub async fn open(data_root: &Path) -> anyhow::Result<Self> {
        let dir = data_root.join(INSTANCES_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;

        let mut cache = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("read {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable instance file");
                    continue;
                }
            };
            match serde_json::from_slice::<Instance>(&raw) {
                Ok(inst) => {
                    cache.insert(inst.id.clone(), inst);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed instance file");
                }
            }
        }
        tracing::info!(dir = %dir.display(), instances = cache.len(), "instance store loaded");

        Ok(Self {
            dir,
            cache: RwLock::new(cache),
        })
    }

    fn path_for(&self, id: &InstanceId) -> Result<PathBuf, StoreError> {
        let raw = id.as_str();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        {
            return Err(StoreError::Backend(format!("invalid instance id: {raw:?}")));
        }
        Ok(self.dir.join(format!("{raw}.json")))
    }

    async fn persist(&self, inst: &Instance) -> Result<(), StoreError> {
        let path = self.path_for(&inst.id)?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(inst)
            .map_err(|e| StoreError::Backend(format!("serialize instance: {e}")))?;

        let mut f = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::Backend(format!("write temp file: {e}")))?;
        f.write_all(&data)
            .await
            .map_err(|e| StoreError::Backend(format!("write temp file: {e}")))?;
        f.flush()
            .await
            .map_err(|e| StoreError::Backend(format!("flush temp file: {e}")))?;

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Backend(format!("persist instance: {e}")))
    }
}

#[async_trait]
impl InstanceStore for JsonInstanceStore {
    async fn get(&self, id: &InstanceId) -> Result<Instance, StoreError> {
        self.cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        if !cache.contains_key(&instance.id) {
            return Err(StoreError::NotFound(instance.id.clone()));
        }
        self.persist(instance).await?;
        cache.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Instance>, StoreError> {
        let mut out: Vec<Instance> = self.cache.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        if cache.contains_key(&instance.id) {
            return Err(StoreError::AlreadyExists(instance.id.clone()));
        }
        self.persist(instance).await?;
        cache.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        if !cache.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Backend(format!("remove instance file: {e}"))),
        }
        cache.remove(id);
        Ok(())
    }
}
