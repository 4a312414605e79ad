//! In-memory container runtime and seeding helpers for engine tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use hangar_instance::{ContainerRef, ContainerStatus, Instance, InstanceConfig, InstanceStatus};

use crate::{
    error::RuntimeError,
    runtime::{ContainerRuntime, ContainerSpec},
    store::{InstanceStore, MemoryInstanceStore},
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub running: bool,
    pub files: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    containers: HashMap<ContainerRef, FakeContainer>,
    /// (op, instance name); a `None` name fails the op for every container.
    failures: HashSet<(&'static str, Option<String>)>,
    panics: HashSet<(&'static str, String)>,
    delays: HashMap<&'static str, Duration>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    creates: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail(&self, op: &'static str, name: Option<&str>) {
        self.state().failures.insert((op, name.map(str::to_string)));
    }

    pub fn panic_on(&self, op: &'static str, name: &str) {
        self.state().panics.insert((op, name.to_string()));
    }

    pub fn delay(&self, op: &'static str, by: Duration) {
        self.state().delays.insert(op, by);
    }

    /// Drops a container behind the engine's back.
    pub fn forget(&self, container: &ContainerRef) {
        self.state().containers.remove(container);
    }

    pub fn container(&self, container: &ContainerRef) -> Option<FakeContainer> {
        self.state().containers.get(container).cloned()
    }

    pub fn put_file(&self, container: &ContainerRef, path: &str, content: &[u8]) {
        if let Some(c) = self.state().containers.get_mut(container) {
            c.files.insert(path.to_string(), content.to_vec());
        }
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn name_of(&self, container: &ContainerRef) -> Option<String> {
        self.state().containers.get(container).map(|c| c.name.clone())
    }

    async fn enter(&self, op: &'static str, name: Option<&str>) -> Result<(), RuntimeError> {
        let (delay, fail, panic) = {
            let state = self.state();
            let fail = state.failures.contains(&(op, None))
                || name.is_some_and(|n| state.failures.contains(&(op, Some(n.to_string()))));
            let panic = name.is_some_and(|n| state.panics.contains(&(op, n.to_string())));
            (state.delays.get(op).copied(), fail, panic)
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if panic {
            panic!("injected panic in {op}");
        }
        if fail {
            return Err(RuntimeError::command(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.enter("create", Some(name)).await?;
        let mut state = self.state();
        state.next_id += 1;
        let container = ContainerRef(format!("ctr-{}", state.next_id));
        state.containers.insert(
            container.clone(),
            FakeContainer {
                name: name.to_string(),
                spec: spec.clone(),
                running: false,
                files: HashMap::new(),
            },
        );
        Ok(container)
    }

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let name = self.name_of(container);
        self.enter("start", name.as_deref()).await?;
        match self.state().containers.get_mut(container) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(container.clone())),
        }
    }

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let name = self.name_of(container);
        self.enter("stop", name.as_deref()).await?;
        match self.state().containers.get_mut(container) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(container.clone())),
        }
    }

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let name = self.name_of(container);
        self.enter("remove", name.as_deref()).await?;
        self.state()
            .containers
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(container.clone()))
    }

    async fn exists(&self, container: &ContainerRef) -> Result<bool, RuntimeError> {
        let name = self.name_of(container);
        self.enter("exists", name.as_deref()).await?;
        Ok(self.state().containers.contains_key(container))
    }

    async fn status(&self, container: &ContainerRef) -> Result<ContainerStatus, RuntimeError> {
        let name = self.name_of(container);
        self.enter("status", name.as_deref()).await?;
        Ok(match self.state().containers.get(container) {
            Some(c) if c.running => ContainerStatus::Running,
            Some(_) => ContainerStatus::Stopped,
            None => ContainerStatus::NotFound,
        })
    }

    async fn copy_file_in(
        &self,
        container: &ContainerRef,
        content: &[u8],
        path: &str,
    ) -> Result<(), RuntimeError> {
        let name = self.name_of(container);
        self.enter("copy_file_in", name.as_deref()).await?;
        match self.state().containers.get_mut(container) {
            Some(c) => {
                c.files.insert(path.to_string(), content.to_vec());
                Ok(())
            }
            None => Err(RuntimeError::NotFound(container.clone())),
        }
    }

    async fn copy_file_out(
        &self,
        container: &ContainerRef,
        path: &str,
    ) -> Result<Vec<u8>, RuntimeError> {
        let name = self.name_of(container);
        self.enter("copy_file_out", name.as_deref()).await?;
        let state = self.state();
        let Some(c) = state.containers.get(container) else {
            return Err(RuntimeError::NotFound(container.clone()));
        };
        c.files
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::FileNotFound {
                container: container.clone(),
                path: path.to_string(),
            })
    }
}

/// Inserts an instance named `name` on the next free port block. With
/// `with_container` a matching fake container is created too (running if the
/// status says so).
pub async fn seed(
    store: &MemoryInstanceStore,
    runtime: &FakeRuntime,
    name: &str,
    account: Option<&str>,
    status: InstanceStatus,
    with_container: bool,
) -> Instance {
    let port = 6099 + store.len().await as u16;
    let mut inst = Instance::new(
        name,
        account.map(str::to_string),
        port,
        InstanceConfig::default(),
    )
    .unwrap();
    inst.status = status;
    if with_container {
        let container = runtime
            .create(name, &ContainerSpec::for_instance(&inst))
            .await
            .unwrap();
        if status == InstanceStatus::Running {
            runtime.start(&container).await.unwrap();
        }
        inst.container_ref = Some(container);
    }
    store.insert(&inst).await.unwrap();
    inst
}
