use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use hangar_core::{ContainerRuntime, ContainerSpec, RuntimeError};
use hangar_instance::{ContainerRef, ContainerStatus, RestartPolicy};
use tokio::{process::Command, sync::Mutex};

use crate::config::DockerSettings;

const CONTAINER_DATA_DIR: &str = "/app/napcat";
const STOP_TIMEOUT_SECS: u32 = 30;
const MANAGER_LABEL: &str = "hangar.manager=hangar-agent";

/// [`ContainerRuntime`] backed by the `docker` command line client.
pub struct DockerCli {
    settings: DockerSettings,
    /// Host side of each container's data bind mount.
    volumes_root: PathBuf,
    image_ready: Mutex<bool>,
}

impl DockerCli {
    pub fn new(settings: DockerSettings, data_root: &Path) -> Self {
        Self {
            settings,
            volumes_root: data_root.join("containers"),
            image_ready: Mutex::new(false),
        }
    }

    fn container_name(&self, instance_name: &str) -> String {
        format!("{}-{instance_name}", self.settings.container_prefix)
    }

    fn create_args(&self, instance_name: &str, spec: &ContainerSpec) -> Vec<String> {
        let cfg = &spec.config;
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            self.container_name(instance_name),
            "--label".into(),
            format!("hangar.instance={instance_name}"),
            "--label".into(),
            MANAGER_LABEL.into(),
            "--restart".into(),
            restart_arg(cfg.restart_policy),
        ];
        if !cfg.network_mode.trim().is_empty() {
            args.push("--network".into());
            args.push(cfg.network_mode.trim().to_string());
        }
        if let Some(bytes) = cfg.memory_limit_bytes() {
            args.push("--memory".into());
            args.push(bytes.to_string());
        }
        if cfg.cpu_limit > 0.0 {
            args.push("--cpus".into());
            args.push(cfg.cpu_limit.to_string());
        }

        let mut env = vec![
            format!("NAPCAT_UID={}", cfg.uid),
            format!("NAPCAT_GID={}", cfg.gid),
            format!("NAPCAT_LOG_LEVEL={}", cfg.log_level),
            format!("NAPCAT_AUTO_LOGIN={}", cfg.auto_login),
            format!("NAPCAT_PROTOCOL={}", cfg.protocol),
            format!("NAPCAT_HTTP_PORT={}", spec.http_port),
            format!("NAPCAT_WS_PORT={}", spec.ws_port),
            format!("NAPCAT_ENABLE_HTTP={}", cfg.enable_http),
            format!("NAPCAT_ENABLE_WS={}", cfg.enable_ws),
        ];
        if cfg.debug {
            env.push("NAPCAT_DEBUG=true".into());
        }
        for e in env {
            args.push("-e".into());
            args.push(e);
        }

        let mut ports = Vec::new();
        if cfg.enable_http {
            ports.push(spec.http_port);
        }
        if cfg.enable_ws {
            ports.push(spec.ws_port);
        }
        ports.push(spec.service_port);
        for p in ports {
            args.push("-p".into());
            args.push(format!("{p}:{p}"));
        }

        args.push("-v".into());
        args.push(format!(
            "{}:{CONTAINER_DATA_DIR}",
            self.volumes_root.join(instance_name).display()
        ));
        args.push(self.settings.image.clone());
        args
    }

    async fn docker(&self, op: &'static str, args: &[String]) -> Result<String, RuntimeError> {
        let mut cmd = Command::new(&self.settings.bin);
        if let Some(host) = &self.settings.host {
            cmd.arg("--host").arg(host);
        }
        cmd.args(args).stdin(Stdio::null());

        let out = cmd
            .output()
            .await
            .map_err(|e| RuntimeError::command(op, format!("spawn {}: {e}", self.settings.bin)))?;
        if out.status.success() {
            return Ok(String::from_utf8_lossy(&out.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("docker exited with {}", out.status)
        } else {
            stderr
        };
        Err(RuntimeError::command(op, message))
    }

    /// Like [`Self::docker`], mapping "no such container" to [`RuntimeError::NotFound`].
    async fn docker_on(
        &self,
        op: &'static str,
        container: &ContainerRef,
        args: &[String],
    ) -> Result<String, RuntimeError> {
        match self.docker(op, args).await {
            Err(RuntimeError::Command { message, .. }) if is_missing_container(&message) => {
                Err(RuntimeError::NotFound(container.clone()))
            }
            other => other,
        }
    }

    async fn ensure_image(&self) -> Result<(), RuntimeError> {
        let mut ready = self.image_ready.lock().await;
        if *ready {
            return Ok(());
        }
        let image = self.settings.image.clone();
        if self
            .docker("image inspect", &["image".into(), "inspect".into(), image.clone()])
            .await
            .is_err()
        {
            tracing::info!(%image, "pulling container image");
            self.docker("pull", &["pull".into(), image.clone()]).await?;
            tracing::info!(%image, "container image pulled");
        }
        *ready = true;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError> {
        self.ensure_image().await?;

        let host_dir = self.volumes_root.join(name);
        tokio::fs::create_dir_all(&host_dir).await.map_err(|e| {
            RuntimeError::command("create", format!("create {}: {e}", host_dir.display()))
        })?;

        let id = self.docker("create", &self.create_args(name, spec)).await?;
        if id.is_empty() {
            return Err(RuntimeError::command("create", "docker returned no container id"));
        }
        tracing::info!(container = %id, instance = %name, "container created");
        Ok(ContainerRef(id))
    }

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.docker_on("start", container, &["start".into(), container.0.clone()])
            .await
            .map(|_| ())
    }

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        let args = [
            "stop".into(),
            "-t".into(),
            STOP_TIMEOUT_SECS.to_string(),
            container.0.clone(),
        ];
        self.docker_on("stop", container, &args).await.map(|_| ())
    }

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.docker_on("rm", container, &["rm".into(), "-f".into(), container.0.clone()])
            .await
            .map(|_| ())
    }

    async fn exists(&self, container: &ContainerRef) -> Result<bool, RuntimeError> {
        match self.inspect(container, "{{.Id}}").await {
            Ok(_) => Ok(true),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn status(&self, container: &ContainerRef) -> Result<ContainerStatus, RuntimeError> {
        match self.inspect(container, "{{.State.Status}}").await {
            Ok(state) => Ok(parse_state(&state)),
            Err(RuntimeError::NotFound(_)) => Ok(ContainerStatus::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn copy_file_in(
        &self,
        container: &ContainerRef,
        content: &[u8],
        path: &str,
    ) -> Result<(), RuntimeError> {
        let tmp = scratch_path();
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| RuntimeError::command("cp", format!("write {}: {e}", tmp.display())))?;

        let args = [
            "cp".into(),
            tmp.display().to_string(),
            format!("{}:{path}", container.0),
        ];
        let result = self.docker_on("cp", container, &args).await.map(|_| ());
        let _ = tokio::fs::remove_file(&tmp).await;
        result
    }

    async fn copy_file_out(
        &self,
        container: &ContainerRef,
        path: &str,
    ) -> Result<Vec<u8>, RuntimeError> {
        let tmp = scratch_path();
        let args = [
            "cp".into(),
            format!("{}:{path}", container.0),
            tmp.display().to_string(),
        ];
        let result = match self.docker_on("cp", container, &args).await {
            Ok(_) => tokio::fs::read(&tmp)
                .await
                .map_err(|e| RuntimeError::command("cp", format!("read {}: {e}", tmp.display()))),
            Err(RuntimeError::Command { message, .. }) if is_missing_file(&message) => {
                Err(RuntimeError::FileNotFound {
                    container: container.clone(),
                    path: path.to_string(),
                })
            }
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&tmp).await;
        result
    }
}

impl DockerCli {
    async fn inspect(&self, container: &ContainerRef, format: &str) -> Result<String, RuntimeError> {
        let args = [
            "inspect".into(),
            "--type".into(),
            "container".into(),
            "--format".into(),
            format.to_string(),
            container.0.clone(),
        ];
        self.docker_on("inspect", container, &args).await
    }
}

fn restart_arg(policy: RestartPolicy) -> String {
    match policy {
        RestartPolicy::OnFailure => "on-failure:3".to_string(),
        other => other.as_str().to_string(),
    }
}

fn parse_state(raw: &str) -> ContainerStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "running" => ContainerStatus::Running,
        "created" | "exited" => ContainerStatus::Stopped,
        "restarting" => ContainerStatus::Restarting,
        "paused" => ContainerStatus::Paused,
        "dead" | "removing" => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

fn is_missing_container(stderr: &str) -> bool {
    if is_missing_file(stderr) {
        return false;
    }
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

/// `cp` reports a missing path as "No such container:path" on older engines.
fn is_missing_file(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container:path")
        || lower.contains("could not find the file")
        || lower.contains("no such file or directory")
}

fn scratch_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("hangar-cp-{}-{n}", std::process::id()))
}
