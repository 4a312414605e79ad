use std::{path::PathBuf, time::Duration};

use hangar_core::{OrchestratorConfig, config as defaults};

const DEFAULT_DOCKER_BIN: &str = "docker";
const DEFAULT_IMAGE: &str = "mlikiowa/napcat-docker:latest";
const DEFAULT_CONTAINER_PREFIX: &str = "hangar";

#[derive(Debug, Clone)]
pub struct DockerSettings {
    pub bin: String,
    /// Passed as `--host` when set.
    pub host: Option<String>,
    pub image: String,
    pub container_prefix: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_root: PathBuf,
    pub docker: DockerSettings,
    pub orchestrator: OrchestratorConfig,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Out-of-range numbers are clamped; unparsable ones fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let num = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let text = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut orch = OrchestratorConfig::default();
        orch.concurrency = num("HANGAR_CONCURRENCY")
            .map(|v| v.clamp(1, 64) as usize)
            .unwrap_or(defaults::DEFAULT_CONCURRENCY);
        orch.task_timeout = num("HANGAR_TASK_TIMEOUT_SECS")
            .map(|v| Duration::from_secs(v.clamp(5, 3600)))
            .unwrap_or(defaults::DEFAULT_TASK_TIMEOUT);
        orch.task_retention = num("HANGAR_TASK_RETENTION_HOURS")
            .map(|v| Duration::from_secs(v.clamp(1, 24 * 30) * 60 * 60))
            .unwrap_or(defaults::DEFAULT_TASK_RETENTION);
        orch.sweep_interval = num("HANGAR_SWEEP_INTERVAL_SECS")
            .map(|v| Duration::from_secs(v.clamp(60, 24 * 60 * 60)))
            .unwrap_or(defaults::DEFAULT_SWEEP_INTERVAL);
        orch.base_port = num("HANGAR_BASE_PORT")
            .map(|v| v.clamp(1024, 60_000) as u16)
            .unwrap_or(defaults::DEFAULT_BASE_PORT);
        orch.port_window = num("HANGAR_PORT_WINDOW")
            .map(|v| v.clamp(1, 1000) as u16)
            .unwrap_or(defaults::DEFAULT_PORT_WINDOW);
        orch.startup_grace = num("HANGAR_STARTUP_GRACE_SECS")
            .map(|v| Duration::from_secs(v.min(600)))
            .unwrap_or(defaults::DEFAULT_STARTUP_GRACE);
        orch.restart_pause = num("HANGAR_RESTART_PAUSE_MS")
            .map(|v| Duration::from_millis(v.min(60_000)))
            .unwrap_or(defaults::DEFAULT_RESTART_PAUSE);
        orch.max_instances = num("HANGAR_MAX_INSTANCES")
            .map(|v| v.clamp(1, 1000) as usize)
            .unwrap_or(defaults::DEFAULT_MAX_INSTANCES);
        if let Some(url) = text("HANGAR_WEBHOOK_URL") {
            orch.sidecar.webhook_url = url;
        }
        if let Some(dir) = text("HANGAR_SIDECAR_CONFIG_DIR") {
            orch.sidecar.config_dir = dir;
        }

        Self {
            data_root: data_root(text("HANGAR_DATA_ROOT")),
            docker: DockerSettings {
                bin: text("HANGAR_DOCKER_BIN").unwrap_or_else(|| DEFAULT_DOCKER_BIN.to_string()),
                host: text("HANGAR_DOCKER_HOST"),
                image: text("HANGAR_IMAGE").unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
                container_prefix: text("HANGAR_CONTAINER_PREFIX")
                    .unwrap_or_else(|| DEFAULT_CONTAINER_PREFIX.to_string()),
            },
            orchestrator: orch,
        }
    }
}

fn data_root(raw: Option<String>) -> PathBuf {
    let p = PathBuf::from(raw.unwrap_or_else(|| "./data".to_string()));
    if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    }
}
