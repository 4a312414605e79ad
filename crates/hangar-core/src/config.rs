use std::time::Duration;

use crate::sidecar::SidecarConfig;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_BASE_PORT: u16 = 6099;
pub const DEFAULT_PORT_WINDOW: u16 = 1000;
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_RESTART_PAUSE: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_INSTANCES: usize = 100;

/// Tunables for the whole engine. Everything has a working default.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Width of the worker pool shared by every bulk task.
    pub concurrency: usize,
    /// Overall deadline for one bulk task.
    pub task_timeout: Duration,
    pub task_retention: Duration,
    pub sweep_interval: Duration,
    pub base_port: u16,
    pub port_window: u16,
    /// Delay before the one-shot startup health check.
    pub startup_grace: Duration,
    pub restart_pause: Duration,
    pub max_instances: usize,
    pub sidecar: SidecarConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            task_retention: DEFAULT_TASK_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            base_port: DEFAULT_BASE_PORT,
            port_window: DEFAULT_PORT_WINDOW,
            startup_grace: DEFAULT_STARTUP_GRACE,
            restart_pause: DEFAULT_RESTART_PAUSE,
            max_instances: DEFAULT_MAX_INSTANCES,
            sidecar: SidecarConfig::default(),
        }
    }
}
