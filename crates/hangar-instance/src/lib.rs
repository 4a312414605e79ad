use std::fmt;

use chrono::{DateTime, Utc};

/// Offset of the HTTP API port from an instance's service port.
pub const HTTP_PORT_OFFSET: u16 = 1000;
/// Offset of the WebSocket port from an instance's service port.
pub const WS_PORT_OFFSET: u16 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque handle of a container as issued by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ContainerRef(pub String);

impl ContainerRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Error => "ERROR",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }

    /// Mid-transition states, owned by whichever operation set them.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, InstanceStatus::Starting | InstanceStatus::Stopping)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Restarting,
    Paused,
    Dead,
    NotFound,
    Unknown,
}

impl From<ContainerStatus> for InstanceStatus {
    fn from(value: ContainerStatus) -> Self {
        match value {
            ContainerStatus::Running => InstanceStatus::Running,
            ContainerStatus::Stopped => InstanceStatus::Stopped,
            ContainerStatus::Restarting => InstanceStatus::Starting,
            ContainerStatus::NotFound | ContainerStatus::Dead => InstanceStatus::Error,
            ContainerStatus::Paused | ContainerStatus::Unknown => InstanceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    #[default]
    Always,
    OnFailure,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 512 * 1024 * 1024;

/// Container template an instance is created from and recreated with on repair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub uid: u32,
    pub gid: u32,
    pub enable_http: bool,
    pub enable_ws: bool,
    pub auto_login: bool,
    /// Client protocol (1 android phone, 2 android pad, 3 watch, 4 macOS, 5 iPad).
    pub protocol: u8,
    pub log_level: String,
    pub debug: bool,
    pub network_mode: String,
    pub restart_policy: RestartPolicy,
    /// e.g. "512m", "1g" or a raw byte count.
    pub memory_limit: String,
    pub cpu_limit: f64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            uid: 1000,
            gid: 1000,
            enable_http: true,
            enable_ws: true,
            auto_login: true,
            protocol: 1,
            log_level: "info".to_string(),
            debug: false,
            network_mode: "bridge".to_string(),
            restart_policy: RestartPolicy::Always,
            memory_limit: "512m".to_string(),
            cpu_limit: 1.0,
        }
    }
}

impl InstanceConfig {
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        let raw = self.memory_limit.trim().to_ascii_lowercase();
        if raw.is_empty() {
            return Some(DEFAULT_MEMORY_LIMIT_BYTES);
        }
        let (digits, mult) = if let Some(v) = raw.strip_suffix('g') {
            (v, 1024 * 1024 * 1024)
        } else if let Some(v) = raw.strip_suffix('m') {
            (v, 1024 * 1024)
        } else {
            (raw.as_str(), 1)
        };
        digits.trim().parse::<u64>().ok()?.checked_mul(mult)
    }
}

/// Returns `(http_port, ws_port)` for a service port, if both fit in the port range.
pub fn derived_ports(service_port: u16) -> Option<(u16, u16)> {
    let http = service_port.checked_add(HTTP_PORT_OFFSET)?;
    let ws = service_port.checked_add(WS_PORT_OFFSET)?;
    Some((http, ws))
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub container_ref: Option<ContainerRef>,
    pub status: InstanceStatus,
    pub service_port: u16,
    pub http_port: u16,
    pub ws_port: u16,
    #[serde(default)]
    pub config: InstanceConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// New STOPPED instance without a container, using the derived-port convention.
    ///
    /// Returns `None` when the derived ports would overflow the port range.
    pub fn new(
        name: impl Into<String>,
        account_id: Option<String>,
        service_port: u16,
        config: InstanceConfig,
    ) -> Option<Self> {
        let (http_port, ws_port) = derived_ports(service_port)?;
        let now = Utc::now();
        Some(Self {
            id: InstanceId::new(),
            name: name.into(),
            account_id,
            container_ref: None,
            status: InstanceStatus::Stopped,
            service_port,
            http_port,
            ws_port,
            config,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn ports(&self) -> [u16; 3] {
        [self.service_port, self.http_port, self.ws_port]
    }

    pub fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn account(&self) -> Option<&str> {
        self.account_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}
