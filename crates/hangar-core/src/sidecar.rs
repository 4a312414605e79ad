//! Per-account bot configuration pushed into each instance's container.


pub const DEFAULT_CONFIG_DIR: &str = "/app/napcat/config";
pub const DEFAULT_WEBHOOK_URL: &str = "http://host.docker.internal:8080/api/webhook/message";

#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("invalid account id for config file: {0:?}")]
    InvalidAccount(String),
    #[error("encode config: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    pub webhook_url: String,
    pub config_dir: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            config_dir: DEFAULT_CONFIG_DIR.to_string(),
        }
    }
}

/// A rendered config file and where it goes inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarArtifact {
    pub path: String,
    pub content: Vec<u8>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct OneBotConfig<'a> {
    network: Network<'a>,
    music_sign_url: &'a str,
    enable_local_file2_url: bool,
    parse_mult_msg: bool,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Network<'a> {
    http_servers: &'static [serde_json::Value],
    http_clients: [HttpClient<'a>; 1],
    websocket_servers: &'static [serde_json::Value],
    websocket_clients: &'static [serde_json::Value],
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpClient<'a> {
    name: &'a str,
    enable: bool,
    url: &'a str,
    message_post_format: &'a str,
    report_self_message: bool,
    token: &'a str,
    debug: bool,
}

impl SidecarConfig {
    pub fn artifact(&self, account: &str) -> Result<SidecarArtifact, SidecarError> {
        let account = normalize_account(account)?;
        let config = OneBotConfig {
            network: Network {
                http_servers: &[],
                http_clients: [HttpClient {
                    name: account,
                    enable: true,
                    url: &self.webhook_url,
                    message_post_format: "array",
                    report_self_message: false,
                    token: "",
                    debug: false,
                }],
                websocket_servers: &[],
                websocket_clients: &[],
            },
            music_sign_url: "",
            enable_local_file2_url: false,
            parse_mult_msg: false,
        };

        Ok(SidecarArtifact {
            path: format!(
                "{}/onebot11_{account}.json",
                self.config_dir.trim_end_matches('/')
            ),
            content: serde_json::to_vec_pretty(&config)?,
        })
    }
}

fn normalize_account(raw: &str) -> Result<&str, SidecarError> {
    let account = raw.trim();
    if account.is_empty() || account.len() > 64 {
        return Err(SidecarError::InvalidAccount(raw.to_string()));
    }
    if !account
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SidecarError::InvalidAccount(raw.to_string()));
    }
    Ok(account)
}
