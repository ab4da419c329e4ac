use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::platform::{NativePlatform, Platform};

pub const CONTROL_PLANE_CONFIG_FILE: &str = "control-plane.toml";
pub const SATELLITE_CONFIG_FILE: &str = "satellite.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on every `/api` call. Without one only loopback callers get in.
    #[serde(default)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_cron")]
    pub tick_cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_heartbeat_ttl")]
    pub heartbeat_ttl_secs: i64,
    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests_per_poll: usize,
    #[serde(default)]
    pub default_attempt_max: Option<i64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17900
}
fn default_db_path() -> PathBuf {
    NativePlatform::data_dir().join("control-plane.db")
}
fn default_true() -> bool {
    true
}
fn default_tick_cron() -> String {
    "0 * * * * *".to_string()
}
fn default_heartbeat_ttl() -> i64 {
    300
}
fn default_sweep_cron() -> String {
    "30 * * * * *".to_string()
}
fn default_max_requests() -> usize {
    25
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_cron: default_tick_cron(),
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: default_heartbeat_ttl(),
            sweep_cron: default_sweep_cron(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_requests_per_poll: default_max_requests(),
            default_attempt_max: None,
        }
    }
}

impl ControlPlaneConfig {
    pub fn default_path() -> PathBuf {
        NativePlatform::data_dir().join(CONTROL_PLANE_CONFIG_FILE)
    }

    /// Reads the file at `path`; a missing file means defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::parse(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(
            "Loaded control plane config: {}:{}, db={}",
            config.server.host,
            config.server.port,
            config.database.path.display()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(
            config.dispatch.max_requests_per_poll > 0,
            "dispatch.max_requests_per_poll must be positive"
        );
        anyhow::ensure!(
            config.agents.heartbeat_ttl_secs > 0,
            "agents.heartbeat_ttl_secs must be positive"
        );
        Ok(config)
    }
}

/// Agent-side settings for `ingest-control satellite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteConfig {
    #[serde(default = "default_control_plane_url")]
    pub control_plane_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub integration_ids: Vec<String>,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    #[serde(default)]
    pub stages: Vec<HttpStageConfig>,
}

/// A paged HTTP source. The endpoint answers `{records, next_cursor, done}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStageConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub opt_in: bool,
    #[serde(default)]
    pub onboarding_only: bool,
}

fn default_control_plane_url() -> String {
    format!("http://{}:{}", default_host(), default_port())
}
fn default_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "satellite".to_string())
}
fn default_poll_secs() -> u64 {
    10
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_output_dir() -> PathBuf {
    NativePlatform::data_dir().join("output")
}

impl Default for SatelliteConfig {
    fn default() -> Self {
        Self {
            control_plane_url: default_control_plane_url(),
            api_token: None,
            agent_id: default_agent_id(),
            tenant_id: None,
            integration_ids: Vec::new(),
            reserved: false,
            poll_interval_secs: default_poll_secs(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            output_dir: default_output_dir(),
            controllers: Vec::new(),
        }
    }
}

impl SatelliteConfig {
    pub fn default_path() -> PathBuf {
        NativePlatform::data_dir().join(SATELLITE_CONFIG_FILE)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        url::Url::parse(&self.control_plane_url)
            .with_context(|| format!("control_plane_url '{}'", self.control_plane_url))?;
        for controller in &self.controllers {
            for stage in &controller.stages {
                url::Url::parse(&stage.url).with_context(|| {
                    format!("url of stage '{}' in controller '{}'", stage.name, controller.name)
                })?;
            }
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        info!(
            "Loaded satellite config: agent={}, controllers={}",
            config.agent_id,
            config.controllers.len()
        );
        Ok(config)
    }
}

pub const DEFAULT_CONTROL_PLANE_TOML: &str = r#"# ingest-control control plane

[server]
host = "127.0.0.1"
port = 17900
# api_token = "change-me"

[database]
# path = "/var/lib/ingest-control/control-plane.db"

[scheduler]
enabled = true
# six-field cron: sec min hour day month weekday
tick_cron = "0 * * * * *"

[agents]
heartbeat_ttl_secs = 300
sweep_cron = "30 * * * * *"

[dispatch]
max_requests_per_poll = 25
# default_attempt_max = 5
"#;

pub const DEFAULT_SATELLITE_TOML: &str = r#"# ingest-control satellite

control_plane_url = "http://127.0.0.1:17900"
# api_token = "change-me"
# agent_id defaults to the hostname
# tenant_id = "acme"
integration_ids = []
reserved = false
poll_interval_secs = 10
heartbeat_interval_secs = 30

# [[controllers]]
# name = "jira-controller"
#
# [[controllers.stages]]
# name = "issues"
# url = "https://jira-proxy.internal/issues"
# category = "boards"
# flag = "fetch_issues"
"#;

/// Writes the commented default file unless one already exists.
pub async fn write_default(path: &Path, content: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
        NativePlatform::restrict_dir_permissions(parent);
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    NativePlatform::restrict_file_permissions(path);
    Ok(true)
}
