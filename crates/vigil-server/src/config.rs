use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub query_engine: QueryEngineConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; defaults to `vigil.db` under `data_dir`.
    #[serde(default)]
    pub url: Option<String>,
    /// Holds the SQLite file (by default) and the secret encryption key.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            data_dir: default_data_dir(),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => {
                let path = PathBuf::from(&self.data_dir).join("vigil.db");
                format!("sqlite://{}?mode=rwc", path.display())
            }
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Six-field cron (with seconds) used by rules without an explicit one.
    #[serde(default = "default_cron")]
    pub default_cron: String,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            default_cron: default_cron(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_cron() -> String {
    "0 * * * * *".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEngineConfig {
    #[serde(default = "default_query_engine_url")]
    pub base_url: String,
    #[serde(default = "default_query_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_query_engine_url(),
            timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_query_engine_url() -> String {
    "http://127.0.0.1:8000/api/query".to_string()
}

fn default_query_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_renderer_url")]
    pub base_url: String,
    #[serde(default = "default_renderer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_renderer_url(),
            timeout_secs: default_renderer_timeout_secs(),
            width: default_width(),
            height: default_height(),
            theme: default_theme(),
        }
    }
}

fn default_renderer_url() -> String {
    "http://127.0.0.1:8000/api/render".to_string()
}

fn default_renderer_timeout_secs() -> u64 {
    45
}

fn default_width() -> u32 {
    1000
}

fn default_height() -> u32 {
    600
}

fn default_theme() -> String {
    "light".to_string()
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {}", path, e))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

// ---- Seed file types (used by the `seed` CLI subcommand) ----

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub rules: Vec<SeedRule>,
    #[serde(default)]
    pub email: Option<vigil_storage::EmailConfigRow>,
    #[serde(default)]
    pub sms: Option<vigil_storage::SmsConfigRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRule {
    pub name: String,
    #[serde(default)]
    pub kind: vigil_common::types::RuleKind,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub dashboard_id: Option<String>,
    #[serde(default)]
    pub widget_id: Option<String>,
    /// Rule configuration blob; validated before insert.
    pub config: serde_json::Value,
}

fn default_seed_enabled() -> bool {
    true
}
