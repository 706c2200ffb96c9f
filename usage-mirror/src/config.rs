use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use vue_client::VueConfig;

pub const CONFIG_ENV: &str = "USAGE_MIRROR_CONFIG";
pub const TOKEN_FILE_ENV: &str = "EMPORIA_TOKEN_FILE";
const DEFAULT_CONFIG_PATH: &str = "usage-mirror.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_retries: 0,
            retry_backoff_ms: 1_000,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub bind_addr: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4840".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub vue: VueConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Load from the file named by `USAGE_MIRROR_CONFIG`, or from
    /// `usage-mirror.toml` when present. Without either, the defaults apply.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        Self::load_from(env::var(CONFIG_ENV).ok(), env::var(TOKEN_FILE_ENV).ok())
    }

    /// An explicit `config_path` must exist; the default path may be absent.
    pub fn load_from(config_path: Option<String>, token_file: Option<String>) -> anyhow::Result<Self> {
        let mut cfg = match config_path {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(token_file) = token_file {
            cfg.vue.token_cache_path = PathBuf::from(token_file);
        }
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.sync.interval_ms == 0 {
            anyhow::bail!("sync.interval_ms must be greater than zero");
        }
        if cfg.vue.request_timeout_ms == 0 {
            anyhow::bail!("vue.request_timeout_ms must be greater than zero");
        }
        Ok(cfg)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Self::from_toml_str(&contents)
    }
}
