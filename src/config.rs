use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{IngestError, IngestResult};

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const HEALTH_PORT_ENV: &str = "HEALTH_CHECK_PORT";

const DEFAULT_CREDITS_URL: &str = "https://podcredits.xandeum.network/api/pods-credits";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorConfig {
    /// SQL connection string. Normally supplied via `DATABASE_URL`; a value in
    /// the config file is used only when the environment variable is absent.
    pub database_url: Option<String>,
    /// Base URLs of the well-known seed pNodes polled for gossip.
    pub seeds: Vec<String>,
    /// External endpoint serving the pod credits document.
    pub credits_url: String,
    pub ingest_interval_secs: u64,
    pub credits_interval_secs: u64,
    pub cleanup_check_interval_secs: u64,
    pub health_port: u16,
    pub rpc_timeout_ms: u64,
    pub credits_timeout_ms: u64,
    /// Port substituted into gossip addresses when probing a pNode directly.
    pub probe_port: u16,
    pub probe_batch_size: usize,
    pub seed_concurrency: usize,
    pub store_pool_size: u32,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            seeds: Vec::new(),
            credits_url: DEFAULT_CREDITS_URL.to_string(),
            ingest_interval_secs: default_ingest_interval_secs(),
            credits_interval_secs: default_credits_interval_secs(),
            cleanup_check_interval_secs: default_cleanup_check_interval_secs(),
            health_port: default_health_port(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            credits_timeout_ms: default_credits_timeout_ms(),
            probe_port: default_probe_port(),
            probe_batch_size: default_probe_batch_size(),
            seed_concurrency: default_seed_concurrency(),
            store_pool_size: default_store_pool_size(),
        }
    }
}

fn default_ingest_interval_secs() -> u64 {
    240
}

fn default_credits_interval_secs() -> u64 {
    7_200
}

fn default_cleanup_check_interval_secs() -> u64 {
    3_600
}

fn default_health_port() -> u16 {
    3_001
}

fn default_rpc_timeout_ms() -> u64 {
    2_500
}

fn default_credits_timeout_ms() -> u64 {
    10_000
}

fn default_probe_port() -> u16 {
    6_000
}

fn default_probe_batch_size() -> usize {
    50
}

fn default_seed_concurrency() -> usize {
    8
}

fn default_store_pool_size() -> u32 {
    5
}

impl IngestorConfig {
    pub fn load(path: &Path) -> IngestResult<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|err| IngestError::Config(format!("unable to parse config: {err}")))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from the environment alone, without a config file.
    pub fn from_env() -> IngestResult<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.database_url = Some(url);
            }
        }
        if let Ok(raw) = env::var(HEALTH_PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.health_port = port,
                Err(err) => {
                    tracing::warn!(
                        target: "config",
                        value = %raw,
                        error = %err,
                        "invalid {HEALTH_PORT_ENV}, keeping port {}",
                        self.health_port
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.database_url.as_deref().map_or(true, str::is_empty) {
            return Err(IngestError::Config(format!(
                "{DATABASE_URL_ENV} is required"
            )));
        }
        if self.seeds.is_empty() {
            return Err(IngestError::Config(
                "at least one seed base URL must be configured".to_string(),
            ));
        }
        for seed in &self.seeds {
            let parsed = Url::parse(seed)
                .map_err(|err| IngestError::Config(format!("invalid seed URL '{seed}': {err}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(IngestError::Config(format!(
                    "seed URL '{seed}' must use http or https"
                )));
            }
        }
        if self.probe_batch_size == 0 {
            return Err(IngestError::Config(
                "probe_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.seed_concurrency == 0 {
            return Err(IngestError::Config(
                "seed_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_url(&self) -> &str {
        self.database_url.as_deref().unwrap_or_default()
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_secs.max(1))
    }

    pub fn credits_interval(&self) -> Duration {
        Duration::from_secs(self.credits_interval_secs.max(1))
    }

    pub fn cleanup_check_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_check_interval_secs.max(1))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms.max(1))
    }

    pub fn credits_timeout(&self) -> Duration {
        Duration::from_millis(self.credits_timeout_ms.max(1))
    }
}
