use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::fetcher::FetchSettings;
use crate::harvest::HarvestSettings;
use crate::rate_limit::RateLimitSettings;
use crate::sites::{RegistryError, SiteDescriptor, SiteRegistry};
use crate::utils::Jitter;

/// Environment variable naming the config file when `--config` is not given
pub const CONFIG_ENV: &str = "NEWS_HARVESTER_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub harvest: HarvestConfig,
    pub rate_limit: RateLimitConfig,
    /// Empty means "use the built-in sources"
    pub sites: Vec<SiteDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub wave_size: usize,
    pub wave_pause_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub request_timeout_secs: u64,
    pub deadline_secs: Option<u64>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            wave_size: 3,
            wave_pause_ms: 2000,
            jitter_min_ms: 1000,
            jitter_max_ms: 3000,
            request_timeout_secs: 10,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            window_secs: 60,
            sweep_interval_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, or fall back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml_str(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_overrides(std::env::var("HOST").ok(), std::env::var("PORT").ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would stall or break a harvest or the rate limit
    pub fn validate(&self) -> Result<()> {
        if self.harvest.wave_size == 0 {
            bail!("harvest.wave_size must be at least 1");
        }
        if self.rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }

    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<String>) -> Result<()> {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port
                .parse::<u16>()
                .with_context(|| format!("PORT must be a valid number, got '{}'", port))?;
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<SiteRegistry, RegistryError> {
        if self.sites.is_empty() {
            Ok(SiteRegistry::builtin())
        } else {
            SiteRegistry::new(self.sites.clone())
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.harvest.request_timeout_secs),
            jitter: Jitter::new(self.harvest.jitter_min_ms, self.harvest.jitter_max_ms),
        }
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            wave_size: self.harvest.wave_size,
            wave_pause: Duration::from_millis(self.harvest.wave_pause_ms),
            deadline: self.harvest.deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            max_requests: self.rate_limit.max_requests,
            window: Duration::from_secs(self.rate_limit.window_secs),
            sweep_interval: Duration::from_secs(self.rate_limit.sweep_interval_secs),
        }
    }
}
