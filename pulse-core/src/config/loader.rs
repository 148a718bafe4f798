//! Layered configuration loading: defaults, then an optional TOML file,
//! then environment variables. The composed `BusConfig` is immutable for
//! the life of the process.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use once_cell::sync::Lazy;
use serde::Deserialize;

use super::BusConfig;
use crate::error::{PulseError, Result};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("pulse.toml"),
        PathBuf::from("config/pulse.toml"),
    ]
});

const ENV_CONFIG_PATH: &str = "PULSE_CONFIG";
const ENV_REDIS_URL: &str = "PULSE_REDIS_URL";

/// On-disk configuration shape. Every field is optional; present fields
/// override the compiled defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    redis: Option<FileRedis>,
    retry: Option<FileRetry>,
    dlq: Option<FileDlq>,
    lease: Option<FileLease>,
    #[serde(default)]
    queues: HashMap<String, FileQueueOverride>,
    presence_ttl_secs: Option<u64>,
    metrics_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRedis {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRetry {
    base_delay_ms: Option<u64>,
    multiplier: Option<u32>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDlq {
    max_retries: Option<u32>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLease {
    lock_duration_ms: Option<u64>,
    lock_renew_ms: Option<u64>,
    housekeeper_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileQueueOverride {
    priority: Option<u8>,
    max_attempts: Option<u32>,
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Compose defaults, file and environment into a validated `BusConfig`.
    pub fn load(&self) -> Result<BusConfig> {
        let mut config = BusConfig::default();

        if let Some((path, explicit)) = self.resolve_path() {
            if path.exists() {
                let file = Self::read_file(&path)?;
                apply_file_config(&mut config, file);
            } else if explicit {
                return Err(PulseError::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
        }

        if let Ok(url) = std::env::var(ENV_REDIS_URL) {
            config.redis.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Explicit path wins over `PULSE_CONFIG`, which wins over the default
    /// lookup locations. The bool marks whether the path was demanded.
    fn resolve_path(&self) -> Option<(PathBuf, bool)> {
        if let Some(path) = &self.config_path {
            return Some((path.clone(), true));
        }
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Some((PathBuf::from(path), true));
        }
        DEFAULT_CONFIG_LOCATIONS
            .iter()
            .find(|candidate| candidate.exists())
            .map(|path| (path.clone(), false))
    }

    fn read_file(path: &Path) -> Result<FileConfig> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|err| {
            PulseError::Config(format!("failed to parse {}: {err}", path.display()))
        })
    }
}

fn apply_file_config(config: &mut BusConfig, file: FileConfig) {
    if let Some(redis) = file.redis {
        config.redis.url = redis.url;
    }

    if let Some(retry) = file.retry {
        if let Some(base) = retry.base_delay_ms {
            config.retry.base_delay_ms = base;
        }
        if let Some(multiplier) = retry.multiplier {
            config.retry.multiplier = multiplier;
        }
        if let Some(max) = retry.max_delay_ms {
            config.retry.max_delay_ms = max;
        }
    }

    if let Some(dlq) = file.dlq {
        if let Some(max_retries) = dlq.max_retries {
            config.dlq.max_retries = max_retries;
        }
        if let Some(ttl) = dlq.ttl_secs {
            config.dlq.ttl = Duration::from_secs(ttl);
        }
    }

    if let Some(lease) = file.lease {
        if let Some(lock) = lease.lock_duration_ms {
            config.lease.lock_duration_ms = lock;
        }
        if let Some(renew) = lease.lock_renew_ms {
            config.lease.lock_renew_ms = renew;
        }
        if let Some(interval) = lease.housekeeper_interval_ms {
            config.lease.housekeeper_interval_ms = interval;
        }
    }

    let fallback_attempts = config.dlq.max_retries;
    for (name, overrides) in file.queues {
        let descriptor = config.queues.entry(name.clone()).or_insert_with(|| {
            super::QueueDescriptor {
                name,
                default_priority: 5,
                max_attempts: fallback_attempts,
                concurrency: 5,
                timeout: Duration::from_secs(60),
            }
        });
        if let Some(priority) = overrides.priority {
            descriptor.default_priority = priority;
        }
        if let Some(attempts) = overrides.max_attempts {
            descriptor.max_attempts = attempts;
        }
        if let Some(concurrency) = overrides.concurrency {
            descriptor.concurrency = concurrency;
        }
        if let Some(timeout) = overrides.timeout_secs {
            descriptor.timeout = Duration::from_secs(timeout);
        }
    }

    if let Some(ttl) = file.presence_ttl_secs {
        config.presence_ttl = Duration::from_secs(ttl);
    }
    if let Some(ttl) = file.metrics_ttl_secs {
        config.metrics_ttl = Duration::from_secs(ttl);
    }
}
