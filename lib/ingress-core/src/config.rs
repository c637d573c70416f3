//! Process-wide controller configuration

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "INGRESS_ISTIO_";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("{name}: cannot parse {value:?} as a number")]
    Parse { name: &'static str, value: String },

    #[error("default weight {0} is outside 0-100")]
    DefaultWeight(u32),

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("backoff base {base:?} exceeds backoff max {max:?}")]
    Backoff { base: Duration, max: Duration },
}

/// Controller configuration, immutable after startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Suffix appended to unqualified Ingress hosts
    pub cluster_domain: String,
    /// Gateway bound to every VirtualService unless overridden
    pub default_gateway: String,
    /// Ingress class this controller adopts
    pub ingress_class: String,
    /// Weight of a route with a single unweighted backend
    pub default_weight: u32,
    /// Number of parallel sync workers
    pub worker_count: usize,
    /// Upper bound on a single sync, external calls included
    pub sync_timeout: Duration,
    /// Requeue cap for retryable failures (0 = unbounded)
    pub max_retries: u32,
    /// First retry delay
    pub backoff_base: Duration,
    /// Ceiling on the retry delay
    pub backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_domain: "cluster.local".to_string(),
            default_gateway: "istio-system/istio-ingressgateway".to_string(),
            ingress_class: "istio".to_string(),
            default_weight: 100,
            worker_count: 2,
            sync_timeout: Duration::from_secs(30),
            max_retries: 0,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
        }
    }
}

impl Config {
    /// Load configuration from `INGRESS_ISTIO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup, falling back
    /// to defaults for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        let defaults = Config::default();

        let config = Config {
            cluster_domain: get("CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            default_gateway: get("DEFAULT_GATEWAY").unwrap_or(defaults.default_gateway),
            ingress_class: get("INGRESS_CLASS").unwrap_or(defaults.ingress_class),
            default_weight: parse_var("DEFAULT_WEIGHT", get("DEFAULT_WEIGHT"))?
                .unwrap_or(defaults.default_weight),
            worker_count: parse_var("WORKERS", get("WORKERS"))?.unwrap_or(defaults.worker_count),
            sync_timeout: parse_var("SYNC_TIMEOUT_SECS", get("SYNC_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_timeout),
            max_retries: parse_var("MAX_RETRIES", get("MAX_RETRIES"))?.unwrap_or(defaults.max_retries),
            backoff_base: parse_var("BACKOFF_BASE_MS", get("BACKOFF_BASE_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_max: parse_var("BACKOFF_MAX_SECS", get("BACKOFF_MAX_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_domain.trim().is_empty() {
            return Err(ConfigError::Empty { name: "cluster domain" });
        }
        if self.default_gateway.trim().is_empty() {
            return Err(ConfigError::Empty { name: "default gateway" });
        }
        if self.ingress_class.trim().is_empty() {
            return Err(ConfigError::Empty { name: "ingress class" });
        }
        if self.default_weight > 100 {
            return Err(ConfigError::DefaultWeight(self.default_weight));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::Backoff {
                base: self.backoff_base,
                max: self.backoff_max,
            });
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { name, value: raw }),
    }
}
