use crate::selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusConfig {
    pub url: String,
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Label filter added to every vector selector, e.g. `{cluster="eu-1"}`.
    #[serde(default)]
    pub extra_selector: String,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default)]
    pub tls_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9090".to_string(),
            refresh_interval: default_refresh_interval(),
            extra_selector: String::new(),
            custom_headers: BTreeMap::new(),
            basic_auth: None,
            tls_skip_verify: false,
        }
    }
}

impl PrometheusConfig {
    /// Refresh interval clamped to [`MIN_REFRESH_INTERVAL`].
    pub fn effective_refresh_interval(&self) -> Duration {
        self.refresh_interval.max(MIN_REFRESH_INTERVAL)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Prometheus URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("Prometheus URL must start with http:// or https://: {}", self.url));
        }
        selector::parse_selector(&self.extra_selector)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which samples are kept at `compacted_step` only.
    #[serde(with = "humantime_serde")]
    pub raw_retention: Duration,
    #[serde(with = "humantime_serde")]
    pub compacted_step: Duration,
    /// Samples older than this are dropped.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// History fetched for a query seen for the first time.
    #[serde(with = "humantime_serde")]
    pub backfill: Duration,
    pub max_consecutive_failures: u32,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    pub retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            raw_retention: Duration::from_secs(6 * 3600),
            compacted_step: Duration::from_secs(300),
            retention: Duration::from_secs(7 * 86400),
            backfill: Duration::from_secs(2 * 3600),
            max_consecutive_failures: 3,
            cooldown: Duration::from_secs(300),
            concurrency: 10,
            query_timeout: Duration::from_secs(30),
            retries: 1,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("Cache concurrency must be greater than 0".to_string());
        }
        if self.compacted_step.is_zero() {
            return Err("Compacted step must be greater than 0".to_string());
        }
        if self.retention < self.raw_retention {
            return Err("Retention must not be shorter than raw_retention".to_string());
        }
        if self.query_timeout.is_zero() {
            return Err("Query timeout must be greater than 0".to_string());
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be greater than 0".to_string());
        }
        Ok(())
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_interval_floor() {
        let cfg = PrometheusConfig {
            refresh_interval: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(cfg.effective_refresh_interval(), MIN_REFRESH_INTERVAL);
        assert_eq!(PrometheusConfig::default().effective_refresh_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_prometheus_validation() {
        let mut cfg = PrometheusConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.extra_selector = r#"{cluster="eu-1"}"#.to_string();
        assert!(cfg.validate().is_ok());
        cfg.extra_selector = r#"{cluster=="eu-1"}"#.to_string();
        assert!(cfg.validate().is_err());
        cfg.extra_selector.clear();
        cfg.url = "prometheus:9090".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cache_config_from_yaml() {
        let cfg: CacheConfig = serde_yaml::from_str("backfill: 1h\ncooldown: 10m\n").unwrap();
        assert_eq!(cfg.backfill, Duration::from_secs(3600));
        assert_eq!(cfg.cooldown, Duration::from_secs(600));
        assert_eq!(cfg.max_consecutive_failures, 3);
        assert!(cfg.validate().is_ok());
    }
}
