//! Cache lag accounting and its Prometheus exposition.

use crate::error::Result;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use worldview_core::Duration;

/// How far cached data trails the wall clock, and the last backend error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatus {
    pub lag_avg: Duration,
    pub lag_max: Duration,
    pub error: Option<String>,
}

impl CacheStatus {
    pub fn from_lags(lags: &[Duration], error: Option<String>) -> Self {
        if lags.is_empty() {
            return Self {
                error,
                ..Default::default()
            };
        }
        let total: i64 = lags.iter().map(|l| l.as_secs()).sum();
        Self {
            lag_avg: Duration(total / lags.len() as i64),
            lag_max: lags.iter().copied().max().unwrap_or_default(),
            error,
        }
    }
}

/// Per-project cache gauges kept in a private registry.
#[derive(Clone)]
pub struct StatusMetrics {
    registry: Arc<Registry>,
    lag_avg: GaugeVec,
    lag_max: GaugeVec,
    errors: GaugeVec,
}

impl StatusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let lag_avg = GaugeVec::new(
            Opts::new("worldview_cache_lag_avg_seconds", "Average lag of cached queries behind the wall clock"),
            &["project"],
        )?;
        let lag_max = GaugeVec::new(
            Opts::new("worldview_cache_lag_max_seconds", "Maximum lag of cached queries behind the wall clock"),
            &["project"],
        )?;
        let errors = GaugeVec::new(
            Opts::new("worldview_cache_errors", "1 if the last refresh of the project reported an error"),
            &["project"],
        )?;

        registry.register(Box::new(lag_avg.clone()))?;
        registry.register(Box::new(lag_max.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            lag_avg,
            lag_max,
            errors,
        })
    }

    pub fn observe(&self, project: &str, status: &CacheStatus) {
        self.lag_avg
            .with_label_values(&[project])
            .set(status.lag_avg.as_secs() as f64);
        self.lag_max
            .with_label_values(&[project])
            .set(status.lag_max.as_secs() as f64);
        self.errors
            .with_label_values(&[project])
            .set(if status.error.is_some() { 1.0 } else { 0.0 });
    }

    /// Text exposition of all gauges.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
