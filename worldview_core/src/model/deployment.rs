use crate::timeseries::{Duration, Time, MINUTE};
use serde::Serialize;
use std::collections::BTreeMap;

pub const METRICS_SNAPSHOT_SHIFT: Duration = Duration(10 * MINUTE.0);
pub const METRICS_SNAPSHOT_WINDOW: Duration = Duration(20 * MINUTE.0);

/// Metrics summed over a window following a rollout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: Time,
    pub duration: Duration,
    pub requests: i64,
    pub errors: i64,
    /// `le` bucket (as text) -> requests not slower than it
    pub latency: BTreeMap<String, i64>,
    pub restarts: i64,
    pub cpu_usage: f32,
    pub oom_kills: i64,
    pub log_errors: i64,
    pub log_warnings: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationDeployment {
    pub name: String,
    pub started_at: Time,
    /// Zero while the rollout is in progress.
    pub finished_at: Time,
    pub container_images: Vec<String>,
    pub metrics_snapshot: Option<MetricsSnapshot>,
}

impl ApplicationDeployment {
    pub fn in_progress(&self) -> bool {
        self.finished_at.is_zero()
    }

    /// Window the snapshot is taken over, once the rollout has settled.
    pub fn snapshot_window(&self) -> Option<(Time, Time)> {
        if self.in_progress() {
            return None;
        }
        let from = self.finished_at + METRICS_SNAPSHOT_SHIFT;
        Some((from, from + METRICS_SNAPSHOT_WINDOW))
    }
}
