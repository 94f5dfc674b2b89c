use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Unknown,
    Waiting,
    Running,
    Terminated,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub init: bool,
    pub image: String,
    pub application_types: BTreeSet<String>,

    pub status: ContainerStatus,
    pub reason: String,
    pub ready: bool,
    pub last_terminated_reason: String,

    pub cpu_limit: TimeSeries,
    pub cpu_request: TimeSeries,
    pub cpu_usage: TimeSeries,
    pub cpu_delay: TimeSeries,
    pub throttled_time: TimeSeries,

    pub memory_rss: TimeSeries,
    pub memory_cache: TimeSeries,
    pub memory_limit: TimeSeries,
    pub memory_request: TimeSeries,

    /// Per-step increases, never negative.
    pub oom_kills: TimeSeries,
    pub restarts: TimeSeries,
}

impl Container {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }
}
