use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Pod {
    /// Last observed phase; empty when no status sample arrived in the window.
    pub phase: String,
    pub reason: String,
    pub scheduled: bool,
    pub ip: String,
    pub host_ip: String,
    pub replica_set: String,
    pub init_containers: BTreeSet<String>,

    /// Accumulated `kube_pod_status_phase`: the presence signal of the pod.
    pub life_span: TimeSeries,
    pub running: TimeSeries,
    pub ready: TimeSeries,
}

impl Pod {
    pub fn is_obsolete(&self) -> bool {
        self.phase.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.last() > 0.0
    }

    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }

    pub fn is_pending(&self) -> bool {
        self.phase == "Pending"
    }

    pub fn is_failed(&self) -> bool {
        self.phase == "Failed" || self.phase == "Error"
    }
}
