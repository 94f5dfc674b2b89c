use super::labels::LabelLastValue;
use super::id::NodeId;
use super::InstanceIdx;
use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskStats {
    pub read_time: TimeSeries,
    pub write_time: TimeSeries,
    pub reads: TimeSeries,
    pub writes: TimeSeries,
    pub read_bytes: TimeSeries,
    pub written_bytes: TimeSeries,
    pub io_util_percent: TimeSeries,
    /// Total time spent waiting for I/O per second.
    pub wait: TimeSeries,
    /// Average time of a single I/O operation.
    pub await_time: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetInterface {
    pub name: String,
    pub up: TimeSeries,
    pub addresses: Vec<String>,
    pub rx_bytes: TimeSeries,
    pub tx_bytes: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CloudInfo {
    pub provider: LabelLastValue,
    pub account_id: LabelLastValue,
    pub region: LabelLastValue,
    pub availability_zone: LabelLastValue,
    pub instance_type: LabelLastValue,
    pub instance_life_cycle: LabelLastValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodePrice {
    pub per_hour: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub cluster_id: String,
    pub name: LabelLastValue,
    pub k8s_name: LabelLastValue,
    pub agent_version: LabelLastValue,
    pub os_kernel: LabelLastValue,

    pub uptime: TimeSeries,
    pub cpu_capacity: TimeSeries,
    pub cpu_usage_percent: TimeSeries,
    pub cpu_usage_by_mode: BTreeMap<String, TimeSeries>,

    pub memory_total_bytes: TimeSeries,
    pub memory_available_bytes: TimeSeries,
    pub memory_free_bytes: TimeSeries,
    pub memory_cached_bytes: TimeSeries,

    pub disks: BTreeMap<String, DiskStats>,
    pub net_interfaces: Vec<NetInterface>,

    pub cloud: CloudInfo,
    pub fargate: bool,
    pub price: Option<NodePrice>,

    #[serde(skip)]
    pub instances: Vec<InstanceIdx>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn get_name(&self) -> &str {
        if !self.k8s_name.is_empty() {
            return self.k8s_name.value();
        }
        self.name.value()
    }

    /// Up if the agent reported anything during the last few points.
    pub fn is_up(&self) -> bool {
        !self.cpu_usage_percent.tail_is_empty()
    }

    pub fn is_agent_installed(&self) -> bool {
        !self.cpu_usage_percent.is_empty() || !self.memory_total_bytes.is_empty()
    }

    pub fn interface_mut(&mut self, name: &str) -> &mut NetInterface {
        if let Some(i) = self.net_interfaces.iter().position(|i| i.name == name) {
            return &mut self.net_interfaces[i];
        }
        self.net_interfaces.push(NetInterface {
            name: name.to_string(),
            ..Default::default()
        });
        let last = self.net_interfaces.len() - 1;
        &mut self.net_interfaces[last]
    }

    pub fn ips(&self) -> impl Iterator<Item = &String> {
        self.net_interfaces.iter().flat_map(|i| i.addresses.iter())
    }
}
