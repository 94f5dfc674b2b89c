use super::labels::LabelLastValue;
use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Jvm {
    pub java_version: LabelLastValue,
    pub heap_size: TimeSeries,
    pub heap_used: TimeSeries,
    pub safepoint_time: TimeSeries,
    pub safepoint_sync_time: TimeSeries,
    pub gc_time: BTreeMap<String, TimeSeries>,
}

impl Jvm {
    pub fn is_up(&self) -> bool {
        !self.heap_used.tail_is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DotNet {
    pub runtime_version: LabelLastValue,
    pub up: TimeSeries,
    pub exceptions: TimeSeries,
    pub memory_allocation_rate: TimeSeries,
    /// generation -> bytes
    pub heap_size: BTreeMap<String, TimeSeries>,
    pub heap_fragmentation_percent: TimeSeries,
    pub gc_count: BTreeMap<String, TimeSeries>,
    pub monitor_lock_contentions: TimeSeries,
    pub thread_pool_completed_items: TimeSeries,
    pub thread_pool_queue_size: TimeSeries,
    pub thread_pool_size: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Python {
    pub gil_waiting_time: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeJs {
    pub event_loop_blocked_time: TimeSeries,
}
