use crate::timeseries::{merge, HistogramBucket, Reducer, TimeSeries};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DnsRequest {
    pub kind: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DnsStats {
    /// request -> status -> requests per second
    pub requests: BTreeMap<DnsRequest, BTreeMap<String, TimeSeries>>,
    #[serde(skip)]
    pub histogram: Vec<HistogramBucket>,
}

impl DnsStats {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.histogram.is_empty()
    }

    pub fn total_by_status(&self, status: &str) -> TimeSeries {
        let mut sum = TimeSeries::default();
        for ts in self.requests.values().filter_map(|s| s.get(status)) {
            merge(&mut sum, ts, Reducer::NanSum);
        }
        sum
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficKind {
    InternetEgress,
    CrossAzEgress,
    CrossAzIngress,
}

impl TrafficKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internet_egress" => Some(TrafficKind::InternetEgress),
            "cross_az_egress" => Some(TrafficKind::CrossAzEgress),
            "cross_az_ingress" => Some(TrafficKind::CrossAzIngress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficStats {
    pub internet_egress: TimeSeries,
    pub cross_az_egress: TimeSeries,
    pub cross_az_ingress: TimeSeries,
}

impl TrafficStats {
    pub fn get_mut(&mut self, kind: TrafficKind) -> &mut TimeSeries {
        match kind {
            TrafficKind::InternetEgress => &mut self.internet_egress,
            TrafficKind::CrossAzEgress => &mut self.cross_az_egress,
            TrafficKind::CrossAzIngress => &mut self.cross_az_ingress,
        }
    }
}
