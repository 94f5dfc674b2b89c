use super::status::Status;
use super::{AppIdx, InstanceIdx, ServiceIdx};
use crate::timeseries::{merge, HistogramBucket, Reducer, TimeSeries};
use serde::Serialize;
use std::collections::BTreeMap;

pub type Protocol = String;

/// A directed conversation from a container of `instance` to a remote endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Connection {
    #[serde(skip)]
    pub instance: InstanceIdx,
    pub container: String,

    pub actual_remote_ip: String,
    pub actual_remote_port: String,
    pub service_remote_ip: String,
    pub service_remote_port: String,

    #[serde(skip)]
    pub remote_instance: Option<InstanceIdx>,
    #[serde(skip)]
    pub remote_application: Option<AppIdx>,
    #[serde(skip)]
    pub service: Option<ServiceIdx>,

    pub rtt: TimeSeries,
    pub successful_connections: TimeSeries,
    pub active: TimeSeries,
    pub failed_connections: TimeSeries,
    pub retransmissions: TimeSeries,
    pub bytes_sent: TimeSeries,
    pub bytes_received: TimeSeries,

    /// protocol -> status -> requests per second
    pub requests_count: BTreeMap<Protocol, BTreeMap<String, TimeSeries>>,
    pub requests_latency: BTreeMap<Protocol, TimeSeries>,
    pub requests_histogram: BTreeMap<Protocol, Vec<HistogramBucket>>,
}

fn tail_has_positive(ts: &TimeSeries) -> bool {
    ts.data().iter().rev().take(3).any(|v| *v > 0.0)
}

impl Connection {
    pub fn new(instance: InstanceIdx, container: &str, service: (&str, &str), actual: (&str, &str)) -> Self {
        Self {
            instance,
            container: container.to_string(),
            service_remote_ip: service.0.to_string(),
            service_remote_port: service.1.to_string(),
            actual_remote_ip: actual.0.to_string(),
            actual_remote_port: actual.1.to_string(),
            ..Default::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.remote_instance.is_some() || self.remote_application.is_some()
    }

    /// The conversation carried traffic during the last few points.
    pub fn is_actual(&self) -> bool {
        tail_has_positive(&self.successful_connections)
            || tail_has_positive(&self.active)
            || tail_has_positive(&self.failed_connections)
    }

    pub fn status(&self) -> Status {
        if !self.is_actual() {
            return Status::Unknown;
        }
        if self.rtt.tail_is_empty() || self.failed_connections.last() > 0.0 {
            return Status::Critical;
        }
        Status::Ok
    }

    pub fn add_histogram_bucket(&mut self, protocol: &str, le: f32, series: &TimeSeries) {
        add_bucket(self.requests_histogram.entry(protocol.to_string()).or_default(), le, series);
    }

    pub fn requests_sum(&self) -> TimeSeries {
        sum_requests(&self.requests_count)
    }

    pub fn errors_sum(&self) -> TimeSeries {
        let mut sum = TimeSeries::default();
        for (status, ts) in self.requests_count.values().flat_map(|s| s.iter()) {
            if is_request_status_failed(status) {
                merge(&mut sum, ts, Reducer::NanSum);
            }
        }
        sum
    }
}

fn add_bucket(buckets: &mut Vec<HistogramBucket>, le: f32, series: &TimeSeries) {
    match buckets.iter_mut().find(|b| b.le == le) {
        Some(b) => merge(&mut b.series, series, Reducer::NanSum),
        None => {
            buckets.push(HistogramBucket {
                le,
                series: series.clone(),
            });
            buckets.sort_by(|a, b| a.le.total_cmp(&b.le));
        }
    }
}

fn sum_requests(requests: &BTreeMap<Protocol, BTreeMap<String, TimeSeries>>) -> TimeSeries {
    let mut sum = TimeSeries::default();
    for ts in requests.values().flat_map(|s| s.values()) {
        merge(&mut sum, ts, Reducer::NanSum);
    }
    sum
}

/// Conversation totals between two applications, read back from the
/// connection recording rules. They cover the retention of the rules, so a
/// pair of applications keeps its history after the connections are gone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkStats {
    pub requests_count: BTreeMap<Protocol, BTreeMap<String, TimeSeries>>,
    pub requests_histogram: BTreeMap<Protocol, Vec<HistogramBucket>>,
    pub successful_connections: TimeSeries,
    pub failed_connections: TimeSeries,
}

impl LinkStats {
    pub fn add_histogram_bucket(&mut self, protocol: &str, le: f32, series: &TimeSeries) {
        add_bucket(self.requests_histogram.entry(protocol.to_string()).or_default(), le, series);
    }

    pub fn requests_sum(&self) -> TimeSeries {
        sum_requests(&self.requests_count)
    }
}

pub fn is_request_status_failed(status: &str) -> bool {
    status == "failed" || status.starts_with('5')
}

/// Request-weighted latency across several connections.
pub fn requests_latency<'a>(connections: impl IntoIterator<Item = &'a Connection>) -> TimeSeries {
    let mut time = TimeSeries::default();
    let mut count = TimeSeries::default();
    for c in connections {
        for (protocol, latency) in &c.requests_latency {
            let Some(by_status) = c.requests_count.get(protocol) else {
                continue;
            };
            let mut requests = TimeSeries::default();
            for ts in by_status.values() {
                merge(&mut requests, ts, Reducer::NanSum);
            }
            if let Ok(t) = TimeSeries::mul(latency, &requests) {
                merge(&mut time, &t, Reducer::NanSum);
            }
            merge(&mut count, &requests, Reducer::NanSum);
        }
    }
    TimeSeries::div(&time, &count).unwrap_or_default()
}

pub fn requests_histogram<'a>(connections: impl IntoIterator<Item = &'a Connection>) -> Vec<HistogramBucket> {
    let mut sum: Vec<HistogramBucket> = Vec::new();
    for c in connections {
        for b in c.requests_histogram.values().flatten() {
            match sum.iter_mut().find(|s| s.le == b.le) {
                Some(s) => merge(&mut s.series, &b.series, Reducer::NanSum),
                None => sum.push(b.clone()),
            }
        }
    }
    sum.sort_by(|a, b| a.le.total_cmp(&b.le));
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::{Duration, Time, NAN};

    fn ts(v: &[f32]) -> TimeSeries {
        TimeSeries::from_data(Time(0), Duration(30), v.to_vec())
    }

    #[test]
    fn test_status() {
        let mut c = Connection::new(0, "app", ("10.0.0.1", "80"), ("10.0.0.2", "8080"));
        assert_eq!(c.status(), Status::Unknown);

        c.successful_connections = ts(&[1.0, 1.0, 1.0]);
        c.rtt = ts(&[NAN, NAN, NAN]);
        assert_eq!(c.status(), Status::Critical);

        c.rtt = ts(&[0.001, 0.001, 0.001]);
        c.failed_connections = ts(&[0.0, 0.0, 0.0]);
        assert_eq!(c.status(), Status::Ok);

        c.failed_connections = ts(&[0.0, 0.0, 2.0]);
        assert_eq!(c.status(), Status::Critical);
    }

    #[test]
    fn test_failed_statuses() {
        assert!(is_request_status_failed("failed"));
        assert!(is_request_status_failed("503"));
        assert!(!is_request_status_failed("200"));
        assert!(!is_request_status_failed("ok"));
    }

    #[test]
    fn test_requests_sums_and_latency() {
        let mut c = Connection::default();
        let mut by_status = BTreeMap::new();
        by_status.insert("200".to_string(), ts(&[9.0, 3.0]));
        by_status.insert("500".to_string(), ts(&[1.0, 1.0]));
        c.requests_count.insert("http".to_string(), by_status);
        c.requests_latency.insert("http".to_string(), ts(&[0.1, 0.2]));

        assert_eq!(c.requests_sum(), ts(&[10.0, 4.0]));
        assert_eq!(c.errors_sum(), ts(&[1.0, 1.0]));
        let latency = requests_latency([&c, &c]);
        assert!((latency.data()[0] - 0.1).abs() < 1e-6);
        assert!((latency.data()[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_buckets_merge_by_le() {
        let mut c = Connection::default();
        c.add_histogram_bucket("http", 0.5, &ts(&[1.0]));
        c.add_histogram_bucket("http", 0.1, &ts(&[1.0]));
        c.add_histogram_bucket("http", 0.5, &ts(&[2.0]));
        let buckets = &c.requests_histogram["http"];
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].le, 0.1);
        assert_eq!(buckets[1].series, ts(&[3.0]));
    }
}
