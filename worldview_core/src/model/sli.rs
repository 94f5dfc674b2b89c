use super::check_config::{CheckConfigSloAvailability, CheckConfigSloLatency};
use crate::timeseries::histogram::{count_le, total};
use crate::timeseries::{Duration, HistogramBucket, TimeSeries, DAY};
use serde::Serialize;

/// Longest burn-rate window; raw SLI series cover `[to - this, to]`.
pub const MAX_ALERT_RULE_WINDOW: Duration = DAY;

/// Request totals over the world window plus the longer raw window used
/// for burn-rate evaluation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AvailabilitySli {
    pub config: CheckConfigSloAvailability,
    pub total_requests: TimeSeries,
    pub failed_requests: TimeSeries,
    pub total_requests_raw: TimeSeries,
    pub failed_requests_raw: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySli {
    pub config: CheckConfigSloLatency,
    #[serde(skip)]
    pub histogram: Vec<HistogramBucket>,
    #[serde(skip)]
    pub histogram_raw: Vec<HistogramBucket>,
}

impl LatencySli {
    pub fn total_requests(&self, raw: bool) -> TimeSeries {
        total(self.buckets(raw))
    }

    /// Requests served within the objective bucket.
    pub fn fast_requests(&self, raw: bool) -> TimeSeries {
        count_le(self.buckets(raw), self.config.objective_bucket)
    }

    fn buckets(&self, raw: bool) -> &[HistogramBucket] {
        if raw {
            &self.histogram_raw
        } else {
            &self.histogram
        }
    }
}
