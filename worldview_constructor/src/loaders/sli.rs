use super::connections::parse_le;
use super::Loader;
use crate::queries::{custom_sli_prefix, RAW_SUFFIX};
use crate::recording_rules::{RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM, RR_APPLICATION_INBOUND_REQUESTS_TOTAL};
use std::collections::HashMap;
use worldview_core::model::connection::is_request_status_failed;
use worldview_core::model::{AvailabilitySli, LatencySli};
use worldview_core::timeseries::{merge, sort_buckets, HistogramBucket};
use worldview_core::{MetricValues, Reducer, TimeSeries};

fn by_application(metrics: &[MetricValues]) -> HashMap<&str, Vec<&MetricValues>> {
    let mut res: HashMap<&str, Vec<&MetricValues>> = HashMap::new();
    for m in metrics {
        res.entry(m.label("application")).or_default().push(m);
    }
    res
}

fn sum<'m>(metrics: impl IntoIterator<Item = &'m MetricValues>) -> TimeSeries {
    let mut res = TimeSeries::default();
    for m in metrics {
        merge(&mut res, &m.values, Reducer::NanSum);
    }
    res
}

/// `(total, failed)` from request counts labelled by status.
fn totals(metrics: &[&MetricValues]) -> (TimeSeries, TimeSeries) {
    let total = sum(metrics.iter().copied());
    let failed = sum(metrics.iter().copied().filter(|m| is_request_status_failed(m.label("status"))));
    (total, failed)
}

fn buckets<'m>(metrics: impl IntoIterator<Item = &'m MetricValues>) -> Vec<HistogramBucket> {
    let mut res: Vec<HistogramBucket> = Vec::new();
    for m in metrics {
        let Some(le) = parse_le(m.label("le")) else {
            continue;
        };
        match res.iter_mut().find(|b| b.le == le) {
            Some(b) => merge(&mut b.series, &m.values, Reducer::NanSum),
            None => res.push(HistogramBucket {
                le,
                series: m.values.clone(),
            }),
        }
    }
    sort_buckets(&mut res);
    res
}

impl Loader<'_> {
    /// Availability and latency SLIs of every application: custom queries
    /// when configured, inbound request recording rules otherwise.
    pub fn load_slis(&mut self) {
        let totals_rr = by_application(self.recording_rule(RR_APPLICATION_INBOUND_REQUESTS_TOTAL, false));
        let totals_rr_raw = by_application(self.recording_rule(RR_APPLICATION_INBOUND_REQUESTS_TOTAL, true));
        let histogram_rr = by_application(self.recording_rule(RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM, false));
        let histogram_rr_raw = by_application(self.recording_rule(RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM, true));

        let mut availability: Vec<(usize, AvailabilitySli)> = Vec::new();
        let mut latency: Vec<(usize, LatencySli)> = Vec::new();
        for (idx, app) in self.world.applications.iter().enumerate() {
            if app.removed || app.is_external() {
                continue;
            }
            let id = app.id.to_string();
            let prefix = custom_sli_prefix(&app.id);

            let (configs, _) = self.world.check_configs.get_availability(&app.id);
            if let Some(config) = configs.into_iter().next() {
                let mut sli = AvailabilitySli {
                    config,
                    ..Default::default()
                };
                if sli.config.custom {
                    let total = format!("{}total_requests", prefix);
                    let failed = format!("{}failed_requests", prefix);
                    sli.total_requests = sum(self.metrics(&total));
                    sli.failed_requests = sum(self.metrics(&failed));
                    sli.total_requests_raw = sum(self.raw_metrics(&format!("{}{}", total, RAW_SUFFIX)));
                    sli.failed_requests_raw = sum(self.raw_metrics(&format!("{}{}", failed, RAW_SUFFIX)));
                } else {
                    let empty = Vec::new();
                    (sli.total_requests, sli.failed_requests) = totals(totals_rr.get(id.as_str()).unwrap_or(&empty));
                    (sli.total_requests_raw, sli.failed_requests_raw) =
                        totals(totals_rr_raw.get(id.as_str()).unwrap_or(&empty));
                }
                if !sli.total_requests.is_empty() || !sli.total_requests_raw.is_empty() {
                    availability.push((idx, sli));
                }
            }

            let (configs, _) = self.world.check_configs.get_latency(&app.id);
            if let Some(config) = configs.into_iter().next() {
                let mut sli = LatencySli {
                    config,
                    ..Default::default()
                };
                if sli.config.custom {
                    let name = format!("{}requests_histogram", prefix);
                    sli.histogram = buckets(self.metrics(&name));
                    sli.histogram_raw = buckets(self.raw_metrics(&format!("{}{}", name, RAW_SUFFIX)));
                } else {
                    sli.histogram = buckets(histogram_rr.get(id.as_str()).into_iter().flatten().copied());
                    sli.histogram_raw = buckets(histogram_rr_raw.get(id.as_str()).into_iter().flatten().copied());
                }
                if !sli.histogram.is_empty() || !sli.histogram_raw.is_empty() {
                    latency.push((idx, sli));
                }
            }
        }

        for (idx, sli) in availability {
            self.world.applications[idx].availability_slis.push(sli);
        }
        for (idx, sli) in latency {
            self.world.applications[idx].latency_slis.push(sli);
        }
    }
}
