//! Recording rules: series derived from a finished world, stored by the
//! constructor and read back by later builds.
//!
//! A rule is computed over the window of the world it came from. The store
//! keeps the samples of every rule for `retention`, so the SLI phase can read
//! a window longer than the one a single build covers.

use crate::loaders::ContainerLogs;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use worldview_core::model::{AppIdx, Labels, LogLevel, LogMessages, Pattern};
use worldview_core::timeseries::{from_values, merge, HistogramBucket};
use worldview_core::{Context, Duration, MetricValues, Reducer, Time, TimeSeries, World};
use worldview_query::QueryResults;

pub const RR_APPLICATION_INBOUND_REQUESTS_TOTAL: &str = "rr_application_inbound_requests_total";
pub const RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM: &str = "rr_application_inbound_requests_histogram";
pub const RR_APPLICATION_LOG_MESSAGES: &str = "rr_application_log_messages";
pub const RR_CONNECTION_REQUESTS_COUNT: &str = "rr_connection_requests_count";
pub const RR_CONNECTION_REQUESTS_HISTOGRAM: &str = "rr_connection_requests_histogram";
pub const RR_CONNECTION_TCP_SUCCESSFUL: &str = "rr_connection_tcp_successful";
pub const RR_CONNECTION_TCP_FAILED: &str = "rr_connection_tcp_failed";

pub const RECORDING_RULES: &[&str] = &[
    RR_APPLICATION_INBOUND_REQUESTS_TOTAL,
    RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM,
    RR_APPLICATION_LOG_MESSAGES,
    RR_CONNECTION_REQUESTS_COUNT,
    RR_CONNECTION_REQUESTS_HISTOGRAM,
    RR_CONNECTION_TCP_SUCCESSFUL,
    RR_CONNECTION_TCP_FAILED,
];

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Label-keyed accumulator of one rule.
#[derive(Default)]
struct Rule {
    series: BTreeMap<Labels, TimeSeries>,
}

impl Rule {
    fn add(&mut self, labels: Labels, ts: &TimeSeries) {
        if ts.is_empty() {
            return;
        }
        merge(self.series.entry(labels).or_default(), ts, Reducer::NanSum);
    }

    fn into_metrics(self) -> Vec<MetricValues> {
        self.series
            .into_iter()
            .map(|(labels, values)| MetricValues::new(labels, values))
            .collect()
    }
}

fn add_buckets(dest: &mut BTreeMap<String, TimeSeries>, buckets: &[HistogramBucket]) {
    for b in buckets {
        merge(dest.entry(le_label(b.le)).or_default(), &b.series, Reducer::NanSum);
    }
}

fn le_label(le: f32) -> String {
    if le.is_infinite() {
        "+Inf".to_string()
    } else {
        le.to_string()
    }
}

/// Computes every rule from `world`. `logs` are the per-container log
/// patterns collected while the world was built.
pub(crate) fn compute(world: &World, logs: &[ContainerLogs]) -> QueryResults {
    let mut res = QueryResults::new();
    let (totals, histograms) = inbound_requests(world);
    res.insert(RR_APPLICATION_INBOUND_REQUESTS_TOTAL.to_string(), totals);
    res.insert(RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM.to_string(), histograms);
    for (name, metrics) in connections(world) {
        res.insert(name.to_string(), metrics);
    }
    res.insert(RR_APPLICATION_LOG_MESSAGES.to_string(), log_messages(world, logs));
    res.retain(|_, v| !v.is_empty());
    res
}

fn inbound_requests(world: &World) -> (Vec<MetricValues>, Vec<MetricValues>) {
    let mut totals = Rule::default();
    let mut histograms = Rule::default();
    for (idx, app) in world.applications.iter().enumerate() {
        if app.removed {
            continue;
        }
        let id = app.id.to_string();
        let mut by_status: BTreeMap<String, TimeSeries> = BTreeMap::new();
        let mut by_le: BTreeMap<String, TimeSeries> = BTreeMap::new();
        for c in world.downstream_connections(idx) {
            for statuses in c.requests_count.values() {
                for (status, ts) in statuses {
                    merge(by_status.entry(status.clone()).or_default(), ts, Reducer::NanSum);
                }
            }
            for buckets in c.requests_histogram.values() {
                add_buckets(&mut by_le, buckets);
            }
        }
        for (status, ts) in &by_status {
            totals.add(labels(&[("application", &id), ("status", status)]), ts);
        }
        for (le, ts) in &by_le {
            histograms.add(labels(&[("application", &id), ("le", le)]), ts);
        }
    }
    (totals.into_metrics(), histograms.into_metrics())
}

fn connections(world: &World) -> Vec<(&'static str, Vec<MetricValues>)> {
    let mut count = Rule::default();
    let mut histogram = Rule::default();
    let mut successful = Rule::default();
    let mut failed = Rule::default();
    for c in &world.connections {
        let client: AppIdx = world.instances[c.instance].owner;
        let Some(server) = world.remote_app_of(c) else {
            continue;
        };
        if world.applications[client].removed || world.applications[server].removed {
            continue;
        }
        let app = world.applications[client].id.to_string();
        let dest = world.applications[server].id.to_string();
        for (proto, statuses) in &c.requests_count {
            for (status, ts) in statuses {
                count.add(
                    labels(&[("app", &app), ("dest", &dest), ("proto", proto), ("status", status)]),
                    ts,
                );
            }
        }
        for (proto, buckets) in &c.requests_histogram {
            for b in buckets {
                let le = le_label(b.le);
                histogram.add(labels(&[("app", &app), ("dest", &dest), ("proto", proto), ("le", &le)]), &b.series);
            }
        }
        successful.add(labels(&[("app", &app), ("dest", &dest)]), &c.successful_connections);
        failed.add(labels(&[("app", &app), ("dest", &dest)]), &c.failed_connections);
    }
    vec![
        (RR_CONNECTION_REQUESTS_COUNT, count.into_metrics()),
        (RR_CONNECTION_REQUESTS_HISTOGRAM, histogram.into_metrics()),
        (RR_CONNECTION_TCP_SUCCESSFUL, successful.into_metrics()),
        (RR_CONNECTION_TCP_FAILED, failed.into_metrics()),
    ]
}

/// One series per application, level and pattern. Patterns of different
/// containers that look alike are merged and listed in `similar`.
fn log_messages(world: &World, logs: &[ContainerLogs]) -> Vec<MetricValues> {
    let mut by_app: BTreeMap<(String, LogLevel), (LogMessages, TimeSeries)> = BTreeMap::new();
    for l in logs {
        let app = world.owner_of(l.instance);
        if app.removed {
            continue;
        }
        let (msgs, unpatterned) = by_app.entry((app.id.to_string(), l.level)).or_default();
        if l.pattern_hash.is_empty() {
            merge(unpatterned, &l.messages, Reducer::NanSum);
            continue;
        }
        msgs.add_pattern(&[l.pattern_hash.as_str()], Pattern::new(&l.sample), &l.sample, l.multiline, &l.messages);
    }

    let mut rule = Rule::default();
    for ((app, level), (msgs, unpatterned)) in by_app {
        let level = level.as_str();
        rule.add(
            labels(&[("application", &app), ("level", level), ("pattern_hash", "")]),
            &unpatterned,
        );
        for (hash, p) in msgs.patterns {
            let similar: Vec<&str> = p
                .similar_pattern_hashes
                .iter()
                .map(String::as_str)
                .filter(|h| *h != hash)
                .collect();
            let words = p.pattern.words();
            let multiline = if p.multiline { "true" } else { "false" };
            rule.add(
                labels(&[
                    ("application", &app),
                    ("level", level),
                    ("pattern_hash", &hash),
                    ("sample", &p.sample),
                    ("words", &words),
                    ("similar", &similar.join(",")),
                    ("multiline", multiline),
                ]),
                &p.messages,
            );
        }
    }
    rule.into_metrics()
}

#[derive(Debug, Clone)]
struct StoredSeries {
    labels: Labels,
    points: BTreeMap<Time, f32>,
}

/// Samples of every recording rule, kept for `retention`.
#[derive(Debug, Clone)]
pub struct RecordingRuleStore {
    retention: Duration,
    series: BTreeMap<String, BTreeMap<u64, StoredSeries>>,
}

pub type SharedRecordingRuleStore = Arc<Mutex<RecordingRuleStore>>;

impl RecordingRuleStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            series: BTreeMap::new(),
        }
    }

    pub fn shared(retention: Duration) -> SharedRecordingRuleStore {
        Arc::new(Mutex::new(Self::new(retention)))
    }

    /// Stores the present samples of `results`. A sample at an already stored
    /// timestamp replaces the old one, so ingesting the same rule twice
    /// changes nothing.
    pub fn ingest(&mut self, results: &QueryResults) {
        let mut newest = Time(0);
        for (name, metrics) in results {
            let stored = self.series.entry(name.clone()).or_default();
            for m in metrics {
                let s = stored.entry(m.labels_hash).or_insert_with(|| StoredSeries {
                    labels: m.labels.clone(),
                    points: BTreeMap::new(),
                });
                for (t, v) in m.values.iter().filter(|(_, v)| !v.is_nan()) {
                    s.points.insert(t, v);
                    newest = newest.max(t);
                }
            }
        }
        if !newest.is_zero() {
            self.prune(newest - self.retention);
        }
    }

    fn prune(&mut self, before: Time) {
        let mut dropped = 0;
        for stored in self.series.values_mut() {
            for s in stored.values_mut() {
                let keep = s.points.split_off(&before);
                dropped += s.points.len();
                s.points = keep;
            }
            stored.retain(|_, s| !s.points.is_empty());
        }
        self.series.retain(|_, s| !s.is_empty());
        if dropped > 0 {
            debug!("dropped {} recording rule samples older than {}", dropped, before);
        }
    }

    /// Series of rule `name` placed onto the grid of `ctx`; series without a
    /// sample in the window are left out.
    pub fn query(&self, name: &str, ctx: &Context) -> Vec<MetricValues> {
        let Some(stored) = self.series.get(name) else {
            return Vec::new();
        };
        let lo = ctx.from - ctx.step;
        let hi = ctx.to + ctx.step;
        stored
            .values()
            .filter_map(|s| {
                let raw: Vec<(Time, f32)> = s.points.range(lo..=hi).map(|(t, v)| (*t, *v)).collect();
                if raw.is_empty() {
                    return None;
                }
                let values = from_values(ctx, &raw);
                if values.is_all_nan() {
                    return None;
                }
                Some(MetricValues::new(s.labels.clone(), values))
            })
            .collect()
    }

    /// Every rule over `ctx`.
    pub fn query_all(&self, ctx: &Context) -> QueryResults {
        self.series
            .keys()
            .map(|name| (name.clone(), self.query(name, ctx)))
            .filter(|(_, v)| !v.is_empty())
            .collect()
    }

    pub fn series_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::testing::ctx;
    use worldview_core::model::Connection;
    use worldview_core::{ApplicationId, ApplicationKind};

    fn world() -> World {
        let mut w = World::new(ctx());
        let web = w.get_or_create_application(ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "web"), false);
        let api = w.get_or_create_application(ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "api"), false);
        let web0 = w.get_or_create_instance(web, "web-0", None);
        let api0 = w.get_or_create_instance(api, "api-0", None);
        for (i, status) in [(0.0, "200"), (1.0, "500")] {
            let mut c = Connection::new(web0, "app", ("10.0.0.2", "80"), ("10.0.0.2", "80"));
            c.remote_instance = Some(api0);
            let ts = TimeSeries::filled(&ctx(), 10.0 - 9.0 * i);
            c.requests_count
                .entry("http".into())
                .or_default()
                .insert(status.into(), ts.clone());
            c.add_histogram_bucket("http", 0.1, &ts);
            c.add_histogram_bucket("http", f32::INFINITY, &ts);
            w.add_connection(c);
        }
        w.rebuild_links();
        w
    }

    #[test]
    fn test_inbound_requests() {
        let rr = compute(&world(), &[]);
        let totals = &rr[RR_APPLICATION_INBOUND_REQUESTS_TOTAL];
        assert_eq!(totals.len(), 2);
        let failed = totals.iter().find(|m| m.label("status") == "500").expect("500");
        assert_eq!(failed.label("application"), "c1:shop:Deployment:api");
        assert_eq!(failed.values.last(), 1.0);

        let buckets = &rr[RR_APPLICATION_INBOUND_REQUESTS_HISTOGRAM];
        assert_eq!(buckets.len(), 2);
        let inf = buckets.iter().find(|m| m.label("le") == "+Inf").expect("+Inf");
        assert_eq!(inf.values.last(), 11.0);

        let count = &rr[RR_CONNECTION_REQUESTS_COUNT];
        assert!(count
            .iter()
            .all(|m| m.label("app") == "c1:shop:Deployment:web" && m.label("proto") == "http"));
    }

    #[test]
    fn test_reingesting_is_idempotent() {
        let c = ctx();
        let rr = compute(&world(), &[]);
        let mut store = RecordingRuleStore::new(Duration(3600));
        store.ingest(&rr);
        let first = store.query(RR_APPLICATION_INBOUND_REQUESTS_TOTAL, &c);
        store.ingest(&rr);
        let second = store.query(RR_APPLICATION_INBOUND_REQUESTS_TOTAL, &c);
        assert_eq!(first, second);

        let mut expected = rr[RR_APPLICATION_INBOUND_REQUESTS_TOTAL].clone();
        expected.sort_by_key(|m| m.labels_hash);
        let mut got = first;
        got.sort_by_key(|m| m.labels_hash);
        assert_eq!(got, expected);

        let before = store.query_all(&c);
        store.ingest(&compute(&world(), &[]));
        let after = store.query_all(&c);
        assert_eq!(before.len(), after.len());
        for (name, metrics) in &before {
            let mut expected = metrics.clone();
            expected.sort_by_key(|m| m.labels_hash);
            let mut got = after[name].clone();
            got.sort_by_key(|m| m.labels_hash);
            assert_eq!(got.len(), expected.len(), "{}", name);
            for (g, e) in got.iter().zip(&expected) {
                assert_eq!(g.labels, e.labels);
                assert_eq!(g.values, e.values, "{} {:?}", name, g.labels);
            }
        }
        assert_eq!(store.series_count(), after.values().map(Vec::len).sum::<usize>());
    }

    #[test]
    fn test_retention() {
        let mut store = RecordingRuleStore::new(Duration(300));
        let rr = compute(&world(), &[]);
        store.ingest(&rr);
        let later = Context::new(Time(1200), Time(1800), Duration(30));
        let moved: QueryResults = rr
            .iter()
            .map(|(name, metrics)| {
                let metrics = metrics
                    .iter()
                    .map(|m| MetricValues::new(m.labels.clone(), TimeSeries::filled(&later, m.values.last())))
                    .collect();
                (name.clone(), metrics)
            })
            .collect();
        store.ingest(&moved);
        assert!(store.query(RR_APPLICATION_INBOUND_REQUESTS_TOTAL, &ctx()).is_empty());
        assert_eq!(store.query(RR_APPLICATION_INBOUND_REQUESTS_TOTAL, &later).len(), 2);
    }
}
