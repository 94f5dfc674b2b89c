//! Phases that turn query results into a [`World`].
//!
//! Every phase is a method on [`Loader`], which owns the world under
//! construction plus the lookup tables earlier phases leave for later ones.
//! Loaders never fail: a metric missing a label or pointing at an unknown
//! entity is skipped.

mod cloud;
mod connections;
mod containers;
mod databases;
mod db_cluster;
mod deployments;
mod events;
mod extras;
mod flux;
mod k8s;
mod logs;
mod nodes;
mod runtimes;
mod sli;

pub(crate) use containers::ContainerLogs;

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use worldview_core::model::{ConnIdx, InstanceIdx, Labels, Listen, NodeIdx, ServiceIdx};
use tracing::warn;
use worldview_core::{Aggregate, ApplicationKind, Context, MetricValues, Reducer, TimeSeries, World};
use worldview_query::QueryResults;

pub(crate) const LABEL_CONTAINER_ID: &str = "container_id";

const NAMESPACE_LABELS: &[&str] = &["namespace", "ns", "kubernetes_namespace", "kubernetes_ns", "k8s_namespace", "k8s_ns"];
const POD_LABELS: &[&str] = &["pod", "pod_name", "kubernetes_pod", "k8s_pod"];

/// `(instance, destination, actual destination)` of one conversation.
type ConnectionKey = (InstanceIdx, String, String);

pub(crate) struct Loader<'a> {
    pub world: World,
    metrics: &'a QueryResults,
    raw_metrics: &'a QueryResults,
    raw_ctx: Context,
    pub cluster_id: String,
    instrumented_ports: BTreeMap<u16, String>,

    job_statuses: HashMap<(String, String), TimeSeries>,
    nodes_by_machine_id: HashMap<String, NodeIdx>,
    pods_by_uid: HashMap<String, InstanceIdx>,
    services_by_cluster_ip: HashMap<String, ServiceIdx>,
    /// container_id -> (instance, container name)
    containers_by_id: HashMap<String, (InstanceIdx, String)>,
    connections: HashMap<ConnectionKey, ConnIdx>,
    /// instance -> destination ip -> rtt
    rtt: HashMap<InstanceIdx, BTreeMap<String, TimeSeries>>,
    pub(crate) container_logs: Vec<ContainerLogs>,
    /// Recording rule series over the world window and over the raw window.
    recording_rules: QueryResults,
    recording_rules_raw: QueryResults,
}

impl<'a> Loader<'a> {
    pub fn new(
        world: World,
        metrics: &'a QueryResults,
        raw_metrics: &'a QueryResults,
        raw_ctx: Context,
        cluster_id: &str,
        instrumented_ports: BTreeMap<u16, String>,
    ) -> Self {
        Self {
            world,
            metrics,
            raw_metrics,
            raw_ctx,
            cluster_id: cluster_id.to_string(),
            instrumented_ports,
            job_statuses: HashMap::new(),
            nodes_by_machine_id: HashMap::new(),
            pods_by_uid: HashMap::new(),
            services_by_cluster_ip: HashMap::new(),
            containers_by_id: HashMap::new(),
            connections: HashMap::new(),
            rtt: HashMap::new(),
            container_logs: Vec::new(),
            recording_rules: QueryResults::new(),
            recording_rules_raw: QueryResults::new(),
        }
    }

    pub fn into_world(self) -> World {
        self.world
    }

    pub(crate) fn metrics(&self, name: &str) -> &'a [MetricValues] {
        let metrics: &'a QueryResults = self.metrics;
        metrics.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn raw_metrics(&self, name: &str) -> &'a [MetricValues] {
        let metrics: &'a QueryResults = self.raw_metrics;
        metrics.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_recording_rules(&mut self, rr: QueryResults, rr_raw: QueryResults) {
        self.recording_rules = rr;
        self.recording_rules_raw = rr_raw;
    }

    pub(crate) fn recording_rule(&self, name: &str, raw: bool) -> &[MetricValues] {
        let rr = if raw { &self.recording_rules_raw } else { &self.recording_rules };
        rr.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn raw_ctx(&self) -> Context {
        self.raw_ctx
    }

    /// `(name, series)` of every query whose name starts with `prefix`, in name order.
    pub(crate) fn metrics_with_prefix(&self, prefix: &str) -> Vec<(&'a str, &'a [MetricValues])> {
        let metrics: &'a QueryResults = self.metrics;
        let mut res: Vec<(&'a str, &'a [MetricValues])> = metrics
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, mvs)| (name.as_str(), mvs.as_slice()))
            .collect();
        res.sort_by(|a, b| a.0.cmp(b.0));
        res
    }

    /// Status of the scrape target a series came from, used to mask counter increases.
    pub fn load_job_statuses(&mut self) {
        for m in self.metrics("up") {
            self.job_statuses
                .insert((m.label("job").to_string(), m.label("instance").to_string()), m.values.clone());
        }
    }

    pub(crate) fn job_status(&self, m: &MetricValues) -> TimeSeries {
        match self
            .job_statuses
            .get(&(m.label("job").to_string(), m.label("instance").to_string()))
        {
            Some(ts) => ts.clone(),
            None => TimeSeries::filled(&self.world.ctx, f32::NAN),
        }
    }

    /// Per-step increase of a counter; NaN where it was reset.
    pub(crate) fn increase(&self, m: &MetricValues) -> TimeSeries {
        TimeSeries::increase(&m.values, &self.job_status(m)).unwrap_or_default()
    }

    pub(crate) fn node_of(&self, labels: &Labels) -> Option<NodeIdx> {
        let machine_id = labels.get("machine_id").map(|s| s.replace('-', "")).unwrap_or_default();
        if !machine_id.is_empty() {
            if let Some(idx) = self.nodes_by_machine_id.get(&machine_id) {
                return Some(*idx);
            }
        }
        let uuid = labels.get("system_uuid").map(|s| s.replace('-', "")).unwrap_or_default();
        if uuid.is_empty() {
            return None;
        }
        self.nodes_by_machine_id.get(&uuid).copied()
    }

    /// Every known listen of every instance, loopback addresses scoped by node name.
    pub(crate) fn instances_by_listen(&self) -> HashMap<Listen, InstanceIdx> {
        let mut res = HashMap::new();
        for (idx, instance) in self.world.instances.iter().enumerate() {
            for listen in instance.tcp_listens.keys() {
                if is_loopback(&listen.ip) {
                    let Some(node) = instance.node else {
                        continue;
                    };
                    let mut l = listen.clone();
                    l.ip = self.world.nodes[node].get_name().to_string();
                    res.insert(l, idx);
                } else {
                    res.insert(listen.clone(), idx);
                }
            }
        }
        res
    }

    pub(crate) fn instances_by_pod(&self) -> HashMap<(String, String), InstanceIdx> {
        let mut res = HashMap::new();
        for (idx, instance) in self.world.instances.iter().enumerate() {
            if instance.pod.is_some() {
                let ns = self.world.owner_of(idx).id.namespace.clone();
                res.insert((ns, instance.name.clone()), idx);
            }
        }
        res
    }

    pub(crate) fn rds_instances(&self) -> HashMap<String, InstanceIdx> {
        let mut res = HashMap::new();
        for (idx, instance) in self.world.instances.iter().enumerate() {
            let owner = self.world.owner_of(idx);
            if owner.id.kind == ApplicationKind::Rds {
                res.insert(format!("{}/{}", owner.id.name, instance.name), idx);
            }
        }
        res
    }
}

/// Lookup tables for attaching exporter metrics (pg_*, redis_*, ...) to instances.
pub(crate) struct InstanceFinder {
    by_listen: HashMap<Listen, InstanceIdx>,
    by_pod: HashMap<(String, String), InstanceIdx>,
    rds: HashMap<String, InstanceIdx>,
}

impl InstanceFinder {
    pub fn new(loader: &Loader<'_>) -> Self {
        Self {
            by_listen: loader.instances_by_listen(),
            by_pod: loader.instances_by_pod(),
            rds: loader.rds_instances(),
        }
    }

    /// Resolves the instance an exporter series describes: by RDS id, by the
    /// scraped `host:port`, or by namespace and pod labels. Then prefers the
    /// instance actually running one of `types`.
    pub fn find(&self, world: &World, labels: &Labels, types: &[&str]) -> Option<InstanceIdx> {
        if let Some(rds_id) = labels.get("rds_instance_id").filter(|s| !s.is_empty()) {
            return self.rds.get(rds_id).copied();
        }
        if let Some((host, port)) = labels.get("instance").and_then(|i| split_host_port(i)) {
            if host.parse::<IpAddr>().is_ok() && !is_loopback(&host) {
                let instance = [
                    Listen::new(&host, &port, true),
                    Listen::new(&host, &port, false),
                    Listen::new(&host, "0", false),
                ]
                .iter()
                .find_map(|l| self.by_listen.get(l).copied());
                return actual_service_instance(world, instance, types);
            }
        }
        let (ns, pod) = (guess_label(labels, NAMESPACE_LABELS), guess_label(labels, POD_LABELS));
        if ns.is_empty() || pod.is_empty() {
            return None;
        }
        let instance = self.by_pod.get(&(ns.to_string(), pod.to_string())).copied();
        actual_service_instance(world, instance, types)
    }
}

fn actual_service_instance(world: &World, instance: Option<InstanceIdx>, types: &[&str]) -> Option<InstanceIdx> {
    let idx = instance?;
    if types.is_empty() {
        return Some(idx);
    }
    let has_type = |i: InstanceIdx| world.instances[i].application_types().any(|t| types.contains(&t.as_str()));
    if has_type(idx) {
        return Some(idx);
    }
    let remotes: Vec<InstanceIdx> = world.instances[idx]
        .upstreams
        .iter()
        .filter_map(|c| world.connections[*c].remote_instance)
        .collect();
    if let Some(ri) = remotes.iter().copied().find(|ri| has_type(*ri)) {
        return Some(ri);
    }
    if let Some(ri) = remotes.iter().copied().find(|ri| world.owner_of(*ri).is_external()) {
        return Some(ri);
    }
    Some(idx)
}

fn guess_label<'l>(labels: &'l Labels, names: &[&str]) -> &'l str {
    names
        .iter()
        .find_map(|n| labels.get(*n).filter(|v| !v.is_empty()))
        .map(String::as_str)
        .unwrap_or("")
}

/// Folds `series` with `reducer`; a grid mismatch is logged and yields an empty series.
pub(crate) fn aggregate(reducer: Reducer, series: &[&TimeSeries]) -> TimeSeries {
    let mut agg = Aggregate::new(reducer);
    agg.add_all(series.iter().copied());
    agg.get().unwrap_or_else(|e| {
        warn!("failed to aggregate series: {}", e);
        TimeSeries::default()
    })
}

/// Series reported by an exporter embedded in the node agent carry the container id.
pub(crate) fn from_internal_exporter(labels: &Labels) -> bool {
    labels.get(LABEL_CONTAINER_ID).is_some_and(|v| !v.is_empty())
}

/// Splits `host:port`, `[v6]:port` included.
pub(crate) fn split_host_port(addr: &str) -> Option<(String, String)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return Some((host.to_string(), port.to_string()));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') || port.is_empty() {
        return None;
    }
    Some((host.to_string(), port.to_string()))
}

pub(crate) fn is_loopback(ip: &str) -> bool {
    ip.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod testing {
    use worldview_core::{Context, Duration, MetricValues, Time, TimeSeries};

    pub fn ctx() -> Context {
        Context::new(Time(0), Time(600), Duration(30))
    }

    pub fn series(values: &[f32]) -> TimeSeries {
        let ctx = ctx();
        let mut data = vec![f32::NAN; ctx.points_count()];
        for (i, v) in values.iter().enumerate().take(data.len()) {
            data[i] = *v;
        }
        TimeSeries::from_data(ctx.from, ctx.step, data)
    }

    pub fn constant(v: f32) -> TimeSeries {
        TimeSeries::filled(&ctx(), v)
    }

    pub fn mv(labels: &[(&str, &str)], values: TimeSeries) -> MetricValues {
        MetricValues::new(
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            values,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("10.0.0.1:5432"), Some(("10.0.0.1".into(), "5432".into())));
        assert_eq!(split_host_port("[::1]:80"), Some(("::1".into(), "80".into())));
        assert_eq!(split_host_port("10.0.0.1"), None);
        assert_eq!(split_host_port("::1"), None);
    }

    #[test]
    fn test_loopback() {
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("::1"));
        assert!(!is_loopback("10.0.0.1"));
        assert!(!is_loopback("node-1"));
    }

    #[test]
    fn test_guess_label() {
        let labels: Labels = [("kubernetes_namespace", "db"), ("pod_name", "pg-0")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(guess_label(&labels, NAMESPACE_LABELS), "db");
        assert_eq!(guess_label(&labels, POD_LABELS), "pg-0");
    }
}
