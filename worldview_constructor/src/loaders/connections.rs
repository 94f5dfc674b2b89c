use super::{is_loopback, split_host_port, Loader};
use crate::recording_rules::{
    RR_CONNECTION_REQUESTS_COUNT, RR_CONNECTION_REQUESTS_HISTOGRAM, RR_CONNECTION_TCP_FAILED,
    RR_CONNECTION_TCP_SUCCESSFUL,
};
use std::collections::HashMap;
use tracing::{debug, warn};
use worldview_core::model::{ConnIdx, InstanceIdx, LinkStats, Listen, CLUSTER_ID_EXTERNAL};
use worldview_core::timeseries::merge;
use worldview_core::{ApplicationId, Connection, MetricValues, Reducer};

/// What a `container_*` series says about a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Conversation {
    Tcp,
    Rtt,
    Requests { protocol: String },
    Latency { protocol: String },
    Histogram { protocol: String },
}

impl Conversation {
    fn parse(query: &str) -> Option<Self> {
        match query {
            "container_net_latency" => return Some(Self::Rtt),
            "container_net_tcp_listen_info" => return None,
            "container_rabbitmq_messages" => {
                return Some(Self::Requests {
                    protocol: "rabbitmq".to_string(),
                })
            }
            "container_nats_messages" => {
                return Some(Self::Requests {
                    protocol: "nats".to_string(),
                })
            }
            q if q.starts_with("container_net_tcp_") => return Some(Self::Tcp),
            _ => {}
        }
        let rest = query.strip_prefix("container_")?;
        let (protocol, metric) = rest
            .split_once("_requests_")
            .or_else(|| rest.split_once("_queries_"))?;
        if protocol == "dns" {
            return None;
        }
        let protocol = protocol.to_string();
        match metric {
            "count" => Some(Self::Requests { protocol }),
            "latency" => Some(Self::Latency { protocol }),
            "histogram" => Some(Self::Histogram { protocol }),
            _ => None,
        }
    }

    /// TCP series create conversations; L7 series only attach to existing ones.
    fn rank(&self) -> u8 {
        match self {
            Self::Tcp => 0,
            Self::Requests { .. } => 1,
            Self::Latency { .. } | Self::Histogram { .. } => 2,
            Self::Rtt => 3,
        }
    }
}

/// Parses a Prometheus `le` label.
pub(crate) fn parse_le(le: &str) -> Option<f32> {
    match le {
        "+Inf" | "Inf" => Some(f32::INFINITY),
        _ => le.parse::<f32>().ok(),
    }
}

fn join_host_port(ip: &str, port: &str) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

impl Loader<'_> {
    /// Builds the per-instance conversations from `container_net_*` and the
    /// L7 request series, then resolves every conversation to a remote
    /// instance, a Kubernetes service or a synthetic external service.
    pub fn load_connections(&mut self) {
        let pods = self.instances_by_pod();
        let mut queries: Vec<(Conversation, &str, &[MetricValues])> = self
            .metrics_with_prefix("container_")
            .into_iter()
            .filter_map(|(q, mvs)| Conversation::parse(q).map(|c| (c, q, mvs)))
            .collect();
        queries.sort_by(|a, b| a.0.rank().cmp(&b.0.rank()).then(a.1.cmp(b.1)));

        for (kind, query, metrics) in queries {
            for m in metrics {
                let Some((idx, container)) = self.resolve_container(&m.labels, &pods) else {
                    continue;
                };
                if kind == Conversation::Rtt {
                    let ts = self
                        .rtt
                        .entry(idx)
                        .or_default()
                        .entry(m.label("destination_ip").to_string())
                        .or_default();
                    merge(ts, &m.values, Reducer::Any);
                    continue;
                }
                let Some(c) = self.connection(idx, &container, m, kind == Conversation::Tcp) else {
                    continue;
                };
                let connection = &mut self.world.connections[c];
                match &kind {
                    Conversation::Tcp => load_tcp_metric(connection, query, m),
                    Conversation::Requests { protocol } => {
                        let protocol = match protocol.as_str() {
                            "rabbitmq" | "nats" => format!("{}-{}", protocol, m.label("method")),
                            _ => protocol.clone(),
                        };
                        let ts = connection
                            .requests_count
                            .entry(protocol)
                            .or_default()
                            .entry(m.label("status").to_string())
                            .or_default();
                        merge(ts, &m.values, Reducer::NanSum);
                    }
                    Conversation::Latency { protocol } => {
                        let ts = connection.requests_latency.entry(protocol.clone()).or_default();
                        merge(ts, &m.values, Reducer::Any);
                    }
                    Conversation::Histogram { protocol } => {
                        if let Some(le) = parse_le(m.label("le")) {
                            connection.add_histogram_bucket(protocol, le, &m.values);
                        }
                    }
                    Conversation::Rtt => {}
                }
            }
        }

        self.resolve_connections();
        self.world.rebuild_links();
    }

    /// The conversation a series belongs to. Only TCP series with at least
    /// one event in the window may open a new one.
    fn connection(&mut self, idx: InstanceIdx, container: &str, m: &MetricValues, create: bool) -> Option<ConnIdx> {
        let destination = m.label("destination");
        let actual = match m.label("actual_destination") {
            "" => destination,
            a => a,
        };
        let key = (idx, destination.to_string(), actual.to_string());
        if let Some(c) = self.connections.get(&key) {
            return Some(*c);
        }
        if !create || m.values.reduce(&Reducer::NanSum) < 1.0 {
            return None;
        }
        // docker-proxy forwards published ports; its conversations are not the app's
        if self.world.owner_of(idx).id.name == "docker" {
            return None;
        }
        let (svc_ip, svc_port) = split_host_port(destination)?;
        let (ip, port) = split_host_port(actual)?;
        let c = self
            .world
            .add_connection(Connection::new(idx, container, (&svc_ip, &svc_port), (&ip, &port)));
        self.connections.insert(key, c);
        Some(c)
    }

    fn resolve_connections(&mut self) {
        let by_listen = self.instances_by_listen();
        for c in 0..self.world.connections.len() {
            let connection = &self.world.connections[c];
            let (instance, port) = (connection.instance, connection.actual_remote_port.clone());
            let service_ip = connection.service_remote_ip.clone();
            let service_port = connection.service_remote_port.clone();
            let mut ip = connection.actual_remote_ip.clone();
            if is_loopback(&ip) {
                if let Some(node) = self.world.instances[instance].node {
                    ip = self.world.nodes[node].get_name().to_string();
                }
            }

            if let Some(rtt) = self
                .rtt
                .get(&instance)
                .and_then(|by_ip| by_ip.get(&self.world.connections[c].actual_remote_ip))
            {
                let rtt = rtt.clone();
                merge(&mut self.world.connections[c].rtt, &rtt, Reducer::Any);
            }

            let service = self.services_by_cluster_ip.get(&service_ip).copied();
            if let Some(s) = service {
                self.world.services[s].ports.insert(service_port);
                self.world.connections[c].service = Some(s);
            }

            let remote = [
                Listen::new(&ip, &port, true),
                Listen::new(&ip, &port, false),
                Listen::new(&ip, "0", false),
            ]
            .iter()
            .find_map(|l| by_listen.get(l).copied());
            if let Some(ri) = remote {
                self.world.connections[c].remote_instance = Some(ri);
                continue;
            }

            let mut external_name = None;
            if let Some(s) = service {
                let svc = &self.world.services[s];
                if let Some(app) = svc.unique_destination().and_then(|id| self.world.app_idx(id)) {
                    self.world.connections[c].remote_application = Some(app);
                    continue;
                }
                external_name = Some(svc.name.clone());
            }

            let actual_ip = self.world.connections[c].actual_remote_ip.clone();
            let name = external_name.unwrap_or_else(|| self.guess_external_name(&port));
            debug!("{} -> {}:{} (external)", self.world.instances[instance].name, actual_ip, port);
            let app = self.world.get_or_create_application(ApplicationId::external(&name), false);
            let ri = self
                .world
                .get_or_create_instance(app, &join_host_port(&actual_ip, &port), None);
            self.world.instances[ri].add_listen(Listen::new(&actual_ip, &port, false), true);
            self.world.connections[c].remote_instance = Some(ri);
        }
    }

    /// `external postgres` for well-known ports, `external:<port>` otherwise.
    fn guess_external_name(&self, port: &str) -> String {
        match port.parse::<u16>().ok().and_then(|p| self.instrumented_ports.get(&p)) {
            Some(kind) => format!("external {}", kind),
            None => format!("external:{}", port),
        }
    }
}

impl Loader<'_> {
    /// Reads the connection recording rules back into per application pair
    /// totals. Pairs whose connections are gone still get a link as long as
    /// the rules have samples in the window.
    pub fn load_app_links(&mut self) {
        for name in [
            RR_CONNECTION_REQUESTS_COUNT,
            RR_CONNECTION_REQUESTS_HISTOGRAM,
            RR_CONNECTION_TCP_SUCCESSFUL,
            RR_CONNECTION_TCP_FAILED,
        ] {
            for m in self.recording_rule(name, false).to_vec() {
                let (client, server) = match (
                    ApplicationId::parse(m.label("app"), &self.cluster_id),
                    ApplicationId::parse(m.label("dest"), &self.cluster_id),
                ) {
                    (Ok(client), Ok(server)) => (client, server),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("{}: {}", name, e);
                        continue;
                    }
                };
                // the store is shared by every cluster of the project
                if client.cluster_id != self.cluster_id {
                    continue;
                }
                self.world.get_or_create_application(client.clone(), false);
                if server.cluster_id == self.cluster_id || server.cluster_id == CLUSTER_ID_EXTERNAL {
                    self.world.get_or_create_application(server.clone(), false);
                }
                let stats = self.world.link_stats.entry((client, server)).or_default();
                add_link_metric(stats, name, &m);
            }
        }
        self.world.rebuild_links();
    }
}

fn add_link_metric(stats: &mut LinkStats, rule: &str, m: &MetricValues) {
    match rule {
        RR_CONNECTION_REQUESTS_COUNT => {
            let ts = stats
                .requests_count
                .entry(m.label("proto").to_string())
                .or_default()
                .entry(m.label("status").to_string())
                .or_default();
            merge(ts, &m.values, Reducer::NanSum);
        }
        RR_CONNECTION_REQUESTS_HISTOGRAM => {
            if let Some(le) = parse_le(m.label("le")) {
                stats.add_histogram_bucket(m.label("proto"), le, &m.values);
            }
        }
        RR_CONNECTION_TCP_SUCCESSFUL => merge(&mut stats.successful_connections, &m.values, Reducer::Any),
        RR_CONNECTION_TCP_FAILED => merge(&mut stats.failed_connections, &m.values, Reducer::Any),
        _ => {}
    }
}

fn load_tcp_metric(connection: &mut Connection, query: &str, m: &MetricValues) {
    let ts = match query {
        "container_net_tcp_successful_connects" => &mut connection.successful_connections,
        "container_net_tcp_failed_connects" => &mut connection.failed_connections,
        "container_net_tcp_active_connections" => &mut connection.active,
        "container_net_tcp_retransmits" => &mut connection.retransmissions,
        "container_net_tcp_bytes_sent" => &mut connection.bytes_sent,
        "container_net_tcp_bytes_received" => &mut connection.bytes_received,
        _ => return,
    };
    merge(ts, &m.values, Reducer::NanSum);
}
