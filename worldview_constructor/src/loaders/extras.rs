use super::connections::parse_le;
use super::Loader;
use std::collections::HashMap;
use worldview_core::model::{AppIdx, DnsRequest, LabelLastValue, NodeIdx, TrafficKind};
use worldview_core::timeseries::{merge, sort_buckets, HistogramBucket};
use worldview_core::{Reducer, TimeSeries, World};

impl Loader<'_> {
    /// DNS requests made by containers, summed per application.
    pub fn load_dns(&mut self) {
        let pods = self.instances_by_pod();
        for m in self.metrics("container_dns_requests_total") {
            let request = DnsRequest {
                kind: m.label("request_type").to_string(),
                domain: m.label("domain").to_string(),
            };
            if request.kind.is_empty() || request.domain.is_empty() {
                continue;
            }
            let Some((idx, _)) = self.resolve_container(&m.labels, &pods) else {
                continue;
            };
            let app = self.world.instances[idx].owner;
            let by_status = self.world.applications[app].dns.requests.entry(request).or_default();
            merge(by_status.entry(m.label("status").to_string()).or_default(), &m.values, Reducer::NanSum);
        }
        for m in self.metrics("container_dns_requests_latency") {
            let Some(le) = parse_le(m.label("le")) else {
                continue;
            };
            let Some((idx, _)) = self.resolve_container(&m.labels, &pods) else {
                continue;
            };
            let app = self.world.instances[idx].owner;
            let histogram = &mut self.world.applications[app].dns.histogram;
            match histogram.iter_mut().find(|b| b.le == le) {
                Some(b) => merge(&mut b.series, &m.values, Reducer::NanSum),
                None => {
                    histogram.push(HistogramBucket {
                        le,
                        series: m.values.clone(),
                    });
                    sort_buckets(histogram);
                }
            }
        }
    }

    /// Chargeable traffic per client application: bytes crossing availability
    /// zones and bytes sent to external services.
    pub fn load_traffic(&mut self) {
        let mut traffic: Vec<(AppIdx, TrafficKind, TimeSeries)> = Vec::new();
        for c in &self.world.connections {
            let instance = &self.world.instances[c.instance];
            let client = instance.owner;
            if let Some(remote) = c.remote_application {
                if self.world.applications[remote].is_external() {
                    traffic.push((client, TrafficKind::InternetEgress, c.bytes_sent.clone()));
                    continue;
                }
            }
            let Some(remote) = c.remote_instance else {
                continue;
            };
            let (from, to) = (zone(&self.world, instance.node), zone(&self.world, self.world.instances[remote].node));
            if from.is_empty() || to.is_empty() || from == to {
                continue;
            }
            traffic.push((client, TrafficKind::CrossAzEgress, c.bytes_sent.clone()));
            traffic.push((client, TrafficKind::CrossAzIngress, c.bytes_received.clone()));
        }
        for (app, kind, ts) in traffic {
            merge(self.world.applications[app].traffic.get_mut(kind), &ts, Reducer::NanSum);
        }
    }

    /// Names external services by the FQDNs their addresses resolved from.
    pub fn load_fqdns(&mut self) {
        let mut ip_to_fqdn: HashMap<&str, LabelLastValue> = HashMap::new();
        for m in self.metrics("ip_to_fqdn") {
            ip_to_fqdn.entry(m.label("ip")).or_default().update(&m.values, m.label("fqdn"));
        }
        if ip_to_fqdn.is_empty() {
            return;
        }
        for app in self.world.applications.iter_mut().filter(|a| a.is_external()) {
            for &idx in &app.instances {
                for listen in self.world.instances[idx].tcp_listens.keys() {
                    if let Some(fqdn) = ip_to_fqdn.get(listen.ip.as_str()).filter(|v| !v.is_empty()) {
                        app.fqdns.insert(fqdn.value().to_string());
                    }
                }
            }
        }
    }
}

fn zone(world: &World, node: Option<NodeIdx>) -> &str {
    node.map(|n| world.nodes[n].cloud.availability_zone.value()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv};
    use super::super::Loader;
    use std::collections::BTreeMap;
    use worldview_core::model::{Connection, DnsRequest, Listen};
    use worldview_core::{ApplicationId, ApplicationKind, Node, NodeId, World};
    use worldview_query::QueryResults;

    #[test]
    fn test_dns() {
        let container = ("container_id", "/k8s/shop/api-0/app");
        let metrics: QueryResults = vec![
            (
                "container_dns_requests_total".to_string(),
                vec![
                    mv(
                        &[container, ("request_type", "A"), ("domain", "db.shop"), ("status", "ok")],
                        constant(2.0),
                    ),
                    mv(
                        &[container, ("request_type", "A"), ("domain", "db.shop"), ("status", "nxdomain")],
                        constant(0.5),
                    ),
                    mv(&[container, ("request_type", ""), ("domain", "x"), ("status", "ok")], constant(1.0)),
                ],
            ),
            (
                "container_dns_requests_latency".to_string(),
                vec![
                    mv(&[container, ("le", "+Inf")], constant(2.5)),
                    mv(&[container, ("le", "0.01")], constant(2.0)),
                ],
            ),
        ]
        .into_iter()
        .collect();
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_dns();
        let w = loader.into_world();

        let app = w
            .application(&ApplicationId::new("c1", "shop", ApplicationKind::Unknown, "api"))
            .expect("app");
        let request = DnsRequest {
            kind: "A".into(),
            domain: "db.shop".into(),
        };
        assert_eq!(app.dns.requests.len(), 1);
        assert_eq!(app.dns.requests[&request]["ok"].last(), 2.0);
        assert_eq!(app.dns.total_by_status("nxdomain").last(), 0.5);
        let les: Vec<f32> = app.dns.histogram.iter().map(|b| b.le).collect();
        assert_eq!(les, vec![0.01, f32::INFINITY]);
    }

    #[test]
    fn test_traffic_and_fqdns() {
        let mut w = World::new(ctx());
        let (a, b) = (w.add_node(Node::new(NodeId::new("m1", ""))), w.add_node(Node::new(NodeId::new("m2", ""))));
        w.nodes[a].cloud.availability_zone.update(&constant(1.0), "us-east-1a");
        w.nodes[b].cloud.availability_zone.update(&constant(1.0), "us-east-1b");

        let api = w.get_or_create_application(ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "api"), false);
        let db = w.get_or_create_application(ApplicationId::new("c1", "shop", ApplicationKind::StatefulSet, "db"), false);
        let ext = w.get_or_create_application(ApplicationId::external("external:443"), false);
        let api0 = w.get_or_create_instance(api, "api-0", Some(a));
        let db0 = w.get_or_create_instance(db, "db-0", Some(b));
        let ext0 = w.get_or_create_instance(ext, "93.184.216.34:443", None);
        w.instances[ext0].add_listen(Listen::new("93.184.216.34", "443", false), true);

        let mut to_db = Connection::new(api0, "app", ("10.0.0.2", "5432"), ("10.0.0.2", "5432"));
        to_db.remote_instance = Some(db0);
        to_db.remote_application = Some(db);
        to_db.bytes_sent = constant(100.0);
        to_db.bytes_received = constant(1000.0);
        w.add_connection(to_db);
        let mut to_ext = Connection::new(api0, "app", ("93.184.216.34", "443"), ("93.184.216.34", "443"));
        to_ext.remote_instance = Some(ext0);
        to_ext.remote_application = Some(ext);
        to_ext.bytes_sent = constant(10.0);
        w.add_connection(to_ext);

        let metrics: QueryResults = vec![(
            "ip_to_fqdn".to_string(),
            vec![mv(&[("ip", "93.184.216.34"), ("fqdn", "example.com")], constant(1.0))],
        )]
        .into_iter()
        .collect();
        let raw = QueryResults::new();
        let mut loader = Loader::new(w, &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_traffic();
        loader.load_fqdns();
        let w = loader.into_world();

        let traffic = &w.applications[api].traffic;
        assert_eq!(traffic.cross_az_egress.last(), 100.0);
        assert_eq!(traffic.cross_az_ingress.last(), 1000.0);
        assert_eq!(traffic.internet_egress.last(), 10.0);
        assert!(w.applications[db].traffic.cross_az_egress.is_empty());
        assert!(w.applications[ext].fqdns.contains("example.com"));
    }
}
