use super::{sum, AppAuditor};
use crate::catalogue::{
    DNS_LATENCY, DNS_NXDOMAIN_ERRORS, DNS_SERVER_ERRORS, NETWORK_CONNECTIVITY, NETWORK_RTT,
    NETWORK_TCP_CONNECTIONS,
};
use crate::check::ReportName;
use worldview_core::timeseries::quantile;

impl AppAuditor<'_> {
    /// Aggregates the actual conversations with every upstream application.
    pub(super) fn network(&mut self) {
        if self.app.upstreams.is_empty() {
            return;
        }
        let mut rtt = self.check(&NETWORK_RTT);
        let mut connectivity = self.check(&NETWORK_CONNECTIVITY);
        let mut tcp = self.check(&NETWORK_TCP_CONNECTIONS);

        for (upstream, link) in &self.app.upstreams {
            let connections: Vec<_> = self.world.links[*link]
                .connections
                .iter()
                .map(|c| &self.world.connections[*c])
                .filter(|c| c.is_actual())
                .collect();
            if connections.is_empty() {
                continue;
            }
            let item = upstream.string_without_cluster_id();

            let max_rtt = connections
                .iter()
                .map(|c| c.rtt.last_not_null().1)
                .filter(|v| !v.is_nan())
                .fold(f32::NAN, f32::max);
            if max_rtt > rtt.threshold {
                rtt.add_item(&item);
            }
            if connections.iter().all(|c| c.rtt.tail_is_empty()) {
                connectivity.add_item(&item);
            }
            let failed: f32 = connections
                .iter()
                .map(|c| c.failed_connections.last())
                .filter(|v| !v.is_nan())
                .sum();
            if failed > tcp.threshold {
                tcp.add_item(item);
            }
        }
        self.add_report(ReportName::Network, vec![rtt, connectivity, tcp]);
    }

    pub(super) fn dns(&mut self) {
        let dns = &self.app.dns;
        if dns.is_empty() {
            return;
        }
        let step = self.world.ctx.step.as_secs_f32();

        let mut latency = self.check(&DNS_LATENCY);
        latency.set_value(quantile(&dns.histogram, 0.95).last_not_null().1);

        let mut server_errors = self.check(&DNS_SERVER_ERRORS);
        server_errors.set_value(sum(&dns.total_by_status("servfail")) * step);

        let mut nxdomain = self.check(&DNS_NXDOMAIN_ERRORS);
        nxdomain.set_value(sum(&dns.total_by_status("nxdomain")) * step);

        self.add_report(ReportName::Dns, vec![latency, server_errors, nxdomain]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::audit;
    use super::super::testing::*;
    use super::*;
    use std::collections::BTreeMap;
    use worldview_core::model::{AppLink, DnsRequest};
    use worldview_core::timeseries::HistogramBucket;
    use worldview_core::{Connection, Status};

    #[test]
    fn test_upstream_problems() {
        let mut w = world();
        let (api, instances) = app_with_instances(&mut w, "api", 1);
        let (db, _) = app_with_instances(&mut w, "db", 1);
        let (cache, _) = app_with_instances(&mut w, "cache", 1);

        let mut slow = Connection::new(instances[0], "app", ("10.0.0.1", "5432"), ("10.0.0.1", "5432"));
        slow.successful_connections = ts(1.0);
        slow.rtt = ts(0.05);
        slow.failed_connections = ts(2.0);
        let mut dead = Connection::new(instances[0], "app", ("10.0.0.2", "6379"), ("10.0.0.2", "6379"));
        dead.failed_connections = ts(1.0);

        for (server, conn) in [(db, slow), (cache, dead)] {
            let c = w.add_connection(conn);
            w.links.push(AppLink {
                client: api,
                server,
                connections: vec![c],
            });
            let link = w.links.len() - 1;
            let id = w.applications[server].id.clone();
            w.applications[api].upstreams.insert(id, link);
        }

        let audit = audit(&w);
        let a = audit.get(&app_id("api")).unwrap();
        let (check, report) = a.check(NETWORK_RTT.id).unwrap();
        assert_eq!(report, ReportName::Network);
        assert_eq!(check.items.len(), 1);
        assert!(check.items.contains("shop:Deployment:db"));
        let (check, _) = a.check(NETWORK_CONNECTIVITY.id).unwrap();
        assert!(check.items.contains("shop:Deployment:cache"));
        assert_eq!(check.message, "no connectivity with 1 upstream service");
        let (check, _) = a.check(NETWORK_TCP_CONNECTIONS.id).unwrap();
        assert_eq!(check.items.len(), 2);
        assert_eq!(a.report(ReportName::Network).unwrap().status, Status::Warning);
        assert!(audit.get(&app_id("db")).unwrap().report(ReportName::Network).is_none());
    }

    #[test]
    fn test_dns_rollups() {
        let mut w = world();
        let (api, _) = app_with_instances(&mut w, "api", 1);
        let dns = &mut w.applications[api].dns;
        let req = DnsRequest {
            kind: "A".into(),
            domain: "db.svc".into(),
        };
        let mut statuses = BTreeMap::new();
        statuses.insert("ok".to_string(), ts(10.0));
        statuses.insert("nxdomain".to_string(), ts_fn(|p| if p == 3 { 0.5 } else { 0.0 }));
        dns.requests.insert(req, statuses);
        dns.histogram = vec![
            HistogramBucket {
                le: 0.01,
                series: ts(9.0),
            },
            HistogramBucket {
                le: 0.5,
                series: ts(10.0),
            },
        ];

        let audit = audit(&w);
        let a = audit.get(&app_id("api")).unwrap();
        let (nx, _) = a.check(DNS_NXDOMAIN_ERRORS.id).unwrap();
        assert_eq!(nx.value(), 30.0);
        assert_eq!(nx.status, Status::Warning);
        let (servfail, _) = a.check(DNS_SERVER_ERRORS.id).unwrap();
        assert_eq!(servfail.status, Status::Ok);
        let (latency, _) = a.check(DNS_LATENCY.id).unwrap();
        assert!(latency.value() > 0.1);
        assert_eq!(latency.status, Status::Warning);
    }
}
