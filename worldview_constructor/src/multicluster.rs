use crate::loaders::is_loopback;
use std::collections::HashMap;
use tracing::debug;
use worldview_core::model::{AppIdx, InstanceIdx};
use worldview_core::{Context, World};

/// What a socket of the merged world leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Instance(InstanceIdx),
    Application(AppIdx),
}

/// Merges per-cluster worlds, given in cluster id order, into one.
///
/// Connections that ended at a synthetic external service in one cluster are
/// pointed at the real application when another cluster listens on the same
/// address; external services left without clients are dropped.
pub fn merge(worlds: Vec<World>, ctx: Context) -> World {
    let mut worlds = worlds.into_iter();
    let Some(mut world) = worlds.next() else {
        return World::new(ctx);
    };
    let mut merged = 1;
    for other in worlds {
        world.append(other);
        merged += 1;
    }
    if merged == 1 {
        return world;
    }

    let endpoints = endpoints(&world);
    let mut rewritten = 0;
    for idx in 0..world.connections.len() {
        let Some(remote) = world.remote_app_of(&world.connections[idx]) else {
            continue;
        };
        if !world.applications[remote].is_external() {
            continue;
        }
        let c = &world.connections[idx];
        let found = [
            sock(&c.actual_remote_ip, &c.actual_remote_port),
            sock(&c.service_remote_ip, &c.service_remote_port),
        ]
        .iter()
        .find_map(|s| endpoints.get(s).copied());
        let c = &mut world.connections[idx];
        match found {
            Some(Endpoint::Instance(i)) => {
                c.remote_instance = Some(i);
                c.remote_application = None;
            }
            Some(Endpoint::Application(a)) => {
                c.remote_instance = None;
                c.remote_application = Some(a);
            }
            None => continue,
        }
        rewritten += 1;
    }

    if rewritten > 0 {
        debug!("{} cross-cluster connections resolved", rewritten);
        world.rebuild_links();
        for app in &mut world.applications {
            if app.is_external() && app.downstream_connections.is_empty() {
                app.removed = true;
            }
        }
        world.compact();
    }
    world.rebuild_links();
    world
}

fn sock(ip: &str, port: &str) -> String {
    format!("{}:{}", ip, port)
}

/// Listens of every non-external instance, plus the cluster, load balancer
/// and node port addresses of services with a single destination application.
fn endpoints(world: &World) -> HashMap<String, Endpoint> {
    let mut node_ips: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &world.nodes {
        node_ips
            .entry(node.cluster_id.as_str())
            .or_default()
            .extend(node.ips().map(String::as_str).filter(|ip| !ip.is_empty() && !is_loopback(ip)));
    }

    let mut res = HashMap::new();
    for (idx, instance) in world.instances.iter().enumerate() {
        if world.owner_of(idx).is_external() {
            continue;
        }
        for l in instance.tcp_listens.keys() {
            if l.port == "0" || is_loopback(&l.ip) {
                continue;
            }
            res.entry(sock(&l.ip, &l.port)).or_insert(Endpoint::Instance(idx));
        }
    }
    for svc in &world.services {
        let Some(app) = svc.unique_destination().and_then(|id| world.app_idx(id)) else {
            continue;
        };
        let ips = std::iter::once(&svc.cluster_ip).chain(svc.load_balancer_ips.iter());
        for ip in ips.filter(|ip| !ip.is_empty()) {
            for port in &svc.ports {
                res.entry(sock(ip, port)).or_insert(Endpoint::Application(app));
            }
        }
        let ips = node_ips.get(svc.cluster_id.as_str()).map(Vec::as_slice).unwrap_or_default();
        for port in &svc.node_ports {
            for ip in ips {
                res.entry(sock(ip, port)).or_insert(Endpoint::Application(app));
            }
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldview_core::model::{Listen, Node, NodeId, Service};
    use worldview_core::{ApplicationId, ApplicationKind, Connection, Duration, Time};

    fn ctx() -> Context {
        Context::new(Time(0), Time(600), Duration(30))
    }

    /// A client in `cluster` calling `ip:port`, resolved to an external service.
    fn client_world(cluster: &str, ip: &str, port: &str) -> World {
        let mut w = World::new(ctx());
        let app = w.get_or_create_application(ApplicationId::new(cluster, "web", ApplicationKind::Deployment, "api"), false);
        let i = w.get_or_create_instance(app, "api-1", None);
        let ext = w.get_or_create_application(ApplicationId::external(&format!("external:{}", port)), false);
        let ei = w.get_or_create_instance(ext, &sock(ip, port), None);
        w.instances[ei].add_listen(Listen::new(ip, port, false), true);
        let mut c = Connection::new(i, "api", (ip, port), (ip, port));
        c.remote_instance = Some(ei);
        w.add_connection(c);
        w.rebuild_links();
        w
    }

    #[test]
    fn test_external_upstream_rewritten_to_listening_instance() {
        let a = client_world("a", "10.1.0.5", "8080");
        let mut b = World::new(ctx());
        let app = b.get_or_create_application(ApplicationId::new("b", "shop", ApplicationKind::Deployment, "cart"), false);
        let i = b.get_or_create_instance(app, "cart-1", None);
        b.instances[i].add_listen(Listen::new("10.1.0.5", "8080", false), true);

        let w = merge(vec![a, b], ctx());

        let cart = w
            .app_idx(&ApplicationId::new("b", "shop", ApplicationKind::Deployment, "cart"))
            .unwrap();
        assert_eq!(w.downstream_connections(cart).count(), 1);
        assert!(!w.applications.iter().any(|a| a.is_external()));
        assert!(w.links_are_consistent());
    }

    #[test]
    fn test_external_upstream_rewritten_through_service() {
        let a = client_world("a", "10.96.0.10", "80");
        let mut b = World::new(ctx());
        let cart = ApplicationId::new("b", "shop", ApplicationKind::Deployment, "cart");
        b.get_or_create_application(cart.clone(), false);
        let mut svc = Service::new("b", "shop", "cart");
        svc.cluster_ip = "10.96.0.10".to_string();
        svc.ports.insert("80".to_string());
        svc.destination_apps.insert(cart.clone());
        b.add_service(svc);

        let w = merge(vec![a, b], ctx());
        let idx = w.app_idx(&cart).unwrap();
        assert_eq!(w.downstream_connections(idx).count(), 1);
        assert!(w.links_are_consistent());
    }

    #[test]
    fn test_external_upstream_rewritten_through_node_port() {
        let a = client_world("a", "192.168.1.20", "30080");
        let mut b = World::new(ctx());
        let node = b.add_node(Node::new(NodeId::new("m2", "")));
        b.nodes[node].cluster_id = "b".to_string();
        b.nodes[node].interface_mut("eth0").addresses.push("192.168.1.20".to_string());
        let cart = ApplicationId::new("b", "shop", ApplicationKind::Deployment, "cart");
        b.get_or_create_application(cart.clone(), false);
        let mut svc = Service::new("b", "shop", "cart");
        svc.cluster_ip = "10.96.0.10".to_string();
        svc.ports.insert("80".to_string());
        svc.node_ports.insert("30080".to_string());
        svc.destination_apps.insert(cart.clone());
        b.add_service(svc);

        let w = merge(vec![a, b], ctx());
        let idx = w.app_idx(&cart).unwrap();
        assert_eq!(w.downstream_connections(idx).count(), 1);
        assert!(!w.applications.iter().any(|a| a.is_external()));
        assert!(w.links_are_consistent());
    }

    #[test]
    fn test_node_port_of_another_cluster_is_ignored() {
        let a = client_world("a", "192.168.1.20", "30080");
        let mut b = World::new(ctx());
        let node = b.add_node(Node::new(NodeId::new("m2", "")));
        b.nodes[node].cluster_id = "c".to_string();
        b.nodes[node].interface_mut("eth0").addresses.push("192.168.1.20".to_string());
        let cart = ApplicationId::new("b", "shop", ApplicationKind::Deployment, "cart");
        b.get_or_create_application(cart.clone(), false);
        let mut svc = Service::new("b", "shop", "cart");
        svc.node_ports.insert("30080".to_string());
        svc.destination_apps.insert(cart.clone());
        b.add_service(svc);

        let w = merge(vec![a, b], ctx());
        assert!(w.app_idx(&ApplicationId::external("external:30080")).is_some());
    }

    #[test]
    fn test_unmatched_external_is_kept() {
        let a = client_world("a", "1.2.3.4", "443");
        let b = client_world("b", "5.6.7.8", "443");
        let w = merge(vec![a, b], ctx());
        let ext = w.app_idx(&ApplicationId::external("external:443")).unwrap();
        assert_eq!(w.applications[ext].instances.len(), 2);
        assert_eq!(w.downstream_connections(ext).count(), 2);
        assert!(w.links_are_consistent());
    }

    #[test]
    fn test_single_world_is_returned_as_is() {
        let a = client_world("a", "1.2.3.4", "443");
        let w = merge(vec![a], ctx());
        assert_eq!(w.applications.len(), 2);
        assert!(merge(Vec::new(), ctx()).applications.is_empty());
    }
}
