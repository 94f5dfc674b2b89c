use super::{aggregate, Loader};
use worldview_core::model::node::DiskStats;
use worldview_core::timeseries::merge;
use worldview_core::{MetricValues, Node, NodeId, Reducer};

impl Loader<'_> {
    /// Seeds the node list from `node_info` and attaches every `node_*` series.
    pub fn load_nodes(&mut self) {
        for m in self.metrics("node_info") {
            let machine_id = m.label("machine_id");
            if machine_id.is_empty() {
                continue;
            }
            self.world.integration_status.node_agent.installed = true;
            let idx = self.get_or_create_node(NodeId::new(machine_id, m.label("system_uuid")));
            let node = &mut self.world.nodes[idx];
            node.name.update(&m.values, m.label("hostname"));
            node.agent_version.update(&m.values, m.label("agent_version"));
            node.os_kernel.update(&m.values, m.label("kernel_version"));
        }

        for (query, metrics) in self.metrics_with_prefix("node_") {
            if query == "node_info" {
                continue;
            }
            for m in metrics {
                let Some(idx) = self.node_of(&m.labels) else {
                    continue;
                };
                load_node_metric(&mut self.world.nodes[idx], query, m);
            }
        }

        for m in self.metrics("kube_node_info") {
            let Some(idx) = self.node_of(&m.labels) else {
                continue;
            };
            self.world.nodes[idx].k8s_name.update(&m.values, m.label("node"));
        }
    }

    /// EKS Fargate micro-VMs have no agent; they are described by the
    /// kubelet's cAdvisor only.
    pub fn load_fargate_nodes(&mut self) {
        for (query, metrics) in self.metrics_with_prefix("fargate_node_") {
            for m in metrics {
                if m.label("eks_amazonaws_com_compute_type") != "fargate" {
                    continue;
                }
                let hostname = m.label("kubernetes_io_hostname");
                let mut id = NodeId::new(m.label("machine_id"), m.label("system_uuid"));
                if id.is_empty() {
                    id = NodeId::new(hostname, hostname);
                }
                if id.is_empty() {
                    continue;
                }
                let idx = self.get_or_create_node(id);
                let node = &mut self.world.nodes[idx];
                node.fargate = true;
                node.name.update(&m.values, hostname);
                node.cloud.provider.update(&m.values, "aws");
                node.cloud.region.update(&m.values, m.label("topology_kubernetes_io_region"));
                node.cloud.availability_zone.update(&m.values, m.label("topology_kubernetes_io_zone"));
                match query {
                    "fargate_node_machine_cpu_cores" => merge(&mut node.cpu_capacity, &m.values, Reducer::Any),
                    "fargate_node_machine_memory_bytes" => merge(&mut node.memory_total_bytes, &m.values, Reducer::Any),
                    _ => {}
                }
            }
        }
    }

    /// Derives disk wait from await (or the other way round) once every disk
    /// series, RDS ones included, is loaded.
    pub fn finalize_disks(&mut self) {
        for node in &mut self.world.nodes {
            for disk in node.disks.values_mut() {
                finalize_disk(disk);
            }
        }
    }

    pub(crate) fn get_or_create_node(&mut self, id: NodeId) -> usize {
        if let Some(idx) = self.nodes_by_machine_id.get(&id.machine_id) {
            return *idx;
        }
        let mut node = Node::new(id.clone());
        node.cluster_id = self.cluster_id.clone();
        let idx = self.world.add_node(node);
        self.nodes_by_machine_id.insert(id.machine_id.clone(), idx);
        if id.system_uuid != id.machine_id {
            self.nodes_by_machine_id.insert(id.system_uuid, idx);
        }
        idx
    }
}

fn load_node_metric(node: &mut Node, query: &str, m: &MetricValues) {
    match query {
        "node_uptime_seconds" => merge(&mut node.uptime, &m.values, Reducer::Any),
        "node_cpu_cores" => merge(&mut node.cpu_capacity, &m.values, Reducer::Any),
        "node_cpu_usage_percent" => merge(&mut node.cpu_usage_percent, &m.values, Reducer::Any),
        "node_cpu_usage_by_mode" => {
            let ts = node.cpu_usage_by_mode.entry(m.label("mode").to_string()).or_default();
            merge(ts, &m.values, Reducer::Any);
        }
        "node_memory_total_bytes" => merge(&mut node.memory_total_bytes, &m.values, Reducer::Any),
        "node_memory_available_bytes" => merge(&mut node.memory_available_bytes, &m.values, Reducer::Any),
        "node_memory_free_bytes" => merge(&mut node.memory_free_bytes, &m.values, Reducer::Any),
        "node_memory_cached_bytes" => merge(&mut node.memory_cached_bytes, &m.values, Reducer::Any),
        "node_cloud_info" => load_cloud_info(node, m),
        q if q.starts_with("node_disk_") => {
            let disk = node.disks.entry(m.label("device").to_string()).or_default();
            load_disk_metric(disk, q, m);
        }
        q if q.starts_with("node_net_") => {
            let iface = node.interface_mut(m.label("interface"));
            match q {
                "node_net_up" => merge(&mut iface.up, &m.values, Reducer::Any),
                "node_net_ip" => {
                    let ip = m.label("ip");
                    if !ip.is_empty() && !iface.addresses.iter().any(|a| a == ip) {
                        iface.addresses.push(ip.to_string());
                    }
                }
                "node_net_rx_bytes" => merge(&mut iface.rx_bytes, &m.values, Reducer::Any),
                "node_net_tx_bytes" => merge(&mut iface.tx_bytes, &m.values, Reducer::Any),
                _ => {}
            }
        }
        _ => {}
    }
}

fn load_cloud_info(node: &mut Node, m: &MetricValues) {
    let provider = m.label("provider");
    let region = m.label("region");
    let mut az = m.label("availability_zone").to_string();
    // Azure reports bare zone numbers
    if provider.eq_ignore_ascii_case("azure") && !az.is_empty() && az.chars().all(|c| c.is_ascii_digit()) {
        az = format!("{}-{}", region, az);
    }
    let cloud = &mut node.cloud;
    cloud.provider.update(&m.values, provider);
    cloud.account_id.update(&m.values, m.label("account_id"));
    cloud.region.update(&m.values, region);
    cloud.availability_zone.update(&m.values, &az);
    cloud.instance_type.update(&m.values, m.label("instance_type"));
    cloud.instance_life_cycle.update(&m.values, m.label("instance_life_cycle"));
}

fn load_disk_metric(disk: &mut DiskStats, query: &str, m: &MetricValues) {
    match query {
        "node_disk_read_time" => merge(&mut disk.read_time, &m.values, Reducer::Any),
        "node_disk_write_time" => merge(&mut disk.write_time, &m.values, Reducer::Any),
        "node_disk_reads" => merge(&mut disk.reads, &m.values, Reducer::Any),
        "node_disk_writes" => merge(&mut disk.writes, &m.values, Reducer::Any),
        "node_disk_read_bytes" => merge(&mut disk.read_bytes, &m.values, Reducer::Any),
        "node_disk_written_bytes" => merge(&mut disk.written_bytes, &m.values, Reducer::Any),
        "node_disk_io_time" => merge(&mut disk.io_util_percent, &m.values.map(|_, v| v * 100.0), Reducer::Any),
        _ => {}
    }
}

fn finalize_disk(disk: &mut DiskStats) {
    if disk.wait.is_empty() && !disk.read_time.is_empty() && !disk.write_time.is_empty() {
        disk.wait = aggregate(Reducer::NanSum, &[&disk.read_time, &disk.write_time]);
    }
    let ops = aggregate(Reducer::NanSum, &[&disk.reads, &disk.writes]);
    if disk.await_time.is_empty() && !disk.wait.is_empty() {
        // node agents measure wait; await is per operation
        disk.await_time = aggregate(Reducer::Div, &[&disk.wait, &ops]);
    } else if disk.wait.is_empty() && !disk.await_time.is_empty() {
        // RDS reports await natively
        disk.wait = aggregate(Reducer::Mul, &[&disk.await_time, &ops]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv};
    use super::super::Loader;
    use std::collections::{BTreeMap, HashMap};
    use worldview_core::World;
    use worldview_query::QueryResults;

    fn results(entries: Vec<(&str, Vec<worldview_core::MetricValues>)>) -> QueryResults {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<HashMap<_, _>>()
    }

    #[test]
    fn test_nodes_and_disks() {
        let metrics = results(vec![
            (
                "node_info",
                vec![mv(&[("machine_id", "m-1"), ("hostname", "node-1")], constant(1.0))],
            ),
            (
                "node_cloud_info",
                vec![mv(
                    &[("machine_id", "m1"), ("provider", "Azure"), ("region", "westeurope"), ("availability_zone", "2")],
                    constant(1.0),
                )],
            ),
            ("node_disk_read_time", vec![mv(&[("machine_id", "m1"), ("device", "sda")], constant(0.2))]),
            ("node_disk_write_time", vec![mv(&[("machine_id", "m1"), ("device", "sda")], constant(0.2))]),
            ("node_disk_reads", vec![mv(&[("machine_id", "m1"), ("device", "sda")], constant(10.0))]),
            ("node_disk_writes", vec![mv(&[("machine_id", "m1"), ("device", "sda")], constant(10.0))]),
            ("node_disk_io_time", vec![mv(&[("machine_id", "m1"), ("device", "sda")], constant(0.5))]),
            ("node_info_unknown", vec![mv(&[("machine_id", "m2")], constant(1.0))]),
        ]);
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_nodes();
        loader.finalize_disks();
        let w = loader.into_world();

        assert_eq!(w.nodes.len(), 1);
        assert!(w.integration_status.node_agent.installed);
        let node = &w.nodes[0];
        assert_eq!(node.get_name(), "node-1");
        assert_eq!(node.cluster_id, "c1");
        assert_eq!(node.cloud.availability_zone.value(), "westeurope-2");
        let disk = &node.disks["sda"];
        assert!((disk.io_util_percent.last() - 50.0).abs() < 1e-4);
        assert!((disk.wait.last() - 0.4).abs() < 1e-4);
        assert!((disk.await_time.last() - 0.02).abs() < 1e-4);
    }

    #[test]
    fn test_fargate_nodes() {
        let labels = [
            ("eks_amazonaws_com_compute_type", "fargate"),
            ("kubernetes_io_hostname", "fargate-ip-10-0-0-1"),
            ("topology_kubernetes_io_zone", "us-east-1a"),
        ];
        let metrics = results(vec![
            ("fargate_node_machine_cpu_cores", vec![mv(&labels, constant(2.0))]),
            ("fargate_node_machine_memory_bytes", vec![mv(&labels, constant(4e9))]),
        ]);
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_fargate_nodes();
        let w = loader.into_world();
        assert_eq!(w.nodes.len(), 1);
        assert!(w.nodes[0].fargate);
        assert_eq!(w.nodes[0].cpu_capacity.last(), 2.0);
        assert_eq!(w.nodes[0].cloud.availability_zone.value(), "us-east-1a");
    }
}
