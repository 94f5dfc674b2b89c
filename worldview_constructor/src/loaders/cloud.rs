use super::Loader;
use worldview_core::model::volume::Ebs;
use worldview_core::model::{Elasticache, InstanceIdx, Listen, LogLevel, Rds, Volume};
use worldview_core::timeseries::merge;
use worldview_core::{ApplicationId, ApplicationKind, MetricValues, Node, NodeId, Reducer};

const RDS_MOUNT_POINT: &str = "/rdsdbdata";

impl Loader<'_> {
    /// RDS instances discovered by the AWS integration. Each one becomes an
    /// instance of its own `RDS` application running on a synthetic node.
    pub fn load_rds(&mut self) {
        for (query, metrics) in self.metrics_with_prefix("aws_rds_") {
            for m in metrics {
                let Some(idx) = self.get_or_create_rds_instance(m) else {
                    continue;
                };
                self.load_rds_metric(idx, query, m);
            }
        }
    }

    fn get_or_create_rds_instance(&mut self, m: &MetricValues) -> Option<InstanceIdx> {
        let (_, name) = m.label("rds_instance_id").split_once('/')?;
        if name.is_empty() {
            return None;
        }
        let app = self
            .world
            .get_or_create_application(ApplicationId::new(&self.cluster_id, "", ApplicationKind::Rds, name), false);
        let idx = self.world.get_or_create_instance(app, name, None);
        if self.world.instances[idx].node.is_none() {
            let node_name = format!("rds:{}", name);
            let node = self.get_or_create_node(NodeId::new(&node_name, &node_name));
            self.world.nodes[node].name.update(&m.values, &node_name);
            self.world.nodes[node].instances.push(idx);
            self.world.instances[idx].node = Some(node);
        }
        let instance = &mut self.world.instances[idx];
        instance.rds.get_or_insert_with(Rds::default);
        // an RDS instance has exactly one data volume
        if instance.volumes.is_empty() {
            instance.volumes.push(Volume {
                mount_point: RDS_MOUNT_POINT.to_string(),
                ebs: Some(Ebs::default()),
                ..Default::default()
            });
        }
        Some(idx)
    }

    fn load_rds_metric(&mut self, idx: InstanceIdx, query: &str, m: &MetricValues) {
        if query == "aws_rds_log_messages_total" {
            let messages = self.increase(m);
            let level = LogLevel::parse(m.label("level"));
            let owner = self.world.instances[idx].owner;
            merge(
                &mut self.world.applications[owner].log_messages_mut(level).messages,
                &messages,
                Reducer::NanSum,
            );
            if let Some(rds) = self.world.instances[idx].rds.as_mut() {
                let ts = rds.log_messages.entry(level.as_str().to_string()).or_default();
                merge(ts, &messages, Reducer::NanSum);
            }
            return;
        }

        let Some(node_idx) = self.world.instances[idx].node else {
            return;
        };
        let instance = &mut self.world.instances[idx];
        let node = &mut self.world.nodes[node_idx];
        let (Some(rds), Some(volume)) = (instance.rds.as_mut(), instance.volumes.first_mut()) else {
            return;
        };
        match query {
            "aws_rds_info" => {
                instance
                    .tcp_listens
                    .insert(Listen::new(m.label("ipv4"), m.label("port"), false), true);
                rds.engine.update(&m.values, m.label("engine"));
                rds.engine_version.update(&m.values, m.label("engine_version"));
                rds.instance_type.update(&m.values, m.label("instance_type"));
                rds.storage_type.update(&m.values, m.label("storage_type"));
                rds.multi_az = m.label("multi_az").parse().unwrap_or(false);
                if let Some(ebs) = volume.ebs.as_mut() {
                    ebs.storage_type = rds.storage_type.value().to_string();
                }
                node.cloud.instance_type.update(&m.values, m.label("instance_type"));
                node.cloud.provider.update(&m.values, "aws");
                node.cloud.region.update(&m.values, m.label("region"));
                node.cloud.availability_zone.update(&m.values, m.label("availability_zone"));
            }
            "aws_rds_status" => {
                merge(&mut rds.life_span, &m.values, Reducer::Any);
                rds.status.update(&m.values, m.label("status"));
            }
            "aws_rds_cpu_cores" => merge(&mut node.cpu_capacity, &m.values, Reducer::Any),
            "aws_rds_cpu_usage_percent" => {
                merge(&mut node.cpu_usage_percent, &m.values, Reducer::NanSum);
                let ts = node.cpu_usage_by_mode.entry(m.label("mode").to_string()).or_default();
                merge(ts, &m.values, Reducer::Any);
            }
            "aws_rds_memory_total_bytes" => merge(&mut node.memory_total_bytes, &m.values, Reducer::Any),
            "aws_rds_memory_cached_bytes" => {
                merge(&mut node.memory_cached_bytes, &m.values, Reducer::Any);
                merge(&mut node.memory_available_bytes, &m.values, Reducer::NanSum);
            }
            "aws_rds_memory_free_bytes" => {
                merge(&mut node.memory_free_bytes, &m.values, Reducer::Any);
                merge(&mut node.memory_available_bytes, &m.values, Reducer::NanSum);
            }
            "aws_rds_storage_provisioned_iops" => {
                if let Some(ebs) = volume.ebs.as_mut() {
                    merge(&mut ebs.provisioned_iops, &m.values, Reducer::Any);
                }
            }
            "aws_rds_allocated_storage_gibibytes" => {
                if let Some(ebs) = volume.ebs.as_mut() {
                    merge(&mut ebs.allocated_gibibytes, &m.values, Reducer::Any);
                }
            }
            "aws_rds_fs_total_bytes" => merge(&mut volume.capacity_bytes, &m.values, Reducer::Any),
            "aws_rds_fs_used_bytes" => merge(&mut volume.used_bytes, &m.values, Reducer::Any),
            "aws_rds_io_await_seconds" | "aws_rds_io_ops_per_second" | "aws_rds_io_util_percent" => {
                let device = m.label("device");
                volume.device.update(&m.values, device);
                let disk = node.disks.entry(device.to_string()).or_default();
                match query {
                    "aws_rds_io_util_percent" => merge(&mut disk.io_util_percent, &m.values, Reducer::Any),
                    "aws_rds_io_await_seconds" => merge(&mut disk.await_time, &m.values, Reducer::Any),
                    _ => match m.label("operation") {
                        "read" => merge(&mut disk.reads, &m.values, Reducer::Any),
                        "write" => merge(&mut disk.writes, &m.values, Reducer::Any),
                        _ => {}
                    },
                }
            }
            "aws_rds_net_rx_bytes_per_second" => {
                merge(&mut node.interface_mut(m.label("interface")).rx_bytes, &m.values, Reducer::Any)
            }
            "aws_rds_net_tx_bytes_per_second" => {
                merge(&mut node.interface_mut(m.label("interface")).tx_bytes, &m.values, Reducer::Any)
            }
            _ => {}
        }
    }

    /// ElastiCache nodes, grouped into one application per replication group.
    pub fn load_elasticache(&mut self) {
        for (query, metrics) in self.metrics_with_prefix("aws_elasticache_") {
            for m in metrics {
                let id = m.label("ec_instance_id");
                let parts: Vec<&str> = id.splitn(3, '/').collect();
                if parts.len() != 3 {
                    continue;
                }
                let cluster = m.label("cluster_id");
                if cluster.is_empty() {
                    continue;
                }
                let instance_name = format!("{}-{}", parts[1], parts[2]);
                let app = self.world.get_or_create_application(
                    ApplicationId::new(&self.cluster_id, "", ApplicationKind::ElasticacheCluster, cluster),
                    false,
                );
                let idx = self.world.get_or_create_instance(app, &instance_name, None);
                if self.world.instances[idx].node.is_none() {
                    let node_name = format!("elasticache:{}", instance_name);
                    let node = self.get_or_create_node(NodeId::new(&node_name, &node_name));
                    self.world.nodes[node].name.update(&m.values, &node_name);
                    self.world.nodes[node].instances.push(idx);
                    self.world.instances[idx].node = Some(node);
                }
                let Some(node_idx) = self.world.instances[idx].node else {
                    continue;
                };
                let instance = &mut self.world.instances[idx];
                let node: &mut Node = &mut self.world.nodes[node_idx];
                let ec = instance.elasticache.get_or_insert_with(Elasticache::default);
                match query {
                    "aws_elasticache_info" => {
                        let listen = Listen::new(m.label("ipv4"), m.label("port"), false);
                        ec.engine.update(&m.values, m.label("engine"));
                        ec.engine_version.update(&m.values, m.label("engine_version"));
                        ec.instance_type.update(&m.values, m.label("instance_type"));
                        node.cloud.instance_type.update(&m.values, m.label("instance_type"));
                        node.cloud.provider.update(&m.values, "aws");
                        node.cloud.region.update(&m.values, m.label("region"));
                        node.cloud.availability_zone.update(&m.values, m.label("availability_zone"));
                        instance.tcp_listens.insert(listen, true);
                    }
                    "aws_elasticache_status" => {
                        merge(&mut ec.life_span, &m.values, Reducer::Any);
                        ec.status.update(&m.values, m.label("status"));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Discovery errors still reported at the end of the window.
    pub fn load_aws_errors(&mut self) {
        for m in self.metrics("aws_discovery_error") {
            let error = m.label("error");
            if !error.is_empty() && m.values.last() > 0.0 {
                self.world.aws_discovery_errors.insert(error.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv};
    use super::super::Loader;
    use std::collections::BTreeMap;
    use worldview_core::model::Listen;
    use worldview_core::{ApplicationKind, World};
    use worldview_query::QueryResults;

    fn results(entries: Vec<(&str, Vec<worldview_core::MetricValues>)>) -> QueryResults {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_rds() {
        let id = ("rds_instance_id", "us-east-1/orders-db");
        let metrics = results(vec![
            (
                "aws_rds_info",
                vec![mv(
                    &[
                        id,
                        ("ipv4", "10.1.0.5"),
                        ("port", "5432"),
                        ("engine", "postgres"),
                        ("engine_version", "15.4"),
                        ("instance_type", "db.t3.medium"),
                        ("storage_type", "gp3"),
                        ("multi_az", "true"),
                        ("region", "us-east-1"),
                        ("availability_zone", "us-east-1b"),
                    ],
                    constant(1.0),
                )],
            ),
            ("aws_rds_status", vec![mv(&[id, ("status", "available")], constant(1.0))]),
            ("aws_rds_fs_total_bytes", vec![mv(&[id], constant(100.0))]),
            ("aws_rds_fs_used_bytes", vec![mv(&[id], constant(25.0))]),
            ("aws_rds_io_await_seconds", vec![mv(&[id, ("device", "rdsdev")], constant(0.01))]),
            (
                "aws_rds_io_ops_per_second",
                vec![
                    mv(&[id, ("device", "rdsdev"), ("operation", "read")], constant(50.0)),
                    mv(&[id, ("device", "rdsdev"), ("operation", "write")], constant(50.0)),
                ],
            ),
            ("aws_rds_cpu_usage_percent", vec![mv(&[("rds_instance_id", "broken")], constant(1.0))]),
        ]);
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_rds();
        loader.finalize_disks();
        let w = loader.into_world();

        assert_eq!(w.applications.len(), 1);
        assert_eq!(w.applications[0].id.kind, ApplicationKind::Rds);
        assert_eq!(w.applications[0].id.name, "orders-db");
        let instance = &w.instances[0];
        let rds = instance.rds.as_ref().unwrap();
        assert!(rds.is_available());
        assert!(rds.multi_az);
        assert_eq!(rds.engine.value(), "postgres");
        assert!(instance.is_listen_active("10.1.0.5", "5432"));
        assert!(instance.tcp_listens.contains_key(&Listen::new("10.1.0.5", "5432", false)));
        assert_eq!(instance.volumes.len(), 1);
        assert_eq!(instance.volumes[0].usage_percent(), 25.0);
        assert_eq!(instance.volumes[0].ebs.as_ref().unwrap().storage_type, "gp3");

        let node = &w.nodes[instance.node.unwrap()];
        assert_eq!(node.get_name(), "rds:orders-db");
        assert_eq!(node.cloud.availability_zone.value(), "us-east-1b");
        // wait is derived from the native await
        assert!((node.disks["rdsdev"].wait.last() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_elasticache_and_errors() {
        let labels = [
            ("ec_instance_id", "us-east-1/sessions/0001"),
            ("cluster_id", "sessions"),
            ("ipv4", "10.1.0.7"),
            ("port", "6379"),
            ("engine", "redis"),
        ];
        let metrics = results(vec![
            ("aws_elasticache_info", vec![mv(&labels, constant(1.0))]),
            (
                "aws_elasticache_status",
                vec![mv(&[labels[0], labels[1], ("status", "available")], constant(1.0))],
            ),
            (
                "aws_discovery_error",
                vec![
                    mv(&[("error", "AccessDenied: rds:DescribeDBInstances")], constant(1.0)),
                    mv(&[("error", "resolved")], constant(0.0)),
                ],
            ),
        ]);
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_elasticache();
        loader.load_aws_errors();
        let w = loader.into_world();

        assert_eq!(w.applications[0].id.kind, ApplicationKind::ElasticacheCluster);
        assert_eq!(w.instances[0].name, "sessions-0001");
        let ec = w.instances[0].elasticache.as_ref().unwrap();
        assert!(ec.is_available());
        assert_eq!(ec.engine.value(), "redis");
        assert_eq!(w.nodes[0].get_name(), "elasticache:sessions-0001");
        assert_eq!(w.aws_discovery_errors.len(), 1);
    }
}
