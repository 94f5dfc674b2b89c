use super::Loader;
use std::collections::HashMap;
use tracing::{debug, warn};
use worldview_core::model::{InstanceIdx, Listen, LogLevel, Volume};
use worldview_core::timeseries::merge;
use worldview_core::{ApplicationId, ApplicationKind, MetricValues, Reducer, TimeSeries};

/// Log message counts of one container for one pattern, kept until the log
/// recording rule aggregates them per application.
#[derive(Debug, Clone)]
pub(crate) struct ContainerLogs {
    pub instance: InstanceIdx,
    pub level: LogLevel,
    pub pattern_hash: String,
    pub sample: String,
    pub multiline: bool,
    pub messages: TimeSeries,
}

/// Where a `container_id` label points to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ContainerPath {
    Kubernetes { namespace: String, pod: String, container: String },
    Swarm { namespace: String, service: String, task: String },
    Standalone { name: String },
}

fn parse_container_id(id: &str) -> Option<ContainerPath> {
    let parts: Vec<&str> = id.split('/').collect();
    match parts.as_slice() {
        ["", "k8s", ns, pod, container] => Some(ContainerPath::Kubernetes {
            namespace: ns.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
        }),
        ["", "swarm", ns, service, rest @ ..] => Some(ContainerPath::Swarm {
            namespace: ns.to_string(),
            service: service.to_string(),
            task: rest.first().map(|s| s.to_string()).unwrap_or_default(),
        }),
        ["", "system.slice", unit] => unit
            .strip_suffix(".service")
            .filter(|name| !name.is_empty())
            .map(|name| ContainerPath::Standalone { name: name.to_string() }),
        ["", "docker" | "containerd", name] if !name.is_empty() => Some(ContainerPath::Standalone {
            name: name.to_string(),
        }),
        _ => None,
    }
}

/// Best guess of a pod's owner name when kube-state-metrics is absent:
/// `api-6f8c7d9b4f-xkqlz` -> `api`, `db-0` -> `db`.
fn guess_owner_of_pod(pod: &str) -> String {
    let mut parts: Vec<&str> = pod.split('-').collect();
    if parts.len() > 1 {
        let last = parts[parts.len() - 1];
        if last.chars().all(|c| c.is_ascii_digit()) {
            parts.pop();
        } else if last.len() == 5 && last.chars().all(|c| c.is_ascii_alphanumeric()) {
            parts.pop();
            if parts.len() > 1 {
                let hash = parts[parts.len() - 1];
                if (8..=10).contains(&hash.len()) && hash.chars().all(|c| c.is_ascii_alphanumeric()) {
                    parts.pop();
                }
            }
        }
    }
    parts.join("-")
}

/// Puts `<mark>` around the line an exception was raised at: the line right
/// before a Java-like stack trace, or the last line of a Python traceback.
pub(crate) fn mark_multiline_message(msg: &str) -> String {
    let mut lines: Vec<String> = msg.split('\n').map(str::to_string).collect();
    let trace_start = lines
        .iter()
        .position(|l| l.starts_with("\tat ") || l.starts_with("\t... "));
    match trace_start {
        Some(i) if i > 0 => {
            lines[i - 1] = format!("<mark>{}</mark>", lines[i - 1]);
        }
        Some(_) => {}
        None if lines.len() > 1 && lines[lines.len() - 2].starts_with("    ") => {
            let last = lines.len() - 1;
            lines[last] = format!("<mark>{}</mark>", lines[last]);
        }
        None => {}
    }
    lines.join("\n")
}

impl Loader<'_> {
    /// Finds (or creates) the instance and container a series belongs to.
    pub(crate) fn resolve_container(
        &mut self,
        labels: &worldview_core::model::Labels,
        pods: &HashMap<(String, String), InstanceIdx>,
    ) -> Option<(InstanceIdx, String)> {
        let container_id = labels.get(super::LABEL_CONTAINER_ID)?;
        if let Some(hit) = self.containers_by_id.get(container_id) {
            return Some(hit.clone());
        }
        let node = self.node_of(labels);
        let path = parse_container_id(container_id)?;
        let (idx, name) = match path {
            ContainerPath::Kubernetes { namespace, pod, container } => {
                let idx = match pods.get(&(namespace.clone(), pod.clone())) {
                    Some(idx) => *idx,
                    None if self.world.integration_status.kube_state_metrics.installed => {
                        debug!("unknown pod: {}/{}", namespace, pod);
                        return None;
                    }
                    None => {
                        let id = ApplicationId::new(
                            &self.cluster_id,
                            &namespace,
                            ApplicationKind::Unknown,
                            &guess_owner_of_pod(&pod),
                        );
                        let app = self.world.get_or_create_application(id, false);
                        self.world.get_or_create_instance(app, &pod, node)
                    }
                };
                (idx, container)
            }
            ContainerPath::Swarm { namespace, service, task } => {
                let id = ApplicationId::new(&self.cluster_id, &namespace, ApplicationKind::DockerSwarmService, &service);
                let app = self.world.get_or_create_application(id, false);
                let name = if task.is_empty() { service.clone() } else { format!("{}.{}", service, task) };
                (self.world.get_or_create_instance(app, &name, node), service)
            }
            ContainerPath::Standalone { name } => {
                let node = node?;
                let id = ApplicationId::new(&self.cluster_id, "", ApplicationKind::Unknown, &name);
                let app = self.world.get_or_create_application(id, false);
                let instance_name = format!("{}@{}", name, self.world.nodes[node].get_name());
                (self.world.get_or_create_instance(app, &instance_name, Some(node)), name)
            }
        };
        if let (Some(n), None) = (node, self.world.instances[idx].node) {
            self.world.instances[idx].node = Some(n);
            self.world.nodes[n].instances.push(idx);
        }
        self.world.instances[idx].container_mut(container_id, &name);
        self.containers_by_id.insert(container_id.clone(), (idx, name.clone()));
        Some((idx, name))
    }

    /// Per-container resources, listens, volumes, application types and log patterns.
    pub fn load_containers(&mut self) {
        const QUERIES: &[&str] = &[
            "container_info",
            "container_application_type",
            "container_net_tcp_listen_info",
            "container_cpu_limit",
            "container_cpu_usage",
            "container_cpu_delay",
            "container_throttled_time",
            "container_memory_rss",
            "container_memory_cache",
            "container_memory_limit",
            "container_oom_kills_total",
            "container_restarts",
            "container_volume_size",
            "container_volume_used",
            "container_log_messages",
        ];
        let pods = self.instances_by_pod();
        for query in QUERIES {
            for m in self.metrics(query) {
                let Some((idx, container)) = self.resolve_container(&m.labels, &pods) else {
                    continue;
                };
                self.load_container_metric(query, idx, &container, m);
            }
        }
    }

    fn load_container_metric(&mut self, query: &str, idx: InstanceIdx, container: &str, m: &MetricValues) {
        let increase = match query {
            "container_oom_kills_total" | "container_restarts" | "container_log_messages" => self.increase(m),
            _ => TimeSeries::default(),
        };
        if query == "container_log_messages" {
            self.collect_logs(idx, m, increase);
            return;
        }
        let instance = &mut self.world.instances[idx];
        match query {
            "container_net_tcp_listen_info" => {
                let addr = m.label("listen_addr");
                let Some((ip, port)) = super::split_host_port(addr) else {
                    warn!("failed to split '{}' into an ip:port pair", addr);
                    return;
                };
                let listen = Listen::new(&ip, &port, !m.label("proxy").is_empty());
                instance.add_listen(listen, m.values.last() == 1.0);
                return;
            }
            "container_volume_size" | "container_volume_used" => {
                let volume = volume_mut(&mut instance.volumes, m.label("mount_point"));
                volume.name.update(&m.values, m.label("volume"));
                volume.device.update(&m.values, m.label("device"));
                let ts = if query == "container_volume_size" {
                    &mut volume.capacity_bytes
                } else {
                    &mut volume.used_bytes
                };
                merge(ts, &m.values, Reducer::Any);
                return;
            }
            _ => {}
        }
        let Some(c) = instance.containers.get_mut(container) else {
            return;
        };
        match query {
            "container_info" => {
                if !m.label("image").is_empty() {
                    c.image = m.label("image").to_string();
                }
            }
            "container_application_type" => {
                let t = m.label("application_type");
                if !t.is_empty() {
                    c.application_types.insert(t.to_string());
                }
            }
            "container_cpu_limit" => merge(&mut c.cpu_limit, &m.values, Reducer::Any),
            "container_cpu_usage" => merge(&mut c.cpu_usage, &m.values, Reducer::Any),
            "container_cpu_delay" => merge(&mut c.cpu_delay, &m.values, Reducer::Any),
            "container_throttled_time" => merge(&mut c.throttled_time, &m.values, Reducer::Any),
            "container_memory_rss" => merge(&mut c.memory_rss, &m.values, Reducer::Any),
            "container_memory_cache" => merge(&mut c.memory_cache, &m.values, Reducer::Any),
            "container_memory_limit" => merge(&mut c.memory_limit, &m.values, Reducer::Any),
            "container_oom_kills_total" => merge(&mut c.oom_kills, &increase, Reducer::Any),
            "container_restarts" => merge(&mut c.restarts, &increase, Reducer::Any),
            _ => {}
        }
    }

    fn collect_logs(&mut self, idx: InstanceIdx, m: &MetricValues, messages: TimeSeries) {
        let level = LogLevel::parse(m.label("level"));
        let sample = m.label("sample");
        let multiline = sample.contains('\n');
        self.container_logs.push(ContainerLogs {
            instance: idx,
            level,
            pattern_hash: m.label("pattern_hash").to_string(),
            sample: if multiline { mark_multiline_message(sample) } else { sample.to_string() },
            multiline,
            messages,
        });
    }

    /// EKS Fargate containers are reported by cAdvisor with pod labels only.
    pub fn load_fargate_containers(&mut self) {
        let pods = self.instances_by_pod();
        for (query, metrics) in self.metrics_with_prefix("fargate_container_") {
            for m in metrics {
                let (ns, pod, name) = (m.label("namespace"), m.label("pod"), m.label("container"));
                if m.label("kubernetes_io_hostname").is_empty() || ns.is_empty() || pod.is_empty() || name.is_empty() {
                    continue;
                }
                let Some(idx) = pods.get(&(ns.to_string(), pod.to_string())).copied() else {
                    continue;
                };
                let increase = if query == "fargate_container_oom_events_total" {
                    self.increase(m)
                } else {
                    TimeSeries::default()
                };
                let id = format!("/k8s/{}/{}/{}", ns, pod, name);
                let c = self.world.instances[idx].container_mut(&id, name);
                match query {
                    "fargate_container_spec_cpu_limit_cores" => merge(&mut c.cpu_limit, &m.values, Reducer::Any),
                    "fargate_container_cpu_usage_seconds" => merge(&mut c.cpu_usage, &m.values, Reducer::Any),
                    "fargate_container_cpu_cfs_throttled_seconds" => {
                        merge(&mut c.throttled_time, &m.values, Reducer::Any)
                    }
                    "fargate_container_memory_rss" => merge(&mut c.memory_rss, &m.values, Reducer::Any),
                    "fargate_container_memory_cache" => merge(&mut c.memory_cache, &m.values, Reducer::Any),
                    "fargate_container_spec_memory_limit_bytes" => merge(&mut c.memory_limit, &m.values, Reducer::Any),
                    "fargate_container_oom_events_total" => merge(&mut c.oom_kills, &increase, Reducer::Any),
                    _ => {}
                }
            }
        }
    }
}

fn volume_mut<'v>(volumes: &'v mut Vec<Volume>, mount_point: &str) -> &'v mut Volume {
    match volumes.iter().position(|v| v.mount_point == mount_point) {
        Some(i) => &mut volumes[i],
        None => {
            volumes.push(Volume {
                mount_point: mount_point.to_string(),
                ..Default::default()
            });
            let last = volumes.len() - 1;
            &mut volumes[last]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv, series};
    use super::super::Loader;
    use super::*;
    use std::collections::BTreeMap;
    use worldview_core::World;
    use worldview_query::QueryResults;

    #[test]
    fn test_parse_container_id() {
        assert_eq!(
            parse_container_id("/k8s/web/api-1/app"),
            Some(ContainerPath::Kubernetes {
                namespace: "web".into(),
                pod: "api-1".into(),
                container: "app".into()
            })
        );
        assert_eq!(
            parse_container_id("/system.slice/postgresql.service"),
            Some(ContainerPath::Standalone { name: "postgresql".into() })
        );
        assert_eq!(
            parse_container_id("/swarm/prod/web/1"),
            Some(ContainerPath::Swarm {
                namespace: "prod".into(),
                service: "web".into(),
                task: "1".into()
            })
        );
        assert_eq!(
            parse_container_id("/docker/nginx"),
            Some(ContainerPath::Standalone { name: "nginx".into() })
        );
        assert_eq!(
            parse_container_id("/containerd/registry"),
            Some(ContainerPath::Standalone { name: "registry".into() })
        );
        assert_eq!(parse_container_id("/"), None);
        assert_eq!(parse_container_id("/system.slice/boot.mount"), None);
        assert_eq!(parse_container_id("/system.slice/.service"), None);
        assert_eq!(parse_container_id("/user.slice/user-1000.slice/session-2.scope"), None);
        assert_eq!(parse_container_id("/kubepods/burstable/pod1/abc"), None);
    }

    #[test]
    fn test_guess_owner_of_pod() {
        assert_eq!(guess_owner_of_pod("api-6f8c7d9b4f-xkqlz"), "api");
        assert_eq!(guess_owner_of_pod("db-0"), "db");
        assert_eq!(guess_owner_of_pod("node-exporter-x7k2p"), "node-exporter");
        assert_eq!(guess_owner_of_pod("standalone"), "standalone");
    }

    #[test]
    fn test_mark_multiline_message() {
        let java = "java.lang.NullPointerException: boom\n\tat com.example.Foo.bar(Foo.java:10)";
        assert!(mark_multiline_message(java).starts_with("<mark>java.lang.NullPointerException: boom</mark>"));
        let python = "Traceback (most recent call last):\n  File \"x.py\", line 1\n    foo()\nNameError: foo";
        assert!(mark_multiline_message(python).ends_with("<mark>NameError: foo</mark>"));
        assert_eq!(mark_multiline_message("a\nb"), "a\nb");
    }

    #[test]
    fn test_restarts_with_counter_reset() {
        let labels = [
            ("container_id", "/system.slice/app.service"),
            ("machine_id", "m1"),
            ("job", "agent"),
            ("instance", "10.0.0.1:80"),
        ];
        let metrics: QueryResults = vec![
            ("node_info".to_string(), vec![mv(&[("machine_id", "m1"), ("hostname", "n1")], constant(1.0))]),
            ("up".to_string(), vec![mv(&[("job", "agent"), ("instance", "10.0.0.1:80")], constant(1.0))]),
            (
                "container_restarts".to_string(),
                vec![mv(&labels, series(&[10.0, 10.0, 10.0, 10.0, 10.0, 0.0, 2.0, 4.0]))],
            ),
            (
                "container_net_tcp_listen_info".to_string(),
                vec![mv(&[labels[0], labels[1], ("listen_addr", "0.0.0.0:8080")], constant(1.0))],
            ),
            (
                "container_volume_used".to_string(),
                vec![mv(&[labels[0], labels[1], ("mount_point", "/data"), ("device", "sda")], constant(5.0))],
            ),
        ]
        .into_iter()
        .collect();
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_job_statuses();
        loader.load_nodes();
        loader.load_containers();
        let w = loader.into_world();

        assert_eq!(w.applications.len(), 1);
        assert_eq!(w.applications[0].id.name, "app");
        let instance = &w.instances[0];
        assert_eq!(instance.name, "app@n1");
        assert_eq!(instance.node, Some(0));
        let restarts = &instance.containers["app"].restarts;
        assert_eq!(&restarts.data()[..5], &[0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(restarts.data()[5].is_nan());
        assert_eq!(&restarts.data()[6..8], &[2.0, 2.0]);
        assert!(instance.is_listen_active("0.0.0.0", "8080"));
        assert_eq!(instance.volumes[0].device.value(), "sda");
    }
}
