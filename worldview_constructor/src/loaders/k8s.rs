use super::Loader;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use tracing::warn;
use worldview_core::model::{ContainerStatus, InstanceIdx, Listen, Pod, Service};
use worldview_core::timeseries::merge;
use worldview_core::{ApplicationId, ApplicationKind, MetricValues, Reducer};

impl Loader<'_> {
    /// Pods, their owners and statuses, services and desired replica counts.
    pub fn load_k8s(&mut self) {
        self.load_pods();
        self.load_pod_labels();
        self.load_services();
        for (query, metrics) in self.metrics_with_prefix("kube_pod_") {
            if query.starts_with("kube_pod_status_") {
                for m in metrics {
                    self.load_pod_status(query, m);
                }
            } else if query.starts_with("kube_pod_container_") || query.starts_with("kube_pod_init_container_") {
                for m in metrics {
                    self.load_pod_container(query, m);
                }
            }
        }
        self.load_desired_instances();
    }

    fn load_pods(&mut self) {
        let mut owners: HashMap<(String, String), ApplicationId> = HashMap::new();
        let mut owned_by_pods = Vec::new();
        for m in self.metrics("kube_pod_info") {
            self.world.integration_status.kube_state_metrics.installed = true;
            let uid = m.label("uid");
            if uid.is_empty() {
                warn!("invalid 'kube_pod_info' metric: 'uid' label is empty");
                continue;
            }
            let (pod, ns, node_name) = (m.label("pod"), m.label("namespace"), m.label("node"));
            let owner_kind = m.label("created_by_kind");
            let owner_name = m.label("created_by_name");
            let app_id = match owner_kind {
                "" | "<none>" | "Node" => {
                    let name = pod.strip_suffix(&format!("-{}", node_name)).unwrap_or(pod);
                    ApplicationId::new(&self.cluster_id, ns, ApplicationKind::StaticPods, name)
                }
                "SparkApplication" | "Workflow" => ApplicationId::new(
                    &self.cluster_id,
                    ns,
                    ApplicationKind::from(owner_kind),
                    strip_job_suffix(owner_name),
                ),
                _ if !owner_name.is_empty() => {
                    ApplicationId::new(&self.cluster_id, ns, ApplicationKind::from(owner_kind), owner_name)
                }
                _ => continue,
            };
            owners.insert((ns.to_string(), pod.to_string()), app_id.clone());

            let node = self.world.node_by_name(node_name);
            let idx = match self.pods_by_uid.get(uid) {
                Some(idx) => *idx,
                None => {
                    let app = self.world.get_or_create_application(app_id.clone(), false);
                    if app_id.kind == ApplicationKind::CronJob {
                        continue;
                    }
                    let idx = self.world.get_or_create_instance(app, pod, node);
                    let instance = &mut self.world.instances[idx];
                    let p = instance.pod.get_or_insert_with(Pod::default);
                    if owner_kind == "ReplicaSet" {
                        p.replica_set = owner_name.to_string();
                    }
                    self.pods_by_uid.insert(uid.to_string(), idx);
                    idx
                }
            };
            if let (Some(n), None) = (node, self.world.instances[idx].node) {
                self.world.instances[idx].node = Some(n);
                self.world.nodes[n].instances.push(idx);
            }

            let (pod_ip, host_ip) = (m.label("pod_ip"), m.label("host_ip"));
            let fargate = node.is_some_and(|n| self.world.nodes[n].fargate);
            if !pod_ip.is_empty() && (pod_ip != host_ip || fargate) && pod_ip.parse::<IpAddr>().is_ok() {
                let instance = &mut self.world.instances[idx];
                instance.add_listen(Listen::new(pod_ip, "0", false), m.values.last() == 1.0);
                if let Some(p) = instance.pod.as_mut() {
                    p.ip = pod_ip.to_string();
                    p.host_ip = host_ip.to_string();
                }
            }
            if app_id.kind == ApplicationKind::Pod {
                owned_by_pods.push(idx);
            }
        }

        for idx in owned_by_pods {
            let owner = self.world.owner_of(idx);
            let key = (owner.id.namespace.clone(), owner.id.name.clone());
            let Some(owner_of_owner) = owners.get(&key) else {
                continue;
            };
            let Some(to) = self.world.app_idx(owner_of_owner) else {
                continue;
            };
            let from = self.world.instances[idx].owner;
            self.world.reassign_instance(idx, to);
            if self.world.applications[from].instances.is_empty() {
                self.world.applications[from].removed = true;
            }
        }
    }

    /// Database operators label their pods with the cluster they belong to
    /// and, for some, the role within it.
    fn load_pod_labels(&mut self) {
        for m in self.metrics("kube_pod_labels") {
            let Some(idx) = self.pod_by_uid(m) else {
                continue;
            };
            let Some((cluster, role)) = db_cluster_from_pod_labels(m) else {
                continue;
            };
            let instance = &mut self.world.instances[idx];
            instance.cluster_name.update(&m.values, &cluster);
            let role = if role == "master" { "primary" } else { role.as_str() };
            instance.update_cluster_role(role, &m.values);
        }
    }

    fn load_services(&mut self) {
        let mut services: BTreeMap<(String, String), Service> = BTreeMap::new();
        for m in self.metrics("kube_service_info") {
            let (name, ns) = (m.label("service"), m.label("namespace"));
            let mut s = Service::new(&self.cluster_id, ns, name);
            s.cluster_ip = m.label("cluster_ip").to_string();
            services.insert((ns.to_string(), name.to_string()), s);
        }
        let key = |m: &MetricValues, label: &str| (m.label("namespace").to_string(), m.label(label).to_string());
        for m in self.metrics("kube_service_spec_type") {
            if let Some(s) = services.get_mut(&key(m, "service")) {
                s.kind.update(&m.values, m.label("type"));
            }
        }
        for m in self.metrics("kube_service_spec_port") {
            if let Some(s) = services.get_mut(&key(m, "service")) {
                if !m.label("port").is_empty() {
                    s.ports.insert(m.label("port").to_string());
                }
                match m.label("node_port") {
                    "" | "0" => {}
                    np => {
                        s.node_ports.insert(np.to_string());
                    }
                }
            }
        }
        for m in self.metrics("kube_service_status_load_balancer_ingress") {
            if let Some(s) = services.get_mut(&key(m, "service")) {
                if !m.label("ip").is_empty() {
                    s.load_balancer_ips.insert(m.label("ip").to_string());
                }
            }
        }
        for m in self.metrics("kube_endpoint_address") {
            if let Some(s) = services.get_mut(&key(m, "endpoint")) {
                if !m.label("ip").is_empty() {
                    s.endpoint_ips.insert(m.label("ip").to_string());
                }
                if !m.label("port").is_empty() {
                    s.ports.insert(m.label("port").to_string());
                }
            }
        }

        let mut apps_by_pod_ip = HashMap::new();
        for idx in self.pods_by_uid.values() {
            let instance = &self.world.instances[*idx];
            if let Some(p) = instance.pod.as_ref().filter(|p| !p.ip.is_empty()) {
                apps_by_pod_ip.insert(p.ip.clone(), instance.owner);
            }
        }
        for (_, mut s) in services {
            if s.name == "kubernetes" {
                s.name = "kube-apiserver".to_string();
            }
            let destinations: Vec<usize> = s.endpoint_ips.iter().filter_map(|ip| apps_by_pod_ip.get(ip).copied()).collect();
            for app in &destinations {
                s.destination_apps.insert(self.world.applications[*app].id.clone());
            }
            let cluster_ip = s.cluster_ip.clone();
            let idx = self.world.add_service(s);
            if !cluster_ip.is_empty() && cluster_ip != "None" {
                self.services_by_cluster_ip.insert(cluster_ip, idx);
            }
            for app in destinations {
                let services = &mut self.world.applications[app].kubernetes_services;
                if !services.contains(&idx) {
                    services.push(idx);
                }
            }
        }
    }

    fn load_pod_status(&mut self, query: &str, m: &MetricValues) {
        let Some(idx) = self.pod_by_uid(m) else {
            return;
        };
        let Some(pod) = self.world.instances[idx].pod.as_mut() else {
            return;
        };
        match query {
            "kube_pod_status_phase" => {
                merge(&mut pod.life_span, &m.values, Reducer::NanSum);
                if m.values.last() > 0.0 {
                    pod.phase = m.label("phase").to_string();
                    pod.reason = m.label("reason").to_string();
                }
                if m.label("phase") == "Running" {
                    merge(&mut pod.running, &m.values, Reducer::Any);
                }
            }
            "kube_pod_status_ready" => {
                if m.label("condition") == "true" {
                    merge(&mut pod.ready, &m.values, Reducer::Any);
                }
            }
            "kube_pod_status_scheduled" => {
                if m.values.last() > 0.0 && m.label("condition") == "true" {
                    pod.scheduled = true;
                }
            }
            _ => {}
        }
    }

    fn load_pod_container(&mut self, query: &str, m: &MetricValues) {
        let Some(idx) = self.pod_by_uid(m) else {
            return;
        };
        let name = m.label("container");
        let id = format!("/k8s/{}/{}/{}", m.label("namespace"), m.label("pod"), name);
        let instance = &mut self.world.instances[idx];
        if query == "kube_pod_init_container_info" {
            if let Some(p) = instance.pod.as_mut() {
                p.init_containers.insert(name.to_string());
            }
        }
        let c = instance.container_mut(&id, name);
        let active = m.values.last() > 0.0;
        match query {
            "kube_pod_init_container_info" => c.init = true,
            "kube_pod_container_resource_requests" => match m.label("resource") {
                "cpu" => merge(&mut c.cpu_request, &m.values, Reducer::Max),
                "memory" => merge(&mut c.memory_request, &m.values, Reducer::Max),
                _ => {}
            },
            "kube_pod_container_status_ready" => c.ready = active,
            "kube_pod_container_status_waiting" if active => c.status = ContainerStatus::Waiting,
            "kube_pod_container_status_running" if active => {
                c.status = ContainerStatus::Running;
                c.reason.clear();
            }
            "kube_pod_container_status_terminated" if active => c.status = ContainerStatus::Terminated,
            "kube_pod_container_status_waiting_reason" if active => {
                c.status = ContainerStatus::Waiting;
                c.reason = m.label("reason").to_string();
            }
            "kube_pod_container_status_terminated_reason" if active => {
                c.status = ContainerStatus::Terminated;
                c.reason = m.label("reason").to_string();
            }
            "kube_pod_container_status_last_terminated_reason" if active => {
                c.last_terminated_reason = m.label("reason").to_string();
            }
            _ => {}
        }
    }

    fn load_desired_instances(&mut self) {
        let sources = [
            ("kube_deployment_spec_replicas", ApplicationKind::Deployment, "deployment"),
            ("kube_statefulset_replicas", ApplicationKind::StatefulSet, "statefulset"),
            ("kube_daemonset_status_desired_number_scheduled", ApplicationKind::DaemonSet, "daemonset"),
        ];
        for (query, kind, label) in sources {
            for m in self.metrics(query) {
                let id = ApplicationId::new(&self.cluster_id, m.label("namespace"), kind.clone(), m.label(label));
                let Some(app) = self.world.app_idx(&id) else {
                    continue;
                };
                merge(&mut self.world.applications[app].desired_instances, &m.values, Reducer::Any);
            }
        }
    }

    fn pod_by_uid(&self, m: &MetricValues) -> Option<InstanceIdx> {
        let uid = m.label("uid");
        if uid.is_empty() {
            return None;
        }
        self.pods_by_uid.get(uid).copied()
    }
}

/// Drops the generated suffix of a job name: five lowercase alphanumerics
/// or a timestamp of ten or more digits.
fn strip_job_suffix(name: &str) -> &str {
    let Some((prefix, suffix)) = name.rsplit_once('-') else {
        return name;
    };
    let random = suffix.len() == 5 && suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let timestamp = suffix.len() >= 10 && suffix.chars().all(|c| c.is_ascii_digit());
    if random || timestamp {
        prefix
    } else {
        name
    }
}

fn db_cluster_from_pod_labels(m: &MetricValues) -> Option<(String, String)> {
    let l = |name: &str| m.label(name);
    let instance_name = || {
        let (name, instance) = (l("label_app_kubernetes_io_name"), l("label_app_kubernetes_io_instance"));
        if name.is_empty() || instance.is_empty() {
            String::new()
        } else {
            format!("{}-{}", instance, name)
        }
    };
    let chart = l("label_helm_sh_chart");
    let (cluster, role) = if !l("label_postgres_operator_crunchydata_com_cluster").is_empty() {
        (
            l("label_postgres_operator_crunchydata_com_cluster").to_string(),
            l("label_postgres_operator_crunchydata_com_role"),
        )
    } else if !l("label_cluster_name").is_empty() && !l("label_team").is_empty() {
        // zalando: poolers run next to spilo pods and carry no role
        let role = if l("label_application") == "spilo" { l("label_spilo_role") } else { "" };
        (l("label_cluster_name").to_string(), role)
    } else if !l("label_k8s_enterprisedb_io_cluster").is_empty() {
        (l("label_k8s_enterprisedb_io_cluster").to_string(), l("label_role"))
    } else if !l("label_cnpg_io_cluster").is_empty() {
        (l("label_cnpg_io_cluster").to_string(), l("label_role"))
    } else if !l("label_stackgres_io_cluster_name").is_empty() {
        (l("label_stackgres_io_cluster_name").to_string(), l("label_role"))
    } else if l("label_app_kubernetes_io_managed_by") == "percona-server-mongodb-operator" {
        (l("label_app_kubernetes_io_instance").to_string(), "")
    } else if ["mongodb", "redis", "valkey", "mysql", "mariadb", "clickhouse"]
        .iter()
        .any(|p| chart.starts_with(p))
    {
        (instance_name(), "")
    } else if l("label_app_kubernetes_io_managed_by") == "coroot-operator"
        && l("label_app_kubernetes_io_component") == "clickhouse"
    {
        (format!("{}-clickhouse", l("label_app_kubernetes_io_part_of")), "")
    } else {
        return None;
    };
    Some((cluster, role.to_string()))
}
