use super::application::{AppLink, Application};
use super::category::{Categories, CATEGORY_CONTROL_PLANE};
use super::check_config::CheckConfigs;
use super::connection::{Connection, LinkStats};
use super::flux::Flux;
use super::id::ApplicationId;
use super::instance::Instance;
use super::node::Node;
use super::service::Service;
use super::{AppIdx, ConnIdx, InstanceIdx, LinkIdx, NodeIdx, ServiceIdx};
use crate::timeseries::Context;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Integration {
    pub installed: bool,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrationStatus {
    pub node_agent: Integration,
    pub kube_state_metrics: Integration,
}

/// Snapshot of one project over `ctx`.
///
/// Entities live in flat arenas and refer to each other by index. Nothing
/// mutates a `World` once the constructor has returned it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct World {
    pub ctx: Context,
    #[serde(skip)]
    pub check_configs: CheckConfigs,

    pub nodes: Vec<Node>,
    pub applications: Vec<Application>,
    pub instances: Vec<Instance>,
    pub connections: Vec<Connection>,
    #[serde(skip)]
    pub links: Vec<AppLink>,
    /// (client, server) -> totals from the connection recording rules.
    /// `rebuild_links` links every pair whose applications both exist.
    #[serde(skip)]
    pub link_stats: BTreeMap<(ApplicationId, ApplicationId), LinkStats>,
    pub services: Vec<Service>,

    pub flux: Flux,
    pub integration_status: IntegrationStatus,
    pub aws_discovery_errors: BTreeSet<String>,
    /// cluster id -> display name
    pub cluster_names: BTreeMap<String, String>,

    #[serde(skip)]
    app_index: HashMap<ApplicationId, AppIdx>,
}

impl World {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            ..Default::default()
        }
    }

    pub fn app_idx(&self, id: &ApplicationId) -> Option<AppIdx> {
        self.app_index.get(id).copied()
    }

    pub fn application(&self, id: &ApplicationId) -> Option<&Application> {
        self.app_idx(id).map(|i| &self.applications[i])
    }

    pub fn get_or_create_application(&mut self, id: ApplicationId, custom: bool) -> AppIdx {
        if let Some(idx) = self.app_idx(&id) {
            return idx;
        }
        let idx = self.applications.len();
        self.app_index.insert(id.clone(), idx);
        let mut app = Application::new(id);
        app.custom = custom;
        self.applications.push(app);
        idx
    }

    pub fn instance_by_name(&self, app: AppIdx, name: &str) -> Option<InstanceIdx> {
        self.applications[app]
            .instances
            .iter()
            .copied()
            .find(|i| self.instances[*i].name == name)
    }

    /// Finds or creates the named instance of `app`, binding it to `node` if it has none yet.
    pub fn get_or_create_instance(&mut self, app: AppIdx, name: &str, node: Option<NodeIdx>) -> InstanceIdx {
        let idx = match self.instance_by_name(app, name) {
            Some(idx) => idx,
            None => {
                let idx = self.instances.len();
                self.instances.push(Instance::new(name, app));
                self.applications[app].instances.push(idx);
                idx
            }
        };
        if let Some(node) = node {
            if self.instances[idx].node.is_none() {
                self.instances[idx].node = Some(node);
                self.nodes[node].instances.push(idx);
            }
        }
        idx
    }

    /// Moves an instance to another application.
    pub fn reassign_instance(&mut self, instance: InstanceIdx, to: AppIdx) {
        let from = self.instances[instance].owner;
        if from == to {
            return;
        }
        self.applications[from].instances.retain(|i| *i != instance);
        self.applications[to].instances.push(instance);
        self.instances[instance].owner = to;
    }

    pub fn add_node(&mut self, node: Node) -> NodeIdx {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeIdx> {
        if name.is_empty() {
            return None;
        }
        self.nodes
            .iter()
            .position(|n| n.name.value() == name || n.k8s_name.value() == name)
    }

    pub fn add_connection(&mut self, connection: Connection) -> ConnIdx {
        let idx = self.connections.len();
        self.instances[connection.instance].upstreams.push(idx);
        self.connections.push(connection);
        idx
    }

    pub fn add_service(&mut self, service: Service) -> ServiceIdx {
        self.services.push(service);
        self.services.len() - 1
    }

    pub fn owner_of(&self, instance: InstanceIdx) -> &Application {
        &self.applications[self.instances[instance].owner]
    }

    pub fn app_instances(&self, app: AppIdx) -> impl Iterator<Item = &Instance> {
        self.applications[app].instances.iter().map(|i| &self.instances[*i])
    }

    /// Outgoing connections of every instance of `app`.
    pub fn upstream_connections(&self, app: AppIdx) -> impl Iterator<Item = &Connection> {
        self.app_instances(app)
            .flat_map(|i| i.upstreams.iter())
            .map(|c| &self.connections[*c])
    }

    /// Incoming connections resolved to `app`.
    pub fn downstream_connections(&self, app: AppIdx) -> impl Iterator<Item = &Connection> {
        self.applications[app]
            .downstream_connections
            .iter()
            .map(|c| &self.connections[*c])
    }

    /// Application a connection points to, directly or through its remote instance.
    pub fn remote_app_of(&self, connection: &Connection) -> Option<AppIdx> {
        connection
            .remote_application
            .or_else(|| connection.remote_instance.map(|i| self.instances[i].owner))
    }

    /// Recomputes the application graph from the connection arena.
    pub fn rebuild_links(&mut self) {
        self.links.clear();
        for app in &mut self.applications {
            app.upstreams.clear();
            app.downstreams.clear();
            app.downstream_connections.clear();
        }
        for idx in 0..self.connections.len() {
            let client = self.instances[self.connections[idx].instance].owner;
            let Some(server) = self.remote_app_of(&self.connections[idx]) else {
                continue;
            };
            self.applications[server].downstream_connections.push(idx);
            let link = self.link(client, server);
            self.links[link].connections.push(idx);
        }
        let pairs: Vec<(AppIdx, AppIdx)> = self
            .link_stats
            .keys()
            .filter_map(|(client, server)| Some((self.app_idx(client)?, self.app_idx(server)?)))
            .collect();
        for (client, server) in pairs {
            self.link(client, server);
        }
    }

    fn link(&mut self, client: AppIdx, server: AppIdx) -> LinkIdx {
        let server_id = self.applications[server].id.clone();
        if let Some(link) = self.applications[client].upstreams.get(&server_id) {
            return *link;
        }
        let link: LinkIdx = self.links.len();
        self.links.push(AppLink {
            client,
            server,
            connections: Vec::new(),
        });
        let client_id = self.applications[client].id.clone();
        self.applications[client].upstreams.insert(server_id, link);
        self.applications[server].downstreams.insert(client_id, link);
        link
    }

    /// Recording rule totals of a link, if any were read back.
    pub fn link_stats_of(&self, link: LinkIdx) -> Option<&LinkStats> {
        let l = &self.links[link];
        let key = (self.applications[l.client].id.clone(), self.applications[l.server].id.clone());
        self.link_stats.get(&key)
    }

    /// Drops applications marked `removed` together with their instances and
    /// those instances' connections, then re-indexes everything.
    pub fn compact(&mut self) {
        if !self.applications.iter().any(|a| a.removed) {
            return;
        }
        let app_map = remap(self.applications.iter().map(|a| !a.removed));
        let inst_map = remap(self.instances.iter().map(|i| app_map[i.owner].is_some()));
        let conn_map = remap(self.connections.iter().map(|c| inst_map[c.instance].is_some()));

        retain_by(&mut self.applications, &app_map);
        retain_by(&mut self.instances, &inst_map);
        retain_by(&mut self.connections, &conn_map);

        for app in &mut self.applications {
            app.instances = app.instances.iter().filter_map(|i| inst_map[*i]).collect();
        }
        for instance in &mut self.instances {
            if let Some(owner) = app_map[instance.owner] {
                instance.owner = owner;
            }
            instance.upstreams = instance.upstreams.iter().filter_map(|c| conn_map[*c]).collect();
        }
        for c in &mut self.connections {
            if let Some(i) = inst_map[c.instance] {
                c.instance = i;
            }
            c.remote_instance = c.remote_instance.and_then(|i| inst_map[i]);
            c.remote_application = c.remote_application.and_then(|a| app_map[a]);
        }
        for node in &mut self.nodes {
            node.instances = node.instances.iter().filter_map(|i| inst_map[*i]).collect();
        }
        self.app_index = self
            .applications
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();
        self.rebuild_links();
    }

    /// Moves every entity of `other` into this world, shifting its indices
    /// past the existing arenas. Applications present in both (external
    /// services seen from several clusters) are joined: the instances of the
    /// incoming copy move to the existing one. Links must be rebuilt after.
    pub fn append(&mut self, other: World) {
        let node_base = self.nodes.len();
        let inst_base = self.instances.len();
        let conn_base = self.connections.len();
        let svc_base = self.services.len();

        let mut app_map = Vec::with_capacity(other.applications.len());
        for mut app in other.applications {
            app.instances.iter_mut().for_each(|i| *i += inst_base);
            app.kubernetes_services.iter_mut().for_each(|s| *s += svc_base);
            app.upstreams.clear();
            app.downstreams.clear();
            app.downstream_connections.clear();
            match self.app_idx(&app.id) {
                Some(existing) => {
                    let target = &mut self.applications[existing];
                    target.instances.extend(app.instances);
                    target.kubernetes_services.extend(app.kubernetes_services);
                    target.fqdns.extend(app.fqdns);
                    app_map.push(existing);
                }
                None => {
                    let idx = self.applications.len();
                    self.app_index.insert(app.id.clone(), idx);
                    self.applications.push(app);
                    app_map.push(idx);
                }
            }
        }

        for mut node in other.nodes {
            node.instances.iter_mut().for_each(|i| *i += inst_base);
            self.nodes.push(node);
        }
        for mut instance in other.instances {
            instance.owner = app_map[instance.owner];
            instance.node = instance.node.map(|n| n + node_base);
            instance.upstreams.iter_mut().for_each(|c| *c += conn_base);
            self.instances.push(instance);
        }
        for mut c in other.connections {
            c.instance += inst_base;
            c.remote_instance = c.remote_instance.map(|i| i + inst_base);
            c.remote_application = c.remote_application.map(|a| app_map[a]);
            c.service = c.service.map(|s| s + svc_base);
            self.connections.push(c);
        }
        self.services.extend(other.services);
        self.link_stats.extend(other.link_stats);

        self.flux.merge(other.flux);
        self.aws_discovery_errors.extend(other.aws_discovery_errors);
        self.cluster_names.extend(other.cluster_names);
        let (a, b) = (&mut self.integration_status, other.integration_status);
        a.node_agent.installed |= b.node_agent.installed;
        a.node_agent.required |= b.node_agent.required;
        a.kube_state_metrics.installed |= b.kube_state_metrics.installed;
        a.kube_state_metrics.required |= b.kube_state_metrics.required;
    }

    /// Assigns a category to every application.
    pub fn categorize(&mut self, categories: &Categories) {
        let mut result = Vec::with_capacity(self.applications.len());
        for (idx, app) in self.applications.iter().enumerate() {
            let category = match categories.matching(&app.id) {
                Some(c) => c.to_string(),
                None if self.is_control_plane_by_types(idx) => CATEGORY_CONTROL_PLANE.to_string(),
                None => categories.categorize(&app.id),
            };
            result.push(category);
        }
        for (app, category) in self.applications.iter_mut().zip(result) {
            app.category = category;
        }
    }

    fn is_control_plane_by_types(&self, app: AppIdx) -> bool {
        for instance in self.app_instances(app) {
            if instance.application_types().any(|t| t == "k3s") {
                return true;
            }
            if instance.application_types().any(|t| t == "etcd") {
                let served_apiserver = self.downstream_connections(app).any(|c| {
                    self.instances[c.instance]
                        .application_types()
                        .any(|t| t == "kube-apiserver")
                });
                if served_apiserver {
                    return true;
                }
            }
        }
        false
    }

    pub fn cluster_name<'a>(&'a self, cluster_id: &'a str) -> &'a str {
        self.cluster_names
            .get(cluster_id)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(cluster_id)
    }

    /// Both sides of every link agree and every downstream connection
    /// resolves to its application.
    pub fn links_are_consistent(&self) -> bool {
        self.applications.iter().enumerate().all(|(idx, app)| {
            let ups = app.upstreams.iter().all(|(dest, link)| {
                let l = &self.links[*link];
                l.client == idx
                    && self.applications[l.server].id == *dest
                    && self.applications[l.server].downstreams.get(&app.id) == Some(link)
            });
            let downs = app
                .downstream_connections
                .iter()
                .all(|c| self.remote_app_of(&self.connections[*c]) == Some(idx));
            ups && downs
        })
    }
}

fn remap(keep: impl Iterator<Item = bool>) -> Vec<Option<usize>> {
    let mut next = 0;
    keep.map(|k| {
        k.then(|| {
            next += 1;
            next - 1
        })
    })
    .collect()
}

fn retain_by<T>(items: &mut Vec<T>, map: &[Option<usize>]) {
    let mut i = 0;
    items.retain(|_| {
        i += 1;
        map[i - 1].is_some()
    });
}
