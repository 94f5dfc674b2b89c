use super::id::ApplicationId;
use super::labels::LabelLastValue;
use serde::Serialize;
use std::collections::BTreeSet;

/// A Kubernetes service as seen by `kube_service_info` and friends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub cluster_id: String,
    pub cluster_ip: String,
    pub kind: LabelLastValue,
    pub load_balancer_ips: BTreeSet<String>,
    pub endpoint_ips: BTreeSet<String>,
    /// Ports observed on connections to the cluster IP.
    pub ports: BTreeSet<String>,
    /// Ports the service is published on at every node of its cluster.
    pub node_ports: BTreeSet<String>,
    pub destination_apps: BTreeSet<ApplicationId>,
}

impl Service {
    pub fn new(cluster_id: &str, namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            cluster_id: cluster_id.to_string(),
            ..Default::default()
        }
    }

    /// The only application behind the service, if there is exactly one.
    pub fn unique_destination(&self) -> Option<&ApplicationId> {
        match self.destination_apps.len() {
            1 => self.destination_apps.iter().next(),
            _ => None,
        }
    }
}
