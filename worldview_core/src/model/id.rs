use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const CLUSTER_ID_EXTERNAL: &str = "external";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApplicationKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    CronJob,
    Job,
    ReplicaSet,
    Pod,
    StaticPods,
    Unknown,
    DockerSwarmService,
    ExternalService,
    DatabaseCluster,
    Rds,
    ElasticacheCluster,
    NomadJobGroup,
    Workflow,
    SparkApplication,
    GitRepository,
    OciRepository,
    HelmRepository,
    HelmChart,
    HelmRelease,
    Kustomization,
    ResourceSet,
    Other(String),
}

impl ApplicationKind {
    pub fn as_str(&self) -> &str {
        match self {
            ApplicationKind::Deployment => "Deployment",
            ApplicationKind::StatefulSet => "StatefulSet",
            ApplicationKind::DaemonSet => "DaemonSet",
            ApplicationKind::CronJob => "CronJob",
            ApplicationKind::Job => "Job",
            ApplicationKind::ReplicaSet => "ReplicaSet",
            ApplicationKind::Pod => "Pod",
            ApplicationKind::StaticPods => "StaticPods",
            ApplicationKind::Unknown => "Unknown",
            ApplicationKind::DockerSwarmService => "DockerSwarmService",
            ApplicationKind::ExternalService => "ExternalService",
            ApplicationKind::DatabaseCluster => "DatabaseCluster",
            ApplicationKind::Rds => "RDS",
            ApplicationKind::ElasticacheCluster => "ElasticacheCluster",
            ApplicationKind::NomadJobGroup => "NomadJobGroup",
            ApplicationKind::Workflow => "Workflow",
            ApplicationKind::SparkApplication => "SparkApplication",
            ApplicationKind::GitRepository => "GitRepository",
            ApplicationKind::OciRepository => "OCIRepository",
            ApplicationKind::HelmRepository => "HelmRepository",
            ApplicationKind::HelmChart => "HelmChart",
            ApplicationKind::HelmRelease => "HelmRelease",
            ApplicationKind::Kustomization => "Kustomization",
            ApplicationKind::ResourceSet => "ResourceSet",
            ApplicationKind::Other(s) => s,
        }
    }

    pub fn is_flux(&self) -> bool {
        matches!(
            self,
            ApplicationKind::GitRepository
                | ApplicationKind::OciRepository
                | ApplicationKind::HelmRepository
                | ApplicationKind::HelmChart
                | ApplicationKind::HelmRelease
                | ApplicationKind::Kustomization
                | ApplicationKind::ResourceSet
        )
    }
}

impl From<&str> for ApplicationKind {
    fn from(s: &str) -> Self {
        match s {
            "" | "<none>" | "Pod" => ApplicationKind::Pod,
            "Deployment" => ApplicationKind::Deployment,
            "StatefulSet" => ApplicationKind::StatefulSet,
            "DaemonSet" => ApplicationKind::DaemonSet,
            "CronJob" => ApplicationKind::CronJob,
            "Job" => ApplicationKind::Job,
            "ReplicaSet" => ApplicationKind::ReplicaSet,
            "StaticPods" => ApplicationKind::StaticPods,
            "Unknown" => ApplicationKind::Unknown,
            "DockerSwarmService" => ApplicationKind::DockerSwarmService,
            "ExternalService" => ApplicationKind::ExternalService,
            "DatabaseCluster" => ApplicationKind::DatabaseCluster,
            "RDS" => ApplicationKind::Rds,
            "ElasticacheCluster" => ApplicationKind::ElasticacheCluster,
            "NomadJobGroup" => ApplicationKind::NomadJobGroup,
            "Workflow" => ApplicationKind::Workflow,
            "SparkApplication" => ApplicationKind::SparkApplication,
            "GitRepository" => ApplicationKind::GitRepository,
            "OCIRepository" => ApplicationKind::OciRepository,
            "HelmRepository" => ApplicationKind::HelmRepository,
            "HelmChart" => ApplicationKind::HelmChart,
            "HelmRelease" => ApplicationKind::HelmRelease,
            "Kustomization" => ApplicationKind::Kustomization,
            "ResourceSet" => ApplicationKind::ResourceSet,
            other => ApplicationKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an application: `(cluster, namespace, kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApplicationId {
    pub cluster_id: String,
    pub namespace: String,
    pub kind: ApplicationKind,
    pub name: String,
}

impl ApplicationId {
    /// Canonical constructor.
    ///
    /// A ReplicaSet whose last name segment looks like a pod-template hash
    /// becomes its Deployment; a Job whose last segment is a number becomes
    /// its CronJob (even for plain Jobs that happen to end with digits).
    pub fn new(cluster_id: &str, namespace: &str, kind: ApplicationKind, name: &str) -> Self {
        let mut kind = kind;
        let mut name = name.to_string();
        match kind {
            ApplicationKind::ReplicaSet => {
                if let Some((prefix, suffix)) = name.rsplit_once('-') {
                    if suffix.chars().any(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
                        kind = ApplicationKind::Deployment;
                        name = prefix.to_string();
                    }
                }
            }
            ApplicationKind::Job => {
                if let Some((prefix, suffix)) = name.rsplit_once('-') {
                    if suffix.parse::<u64>().is_ok() {
                        kind = ApplicationKind::CronJob;
                        name = prefix.to_string();
                    }
                }
            }
            _ => {}
        }
        Self {
            cluster_id: or_placeholder(cluster_id),
            namespace: or_placeholder(namespace),
            kind,
            name,
        }
    }

    /// Parses `[cluster:]namespace:kind:name`; a missing cluster is taken from `fallback_cluster_id`.
    pub fn parse(src: &str, fallback_cluster_id: &str) -> Result<Self> {
        let parts: Vec<&str> = src.splitn(4, ':').collect();
        let mut id = match parts.as_slice() {
            [ns, kind, name] => Self::raw("", ns, kind, name),
            [cluster, ns, kind, name] => {
                if *cluster == CLUSTER_ID_EXTERNAL && *ns != CLUSTER_ID_EXTERNAL {
                    Self::raw("", cluster, ns, &format!("{}:{}", kind, name))
                } else {
                    Self::raw(cluster, ns, kind, name)
                }
            }
            _ => return Err(CoreError::InvalidApplicationId(src.to_string())),
        };
        if id.cluster_id.is_empty() {
            id.cluster_id = fallback_cluster_id.to_string();
        }
        if id.kind == ApplicationKind::ExternalService {
            id.cluster_id = CLUSTER_ID_EXTERNAL.to_string();
        }
        Ok(id)
    }

    fn raw(cluster: &str, ns: &str, kind: &str, name: &str) -> Self {
        Self {
            cluster_id: cluster.to_string(),
            namespace: ns.to_string(),
            kind: ApplicationKind::from(kind),
            name: name.to_string(),
        }
    }

    pub fn external(name: &str) -> Self {
        Self {
            cluster_id: CLUSTER_ID_EXTERNAL.to_string(),
            namespace: CLUSTER_ID_EXTERNAL.to_string(),
            kind: ApplicationKind::ExternalService,
            name: name.to_string(),
        }
    }

    pub fn namespace_is_empty(&self) -> bool {
        self.namespace.is_empty() || self.namespace == "_"
    }

    pub fn string_without_cluster_id(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.kind, self.name)
    }
}

fn or_placeholder(s: &str) -> String {
    if s.is_empty() {
        "_".to_string()
    } else {
        s.to_string()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.cluster_id, self.namespace, self.kind, self.name)
    }
}

impl FromStr for ApplicationId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, "")
    }
}

impl Serialize for ApplicationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ApplicationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s, "").map_err(serde::de::Error::custom)
    }
}

/// Stable node key built from the machine id and the system UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub machine_id: String,
    pub system_uuid: String,
}

impl NodeId {
    pub fn new(machine_id: &str, system_uuid: &str) -> Self {
        let machine_id = machine_id.replace('-', "");
        let system_uuid = system_uuid.replace('-', "");
        match (machine_id.is_empty(), system_uuid.is_empty()) {
            (true, false) => Self {
                machine_id: system_uuid.clone(),
                system_uuid,
            },
            (false, true) => Self {
                system_uuid: machine_id.clone(),
                machine_id,
            },
            _ => Self {
                machine_id,
                system_uuid,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.machine_id.is_empty() && self.system_uuid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let id = ApplicationId::parse("1elggi7o:coroot:Deployment:coroot-cluster-agent", "fallback").unwrap();
        assert_eq!(id.cluster_id, "1elggi7o");
        assert_eq!(id.kind, ApplicationKind::Deployment);

        let id = ApplicationId::parse("coroot:Deployment:coroot-cluster-agent", "fallback").unwrap();
        assert_eq!(id.cluster_id, "fallback");
        assert_eq!(id.namespace, "coroot");
        assert_eq!(id.name, "coroot-cluster-agent");
    }

    #[test]
    fn test_parse_external_with_colon_in_name() {
        let expected = ApplicationId::external("external:30001");
        assert_eq!(
            ApplicationId::parse("external:external:ExternalService:external:30001", "fallback").unwrap(),
            expected
        );
        assert_eq!(
            ApplicationId::parse("external:ExternalService:external:30001", "fallback").unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ApplicationId::parse("foo:bar", "").is_err());
    }

    #[test]
    fn test_replicaset_promotion() {
        let id = ApplicationId::new("", "web", ApplicationKind::ReplicaSet, "api-6f8c7d9b4f");
        assert_eq!(id.to_string(), "_:web:Deployment:api");
        let id = ApplicationId::new("", "web", ApplicationKind::ReplicaSet, "standalone");
        assert_eq!(id.kind, ApplicationKind::ReplicaSet);
    }

    #[test]
    fn test_job_promotion_on_any_numeric_suffix() {
        let id = ApplicationId::new("", "", ApplicationKind::Job, "backup-1700000000");
        assert_eq!(id.string_without_cluster_id(), "_:CronJob:backup");
        // plain Jobs ending with digits are promoted as well
        let id = ApplicationId::new("", "ops", ApplicationKind::Job, "migrate-v2-3");
        assert_eq!(id.kind, ApplicationKind::CronJob);
        assert_eq!(id.name, "migrate-v2");
    }

    #[test]
    fn test_empty_kind_is_pod() {
        assert_eq!(ApplicationKind::from("<none>"), ApplicationKind::Pod);
        assert_eq!(ApplicationKind::from(""), ApplicationKind::Pod);
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = ApplicationId::new("c1", "ns", ApplicationKind::StatefulSet, "db");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"c1:ns:StatefulSet:db\"");
        assert_eq!(serde_json::from_str::<ApplicationId>(&json).unwrap(), id);
    }

    #[test]
    fn test_node_id() {
        let id = NodeId::new("", "ec2a-1b2c");
        assert_eq!(id.machine_id, "ec2a1b2c");
        assert_eq!(id.system_uuid, "ec2a1b2c");
        assert!(NodeId::new("", "").is_empty());
    }
}
