use super::cloud::{Elasticache, Rds};
use super::container::Container;
use super::databases::{Memcached, Mongodb, Mysql, Postgres, Redis};
use super::labels::LabelLastValue;
use super::pod::Pod;
use super::runtimes::{DotNet, Jvm, NodeJs, Python};
use super::volume::Volume;
use super::{AppIdx, ConnIdx, NodeIdx};
use crate::timeseries::{merge, Reducer, TimeSeries, NAN};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Listen {
    pub ip: String,
    pub port: String,
    pub proxied: bool,
}

impl Listen {
    pub fn new(ip: &str, port: &str, proxied: bool) -> Self {
        Self {
            ip: ip.to_string(),
            port: port.to_string(),
            proxied,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    None = 0,
    Primary = 1,
    Replica = 2,
}

impl ClusterRole {
    pub fn from_value(v: f32) -> Self {
        match v as i32 {
            1 => ClusterRole::Primary,
            2 => ClusterRole::Replica,
            _ => ClusterRole::None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Instance {
    pub name: String,
    #[serde(skip)]
    pub owner: AppIdx,
    #[serde(skip)]
    pub node: Option<NodeIdx>,
    pub pod: Option<Pod>,
    pub volumes: Vec<Volume>,
    #[serde(skip)]
    pub upstreams: Vec<ConnIdx>,
    /// listen -> active
    pub tcp_listens: BTreeMap<Listen, bool>,
    pub containers: BTreeMap<String, Container>,

    pub cluster_name: LabelLastValue,
    cluster_role: TimeSeries,

    pub postgres: Option<Postgres>,
    pub redis: Option<Redis>,
    pub mongodb: Option<Mongodb>,
    pub mysql: Option<Mysql>,
    pub memcached: Option<Memcached>,
    pub rds: Option<Rds>,
    pub elasticache: Option<Elasticache>,
    pub jvms: BTreeMap<String, Jvm>,
    pub dotnet: BTreeMap<String, DotNet>,
    pub python: Option<Python>,
    pub nodejs: Option<NodeJs>,
}

impl Instance {
    pub fn new(name: &str, owner: AppIdx) -> Self {
        Self {
            name: name.to_string(),
            owner,
            ..Default::default()
        }
    }

    pub fn is_obsolete(&self) -> bool {
        self.pod.as_ref().map(|p| p.is_obsolete()).unwrap_or(false)
    }

    pub fn container_mut(&mut self, id: &str, name: &str) -> &mut Container {
        self.containers
            .entry(name.to_string())
            .or_insert_with(|| Container::new(id, name))
    }

    pub fn add_listen(&mut self, listen: Listen, active: bool) {
        let entry = self.tcp_listens.entry(listen).or_insert(false);
        *entry = *entry || active;
    }

    pub fn is_listen_active(&self, ip: &str, port: &str) -> bool {
        self.tcp_listens
            .iter()
            .any(|(l, active)| *active && l.ip == ip && l.port == port)
    }

    pub fn application_types(&self) -> impl Iterator<Item = &String> {
        self.containers.values().flat_map(|c| c.application_types.iter())
    }

    /// Records a role series (`role` label value with 1 while it holds).
    pub fn update_cluster_role(&mut self, role: &str, series: &TimeSeries) {
        let role = match role {
            "primary" | "master" => ClusterRole::Primary,
            "replica" | "secondary" | "slave" => ClusterRole::Replica,
            _ => return,
        };
        let value = role as i32 as f32;
        let mapped = series.map(|_, v| if v == 1.0 { value } else { NAN });
        merge(&mut self.cluster_role, &mapped, Reducer::Any);
    }

    /// Role over time, masked by pod readiness when the pod is known.
    pub fn cluster_role(&self) -> TimeSeries {
        let ready = match &self.pod {
            Some(pod) if !pod.ready.is_empty() => &pod.ready,
            _ => return self.cluster_role.clone(),
        };
        let mask = ready.map(|_, v| if v > 0.0 { 1.0 } else { NAN });
        TimeSeries::mul(&self.cluster_role, &mask).unwrap_or_else(|_| self.cluster_role.clone())
    }

    pub fn cluster_role_last(&self) -> ClusterRole {
        ClusterRole::from_value(self.cluster_role().last())
    }

    /// Up and running according to the pod (if any) and the containers.
    pub fn is_up(&self) -> bool {
        if let Some(pod) = &self.pod {
            return pod.is_running() && pod.is_ready();
        }
        if let Some(rds) = &self.rds {
            return rds.is_available();
        }
        if let Some(pg) = &self.postgres {
            return pg.up.last() > 0.0;
        }
        if let Some(redis) = &self.redis {
            return redis.up.last() > 0.0;
        }
        self.containers
            .values()
            .any(|c| !c.cpu_usage.tail_is_empty() || !c.memory_rss.tail_is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::{Duration, Time};

    fn ts(v: &[f32]) -> TimeSeries {
        TimeSeries::from_data(Time(0), Duration(30), v.to_vec())
    }

    #[test]
    fn test_cluster_role_is_masked_by_readiness() {
        let mut i = Instance::new("pg-0", 0);
        i.update_cluster_role("primary", &ts(&[1.0, 1.0, 0.0]));
        i.update_cluster_role("replica", &ts(&[0.0, 0.0, 1.0]));
        assert_eq!(i.cluster_role(), ts(&[1.0, 1.0, 2.0]));

        i.pod = Some(Pod {
            phase: "Running".into(),
            ready: ts(&[1.0, 0.0, 1.0]),
            ..Default::default()
        });
        assert_eq!(i.cluster_role(), ts(&[1.0, NAN, 2.0]));
        assert_eq!(i.cluster_role_last(), ClusterRole::Replica);
    }

    #[test]
    fn test_listens() {
        let mut i = Instance::new("a", 0);
        i.add_listen(Listen::new("10.0.0.1", "80", false), true);
        i.add_listen(Listen::new("10.0.0.1", "80", false), false);
        assert!(i.is_listen_active("10.0.0.1", "80"));
        assert!(!i.is_listen_active("10.0.0.1", "81"));
    }

    #[test]
    fn test_obsolete() {
        let mut i = Instance::new("a", 0);
        assert!(!i.is_obsolete());
        i.pod = Some(Pod::default());
        assert!(i.is_obsolete());
    }
}
