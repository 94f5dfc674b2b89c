use super::deployment::ApplicationDeployment;
use super::dns::{DnsStats, TrafficStats};
use super::events::ApplicationEvent;
use super::id::{ApplicationId, ApplicationKind};
use super::logs::{LogLevel, LogMessages};
use super::sli::{AvailabilitySli, LatencySli};
use super::status::Status;
use super::{AppIdx, ConnIdx, InstanceIdx, LinkIdx, ServiceIdx};
use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The conversations between two applications, shared by the client's
/// upstream map and the server's downstream map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppLink {
    #[serde(skip)]
    pub client: AppIdx,
    #[serde(skip)]
    pub server: AppIdx,
    #[serde(skip)]
    pub connections: Vec<ConnIdx>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub id: ApplicationId,
    pub category: String,
    /// Declared through project settings rather than discovered.
    pub custom: bool,
    #[serde(skip)]
    pub removed: bool,

    #[serde(skip)]
    pub instances: Vec<InstanceIdx>,
    #[serde(skip)]
    pub upstreams: BTreeMap<ApplicationId, LinkIdx>,
    #[serde(skip)]
    pub downstreams: BTreeMap<ApplicationId, LinkIdx>,
    /// Every connection whose remote end resolved into this application.
    #[serde(skip)]
    pub downstream_connections: Vec<ConnIdx>,
    #[serde(skip)]
    pub kubernetes_services: Vec<ServiceIdx>,

    pub desired_instances: TimeSeries,

    pub availability_slis: Vec<AvailabilitySli>,
    pub latency_slis: Vec<LatencySli>,

    pub events: Vec<ApplicationEvent>,
    pub deployments: Vec<ApplicationDeployment>,

    pub log_messages: BTreeMap<LogLevel, LogMessages>,
    pub dns: DnsStats,
    pub traffic: TrafficStats,
    pub fqdns: BTreeSet<String>,

    pub status: Status,
}

impl Application {
    pub fn new(id: ApplicationId) -> Self {
        Self {
            id,
            category: String::new(),
            custom: false,
            removed: false,
            instances: Vec::new(),
            upstreams: BTreeMap::new(),
            downstreams: BTreeMap::new(),
            downstream_connections: Vec::new(),
            kubernetes_services: Vec::new(),
            desired_instances: TimeSeries::default(),
            availability_slis: Vec::new(),
            latency_slis: Vec::new(),
            events: Vec::new(),
            deployments: Vec::new(),
            log_messages: BTreeMap::new(),
            dns: DnsStats::default(),
            traffic: TrafficStats::default(),
            fqdns: BTreeSet::new(),
            status: Status::Unknown,
        }
    }

    pub fn is_external(&self) -> bool {
        self.id.kind == ApplicationKind::ExternalService
    }

    pub fn log_messages_mut(&mut self, level: LogLevel) -> &mut LogMessages {
        self.log_messages.entry(level).or_default()
    }
}
