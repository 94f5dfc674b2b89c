//! Typed entities of a world and the arena that holds them.

pub mod application;
pub mod category;
pub mod check_config;
pub mod cloud;
pub mod connection;
pub mod container;
pub mod databases;
pub mod deployment;
pub mod dns;
pub mod events;
pub mod flux;
pub mod id;
pub mod instance;
pub mod labels;
pub mod logs;
pub mod node;
pub mod pod;
pub mod runtimes;
pub mod service;
pub mod sli;
pub mod status;
pub mod volume;
pub mod walk;
pub mod world;

pub type AppIdx = usize;
pub type InstanceIdx = usize;
pub type NodeIdx = usize;
pub type ConnIdx = usize;
pub type LinkIdx = usize;
pub type ServiceIdx = usize;

pub use application::{AppLink, Application};
pub use category::Categories;
pub use check_config::{CheckConfigSimple, CheckConfigSloAvailability, CheckConfigSloLatency, CheckConfigs};
pub use cloud::{Elasticache, Rds};
pub use connection::{Connection, LinkStats};
pub use container::{Container, ContainerStatus};
pub use databases::{Memcached, Mongodb, Mysql, Postgres, Redis};
pub use deployment::{ApplicationDeployment, MetricsSnapshot};
pub use dns::{DnsRequest, DnsStats, TrafficKind, TrafficStats};
pub use events::{ApplicationEvent, ApplicationEventType};
pub use flux::Flux;
pub use id::{ApplicationId, ApplicationKind, NodeId, CLUSTER_ID_EXTERNAL};
pub use instance::{ClusterRole, Instance, Listen};
pub use labels::{LabelLastValue, Labels, MetricValues};
pub use logs::{LogLevel, LogMessages, LogPattern, Pattern};
pub use node::{Node, NodePrice};
pub use pod::Pod;
pub use runtimes::{DotNet, Jvm, NodeJs, Python};
pub use service::Service;
pub use sli::{AvailabilitySli, LatencySli, MAX_ALERT_RULE_WINDOW};
pub use status::Status;
pub use volume::Volume;
pub use world::{IntegrationStatus, World};
