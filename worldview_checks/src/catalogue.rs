//! The checks every application is audited against.
//!
//! Messages are tera templates rendered with `items` (the number of
//! offending items), `count`, `value` (formatted by the check's unit) and
//! `threshold`.

use crate::error::{ChecksError, Result};
use serde::Serialize;
use std::time::Duration as StdDuration;
use tera::Tera;
use worldview_core::model::check_config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// Fires when the number of events exceeds the threshold.
    EventBased,
    /// Fires when at least one item is reported.
    ItemBased,
    /// Fires when the value exceeds the threshold.
    ValueBased,
    /// Status is set by the auditor.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    None,
    Percent,
    Second,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckSpec {
    pub id: &'static str,
    pub check_type: CheckType,
    pub title: &'static str,
    pub default_threshold: f32,
    pub unit: Unit,
    pub message_template: &'static str,
    /// Human form of the firing condition; `<threshold>` is substituted.
    pub condition_format_template: &'static str,
}

const fn spec(
    id: &'static str,
    check_type: CheckType,
    title: &'static str,
    default_threshold: f32,
    unit: Unit,
    message_template: &'static str,
    condition_format_template: &'static str,
) -> CheckSpec {
    CheckSpec {
        id,
        check_type,
        title,
        default_threshold,
        unit,
        message_template,
        condition_format_template,
    }
}

use CheckType::*;

pub static SLO_AVAILABILITY: CheckSpec = spec(
    check_config::SLO_AVAILABILITY,
    Manual,
    "Availability",
    99.0,
    Unit::Percent,
    "error budget burn",
    "the successful request percentage < <threshold>",
);

pub static SLO_LATENCY: CheckSpec = spec(
    check_config::SLO_LATENCY,
    Manual,
    "Latency",
    99.0,
    Unit::Percent,
    "error budget burn",
    "the percentage of requests served faster than the objective < <threshold>",
);

pub static INSTANCE_AVAILABILITY: CheckSpec = spec(
    "InstanceAvailability",
    ItemBased,
    "Instance availability",
    0.0,
    Unit::Percent,
    "{{ items }} instance{{ items | pluralize }} unavailable",
    "the number of unavailable instances > 0",
);

pub static INSTANCE_RESTARTS: CheckSpec = spec(
    "InstanceRestarts",
    EventBased,
    "Restarts",
    0.0,
    Unit::None,
    "app containers have been restarted {{ count }} time{{ count | pluralize }}",
    "the number of container restarts > <threshold>",
);

pub static DEPLOYMENT_STATUS: CheckSpec = spec(
    "DeploymentStatus",
    ItemBased,
    "Deployment status",
    180.0,
    Unit::Second,
    "the rollout has already been in progress for {{ value }}",
    "a rollout is in progress > <threshold>",
);

pub static CPU_NODE: CheckSpec = spec(
    "CPUNode",
    ItemBased,
    "Node CPU utilization",
    80.0,
    Unit::Percent,
    "high CPU utilization of {{ items }} node{{ items | pluralize }}",
    "the CPU usage of a node > <threshold>",
);

pub static CPU_CONTAINER: CheckSpec = spec(
    "CPUContainer",
    ItemBased,
    "Container CPU utilization",
    80.0,
    Unit::Percent,
    "high CPU delay in {{ items }} container{{ items | pluralize }}",
    "a container is throttled > <threshold> of the time",
);

pub static MEMORY_OOM: CheckSpec = spec(
    "MemoryOOM",
    EventBased,
    "Out of memory",
    0.0,
    Unit::None,
    "app containers have been restarted {{ count }} time{{ count | pluralize }} by the OOM killer",
    "the number of OOM kills > <threshold>",
);

pub static MEMORY_PRESSURE: CheckSpec = spec(
    "MemoryPressure",
    ItemBased,
    "Memory pressure",
    10.0,
    Unit::Percent,
    "memory pressure in {{ items }} container{{ items | pluralize }}",
    "the memory headroom of a container < <threshold>",
);

pub static MEMORY_LEAK: CheckSpec = spec(
    "MemoryLeak",
    ValueBased,
    "Memory leak",
    10.0,
    Unit::Percent,
    "memory usage is growing by {{ value }} per hour",
    "memory usage is growing by > <threshold> per hour",
);

pub static STORAGE_SPACE: CheckSpec = spec(
    "StorageSpace",
    ItemBased,
    "Disk space",
    80.0,
    Unit::Percent,
    "disk space on {{ items }} volume{{ items | pluralize }} will be exhausted soon",
    "the space usage of a volume > <threshold>",
);

pub static STORAGE_IO: CheckSpec = spec(
    "StorageIO",
    ItemBased,
    "Disk I/O",
    80.0,
    Unit::Percent,
    "high I/O load on {{ items }} volume{{ items | pluralize }}",
    "the I/O utilization of a volume > <threshold>",
);

pub static NETWORK_RTT: CheckSpec = spec(
    "NetworkRTT",
    ItemBased,
    "Network round-trip time (RTT)",
    0.01,
    Unit::Second,
    "high network latency to {{ items }} upstream service{{ items | pluralize }}",
    "the RTT to an upstream service > <threshold>",
);

pub static NETWORK_CONNECTIVITY: CheckSpec = spec(
    "NetworkConnectivity",
    ItemBased,
    "Network connectivity",
    0.0,
    Unit::None,
    "no connectivity with {{ items }} upstream service{{ items | pluralize }}",
    "an upstream service is unreachable",
);

pub static NETWORK_TCP_CONNECTIONS: CheckSpec = spec(
    "NetworkTCPConnections",
    ItemBased,
    "TCP connections",
    0.0,
    Unit::None,
    "failed to connect to {{ items }} upstream service{{ items | pluralize }}",
    "the number of failed connections to an upstream service > <threshold>",
);

pub static DNS_LATENCY: CheckSpec = spec(
    "DnsLatency",
    ValueBased,
    "DNS latency",
    0.1,
    Unit::Second,
    "high DNS latency",
    "the 95th percentile of DNS response time > <threshold>",
);

pub static DNS_SERVER_ERRORS: CheckSpec = spec(
    "DnsServerErrors",
    ValueBased,
    "DNS server errors",
    0.0,
    Unit::None,
    "DNS server errors",
    "the number of SERVFAIL responses > <threshold>",
);

pub static DNS_NXDOMAIN_ERRORS: CheckSpec = spec(
    "DnsNxdomainErrors",
    ValueBased,
    "DNS NXDOMAIN errors",
    0.0,
    Unit::None,
    "NXDOMAIN errors",
    "the number of NXDOMAIN responses > <threshold>",
);

pub static LOG_ERRORS: CheckSpec = spec(
    "LogErrors",
    EventBased,
    "Errors",
    0.0,
    Unit::None,
    "{{ count }} error{{ count | pluralize }} occurred",
    "the number of messages with the ERROR or CRITICAL severity > <threshold>",
);

pub static POSTGRES_AVAILABILITY: CheckSpec = spec(
    "PostgresAvailability",
    ItemBased,
    "Postgres availability",
    0.0,
    Unit::None,
    "{{ items }} postgres instance{{ items | pluralize }} unavailable",
    "a postgres instance is unavailable",
);

pub static POSTGRES_LATENCY: CheckSpec = spec(
    "PostgresLatency",
    ItemBased,
    "Postgres latency",
    0.1,
    Unit::Second,
    "high postgres latency",
    "the average query latency of a postgres instance > <threshold>",
);

pub static POSTGRES_REPLICATION_LAG: CheckSpec = spec(
    "PostgresReplicationLag",
    ItemBased,
    "Postgres replication lag",
    30.0,
    Unit::Second,
    "replication lag",
    "the replication lag of a replica > <threshold>",
);

pub static POSTGRES_CONNECTIONS: CheckSpec = spec(
    "PostgresConnections",
    ItemBased,
    "Postgres connections",
    90.0,
    Unit::Percent,
    "connections near max_connections",
    "the number of connections > <threshold> of max_connections",
);

pub static REDIS_AVAILABILITY: CheckSpec = spec(
    "RedisAvailability",
    ItemBased,
    "Redis availability",
    0.0,
    Unit::None,
    "{{ items }} redis instance{{ items | pluralize }} unavailable",
    "a redis instance is unavailable",
);

pub static REDIS_LATENCY: CheckSpec = spec(
    "RedisLatency",
    ItemBased,
    "Redis latency",
    0.005,
    Unit::Second,
    "high redis latency",
    "the average command latency of a redis instance > <threshold>",
);

pub static JVM_AVAILABILITY: CheckSpec = spec(
    "JvmAvailability",
    ItemBased,
    "JVM availability",
    0.0,
    Unit::None,
    "{{ items }} JVM instance{{ items | pluralize }} unavailable",
    "a JVM instance is unavailable",
);

pub static JVM_SAFEPOINT_TIME: CheckSpec = spec(
    "JvmSafepointTime",
    ItemBased,
    "JVM safepoints",
    0.05,
    Unit::Second,
    "high safepoint time",
    "the time the application has been stopped for safepoint operations > <threshold>",
);

pub static CHECKS: &[&CheckSpec] = &[
    &SLO_AVAILABILITY,
    &SLO_LATENCY,
    &INSTANCE_AVAILABILITY,
    &INSTANCE_RESTARTS,
    &DEPLOYMENT_STATUS,
    &CPU_NODE,
    &CPU_CONTAINER,
    &MEMORY_OOM,
    &MEMORY_PRESSURE,
    &MEMORY_LEAK,
    &STORAGE_SPACE,
    &STORAGE_IO,
    &NETWORK_RTT,
    &NETWORK_CONNECTIVITY,
    &NETWORK_TCP_CONNECTIONS,
    &DNS_LATENCY,
    &DNS_SERVER_ERRORS,
    &DNS_NXDOMAIN_ERRORS,
    &LOG_ERRORS,
    &POSTGRES_AVAILABILITY,
    &POSTGRES_LATENCY,
    &POSTGRES_REPLICATION_LAG,
    &POSTGRES_CONNECTIONS,
    &REDIS_AVAILABILITY,
    &REDIS_LATENCY,
    &JVM_AVAILABILITY,
    &JVM_SAFEPOINT_TIME,
];

pub fn lookup(id: &str) -> Option<&'static CheckSpec> {
    CHECKS.iter().copied().find(|c| c.id == id)
}

/// Parses and renders a message template. Parse failures and rendering
/// failures are reported apart.
pub fn render(template: &str, ctx: &tera::Context) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("message", template)
        .map_err(|e| ChecksError::InvalidTemplate(error_chain(&e)))?;
    tera.render("message", ctx)
        .map_err(|e| ChecksError::Render(error_chain(&e)))
}

/// Only checks that `template` parses.
pub fn validate_template(template: &str) -> Result<()> {
    Tera::default()
        .add_raw_template("message", template)
        .map_err(|e| ChecksError::InvalidTemplate(error_chain(&e)))
}

fn error_chain(e: &tera::Error) -> String {
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

pub fn format_float(v: f32) -> String {
    if v.is_nan() {
        return "-".to_string();
    }
    if (v - v.round()).abs() < 1e-6 {
        return format!("{:.0}", v);
    }
    let s = format!("{:.2}", v);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn format_value(unit: Unit, v: f32) -> String {
    match unit {
        Unit::Second if !v.is_nan() && v < 1.0 => format!("{}ms", format_float(v * 1000.0)),
        Unit::Second if !v.is_nan() => {
            humantime::format_duration(StdDuration::from_secs(v.round() as u64)).to_string()
        }
        Unit::Percent if !v.is_nan() => format!("{}%", format_float(v)),
        _ => format_float(v),
    }
}
