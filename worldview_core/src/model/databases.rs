use super::labels::LabelLastValue;
use crate::timeseries::{TimeSeries, NAN};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PgConnectionKey {
    pub db: String,
    pub user: String,
    pub state: String,
    pub query: String,
    pub wait_event_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PgSetting {
    pub samples: TimeSeries,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct QueryKey {
    pub db: String,
    pub user: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStat {
    pub calls: TimeSeries,
    pub total_time: TimeSeries,
    pub io_time: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Postgres {
    /// Decided by the first metric; series from the other exporter kind are ignored.
    pub internal_exporter: Option<bool>,

    pub up: TimeSeries,
    pub error: LabelLastValue,
    pub warning: LabelLastValue,
    pub version: LabelLastValue,

    pub connections: BTreeMap<PgConnectionKey, TimeSeries>,
    pub awaiting_queries_by_locking_query: BTreeMap<QueryKey, TimeSeries>,
    pub settings: BTreeMap<String, PgSetting>,

    pub per_query: BTreeMap<QueryKey, QueryStat>,
    pub queries_by_db: BTreeMap<String, TimeSeries>,

    pub avg: TimeSeries,
    pub p50: TimeSeries,
    pub p95: TimeSeries,
    pub p99: TimeSeries,

    pub wal_current_lsn: TimeSeries,
    pub wal_receive_lsn: TimeSeries,
    pub wal_reply_lsn: TimeSeries,
}

impl Postgres {
    pub fn is_up(&self) -> bool {
        self.up.last() > 0.0
    }

    pub fn setting(&self, name: &str) -> f32 {
        self.settings.get(name).map(|s| s.samples.last()).unwrap_or(NAN)
    }

    pub fn total_connections(&self) -> f32 {
        self.connections
            .values()
            .map(|ts| ts.last())
            .filter(|v| !v.is_nan())
            .sum()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Redis {
    pub up: TimeSeries,
    pub version: LabelLastValue,
    pub role: LabelLastValue,
    pub calls: BTreeMap<String, TimeSeries>,
    pub calls_time: BTreeMap<String, TimeSeries>,
}

impl Redis {
    pub fn is_up(&self) -> bool {
        self.up.last() > 0.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Mongodb {
    pub internal_exporter: Option<bool>,
    pub up: TimeSeries,
    pub error: LabelLastValue,
    pub warning: LabelLastValue,
    pub replica_set: LabelLastValue,
    pub state: LabelLastValue,
    pub version: LabelLastValue,
    pub last_applied: TimeSeries,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MysqlQueryKey {
    pub schema: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MysqlQueryStat {
    pub calls: TimeSeries,
    pub total_time: TimeSeries,
    pub lock_time: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MysqlReplicationStatus {
    pub last_error: LabelLastValue,
    pub last_state: LabelLastValue,
    pub status: TimeSeries,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MysqlTable {
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MysqlTableIoStats {
    pub read_time_per_second: TimeSeries,
    pub write_time_per_second: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Mysql {
    pub internal_exporter: Option<bool>,

    pub up: TimeSeries,
    pub server_uuid: LabelLastValue,
    pub error: LabelLastValue,
    pub warning: LabelLastValue,
    pub version: LabelLastValue,
    pub per_query: BTreeMap<MysqlQueryKey, MysqlQueryStat>,

    pub replication_source_uuid: LabelLastValue,
    pub replication_io_status: Option<MysqlReplicationStatus>,
    pub replication_sql_status: Option<MysqlReplicationStatus>,
    pub replication_lag_seconds: TimeSeries,

    pub connections_max: TimeSeries,
    pub connections_current: TimeSeries,
    pub connections_new: TimeSeries,
    pub connections_aborted: TimeSeries,

    pub bytes_sent: TimeSeries,
    pub bytes_received: TimeSeries,

    pub queries: TimeSeries,
    pub slow_queries: TimeSeries,

    pub tables_io_time: BTreeMap<MysqlTable, MysqlTableIoStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Memcached {
    pub internal_exporter: Option<bool>,

    pub up: TimeSeries,
    pub version: LabelLastValue,
    pub calls: BTreeMap<String, TimeSeries>,
    pub hits: TimeSeries,
    pub misses: TimeSeries,
    pub limit_bytes: TimeSeries,
    pub evicted_items: TimeSeries,
}

/// Accepts a metric only if it comes from the same exporter kind as the
/// first one seen for this instance.
pub fn accept_exporter(flag: &mut Option<bool>, internal: bool) -> bool {
    match flag {
        None => {
            *flag = Some(internal);
            true
        }
        Some(current) => *current == internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_exporter_first_wins() {
        let mut flag = None;
        assert!(accept_exporter(&mut flag, true));
        assert!(!accept_exporter(&mut flag, false));
        assert!(accept_exporter(&mut flag, true));
        assert_eq!(flag, Some(true));
    }
}
