use super::{from_internal_exporter, InstanceFinder, Loader};
use worldview_core::model::databases::{
    accept_exporter, MysqlQueryKey, MysqlReplicationStatus, MysqlTable, PgConnectionKey, PgSetting, QueryKey,
};
use worldview_core::model::{Instance, Memcached, Mongodb, Mysql, Postgres, Redis};
use worldview_core::timeseries::merge;
use worldview_core::{MetricValues, Reducer};

/// Exporter families: query prefix and the application types an instance
/// must run to own the series.
const FAMILIES: &[(&str, &[&str])] = &[
    ("pg_", &["postgres"]),
    ("redis_", &["redis", "keydb"]),
    ("mongo_", &["mongodb"]),
    ("mysql_", &["mysql"]),
    ("memcached_", &["memcached"]),
];

impl Loader<'_> {
    /// Attaches database exporter series to the instances they describe.
    pub fn load_databases(&mut self) {
        let finder = InstanceFinder::new(self);
        for (prefix, types) in FAMILIES {
            for (query, metrics) in self.metrics_with_prefix(prefix) {
                for m in metrics {
                    let Some(idx) = finder.find(&self.world, &m.labels, types) else {
                        continue;
                    };
                    let instance = &mut self.world.instances[idx];
                    match *prefix {
                        "pg_" => postgres(instance, query, m),
                        "redis_" => redis(instance, query, m),
                        "mongo_" => mongodb(instance, query, m),
                        "mysql_" => mysql(instance, query, m),
                        _ => memcached(instance, query, m),
                    }
                }
            }
        }
    }
}

fn postgres(instance: &mut Instance, query: &str, m: &MetricValues) {
    let pg = instance.postgres.get_or_insert_with(Postgres::default);
    if !accept_exporter(&mut pg.internal_exporter, from_internal_exporter(&m.labels)) {
        return;
    }
    let values = &m.values;
    match query {
        "pg_up" => merge(&mut pg.up, values, Reducer::Any),
        "pg_scrape_error" => {
            pg.error.update(values, m.label("error"));
            pg.warning.update(values, m.label("warning"));
        }
        "pg_info" => pg.version.update(values, m.label("server_version")),
        "pg_connections" => {
            if m.label("state").is_empty() {
                return;
            }
            let key = PgConnectionKey {
                db: m.label("db").to_string(),
                user: m.label("user").to_string(),
                state: m.label("state").to_string(),
                query: m.label("query").to_string(),
                wait_event_type: m.label("wait_event_type").to_string(),
            };
            merge(pg.connections.entry(key).or_default(), values, Reducer::Any);
        }
        "pg_setting" => {
            let setting = pg
                .settings
                .entry(m.label("name").to_string())
                .or_insert_with(|| PgSetting {
                    unit: m.label("unit").to_string(),
                    ..Default::default()
                });
            merge(&mut setting.samples, values, Reducer::Any);
        }
        "pg_lock_awaiting_queries" => {
            let key = query_key(m, "blocking_query");
            merge(pg.awaiting_queries_by_locking_query.entry(key).or_default(), values, Reducer::Any);
        }
        "pg_db_queries_per_second" => {
            merge(pg.queries_by_db.entry(m.label("db").to_string()).or_default(), values, Reducer::Any);
        }
        "pg_top_query_calls_per_second" | "pg_top_query_time_per_second" | "pg_top_query_io_time_per_second" => {
            let stat = pg.per_query.entry(query_key(m, "query")).or_default();
            let ts = match query {
                "pg_top_query_calls_per_second" => &mut stat.calls,
                "pg_top_query_time_per_second" => &mut stat.total_time,
                _ => &mut stat.io_time,
            };
            merge(ts, values, Reducer::Any);
        }
        "pg_latency_seconds" => {
            let ts = match m.label("summary") {
                "avg" => &mut pg.avg,
                "p50" => &mut pg.p50,
                "p95" => &mut pg.p95,
                "p99" => &mut pg.p99,
                _ => return,
            };
            merge(ts, values, Reducer::Any);
        }
        "pg_wal_current_lsn" => merge(&mut pg.wal_current_lsn, values, Reducer::Any),
        "pg_wal_receive_lsn" => merge(&mut pg.wal_receive_lsn, values, Reducer::Any),
        "pg_wal_reply_lsn" => merge(&mut pg.wal_reply_lsn, values, Reducer::Any),
        _ => {}
    }
}

fn query_key(m: &MetricValues, query_label: &str) -> QueryKey {
    QueryKey {
        db: m.label("db").to_string(),
        user: m.label("user").to_string(),
        query: m.label(query_label).to_string(),
    }
}

fn redis(instance: &mut Instance, query: &str, m: &MetricValues) {
    let redis = instance.redis.get_or_insert_with(Redis::default);
    match query {
        "redis_up" => merge(&mut redis.up, &m.values, Reducer::Any),
        "redis_instance_info" => {
            redis.version.update(&m.values, m.label("redis_version"));
            redis.role.update(&m.values, m.label("role"));
        }
        "redis_commands_duration_seconds_total" => {
            merge(redis.calls_time.entry(m.label("cmd").to_string()).or_default(), &m.values, Reducer::Any);
        }
        "redis_commands_total" => {
            merge(redis.calls.entry(m.label("cmd").to_string()).or_default(), &m.values, Reducer::Any);
        }
        _ => {}
    }
}

fn mongodb(instance: &mut Instance, query: &str, m: &MetricValues) {
    let mongo = instance.mongodb.get_or_insert_with(Mongodb::default);
    if !accept_exporter(&mut mongo.internal_exporter, from_internal_exporter(&m.labels)) {
        return;
    }
    match query {
        "mongo_up" => merge(&mut mongo.up, &m.values, Reducer::Any),
        "mongo_scrape_error" => {
            mongo.error.update(&m.values, m.label("error"));
            mongo.warning.update(&m.values, m.label("warning"));
        }
        "mongo_info" => mongo.version.update(&m.values, m.label("server_version")),
        "mongo_rs_status" => {
            let state = m.label("role").to_lowercase();
            mongo.replica_set.update(&m.values, m.label("rs"));
            mongo.state.update(&m.values, &state);
            let role = if state == "secondary" { "replica" } else { state.as_str() };
            instance.update_cluster_role(role, &m.values);
        }
        "mongo_rs_last_applied_timestamp_ms" => merge(&mut mongo.last_applied, &m.values, Reducer::Any),
        _ => {}
    }
}

fn mysql(instance: &mut Instance, query: &str, m: &MetricValues) {
    let mysql = instance.mysql.get_or_insert_with(Mysql::default);
    if !accept_exporter(&mut mysql.internal_exporter, from_internal_exporter(&m.labels)) {
        return;
    }
    let values = &m.values;
    match query {
        "mysql_up" => merge(&mut mysql.up, values, Reducer::Any),
        "mysql_scrape_error" => {
            mysql.error.update(values, m.label("error"));
            mysql.warning.update(values, m.label("warning"));
        }
        "mysql_info" => {
            mysql.server_uuid.update(values, m.label("server_uuid"));
            mysql.version.update(values, m.label("server_version"));
        }
        "mysql_top_query_calls_per_second"
        | "mysql_top_query_time_per_second"
        | "mysql_top_query_lock_time_per_second" => {
            let key = MysqlQueryKey {
                schema: m.label("schema").to_string(),
                query: m.label("query").to_string(),
            };
            let stat = mysql.per_query.entry(key).or_default();
            let ts = match query {
                "mysql_top_query_calls_per_second" => &mut stat.calls,
                "mysql_top_query_time_per_second" => &mut stat.total_time,
                _ => &mut stat.lock_time,
            };
            merge(ts, values, Reducer::Any);
        }
        "mysql_replication_io_status" | "mysql_replication_sql_status" => {
            mysql
                .replication_source_uuid
                .update(values, m.label("source_server_uuid"));
            let status = if query == "mysql_replication_io_status" {
                &mut mysql.replication_io_status
            } else {
                &mut mysql.replication_sql_status
            };
            let status = status.get_or_insert_with(MysqlReplicationStatus::default);
            merge(&mut status.status, values, Reducer::Any);
            status.last_error.update(values, m.label("last_error"));
            status.last_state.update(values, m.label("state"));
        }
        "mysql_replication_lag_seconds" => {
            mysql
                .replication_source_uuid
                .update(values, m.label("source_server_uuid"));
            merge(&mut mysql.replication_lag_seconds, values, Reducer::Any);
        }
        "mysql_connections_max" => merge(&mut mysql.connections_max, values, Reducer::Any),
        "mysql_connections_current" => merge(&mut mysql.connections_current, values, Reducer::Any),
        "mysql_connections_total" => merge(&mut mysql.connections_new, values, Reducer::Any),
        "mysql_connections_aborted_total" => merge(&mut mysql.connections_aborted, values, Reducer::Any),
        "mysql_traffic_received_bytes_total" => merge(&mut mysql.bytes_received, values, Reducer::Any),
        "mysql_traffic_sent_bytes_total" => merge(&mut mysql.bytes_sent, values, Reducer::Any),
        "mysql_queries_total" => merge(&mut mysql.queries, values, Reducer::Any),
        "mysql_slow_queries_total" => merge(&mut mysql.slow_queries, values, Reducer::Any),
        "mysql_top_table_io_wait_time_per_second" => {
            let key = MysqlTable {
                schema: m.label("schema").to_string(),
                table: m.label("table").to_string(),
            };
            let stats = mysql.tables_io_time.entry(key).or_default();
            match m.label("operation") {
                "read" => merge(&mut stats.read_time_per_second, values, Reducer::Any),
                "write" => merge(&mut stats.write_time_per_second, values, Reducer::Any),
                _ => {}
            }
        }
        _ => {}
    }
}

fn memcached(instance: &mut Instance, query: &str, m: &MetricValues) {
    let mc = instance.memcached.get_or_insert_with(Memcached::default);
    if !accept_exporter(&mut mc.internal_exporter, from_internal_exporter(&m.labels)) {
        return;
    }
    match query {
        "memcached_up" => merge(&mut mc.up, &m.values, Reducer::Any),
        "memcached_version" => mc.version.update(&m.values, m.label("version")),
        "memcached_limit_bytes" => merge(&mut mc.limit_bytes, &m.values, Reducer::Any),
        "memcached_items_evicted_total" => merge(&mut mc.evicted_items, &m.values, Reducer::Any),
        "memcached_commands_total" => {
            merge(mc.calls.entry(m.label("command").to_string()).or_default(), &m.values, Reducer::NanSum);
            match m.label("status") {
                "hit" => merge(&mut mc.hits, &m.values, Reducer::NanSum),
                "miss" => merge(&mut mc.misses, &m.values, Reducer::NanSum),
                _ => {}
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv};
    use super::super::Loader;
    use std::collections::BTreeMap;
    use worldview_core::model::ClusterRole;
    use worldview_core::{MetricValues, World};
    use worldview_query::QueryResults;

    fn results(entries: Vec<(&str, Vec<MetricValues>)>) -> QueryResults {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_postgres_by_listen_and_exporter_kind() {
        let pg = [("container_id", "/system.slice/postgresql.service"), ("machine_id", "m1")];
        let external = [("instance", "10.0.0.5:9187"), ("job", "pg")];
        let internal = [pg[0], pg[1], ("instance", "10.0.0.5:9187")];
        let metrics = results(vec![
            ("node_info", vec![mv(&[("machine_id", "m1"), ("hostname", "n1")], constant(1.0))]),
            (
                "container_net_tcp_listen_info",
                vec![mv(&[pg[0], pg[1], ("listen_addr", "10.0.0.5:0")], constant(1.0))],
            ),
            (
                "container_application_type",
                vec![mv(&[pg[0], pg[1], ("application_type", "postgres")], constant(1.0))],
            ),
            ("pg_up", vec![mv(&internal, constant(1.0)), mv(&external, constant(0.0))]),
            (
                "pg_info",
                vec![mv(&[internal[0], internal[1], internal[2], ("server_version", "16.1")], constant(1.0))],
            ),
            (
                "pg_setting",
                vec![mv(
                    &[internal[0], internal[1], internal[2], ("name", "max_connections"), ("unit", "")],
                    constant(100.0),
                )],
            ),
            (
                "pg_connections",
                vec![
                    mv(&[internal[0], internal[1], internal[2], ("db", "shop"), ("state", "active")], constant(7.0)),
                    mv(&[internal[0], internal[1], internal[2], ("db", "shop")], constant(100.0)),
                ],
            ),
        ]);
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_nodes();
        loader.load_containers();
        loader.load_databases();
        let w = loader.into_world();

        let pg = w.instances[0].postgres.as_ref().unwrap();
        assert_eq!(pg.internal_exporter, Some(true));
        assert!(pg.is_up());
        assert_eq!(pg.version.value(), "16.1");
        assert_eq!(pg.setting("max_connections"), 100.0);
        assert_eq!(pg.total_connections(), 7.0);
    }

    #[test]
    fn test_mongodb_role_and_memcached() {
        let mongo = [("namespace", "db"), ("pod", "mongo-0")];
        let metrics = results(vec![
            ("kube_pod_info", vec![mv(&[("namespace", "db"), ("pod", "mongo-0"), ("uid", "u1"), ("created_by_kind", "StatefulSet"), ("created_by_name", "mongo")], constant(1.0))]),
            ("mongo_up", vec![mv(&mongo, constant(1.0))]),
            ("mongo_rs_status", vec![mv(&[mongo[0], mongo[1], ("rs", "rs0"), ("role", "SECONDARY")], constant(1.0))]),
            (
                "memcached_commands_total",
                vec![
                    mv(&[mongo[0], mongo[1], ("command", "get"), ("status", "hit")], constant(3.0)),
                    mv(&[mongo[0], mongo[1], ("command", "get"), ("status", "miss")], constant(1.0)),
                ],
            ),
        ]);
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_k8s();
        loader.load_databases();
        let w = loader.into_world();

        let instance = &w.instances[0];
        let mongo = instance.mongodb.as_ref().unwrap();
        assert_eq!(mongo.state.value(), "secondary");
        assert_eq!(mongo.replica_set.value(), "rs0");
        assert_eq!(instance.cluster_role_last(), ClusterRole::Replica);
        let mc = instance.memcached.as_ref().unwrap();
        assert_eq!(mc.calls["get"].last(), 4.0);
        assert_eq!(mc.hits.last(), 3.0);
    }
}
