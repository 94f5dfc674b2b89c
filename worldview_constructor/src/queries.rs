//! The named PromQL templates a world is built from.
//!
//! Counters whose exporters may restart are taken modulo 10^7 so a reset
//! shows up as a small value instead of a huge negative delta. `$RANGE` is
//! rendered with the active step before a query reaches the backend.

use std::collections::BTreeMap;
use worldview_core::model::{ApplicationId, CheckConfigs};
use worldview_core::{Duration, Time};

pub const Q_APPLICATION_CUSTOM_SLI: &str = "custom_sli";
pub const RAW_SUFFIX: &str = "_raw";

pub const QUERIES: &[(&str, &str)] = &[
    ("up", "up"),
    // nodes
    ("node_info", "node_info"),
    ("node_cloud_info", "node_cloud_info"),
    ("node_uptime_seconds", "node_uptime_seconds"),
    ("node_cpu_cores", "node_resources_cpu_logical_cores"),
    (
        "node_cpu_usage_percent",
        r#"sum(rate(node_resources_cpu_usage_seconds_total{mode!="idle"}[$RANGE])) without(mode) / sum(rate(node_resources_cpu_usage_seconds_total[$RANGE])) without(mode) * 100"#,
    ),
    (
        "node_cpu_usage_by_mode",
        r#"rate(node_resources_cpu_usage_seconds_total{mode!="idle"}[$RANGE]) / ignoring(mode) group_left sum(rate(node_resources_cpu_usage_seconds_total[$RANGE])) without(mode) * 100"#,
    ),
    ("node_memory_total_bytes", "node_resources_memory_total_bytes"),
    ("node_memory_available_bytes", "node_resources_memory_available_bytes"),
    ("node_memory_free_bytes", "node_resources_memory_free_bytes"),
    ("node_memory_cached_bytes", "node_resources_memory_cached_bytes"),
    ("node_disk_read_time", "rate(node_resources_disk_read_time_seconds_total[$RANGE])"),
    ("node_disk_write_time", "rate(node_resources_disk_write_time_seconds_total[$RANGE])"),
    ("node_disk_reads", "rate(node_resources_disk_reads_total[$RANGE])"),
    ("node_disk_writes", "rate(node_resources_disk_writes_total[$RANGE])"),
    ("node_disk_read_bytes", "rate(node_resources_disk_read_bytes_total[$RANGE])"),
    ("node_disk_written_bytes", "rate(node_resources_disk_written_bytes_total[$RANGE])"),
    ("node_disk_io_time", "rate(node_resources_disk_io_time_seconds_total[$RANGE])"),
    ("node_net_up", "node_net_interface_up"),
    ("node_net_ip", "node_net_interface_ip"),
    ("node_net_rx_bytes", "rate(node_net_received_bytes_total[$RANGE])"),
    ("node_net_tx_bytes", "rate(node_net_transmitted_bytes_total[$RANGE])"),
    ("fargate_node_machine_cpu_cores", "fargate_node_machine_cpu_cores"),
    ("fargate_node_machine_memory_bytes", "fargate_node_machine_memory_bytes"),
    // kubernetes
    ("kube_node_info", "kube_node_info"),
    ("kube_service_info", "kube_service_info"),
    ("kube_service_spec_type", "kube_service_spec_type"),
    ("kube_service_spec_port", "kube_service_spec_port"),
    ("kube_service_status_load_balancer_ingress", "kube_service_status_load_balancer_ingress"),
    ("kube_endpoint_address", "kube_endpoint_address"),
    ("kube_pod_info", "kube_pod_info"),
    ("kube_pod_labels", "kube_pod_labels"),
    ("kube_pod_status_phase", "kube_pod_status_phase > 0"),
    ("kube_pod_status_ready", r#"kube_pod_status_ready{condition="true"}"#),
    ("kube_pod_status_scheduled", r#"kube_pod_status_scheduled{condition="true"} > 0"#),
    ("kube_pod_init_container_info", "kube_pod_init_container_info"),
    ("kube_pod_container_resource_requests", "kube_pod_container_resource_requests"),
    ("kube_pod_container_status_ready", "kube_pod_container_status_ready > 0"),
    ("kube_pod_container_status_waiting", "kube_pod_container_status_waiting > 0"),
    ("kube_pod_container_status_running", "kube_pod_container_status_running > 0"),
    ("kube_pod_container_status_terminated", "kube_pod_container_status_terminated > 0"),
    ("kube_pod_container_status_waiting_reason", "kube_pod_container_status_waiting_reason > 0"),
    ("kube_pod_container_status_terminated_reason", "kube_pod_container_status_terminated_reason > 0"),
    ("kube_pod_container_status_last_terminated_reason", "kube_pod_container_status_last_terminated_reason"),
    ("kube_deployment_spec_replicas", "kube_deployment_spec_replicas"),
    ("kube_daemonset_status_desired_number_scheduled", "kube_daemonset_status_desired_number_scheduled"),
    ("kube_statefulset_replicas", "kube_statefulset_replicas"),
    // containers
    ("container_info", "container_info"),
    ("container_application_type", "container_application_type"),
    ("container_cpu_limit", "container_resources_cpu_limit_cores"),
    ("container_cpu_usage", "rate(container_resources_cpu_usage_seconds_total[$RANGE])"),
    ("container_cpu_delay", "rate(container_resources_cpu_delay_seconds_total[$RANGE])"),
    ("container_throttled_time", "rate(container_resources_cpu_throttled_seconds_total[$RANGE])"),
    ("container_memory_rss", "container_resources_memory_rss_bytes"),
    ("container_memory_cache", "container_resources_memory_cache_bytes"),
    ("container_memory_limit", "container_resources_memory_limit_bytes"),
    ("container_oom_kills_total", "container_oom_kills_total % 10000000"),
    ("container_restarts", "container_restarts_total % 10000000"),
    ("container_volume_size", "container_resources_disk_size_bytes"),
    ("container_volume_used", "container_resources_disk_used_bytes"),
    ("container_log_messages", "container_log_messages_total % 10000000"),
    ("fargate_container_spec_cpu_limit_cores", "fargate_container_spec_cpu_limit_cores"),
    ("fargate_container_spec_memory_limit_bytes", "fargate_container_spec_memory_limit_bytes"),
    ("fargate_container_cpu_usage_seconds", "rate(fargate_container_cpu_usage_seconds_total[$RANGE])"),
    ("fargate_container_cpu_cfs_throttled_seconds", "rate(fargate_container_cpu_cfs_throttled_seconds_total[$RANGE])"),
    ("fargate_container_memory_rss", "fargate_container_memory_rss"),
    ("fargate_container_memory_cache", "fargate_container_memory_cache"),
    ("fargate_container_oom_events_total", "fargate_container_oom_events_total % 10000000"),
    // conversations
    ("container_net_tcp_listen_info", "container_net_tcp_listen_info"),
    ("container_net_latency", "container_net_latency_seconds"),
    ("container_net_tcp_successful_connects", "rate(container_net_tcp_successful_connects_total[$RANGE])"),
    ("container_net_tcp_failed_connects", "rate(container_net_tcp_failed_connects_total[$RANGE])"),
    ("container_net_tcp_active_connections", "container_net_tcp_active_connections"),
    ("container_net_tcp_retransmits", "rate(container_net_tcp_retransmits_total[$RANGE])"),
    ("container_net_tcp_bytes_sent", "rate(container_net_tcp_bytes_sent_total[$RANGE])"),
    ("container_net_tcp_bytes_received", "rate(container_net_tcp_bytes_received_total[$RANGE])"),
    ("container_http_requests_count", "rate(container_http_requests_total[$RANGE])"),
    ("container_http_requests_latency", "rate(container_http_requests_duration_seconds_total_sum[$RANGE]) / rate(container_http_requests_duration_seconds_total_count[$RANGE])"),
    ("container_http_requests_histogram", "rate(container_http_requests_duration_seconds_total_bucket[$RANGE])"),
    ("container_postgres_queries_count", "rate(container_postgres_queries_total[$RANGE])"),
    ("container_postgres_queries_latency", "rate(container_postgres_queries_duration_seconds_total_sum[$RANGE]) / rate(container_postgres_queries_duration_seconds_total_count[$RANGE])"),
    ("container_postgres_queries_histogram", "rate(container_postgres_queries_duration_seconds_total_bucket[$RANGE])"),
    ("container_redis_queries_count", "rate(container_redis_queries_total[$RANGE])"),
    ("container_redis_queries_latency", "rate(container_redis_queries_duration_seconds_total_sum[$RANGE]) / rate(container_redis_queries_duration_seconds_total_count[$RANGE])"),
    ("container_redis_queries_histogram", "rate(container_redis_queries_duration_seconds_total_bucket[$RANGE])"),
    ("container_memcached_queries_count", "rate(container_memcached_queries_total[$RANGE])"),
    ("container_memcached_queries_latency", "rate(container_memcached_queries_duration_seconds_total_sum[$RANGE]) / rate(container_memcached_queries_duration_seconds_total_count[$RANGE])"),
    ("container_memcached_queries_histogram", "rate(container_memcached_queries_duration_seconds_total_bucket[$RANGE])"),
    ("container_mysql_queries_count", "rate(container_mysql_queries_total[$RANGE])"),
    ("container_mysql_queries_latency", "rate(container_mysql_queries_duration_seconds_total_sum[$RANGE]) / rate(container_mysql_queries_duration_seconds_total_count[$RANGE])"),
    ("container_mysql_queries_histogram", "rate(container_mysql_queries_duration_seconds_total_bucket[$RANGE])"),
    ("container_mongo_queries_count", "rate(container_mongo_queries_total[$RANGE])"),
    ("container_mongo_queries_latency", "rate(container_mongo_queries_duration_seconds_total_sum[$RANGE]) / rate(container_mongo_queries_duration_seconds_total_count[$RANGE])"),
    ("container_mongo_queries_histogram", "rate(container_mongo_queries_duration_seconds_total_bucket[$RANGE])"),
    ("container_kafka_requests_count", "rate(container_kafka_requests_total[$RANGE])"),
    ("container_kafka_requests_latency", "rate(container_kafka_requests_duration_seconds_total_sum[$RANGE]) / rate(container_kafka_requests_duration_seconds_total_count[$RANGE])"),
    ("container_kafka_requests_histogram", "rate(container_kafka_requests_duration_seconds_total_bucket[$RANGE])"),
    ("container_cassandra_queries_count", "rate(container_cassandra_queries_total[$RANGE])"),
    ("container_cassandra_queries_latency", "rate(container_cassandra_queries_duration_seconds_total_sum[$RANGE]) / rate(container_cassandra_queries_duration_seconds_total_count[$RANGE])"),
    ("container_cassandra_queries_histogram", "rate(container_cassandra_queries_duration_seconds_total_bucket[$RANGE])"),
    ("container_clickhouse_queries_count", "rate(container_clickhouse_queries_total[$RANGE])"),
    ("container_clickhouse_queries_latency", "rate(container_clickhouse_queries_duration_seconds_total_sum[$RANGE]) / rate(container_clickhouse_queries_duration_seconds_total_count[$RANGE])"),
    ("container_zookeeper_requests_count", "rate(container_zookeeper_requests_total[$RANGE])"),
    ("container_zookeeper_requests_latency", "rate(container_zookeeper_requests_duration_seconds_total_sum[$RANGE]) / rate(container_zookeeper_requests_duration_seconds_total_count[$RANGE])"),
    ("container_rabbitmq_messages", "rate(container_rabbitmq_messages_total[$RANGE])"),
    ("container_nats_messages", "rate(container_nats_messages_total[$RANGE])"),
    ("container_dns_requests_total", "rate(container_dns_requests_total[$RANGE])"),
    ("container_dns_requests_latency", "rate(container_dns_requests_duration_seconds_total_bucket[$RANGE])"),
    // runtimes
    ("container_jvm_info", "container_jvm_info"),
    ("container_jvm_heap_size_bytes", "container_jvm_heap_size_bytes"),
    ("container_jvm_heap_used_bytes", "container_jvm_heap_used_bytes"),
    ("container_jvm_gc_time_seconds", "rate(container_jvm_gc_time_seconds[$RANGE])"),
    ("container_jvm_safepoint_sync_time_seconds", "rate(container_jvm_safepoint_sync_time_seconds[$RANGE])"),
    ("container_jvm_safepoint_time_seconds", "rate(container_jvm_safepoint_time_seconds[$RANGE])"),
    ("container_dotnet_info", "container_dotnet_info"),
    ("container_dotnet_memory_allocated_bytes_total", "rate(container_dotnet_memory_allocated_bytes_total[$RANGE])"),
    ("container_dotnet_exceptions_total", "rate(container_dotnet_exceptions_total[$RANGE])"),
    ("container_dotnet_memory_heap_size_bytes", "container_dotnet_memory_heap_size_bytes"),
    ("container_dotnet_gc_count_total", "rate(container_dotnet_gc_count_total[$RANGE])"),
    ("container_dotnet_heap_fragmentation_percent", "container_dotnet_heap_fragmentation_percent"),
    ("container_dotnet_monitor_lock_contentions_total", "rate(container_dotnet_monitor_lock_contentions_total[$RANGE])"),
    ("container_dotnet_thread_pool_completed_items_total", "rate(container_dotnet_thread_pool_completed_items_total[$RANGE])"),
    ("container_dotnet_thread_pool_queue_length", "container_dotnet_thread_pool_queue_length"),
    ("container_dotnet_thread_pool_size", "container_dotnet_thread_pool_size"),
    ("container_python_thread_lock_wait_time_seconds", "rate(container_python_thread_lock_wait_time_seconds[$RANGE])"),
    ("container_nodejs_event_loop_blocked_time_seconds", "rate(container_nodejs_event_loop_blocked_time_seconds_total[$RANGE])"),
    // cloud-managed
    ("aws_discovery_error", "aws_discovery_error"),
    ("aws_rds_info", "aws_rds_info"),
    ("aws_rds_status", "aws_rds_status"),
    ("aws_rds_cpu_cores", "aws_rds_cpu_cores"),
    ("aws_rds_cpu_usage_percent", "aws_rds_cpu_usage_percent"),
    ("aws_rds_memory_total_bytes", "aws_rds_memory_total_bytes"),
    ("aws_rds_memory_cached_bytes", "aws_rds_memory_cached_bytes"),
    ("aws_rds_memory_free_bytes", "aws_rds_memory_free_bytes"),
    ("aws_rds_io_util_percent", "aws_rds_io_util_percent"),
    ("aws_rds_io_ops_per_second", "aws_rds_io_ops_per_second"),
    ("aws_rds_io_await_seconds", "aws_rds_io_await_seconds"),
    ("aws_rds_storage_provisioned_iops", "aws_rds_storage_provisioned_iops"),
    ("aws_rds_allocated_storage_gibibytes", "aws_rds_allocated_storage_gibibytes"),
    ("aws_rds_fs_total_bytes", r#"aws_rds_fs_total_bytes{mount_point="/rdsdbdata"}"#),
    ("aws_rds_fs_used_bytes", r#"aws_rds_fs_used_bytes{mount_point="/rdsdbdata"}"#),
    ("aws_rds_log_messages_total", "aws_rds_log_messages_total % 10000000"),
    ("aws_rds_net_rx_bytes_per_second", "aws_rds_net_rx_bytes_per_second"),
    ("aws_rds_net_tx_bytes_per_second", "aws_rds_net_tx_bytes_per_second"),
    ("aws_elasticache_info", "aws_elasticache_info"),
    ("aws_elasticache_status", "aws_elasticache_status"),
    ("ip_to_fqdn", "ip_to_fqdn"),
    // databases
    ("pg_up", "pg_up"),
    ("pg_scrape_error", "pg_scrape_error"),
    ("pg_info", "pg_info"),
    ("pg_setting", "pg_setting"),
    ("pg_connections", r#"pg_connections{db!="postgres"}"#),
    ("pg_lock_awaiting_queries", "pg_lock_awaiting_queries"),
    ("pg_latency_seconds", "pg_latency_seconds"),
    ("pg_top_query_calls_per_second", "pg_top_query_calls_per_second"),
    ("pg_top_query_time_per_second", "pg_top_query_time_per_second"),
    ("pg_top_query_io_time_per_second", "pg_top_query_io_time_per_second"),
    ("pg_db_queries_per_second", "pg_db_queries_per_second"),
    ("pg_wal_current_lsn", "pg_wal_current_lsn"),
    ("pg_wal_receive_lsn", "pg_wal_receive_lsn"),
    ("pg_wal_reply_lsn", "pg_wal_reply_lsn"),
    ("redis_up", "redis_up"),
    ("redis_instance_info", "redis_instance_info"),
    ("redis_commands_duration_seconds_total", "rate(redis_commands_duration_seconds_total[$RANGE])"),
    ("redis_commands_total", "rate(redis_commands_total[$RANGE])"),
    ("mongo_up", "mongo_up"),
    ("mongo_scrape_error", "mongo_scrape_error"),
    ("mongo_info", "mongo_info"),
    ("mongo_rs_status", "mongo_rs_status"),
    ("mongo_rs_last_applied_timestamp_ms", "timestamp(mongo_rs_last_applied_timestamp_ms) - mongo_rs_last_applied_timestamp_ms/1000"),
    ("mysql_up", "mysql_up"),
    ("mysql_scrape_error", "mysql_scrape_error"),
    ("mysql_info", "mysql_info"),
    ("mysql_top_query_calls_per_second", "mysql_top_query_calls_per_second"),
    ("mysql_top_query_time_per_second", "mysql_top_query_time_per_second"),
    ("mysql_top_query_lock_time_per_second", "mysql_top_query_lock_time_per_second"),
    ("mysql_replication_io_status", "mysql_replication_io_status"),
    ("mysql_replication_sql_status", "mysql_replication_sql_status"),
    ("mysql_replication_lag_seconds", "mysql_replication_lag_seconds"),
    ("mysql_connections_max", "mysql_connections_max"),
    ("mysql_connections_current", "mysql_connections_current"),
    ("mysql_connections_total", "rate(mysql_connections_total[$RANGE])"),
    ("mysql_connections_aborted_total", "rate(mysql_connections_aborted_total[$RANGE])"),
    ("mysql_traffic_received_bytes_total", "rate(mysql_traffic_received_bytes_total[$RANGE])"),
    ("mysql_traffic_sent_bytes_total", "rate(mysql_traffic_sent_bytes_total[$RANGE])"),
    ("mysql_queries_total", "rate(mysql_queries_total[$RANGE])"),
    ("mysql_slow_queries_total", "rate(mysql_slow_queries_total[$RANGE])"),
    ("mysql_top_table_io_wait_time_per_second", "mysql_top_table_io_wait_time_per_second"),
    ("memcached_up", "memcached_up"),
    ("memcached_version", "memcached_version"),
    ("memcached_limit_bytes", "memcached_limit_bytes"),
    ("memcached_items_evicted_total", "rate(memcached_items_evicted_total[$RANGE])"),
    ("memcached_commands_total", "rate(memcached_commands_total[$RANGE])"),
    // flux
    ("fluxcd_git_repository_info", "fluxcd_git_repository_info"),
    ("fluxcd_git_repository_status", "fluxcd_git_repository_status"),
    ("fluxcd_oci_repository_info", "fluxcd_oci_repository_info"),
    ("fluxcd_oci_repository_status", "fluxcd_oci_repository_status"),
    ("fluxcd_helm_repository_info", "fluxcd_helm_repository_info"),
    ("fluxcd_helm_repository_status", "fluxcd_helm_repository_status"),
    ("fluxcd_helm_chart_info", "fluxcd_helm_chart_info"),
    ("fluxcd_helm_chart_status", "fluxcd_helm_chart_status"),
    ("fluxcd_helm_release_info", "fluxcd_helm_release_info"),
    ("fluxcd_helm_release_status", "fluxcd_helm_release_status"),
    ("fluxcd_kustomization_info", "fluxcd_kustomization_info"),
    ("fluxcd_kustomization_status", "fluxcd_kustomization_status"),
    ("fluxcd_kustomization_dependency_info", "fluxcd_kustomization_dependency_info"),
    ("fluxcd_kustomization_inventory_entry_info", "fluxcd_kustomization_inventory_entry_info"),
    ("fluxcd_resourceset_info", "fluxcd_resourceset_info"),
    ("fluxcd_resourceset_status", "fluxcd_resourceset_status"),
    ("fluxcd_resourceset_dependency_info", "fluxcd_resourceset_dependency_info"),
    ("fluxcd_resourceset_inventory_entry_info", "fluxcd_resourceset_inventory_entry_info"),
];

pub fn template(name: &str) -> Option<&'static str> {
    QUERIES.iter().find(|(n, _)| *n == name).map(|(_, q)| *q)
}

fn is_per_connection_histogram(name: &str) -> bool {
    name.starts_with("container_") && name.ends_with("_histogram")
}

/// One range query to run: a catalogue entry, a custom SLI query, or the
/// raw (long window) variant of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub template: String,
    pub raw: bool,
}

/// The queries of one world build, keyed by result name.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub queries: BTreeMap<String, PlannedQuery>,
}

impl QueryPlan {
    /// Builds the plan: the catalogue plus the custom SLI queries configured
    /// for individual applications.
    pub fn new(check_configs: &CheckConfigs, cluster_id: &str, per_connection_histograms: bool, raw_slis: bool) -> Self {
        let mut plan = Self::default();
        for (name, template) in QUERIES {
            if !per_connection_histograms && is_per_connection_histogram(name) {
                continue;
            }
            plan.add(name, template, false);
        }
        for key in check_configs.0.keys() {
            let Ok(app_id) = ApplicationId::parse(key, cluster_id) else {
                continue;
            };
            if app_id.cluster_id != cluster_id {
                continue;
            }
            let prefix = custom_sli_prefix(&app_id);
            let (availability, _) = check_configs.get_availability(&app_id);
            if let Some(cfg) = availability.first().filter(|c| c.custom) {
                plan.add_sli(&format!("{}total_requests", prefix), &cfg.total(), raw_slis);
                plan.add_sli(&format!("{}failed_requests", prefix), &cfg.failed(), raw_slis);
            }
            let (latency, _) = check_configs.get_latency(&app_id);
            if let Some(cfg) = latency.first().filter(|c| c.custom) {
                plan.add_sli(&format!("{}requests_histogram", prefix), &cfg.histogram(), raw_slis);
            }
        }
        plan
    }

    fn add(&mut self, name: &str, template: &str, raw: bool) {
        self.queries.insert(
            name.to_string(),
            PlannedQuery {
                template: template.to_string(),
                raw,
            },
        );
    }

    fn add_sli(&mut self, name: &str, template: &str, raw_slis: bool) {
        self.add(name, template, false);
        if raw_slis {
            self.add(&format!("{}{}", name, RAW_SUFFIX), template, true);
        }
    }

    /// name -> template of the queries in one window.
    pub fn templates(&self, raw: bool) -> BTreeMap<String, String> {
        self.queries
            .iter()
            .filter(|(_, q)| q.raw == raw)
            .map(|(n, q)| (n.clone(), q.template.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

pub fn custom_sli_prefix(app_id: &ApplicationId) -> String {
    format!("{}/{}/", Q_APPLICATION_CUSTOM_SLI, app_id)
}

/// Start of the raw window ending at `to`.
pub fn raw_from(to: Time) -> Time {
    to - worldview_core::model::MAX_ALERT_RULE_WINDOW
}

/// Raw SLI series are kept at the refresh interval, never coarser than the world step.
pub fn raw_step(refresh_interval: std::time::Duration, step: Duration) -> Duration {
    Duration::from_std(refresh_interval).min(step).max(Duration(1))
}
