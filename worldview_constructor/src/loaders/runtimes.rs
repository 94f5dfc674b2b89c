use super::Loader;
use worldview_core::model::{DotNet, Jvm, NodeJs, Python};
use worldview_core::timeseries::merge;
use worldview_core::{MetricValues, Reducer};

impl Loader<'_> {
    /// JVM, .NET, Python and Node.js runtime series reported by the node agent.
    pub fn load_runtimes(&mut self) {
        let pods = self.instances_by_pod();
        for prefix in ["container_jvm_", "container_dotnet_", "container_python_", "container_nodejs_"] {
            for (query, metrics) in self.metrics_with_prefix(prefix) {
                for m in metrics {
                    let Some((idx, _)) = self.resolve_container(&m.labels, &pods) else {
                        continue;
                    };
                    let instance = &mut self.world.instances[idx];
                    match prefix {
                        "container_jvm_" => {
                            let jvm = instance.jvms.entry(m.label("jvm").to_string()).or_default();
                            load_jvm(jvm, query, m);
                        }
                        "container_dotnet_" => {
                            let app = instance.dotnet.entry(m.label("application").to_string()).or_default();
                            load_dotnet(app, query, m);
                        }
                        "container_python_" => {
                            let python = instance.python.get_or_insert_with(Python::default);
                            if query == "container_python_thread_lock_wait_time_seconds" {
                                merge(&mut python.gil_waiting_time, &m.values, Reducer::Any);
                            }
                        }
                        _ => {
                            let nodejs = instance.nodejs.get_or_insert_with(NodeJs::default);
                            if query == "container_nodejs_event_loop_blocked_time_seconds" {
                                merge(&mut nodejs.event_loop_blocked_time, &m.values, Reducer::Any);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn load_jvm(jvm: &mut Jvm, query: &str, m: &MetricValues) {
    match query {
        "container_jvm_info" => jvm.java_version.update(&m.values, m.label("java_version")),
        "container_jvm_heap_size_bytes" => merge(&mut jvm.heap_size, &m.values, Reducer::Any),
        "container_jvm_heap_used_bytes" => merge(&mut jvm.heap_used, &m.values, Reducer::Any),
        "container_jvm_gc_time_seconds" => {
            let ts = jvm.gc_time.entry(m.label("gc").to_string()).or_default();
            merge(ts, &m.values, Reducer::Any);
        }
        "container_jvm_safepoint_time_seconds" => merge(&mut jvm.safepoint_time, &m.values, Reducer::Any),
        "container_jvm_safepoint_sync_time_seconds" => merge(&mut jvm.safepoint_sync_time, &m.values, Reducer::Any),
        _ => {}
    }
}

fn load_dotnet(app: &mut DotNet, query: &str, m: &MetricValues) {
    match query {
        "container_dotnet_info" => {
            app.runtime_version.update(&m.values, m.label("runtime_version"));
            merge(&mut app.up, &m.values, Reducer::Any);
        }
        "container_dotnet_memory_allocated_bytes_total" => {
            merge(&mut app.memory_allocation_rate, &m.values, Reducer::Any)
        }
        "container_dotnet_exceptions_total" => merge(&mut app.exceptions, &m.values, Reducer::Any),
        "container_dotnet_memory_heap_size_bytes" => {
            let ts = app.heap_size.entry(m.label("generation").to_string()).or_default();
            merge(ts, &m.values, Reducer::Any);
        }
        "container_dotnet_gc_count_total" => {
            let ts = app.gc_count.entry(m.label("generation").to_string()).or_default();
            merge(ts, &m.values, Reducer::Any);
        }
        "container_dotnet_heap_fragmentation_percent" => {
            merge(&mut app.heap_fragmentation_percent, &m.values, Reducer::Any)
        }
        "container_dotnet_monitor_lock_contentions_total" => {
            merge(&mut app.monitor_lock_contentions, &m.values, Reducer::Any)
        }
        "container_dotnet_thread_pool_completed_items_total" => {
            merge(&mut app.thread_pool_completed_items, &m.values, Reducer::Any)
        }
        "container_dotnet_thread_pool_queue_length" => merge(&mut app.thread_pool_queue_size, &m.values, Reducer::Any),
        "container_dotnet_thread_pool_size" => merge(&mut app.thread_pool_size, &m.values, Reducer::Any),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{constant, ctx, mv};
    use super::super::Loader;
    use std::collections::BTreeMap;
    use worldview_core::World;
    use worldview_query::QueryResults;

    #[test]
    fn test_jvm() {
        let labels = [("container_id", "/system.slice/kafka.service"), ("machine_id", "m1"), ("jvm", "kafka.Kafka")];
        let metrics: QueryResults = vec![
            ("node_info".to_string(), vec![mv(&[("machine_id", "m1"), ("hostname", "n1")], constant(1.0))]),
            (
                "container_jvm_info".to_string(),
                vec![mv(&[labels[0], labels[1], labels[2], ("java_version", "17.0.2")], constant(1.0))],
            ),
            ("container_jvm_heap_used_bytes".to_string(), vec![mv(&labels, constant(1e8))]),
            (
                "container_jvm_gc_time_seconds".to_string(),
                vec![mv(&[labels[0], labels[1], labels[2], ("gc", "G1 Young Generation")], constant(0.01))],
            ),
        ]
        .into_iter()
        .collect();
        let raw = QueryResults::new();
        let mut loader = Loader::new(World::new(ctx()), &metrics, &raw, ctx(), "c1", BTreeMap::new());
        loader.load_nodes();
        loader.load_runtimes();
        let w = loader.into_world();
        let jvm = &w.instances[0].jvms["kafka.Kafka"];
        assert_eq!(jvm.java_version.value(), "17.0.2");
        assert!(jvm.is_up());
        assert_eq!(jvm.gc_time.len(), 1);
    }
}
