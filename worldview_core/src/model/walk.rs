use super::world::World;
use crate::timeseries::{HistogramBucket, TimeSeries};

/// Visits every series attached to `world` with a readable path.
pub fn walk_series(world: &World, f: &mut dyn FnMut(&str, &TimeSeries)) {
    for node in &world.nodes {
        let p = format!("node[{}]", node.get_name());
        for (name, ts) in [
            ("uptime", &node.uptime),
            ("cpu_capacity", &node.cpu_capacity),
            ("cpu_usage_percent", &node.cpu_usage_percent),
            ("memory_total_bytes", &node.memory_total_bytes),
            ("memory_available_bytes", &node.memory_available_bytes),
            ("memory_free_bytes", &node.memory_free_bytes),
            ("memory_cached_bytes", &node.memory_cached_bytes),
        ] {
            f(&format!("{}.{}", p, name), ts);
        }
        for (mode, ts) in &node.cpu_usage_by_mode {
            f(&format!("{}.cpu_usage_by_mode[{}]", p, mode), ts);
        }
        for (dev, d) in &node.disks {
            for (name, ts) in [
                ("read_time", &d.read_time),
                ("write_time", &d.write_time),
                ("reads", &d.reads),
                ("writes", &d.writes),
                ("read_bytes", &d.read_bytes),
                ("written_bytes", &d.written_bytes),
                ("io_util_percent", &d.io_util_percent),
                ("wait", &d.wait),
                ("await", &d.await_time),
            ] {
                f(&format!("{}.disk[{}].{}", p, dev, name), ts);
            }
        }
        for i in &node.net_interfaces {
            f(&format!("{}.net[{}].up", p, i.name), &i.up);
            f(&format!("{}.net[{}].rx_bytes", p, i.name), &i.rx_bytes);
            f(&format!("{}.net[{}].tx_bytes", p, i.name), &i.tx_bytes);
        }
    }

    for app in &world.applications {
        let p = format!("app[{}]", app.id);
        f(&format!("{}.desired_instances", p), &app.desired_instances);
        for (i, sli) in app.availability_slis.iter().enumerate() {
            f(&format!("{}.availability[{}].total", p, i), &sli.total_requests);
            f(&format!("{}.availability[{}].failed", p, i), &sli.failed_requests);
        }
        for (i, sli) in app.latency_slis.iter().enumerate() {
            buckets(&format!("{}.latency[{}]", p, i), &sli.histogram, f);
        }
        for (level, msgs) in &app.log_messages {
            f(&format!("{}.logs[{}]", p, level), &msgs.messages);
            for (hash, pattern) in &msgs.patterns {
                f(&format!("{}.logs[{}].pattern[{}]", p, level, hash), &pattern.messages);
            }
        }
        for (req, by_status) in &app.dns.requests {
            for (status, ts) in by_status {
                f(&format!("{}.dns[{} {}][{}]", p, req.kind, req.domain, status), ts);
            }
        }
        buckets(&format!("{}.dns_latency", p), &app.dns.histogram, f);
        f(&format!("{}.traffic.internet_egress", p), &app.traffic.internet_egress);
        f(&format!("{}.traffic.cross_az_egress", p), &app.traffic.cross_az_egress);
        f(&format!("{}.traffic.cross_az_ingress", p), &app.traffic.cross_az_ingress);
    }

    for (idx, instance) in world.instances.iter().enumerate() {
        let p = format!("instance[{}/{}]", world.owner_of(idx).id, instance.name);
        if let Some(pod) = &instance.pod {
            f(&format!("{}.pod.life_span", p), &pod.life_span);
            f(&format!("{}.pod.running", p), &pod.running);
            f(&format!("{}.pod.ready", p), &pod.ready);
        }
        for v in &instance.volumes {
            f(&format!("{}.volume[{}].capacity", p, v.mount_point), &v.capacity_bytes);
            f(&format!("{}.volume[{}].used", p, v.mount_point), &v.used_bytes);
        }
        for c in instance.containers.values() {
            for (name, ts) in [
                ("cpu_limit", &c.cpu_limit),
                ("cpu_request", &c.cpu_request),
                ("cpu_usage", &c.cpu_usage),
                ("cpu_delay", &c.cpu_delay),
                ("throttled_time", &c.throttled_time),
                ("memory_rss", &c.memory_rss),
                ("memory_cache", &c.memory_cache),
                ("memory_limit", &c.memory_limit),
                ("memory_request", &c.memory_request),
                ("oom_kills", &c.oom_kills),
                ("restarts", &c.restarts),
            ] {
                f(&format!("{}.container[{}].{}", p, c.name, name), ts);
            }
        }
        f(&format!("{}.cluster_role", p), &instance.cluster_role());
        if let Some(pg) = &instance.postgres {
            for (name, ts) in [("up", &pg.up), ("avg", &pg.avg), ("p50", &pg.p50), ("p95", &pg.p95), ("p99", &pg.p99)] {
                f(&format!("{}.postgres.{}", p, name), ts);
            }
        }
        if let Some(r) = &instance.redis {
            f(&format!("{}.redis.up", p), &r.up);
            for (cmd, ts) in r.calls.iter().chain(r.calls_time.iter()) {
                f(&format!("{}.redis.calls[{}]", p, cmd), ts);
            }
        }
        if let Some(m) = &instance.mongodb {
            f(&format!("{}.mongodb.up", p), &m.up);
        }
        if let Some(m) = &instance.mysql {
            f(&format!("{}.mysql.up", p), &m.up);
            f(&format!("{}.mysql.queries", p), &m.queries);
        }
        if let Some(m) = &instance.memcached {
            f(&format!("{}.memcached.up", p), &m.up);
        }
        if let Some(rds) = &instance.rds {
            f(&format!("{}.rds.life_span", p), &rds.life_span);
        }
        for (name, jvm) in &instance.jvms {
            f(&format!("{}.jvm[{}].heap_used", p, name), &jvm.heap_used);
            f(&format!("{}.jvm[{}].safepoint_time", p, name), &jvm.safepoint_time);
        }
    }

    for (idx, c) in world.connections.iter().enumerate() {
        let p = format!("connection[{}:{}#{}]", c.actual_remote_ip, c.actual_remote_port, idx);
        for (name, ts) in [
            ("rtt", &c.rtt),
            ("successful", &c.successful_connections),
            ("active", &c.active),
            ("failed", &c.failed_connections),
            ("retransmissions", &c.retransmissions),
            ("bytes_sent", &c.bytes_sent),
            ("bytes_received", &c.bytes_received),
        ] {
            f(&format!("{}.{}", p, name), ts);
        }
        for (proto, by_status) in &c.requests_count {
            for (status, ts) in by_status {
                f(&format!("{}.requests[{}][{}]", p, proto, status), ts);
            }
        }
        for (proto, ts) in &c.requests_latency {
            f(&format!("{}.latency[{}]", p, proto), ts);
        }
        for (proto, h) in &c.requests_histogram {
            buckets(&format!("{}.histogram[{}]", p, proto), h, f);
        }
    }
}

fn buckets(prefix: &str, h: &[HistogramBucket], f: &mut dyn FnMut(&str, &TimeSeries)) {
    for b in h {
        f(&format!("{}[le={}]", prefix, b.le), &b.series);
    }
}

/// Paths of present series that are not bound to the world grid.
pub fn grid_violations(world: &World) -> Vec<String> {
    let mut res = Vec::new();
    walk_series(world, &mut |path, ts| {
        if !ts.is_empty() && !ts.matches(&world.ctx) {
            res.push(format!("{}: {}", path, ts));
        }
    });
    res
}
