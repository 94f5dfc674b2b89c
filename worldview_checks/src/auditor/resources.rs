use super::{mean, sum, AppAuditor};
use crate::catalogue::{
    CPU_CONTAINER, CPU_NODE, MEMORY_LEAK, MEMORY_OOM, MEMORY_PRESSURE, STORAGE_IO, STORAGE_SPACE,
};
use crate::check::ReportName;
use worldview_core::timeseries::{merge, HOUR};
use worldview_core::{Reducer, TimeSeries};

impl AppAuditor<'_> {
    pub(super) fn cpu(&mut self) {
        let mut node_check = self.check(&CPU_NODE);
        let mut container_check = self.check(&CPU_CONTAINER);
        let mut seen = false;

        for i in self.instances_alive() {
            if let Some(node) = i.node.map(|n| &self.world.nodes[n]) {
                let (_, usage) = node.cpu_usage_percent.last_not_null();
                if !usage.is_nan() {
                    seen = true;
                    if usage > node_check.threshold {
                        node_check.add_item(node.get_name());
                    }
                }
            }
            for c in i.containers.values() {
                if c.throttled_time.is_empty() && c.cpu_usage.is_empty() {
                    continue;
                }
                seen = true;
                let throttled = mean(&c.throttled_time) * 100.0;
                if throttled > container_check.threshold {
                    container_check.add_item(format!("{}/{}", i.name, c.name));
                }
            }
        }
        if seen {
            self.add_report(ReportName::Cpu, vec![node_check, container_check]);
        }
    }

    pub(super) fn memory(&mut self) {
        let mut oom = self.check(&MEMORY_OOM);
        let mut pressure = self.check(&MEMORY_PRESSURE);
        let mut leak = self.check(&MEMORY_LEAK);
        let mut rss = TimeSeries::default();
        let mut seen = false;

        for i in self.instances_alive() {
            for c in i.containers.values() {
                if c.memory_rss.is_empty() && c.oom_kills.is_empty() {
                    continue;
                }
                seen = true;
                let kills = sum(&c.oom_kills);
                if !kills.is_nan() {
                    oom.inc(kills as i64);
                }
                let limit = c.memory_limit.last();
                let used = c.memory_rss.last();
                if limit > 0.0 && !used.is_nan() {
                    let headroom = (limit - used) / limit * 100.0;
                    if headroom < pressure.threshold {
                        pressure.add_item(format!("{}/{}", i.name, c.name));
                    }
                }
                merge(&mut rss, &c.memory_rss, Reducer::NanSum);
            }
        }
        if !seen {
            return;
        }
        leak.set_value(growth_per_hour(&rss));
        self.add_report(ReportName::Memory, vec![oom, pressure, leak]);
    }

    pub(super) fn storage(&mut self) {
        let mut space = self.check(&STORAGE_SPACE);
        let mut io = self.check(&STORAGE_IO);
        let mut seen = false;

        for i in self.instances_alive() {
            let node = i.node.map(|n| &self.world.nodes[n]);
            for v in &i.volumes {
                seen = true;
                let item = format!("{}:{}", i.name, v.mount_point);
                let usage = v.usage_percent();
                if !usage.is_nan() {
                    if space.value().is_nan() || usage > space.value() {
                        space.set_value(usage);
                    }
                    if usage > space.threshold {
                        space.add_item(&item);
                    }
                }
                let util = node
                    .and_then(|n| n.disks.get(v.device.value()))
                    .map(|d| d.io_util_percent.last())
                    .unwrap_or(f32::NAN);
                if util > io.threshold {
                    io.add_item(item);
                }
            }
        }
        if seen {
            self.add_report(ReportName::Storage, vec![space, io]);
        }
    }
}

/// Relative growth of `ts` per hour, in percent, between its first and last
/// defined points. NaN when the series spans less than an hour.
fn growth_per_hour(ts: &TimeSeries) -> f32 {
    let mut defined = ts.iter().filter(|(_, v)| !v.is_nan());
    let Some((t0, first)) = defined.next() else {
        return f32::NAN;
    };
    let Some((t1, last)) = defined.last() else {
        return f32::NAN;
    };
    let span = t1 - t0;
    if span < HOUR || first <= 0.0 {
        return f32::NAN;
    }
    (last - first) / first * 100.0 / (span.0 as f32 / HOUR.0 as f32)
}
