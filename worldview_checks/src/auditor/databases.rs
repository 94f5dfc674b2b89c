use super::AppAuditor;
use crate::catalogue::{
    JVM_AVAILABILITY, JVM_SAFEPOINT_TIME, POSTGRES_AVAILABILITY, POSTGRES_CONNECTIONS, POSTGRES_LATENCY,
    POSTGRES_REPLICATION_LAG, REDIS_AVAILABILITY, REDIS_LATENCY,
};
use crate::check::{Check, ReportName};
use std::collections::BTreeMap;
use worldview_core::model::ClusterRole;
use worldview_core::{Time, TimeSeries};

impl AppAuditor<'_> {
    pub(super) fn postgres(&mut self) {
        let instances: Vec<_> = self
            .instances_alive()
            .filter_map(|i| i.postgres.as_ref().map(|pg| (i, pg)))
            .collect();
        if instances.is_empty() {
            return;
        }
        let mut availability = self.check(&POSTGRES_AVAILABILITY);
        let mut latency = self.check(&POSTGRES_LATENCY);
        let mut lag = self.check(&POSTGRES_REPLICATION_LAG);
        let mut connections = self.check(&POSTGRES_CONNECTIONS);

        let primary_lsn = instances
            .iter()
            .find(|(i, _)| i.cluster_role_last() == ClusterRole::Primary)
            .map(|(_, pg)| &pg.wal_current_lsn);

        for (i, pg) in &instances {
            if !pg.is_up() {
                availability.add_item(&i.name);
                continue;
            }
            if pg.avg.last() > latency.threshold {
                latency.add_item(&i.name);
            }
            let max = pg.setting("max_connections");
            if max > 0.0 && pg.total_connections() / max * 100.0 > connections.threshold {
                connections.add_item(&i.name);
            }
            if i.cluster_role_last() != ClusterRole::Replica {
                continue;
            }
            if let Some(primary) = primary_lsn {
                let seconds = replication_lag(primary, pg.wal_reply_lsn.last(), self.world.ctx.to);
                if seconds > lag.threshold {
                    lag.add_item(&i.name);
                    max_value(&mut lag, seconds);
                }
            }
        }
        self.add_report(
            ReportName::Postgres,
            vec![availability, latency, lag, connections],
        );
    }

    pub(super) fn redis(&mut self) {
        let mut availability = self.check(&REDIS_AVAILABILITY);
        let mut latency = self.check(&REDIS_LATENCY);
        let mut seen = false;
        for i in self.instances_alive() {
            let Some(redis) = &i.redis else {
                continue;
            };
            seen = true;
            if !redis.is_up() {
                availability.add_item(&i.name);
                continue;
            }
            let avg = avg_latency(&redis.calls_time, &redis.calls);
            if avg > latency.threshold {
                latency.add_item(&i.name);
                max_value(&mut latency, avg);
            }
        }
        if seen {
            self.add_report(ReportName::Redis, vec![availability, latency]);
        }
    }

    pub(super) fn jvm(&mut self) {
        let mut availability = self.check(&JVM_AVAILABILITY);
        let mut safepoints = self.check(&JVM_SAFEPOINT_TIME);
        let mut seen = false;
        for i in self.instances_alive() {
            for (name, jvm) in &i.jvms {
                seen = true;
                let item = format!("{}/{}", i.name, name);
                if !jvm.is_up() {
                    availability.add_item(item);
                    continue;
                }
                let t = jvm.safepoint_time.last();
                if t > safepoints.threshold {
                    safepoints.add_item(item);
                    max_value(&mut safepoints, t);
                }
            }
        }
        if seen {
            self.add_report(ReportName::Jvm, vec![availability, safepoints]);
        }
    }
}

fn max_value(check: &mut Check, v: f32) {
    if check.value().is_nan() || v > check.value() {
        check.set_value(v);
    }
}

/// Seconds since the primary was at `replica_lsn`. When the primary was
/// already ahead for the whole window, the window start is used.
fn replication_lag(primary_lsn: &TimeSeries, replica_lsn: f32, now: Time) -> f32 {
    if primary_lsn.is_empty() || replica_lsn.is_nan() {
        return f32::NAN;
    }
    if primary_lsn.last_not_null().1 <= replica_lsn {
        return 0.0;
    }
    let reached = primary_lsn
        .iter()
        .filter(|(_, v)| !v.is_nan() && *v <= replica_lsn)
        .map(|(t, _)| t)
        .last()
        .unwrap_or(primary_lsn.from());
    (now - reached).as_secs_f32()
}

/// Average command latency over the last point.
fn avg_latency(time: &BTreeMap<String, TimeSeries>, calls: &BTreeMap<String, TimeSeries>) -> f32 {
    let total = |m: &BTreeMap<String, TimeSeries>| -> f32 {
        m.values().map(|ts| ts.last()).filter(|v| !v.is_nan()).sum()
    };
    let calls = total(calls);
    if calls <= 0.0 {
        return f32::NAN;
    }
    total(time) / calls
}

#[cfg(test)]
mod tests {
    use super::super::audit;
    use super::super::testing::*;
    use super::*;
    use worldview_core::model::databases::PgSetting;
    use worldview_core::model::{Jvm, Postgres, Redis};
    use worldview_core::Status;

    fn pg(lsn: TimeSeries, reply: TimeSeries) -> Postgres {
        let mut pg = Postgres {
            up: ts(1.0),
            avg: ts(0.01),
            wal_current_lsn: lsn,
            wal_reply_lsn: reply,
            ..Default::default()
        };
        pg.settings.insert(
            "max_connections".into(),
            PgSetting {
                samples: ts(100.0),
                unit: String::new(),
            },
        );
        pg
    }

    #[test]
    fn test_replica_lagging_behind() {
        let mut w = world();
        let (_, instances) = app_with_instances(&mut w, "pg", 3);
        let lsn = ts_fn(|p| p as f32 * 1000.0);
        w.instances[instances[0]].postgres = Some(pg(lsn.clone(), TimeSeries::default()));
        w.instances[instances[0]].update_cluster_role("primary", &ts(1.0));
        // replayed up to the primary's position twenty minutes ago
        w.instances[instances[1]].postgres = Some(pg(TimeSeries::default(), ts(40_000.0)));
        w.instances[instances[1]].update_cluster_role("replica", &ts(1.0));
        let mut down = pg(TimeSeries::default(), TimeSeries::default());
        down.up = ts(0.0);
        w.instances[instances[2]].postgres = Some(down);

        let audit = audit(&w);
        let a = audit.get(&app_id("pg")).unwrap();
        let (check, report) = a.check(POSTGRES_REPLICATION_LAG.id).unwrap();
        assert_eq!(report, ReportName::Postgres);
        assert!(check.items.contains("pg-1"));
        assert_eq!(check.value(), 1200.0);
        let (check, _) = a.check(POSTGRES_AVAILABILITY.id).unwrap();
        assert_eq!(check.message, "1 postgres instance unavailable");
        let (check, _) = a.check(POSTGRES_CONNECTIONS.id).unwrap();
        assert_eq!(check.status, Status::Ok);
    }

    #[test]
    fn test_replication_lag() {
        let lsn = ts_fn(|p| p as f32);
        assert_eq!(replication_lag(&lsn, 60.0, Time(3600)), 0.0);
        assert_eq!(replication_lag(&lsn, 50.0, Time(3600)), 600.0);
        assert_eq!(replication_lag(&lsn, -1.0, Time(3600)), 3600.0);
        assert!(replication_lag(&lsn, f32::NAN, Time(3600)).is_nan());
    }

    #[test]
    fn test_redis_and_jvm() {
        let mut w = world();
        let (_, instances) = app_with_instances(&mut w, "cache", 1);
        let mut redis = Redis {
            up: ts(1.0),
            ..Default::default()
        };
        redis.calls.insert("get".into(), ts(100.0));
        redis.calls_time.insert("get".into(), ts(1.0));
        w.instances[instances[0]].redis = Some(redis);
        w.instances[instances[0]].jvms.insert(
            "app.jar".into(),
            Jvm {
                heap_used: ts(1e6),
                safepoint_time: ts(0.2),
                ..Default::default()
            },
        );

        let audit = audit(&w);
        let a = audit.get(&app_id("cache")).unwrap();
        let (check, _) = a.check(REDIS_LATENCY.id).unwrap();
        assert!(check.items.contains("cache-0"));
        assert_eq!(check.formatted_value(), "10ms");
        let (check, _) = a.check(JVM_SAFEPOINT_TIME.id).unwrap();
        assert!(check.items.contains("cache-0/app.jar"));
        assert_eq!(a.report(ReportName::Jvm).unwrap().status, Status::Warning);
    }
}
