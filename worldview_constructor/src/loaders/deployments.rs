use super::Loader;
use std::collections::{BTreeMap, BTreeSet};
use worldview_core::model::{AppIdx, ApplicationDeployment, LogLevel, MetricsSnapshot};
use worldview_core::timeseries::merge;
use worldview_core::{ApplicationKind, Context, Reducer, Time, TimeSeries};

/// When a replica set was seen running within the window.
struct ReplicaSetSpan {
    name: String,
    first: Time,
    last: Time,
    images: BTreeSet<String>,
}

fn active_span(ts: &TimeSeries) -> Option<(Time, Time)> {
    let mut active = ts.iter().filter(|(_, v)| *v > 0.0).map(|(t, _)| t);
    let first = active.next()?;
    Some((first, active.last().unwrap_or(first)))
}

/// Rollouts of one Deployment: every replica set appearing after the start of
/// the window replaces the ones seen before it. A rollout is finished once
/// all older replica sets are gone.
fn rollouts(ctx: &Context, mut spans: Vec<ReplicaSetSpan>) -> Vec<ApplicationDeployment> {
    spans.sort_by(|a, b| a.first.cmp(&b.first).then_with(|| a.name.cmp(&b.name)));
    let mut res = Vec::new();
    for i in 1..spans.len() {
        let rs = &spans[i];
        if rs.first <= ctx.from {
            continue;
        }
        let Some(older_last) = spans[..i].iter().map(|s| s.last).max() else {
            continue;
        };
        let finished_at = if older_last < rs.first {
            rs.first
        } else if older_last >= ctx.to {
            Time(0)
        } else {
            older_last + ctx.step
        };
        res.push(ApplicationDeployment {
            name: rs.name.clone(),
            started_at: rs.first,
            finished_at,
            container_images: rs.images.iter().cloned().collect(),
            metrics_snapshot: None,
        });
    }
    res
}

fn window_values(ts: &TimeSeries, from: Time, to: Time) -> impl Iterator<Item = f32> + '_ {
    ts.iter()
        .filter(move |(t, v)| *t >= from && *t < to && !v.is_nan())
        .map(|(_, v)| v)
}

/// Total count of a per-second rate within `[from, to)`.
fn window_count(ts: &TimeSeries, from: Time, to: Time, step: f32) -> i64 {
    (window_values(ts, from, to).sum::<f32>() * step).round() as i64
}

/// Sum of per-step counts within `[from, to)`.
fn window_sum(ts: &TimeSeries, from: Time, to: Time) -> i64 {
    window_values(ts, from, to).sum::<f32>().round() as i64
}

fn window_avg(ts: &TimeSeries, from: Time, to: Time) -> f32 {
    let (sum, n) = window_values(ts, from, to).fold((0.0, 0), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        return 0.0;
    }
    sum / n as f32
}

impl Loader<'_> {
    /// Rollouts of Deployments derived from the life spans of their replica
    /// sets, with a metrics snapshot for those that settled early enough.
    pub fn load_deployments(&mut self) {
        let ctx = self.world.ctx;
        for app in 0..self.world.applications.len() {
            if self.world.applications[app].id.kind != ApplicationKind::Deployment {
                continue;
            }
            let mut by_rs: BTreeMap<String, (TimeSeries, BTreeSet<String>)> = BTreeMap::new();
            for instance in self.world.app_instances(app) {
                let Some(pod) = instance.pod.as_ref().filter(|p| !p.replica_set.is_empty()) else {
                    continue;
                };
                let (life_span, images) = by_rs.entry(pod.replica_set.clone()).or_default();
                merge(life_span, &pod.life_span, Reducer::NanSum);
                images.extend(
                    instance
                        .containers
                        .values()
                        .filter(|c| !c.init && !c.image.is_empty())
                        .map(|c| c.image.clone()),
                );
            }
            let spans = by_rs
                .into_iter()
                .filter_map(|(name, (life_span, images))| {
                    let (first, last) = active_span(&life_span)?;
                    Some(ReplicaSetSpan {
                        name,
                        first,
                        last,
                        images,
                    })
                })
                .collect();
            let mut deployments = rollouts(&ctx, spans);
            for d in &mut deployments {
                d.metrics_snapshot = self.metrics_snapshot(app, d);
            }
            self.world.applications[app].deployments = deployments;
        }
    }

    fn metrics_snapshot(&self, app: AppIdx, d: &ApplicationDeployment) -> Option<MetricsSnapshot> {
        let (from, to) = d.snapshot_window()?;
        let ctx = &self.world.ctx;
        if to > ctx.to {
            return None;
        }
        let step = ctx.step.as_secs_f32();
        let mut snapshot = MetricsSnapshot {
            timestamp: from,
            duration: to - from,
            ..Default::default()
        };

        for c in self.world.downstream_connections(app) {
            snapshot.requests += window_count(&c.requests_sum(), from, to, step);
            snapshot.errors += window_count(&c.errors_sum(), from, to, step);
        }
        if let Some(sli) = self.world.applications[app].latency_slis.first() {
            for b in &sli.histogram {
                snapshot.latency.insert(b.le.to_string(), window_count(&b.series, from, to, step));
            }
        }

        let mut cpu = TimeSeries::default();
        for instance in self.world.app_instances(app) {
            for c in instance.containers.values() {
                snapshot.restarts += window_sum(&c.restarts, from, to);
                snapshot.oom_kills += window_sum(&c.oom_kills, from, to);
                merge(&mut cpu, &c.cpu_usage, Reducer::NanSum);
            }
        }
        snapshot.cpu_usage = window_avg(&cpu, from, to);

        for (level, msgs) in &self.world.applications[app].log_messages {
            match level {
                LogLevel::Error | LogLevel::Critical => snapshot.log_errors += window_sum(&msgs.messages, from, to),
                LogLevel::Warning => snapshot.log_warnings += window_sum(&msgs.messages, from, to),
                _ => {}
            }
        }
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldview_core::model::{Container, Pod};
    use worldview_core::{ApplicationId, Duration, World};

    fn grid() -> Context {
        Context::new(Time(0), Time(3600), Duration(60))
    }

    fn life_span(ctx: &Context, from: i64, to: i64) -> TimeSeries {
        TimeSeries::filled(ctx, 1.0).map(|t, v| if t.0 >= from && t.0 <= to { v } else { f32::NAN })
    }

    fn pod(w: &mut World, app: AppIdx, name: &str, rs: &str, from: i64, to: i64, image: &str) {
        let ctx = w.ctx;
        let i = w.get_or_create_instance(app, name, None);
        w.instances[i].pod = Some(Pod {
            phase: "Running".into(),
            replica_set: rs.into(),
            life_span: life_span(&ctx, from, to),
            ..Default::default()
        });
        let mut c = Container::new(name, "app");
        c.image = image.into();
        c.restarts = TimeSeries::filled(&ctx, 0.0);
        w.instances[i].containers.insert("app".into(), c);
    }

    #[test]
    fn test_rollout() {
        let mut w = World::new(grid());
        let app = w.get_or_create_application(ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "api"), false);
        pod(&mut w, app, "api-aaa-1", "api-aaa", 0, 900, "api:1");
        pod(&mut w, app, "api-bbb-1", "api-bbb", 600, 3600, "api:2");
        pod(&mut w, app, "api-ccc-1", "api-ccc", 3000, 3600, "api:3");

        let empty = worldview_query::QueryResults::new();
        let mut loader = Loader::new(w, &empty, &empty, grid(), "c1", BTreeMap::new());
        loader.load_deployments();
        let w = loader.into_world();

        let deployments = &w.applications[app].deployments;
        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments[0].name, "api-bbb");
        assert_eq!(deployments[0].started_at, Time(600));
        assert_eq!(deployments[0].finished_at, Time(960));
        assert_eq!(deployments[0].container_images, vec!["api:2".to_string()]);
        let snapshot = deployments[0].metrics_snapshot.as_ref().expect("snapshot");
        assert_eq!(snapshot.timestamp, Time(1560));
        assert_eq!(snapshot.restarts, 0);

        assert_eq!(deployments[1].name, "api-ccc");
        assert!(deployments[1].in_progress());
        assert!(deployments[1].metrics_snapshot.is_none());
    }

    #[test]
    fn test_replica_set_present_from_the_start_is_not_a_rollout() {
        let spans = vec![ReplicaSetSpan {
            name: "a".into(),
            first: Time(0),
            last: Time(3600),
            images: BTreeSet::new(),
        }];
        assert!(rollouts(&grid(), spans).is_empty());
    }
}
