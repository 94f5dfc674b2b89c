use super::Loader;
use worldview_core::model::events::sort_events;
use worldview_core::model::{AppIdx, ApplicationEvent, ApplicationEventType, ClusterRole, Instance};
use worldview_core::{Aggregate, Reducer, Time, TimeSeries, World};

impl Loader<'_> {
    /// Rollouts, cluster switchovers and database instance up/down edges of
    /// every application, ordered by start time then details.
    pub fn calc_events(&mut self) {
        for app in 0..self.world.applications.len() {
            let mut events = rollouts(&self.world, app);
            events.extend(switchovers(&self.world, app));
            events.extend(up_down_events(&self.world, app));
            sort_events(&mut events);
            self.world.applications[app].events = events;
        }
    }
}

fn rollouts(world: &World, app: AppIdx) -> Vec<ApplicationEvent> {
    world.applications[app]
        .deployments
        .iter()
        .filter(|d| d.started_at >= world.ctx.from)
        .map(|d| ApplicationEvent {
            start: d.started_at,
            end: d.finished_at,
            kind: ApplicationEventType::Rollout,
            details: d.name.clone(),
        })
        .collect()
}

/// Index of the only primary at each step: NaN without one, -1 when several
/// instances claim the role at once.
fn primary_index() -> Reducer {
    Reducer::custom(|_, acc, v| {
        if acc < 0.0 || (!acc.is_nan() && !v.is_nan()) {
            return -1.0;
        }
        if v.is_nan() {
            acc
        } else {
            v
        }
    })
}

fn switchovers(world: &World, app: AppIdx) -> Vec<ApplicationEvent> {
    let instances: Vec<&Instance> = world.app_instances(app).collect();
    let mut agg = Aggregate::new(primary_index());
    for (i, instance) in instances.iter().enumerate() {
        let role = instance.cluster_role();
        if role.is_empty() {
            continue;
        }
        let num = i as f32;
        agg.add(&role.map(|_, v| if v == ClusterRole::Primary as i32 as f32 { num } else { f32::NAN }));
    }
    if agg.is_empty() {
        return Vec::new();
    }
    let Ok(primary) = agg.get() else {
        return Vec::new();
    };
    let name = |idx: f32| instances.get(idx as usize).map(|i| i.name.as_str()).unwrap_or("");

    let mut events = Vec::new();
    let mut event: Option<ApplicationEvent> = None;
    let mut prev = -1.0;
    for (t, curr) in primary.iter() {
        if prev < 0.0 {
            if !curr.is_nan() && curr >= 0.0 {
                prev = curr;
            }
            continue;
        }
        if curr != prev && event.is_none() {
            event = Some(ApplicationEvent {
                start: t,
                end: Time(0),
                kind: ApplicationEventType::Switchover,
                details: format!("{} → ", name(prev)),
            });
        }
        if curr != prev && !curr.is_nan() && curr >= 0.0 {
            if let Some(mut e) = event.take() {
                e.end = t;
                e.details.push_str(name(curr));
                events.push(e);
            }
        }
        if !curr.is_nan() && curr >= 0.0 {
            prev = curr;
        }
    }
    events
}

fn up_down_events(world: &World, app: AppIdx) -> Vec<ApplicationEvent> {
    let mut events = Vec::new();
    for instance in world.app_instances(app) {
        let up: &TimeSeries = match (&instance.postgres, &instance.redis, &instance.mongodb, &instance.mysql) {
            (Some(pg), ..) if !pg.up.is_empty() => &pg.up,
            (_, Some(redis), ..) if !redis.up.is_empty() => &redis.up,
            (_, _, Some(mongo), _) if !mongo.up.is_empty() => &mongo.up,
            (.., Some(mysql)) if !mysql.up.is_empty() => &mysql.up,
            _ => continue,
        };
        let mut was_up: Option<bool> = None;
        for (t, v) in up.iter() {
            let is_up = v == 1.0;
            match was_up {
                Some(true) if !is_up => events.push(ApplicationEvent {
                    start: t,
                    end: Time(0),
                    kind: ApplicationEventType::InstanceDown,
                    details: instance.name.clone(),
                }),
                Some(false) if is_up => events.push(ApplicationEvent {
                    start: t,
                    end: Time(0),
                    kind: ApplicationEventType::InstanceUp,
                    details: instance.name.clone(),
                }),
                _ => {}
            }
            was_up = Some(is_up);
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::super::testing::ctx;
    use super::super::Loader;
    use std::collections::BTreeMap;
    use worldview_core::model::{ApplicationDeployment, ApplicationEventType, Postgres};
    use worldview_core::{ApplicationId, ApplicationKind, Time, TimeSeries, World};
    use worldview_query::QueryResults;

    fn role(from: i64, to: i64) -> TimeSeries {
        TimeSeries::filled(&ctx(), 1.0).map(|t, _| if t.0 >= from && t.0 <= to { 1.0 } else { 0.0 })
    }

    #[test]
    fn test_switchover_is_sorted_before_later_rollout() {
        let mut w = World::new(ctx());
        let app = w.get_or_create_application(ApplicationId::new("c1", "db", ApplicationKind::StatefulSet, "pg"), false);
        let pg0 = w.get_or_create_instance(app, "pg-0", None);
        let pg1 = w.get_or_create_instance(app, "pg-1", None);
        w.instances[pg0].update_cluster_role("primary", &role(0, 300));
        w.instances[pg0].update_cluster_role("replica", &role(330, 600));
        w.instances[pg1].update_cluster_role("replica", &role(0, 300));
        w.instances[pg1].update_cluster_role("primary", &role(330, 600));
        w.applications[app].deployments.push(ApplicationDeployment {
            name: "pg-7d9f".into(),
            started_at: Time(450),
            ..Default::default()
        });

        let empty = QueryResults::new();
        let mut loader = Loader::new(w, &empty, &empty, ctx(), "c1", BTreeMap::new());
        loader.calc_events();
        let w = loader.into_world();

        let events = &w.applications[app].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ApplicationEventType::Switchover);
        assert_eq!(events[0].start, Time(330));
        assert_eq!(events[0].details, "pg-0 → pg-1");
        assert_eq!(events[1].kind, ApplicationEventType::Rollout);
    }

    #[test]
    fn test_instance_up_down() {
        let mut w = World::new(ctx());
        let app = w.get_or_create_application(ApplicationId::new("c1", "db", ApplicationKind::StatefulSet, "pg"), false);
        let pg0 = w.get_or_create_instance(app, "pg-0", None);
        let up = TimeSeries::filled(&ctx(), 1.0).map(|t, _| if t.0 >= 120 && t.0 < 240 { 0.0 } else { 1.0 });
        w.instances[pg0].postgres = Some(Postgres {
            up,
            ..Default::default()
        });

        let empty = QueryResults::new();
        let mut loader = Loader::new(w, &empty, &empty, ctx(), "c1", BTreeMap::new());
        loader.calc_events();
        let w = loader.into_world();

        let kinds: Vec<(ApplicationEventType, Time)> =
            w.applications[app].events.iter().map(|e| (e.kind, e.start)).collect();
        assert_eq!(
            kinds,
            vec![(ApplicationEventType::InstanceDown, Time(120)), (ApplicationEventType::InstanceUp, Time(240))]
        );
    }
}
