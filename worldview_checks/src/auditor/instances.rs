use super::{sum, AppAuditor};
use crate::catalogue::{DEPLOYMENT_STATUS, INSTANCE_AVAILABILITY, INSTANCE_RESTARTS};
use crate::check::ReportName;

impl AppAuditor<'_> {
    pub(super) fn instances(&mut self) {
        let mut availability = self.check(&INSTANCE_AVAILABILITY);
        let mut restarts = self.check(&INSTANCE_RESTARTS);

        let mut up = 0usize;
        for i in self.instances_alive() {
            if i.is_up() {
                up += 1;
            } else {
                availability.add_item(&i.name);
            }
            for c in i.containers.values() {
                let n = sum(&c.restarts);
                if !n.is_nan() {
                    restarts.inc(n as i64);
                }
            }
        }

        // instances the controller wants but which never showed up
        let desired = self.app.desired_instances.last();
        if !desired.is_nan() {
            let known = up + availability.items.len();
            for n in known..desired as usize {
                availability.add_item(format!("missing-{}", n - known + 1));
            }
        }
        availability.set_value(up as f32);

        self.add_report(ReportName::Instances, vec![availability, restarts]);
    }

    pub(super) fn deployments(&mut self) {
        if self.app.deployments.is_empty() {
            return;
        }
        let mut check = self.check(&DEPLOYMENT_STATUS);
        let now = self.world.ctx.to;
        for d in self.app.deployments.iter().filter(|d| d.in_progress()) {
            let elapsed = (now - d.started_at).as_secs_f32();
            if elapsed > check.threshold {
                check.add_item(&d.name);
                if check.value().is_nan() || elapsed > check.value() {
                    check.set_value(elapsed);
                }
            }
        }
        self.add_report(ReportName::Deployments, vec![check]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::audit;
    use super::super::testing::*;
    use crate::catalogue::{DEPLOYMENT_STATUS, INSTANCE_AVAILABILITY, INSTANCE_RESTARTS};
    use worldview_core::model::{ApplicationDeployment, Container};
    use worldview_core::{Status, Time};

    #[test]
    fn test_unavailable_and_missing_instances() {
        let mut w = world();
        let (app, instances) = app_with_instances(&mut w, "api", 2);
        w.instances[instances[0]].pod.as_mut().unwrap().ready = ts(0.0);
        w.applications[app].desired_instances = ts(3.0);
        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(INSTANCE_AVAILABILITY.id).unwrap();
        assert_eq!(check.status, Status::Warning);
        assert_eq!(check.items.len(), 2);
        assert!(check.items.contains("api-0"));
        assert!(check.items.contains("missing-1"));
        assert_eq!(check.message, "2 instances unavailable");
    }

    #[test]
    fn test_obsolete_instances_are_ignored() {
        let mut w = world();
        let (_, instances) = app_with_instances(&mut w, "api", 2);
        w.instances[instances[1]].pod.as_mut().unwrap().phase.clear();
        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(INSTANCE_AVAILABILITY.id).unwrap();
        assert_eq!(check.status, Status::Ok);
        assert_eq!(check.value(), 1.0);
    }

    #[test]
    fn test_restarts_are_summed_across_containers() {
        let mut w = world();
        let (_, instances) = app_with_instances(&mut w, "api", 2);
        for (n, i) in instances.iter().enumerate() {
            let mut c = Container::new("id", "app");
            c.restarts = ts_fn(|p| if p == 10 + n { 1.0 } else { 0.0 });
            w.instances[*i].containers.insert("app".to_string(), c);
        }
        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(INSTANCE_RESTARTS.id).unwrap();
        assert_eq!(check.count, 2);
        assert_eq!(check.status, Status::Warning);
        assert_eq!(check.message, "app containers have been restarted 2 times");
    }

    #[test]
    fn test_stuck_rollout() {
        let mut w = world();
        let (app, _) = app_with_instances(&mut w, "api", 1);
        let to = w.ctx.to;
        w.applications[app].deployments = vec![
            ApplicationDeployment {
                name: "api-1".to_string(),
                started_at: Time(0),
                finished_at: Time(600),
                ..Default::default()
            },
            ApplicationDeployment {
                name: "api-2".to_string(),
                started_at: Time(to.0 - 1200),
                ..Default::default()
            },
        ];
        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(DEPLOYMENT_STATUS.id).unwrap();
        assert_eq!(check.status, Status::Warning);
        assert_eq!(check.message, "the rollout has already been in progress for 20m");
    }
}
