//! Evaluates the check catalogue against a built world.
//!
//! Every application gets a set of reports, one per concern. A report is
//! added only when the application has something to say about it (no
//! Postgres report for an app without Postgres instances).

mod databases;
mod instances;
mod logs;
mod network;
mod resources;
mod slo;

use crate::burnrate::{self, BurnRateRule};
use crate::catalogue::{CheckSpec, INSTANCE_AVAILABILITY};
use crate::check::{AuditReport, Check, ReportName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};
use worldview_core::model::{AppIdx, CheckConfigs};
use worldview_core::{Application, ApplicationId, Instance, Status, World};

/// Audit result of one application.
#[derive(Debug, Clone, Serialize)]
pub struct AppAudit {
    pub id: ApplicationId,
    pub category: String,
    pub status: Status,
    pub reports: Vec<AuditReport>,
}

impl AppAudit {
    pub fn report(&self, name: ReportName) -> Option<&AuditReport> {
        self.reports.iter().find(|r| r.name == name)
    }

    /// Finds a check by id together with the report that holds it.
    pub fn check(&self, id: &str) -> Option<(&Check, ReportName)> {
        self.reports
            .iter()
            .find_map(|r| r.check(id).map(|c| (c, r.name)))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Audit {
    pub applications: BTreeMap<ApplicationId, AppAudit>,
}

impl Audit {
    pub fn get(&self, id: &ApplicationId) -> Option<&AppAudit> {
        self.applications.get(id)
    }

    /// Copies every application's worst report status onto the world.
    pub fn apply_statuses(&self, world: &mut World) {
        for app in world.applications.iter_mut() {
            if let Some(audit) = self.applications.get(&app.id) {
                app.status = audit.status;
            }
        }
    }

    pub fn count_by_status(&self) -> BTreeMap<Status, usize> {
        let mut res = BTreeMap::new();
        for a in self.applications.values() {
            *res.entry(a.status).or_insert(0) += 1;
        }
        res
    }
}

#[derive(Debug, Clone)]
pub struct Auditor {
    burn_rate_rules: Vec<BurnRateRule>,
}

impl Default for Auditor {
    fn default() -> Self {
        Self::new()
    }
}

impl Auditor {
    pub fn new() -> Self {
        Self {
            burn_rate_rules: burnrate::rules(false),
        }
    }

    /// Adds the 3d/6h burn-rate rule; the raw SLI series must cover three days.
    pub fn with_slow_burn(mut self) -> Self {
        self.burn_rate_rules = burnrate::rules(true);
        self
    }

    pub fn audit(&self, world: &World) -> Audit {
        let start = Instant::now();
        let mut audit = Audit::default();
        for (idx, app) in world.applications.iter().enumerate() {
            if app.removed {
                continue;
            }
            let res = AppAuditor::new(world, idx, &self.burn_rate_rules).run();
            debug!("{}: {} ({} reports)", app.id, res.status, res.reports.len());
            audit.applications.insert(app.id.clone(), res);
        }
        info!(
            "Audited {} applications in {:?}",
            audit.applications.len(),
            start.elapsed()
        );
        audit
    }
}

/// Audits `world` with the default burn-rate rules.
pub fn audit(world: &World) -> Audit {
    Auditor::new().audit(world)
}

pub(crate) struct AppAuditor<'a> {
    world: &'a World,
    idx: AppIdx,
    app: &'a Application,
    burn_rate_rules: &'a [BurnRateRule],
    reports: Vec<AuditReport>,
}

impl<'a> AppAuditor<'a> {
    fn new(world: &'a World, idx: AppIdx, burn_rate_rules: &'a [BurnRateRule]) -> Self {
        Self {
            world,
            idx,
            app: &world.applications[idx],
            burn_rate_rules,
            reports: Vec::new(),
        }
    }

    fn run(mut self) -> AppAudit {
        if self.app.is_external() {
            self.external();
        } else {
            self.slo();
            self.instances();
            self.deployments();
            self.cpu();
            self.memory();
            self.storage();
            self.network();
            self.dns();
            self.logs();
            self.postgres();
            self.redis();
            self.jvm();
        }
        let status = self
            .reports
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(Status::Unknown);
        AppAudit {
            id: self.app.id.clone(),
            category: self.app.category.clone(),
            status,
            reports: self.reports,
        }
    }

    fn configs(&self) -> &'a CheckConfigs {
        &self.world.check_configs
    }

    /// A check with the threshold configured for this application.
    fn check(&self, spec: &'static CheckSpec) -> Check {
        let threshold = self
            .configs()
            .get_simple(spec.id, &self.app.id, spec.default_threshold)
            .threshold;
        Check::new(spec, threshold)
    }

    /// Non-obsolete instances of the application.
    fn instances_alive(&self) -> impl Iterator<Item = &'a Instance> + 'a {
        self.world.app_instances(self.idx).filter(|i| !i.is_obsolete())
    }

    fn add_report(&mut self, name: ReportName, checks: Vec<Check>) {
        if checks.is_empty() {
            return;
        }
        let mut report = AuditReport::new(name);
        report.checks = checks;
        report.calc();
        self.reports.push(report);
    }

    fn external(&mut self) {
        let mut check = self.check(&INSTANCE_AVAILABILITY);
        check.set_status(Status::Unknown, "no data");
        self.add_report(ReportName::Instances, vec![check]);
    }
}

/// Sum of the defined points; NaN when there are none.
pub(crate) fn sum(ts: &worldview_core::TimeSeries) -> f32 {
    ts.reduce(&worldview_core::Reducer::NanSum)
}

/// Mean of the defined points; NaN when there are none.
pub(crate) fn mean(ts: &worldview_core::TimeSeries) -> f32 {
    let (total, n) = ts
        .data()
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        return f32::NAN;
    }
    total / n as f32
}

#[cfg(test)]
pub(crate) mod testing {
    use worldview_core::model::{AppIdx, InstanceIdx, Pod};
    use worldview_core::{ApplicationId, ApplicationKind, Context, Duration, Time, TimeSeries, World};

    pub const STEP: Duration = Duration(60);
    pub const POINTS: usize = 61;

    pub fn ctx() -> Context {
        Context::new(Time(0), Time(STEP.0 * (POINTS as i64 - 1)), STEP)
    }

    pub fn ts(v: f32) -> TimeSeries {
        TimeSeries::from_data(Time(0), STEP, vec![v; POINTS])
    }

    pub fn ts_fn(f: impl Fn(usize) -> f32) -> TimeSeries {
        TimeSeries::from_data(Time(0), STEP, (0..POINTS).map(f).collect())
    }

    pub fn app_id(name: &str) -> ApplicationId {
        ApplicationId::new("c1", "shop", ApplicationKind::Deployment, name)
    }

    pub fn world() -> World {
        World::new(ctx())
    }

    pub fn running_pod() -> Pod {
        Pod {
            phase: "Running".to_string(),
            ready: ts(1.0),
            running: ts(1.0),
            ..Default::default()
        }
    }

    /// An app with `n` running instances named `<name>-<i>`.
    pub fn app_with_instances(w: &mut World, name: &str, n: usize) -> (AppIdx, Vec<InstanceIdx>) {
        let app = w.get_or_create_application(app_id(name), false);
        let instances = (0..n)
            .map(|i| {
                let idx = w.get_or_create_instance(app, &format!("{}-{}", name, i), None);
                w.instances[idx].pod = Some(running_pod());
                idx
            })
            .collect();
        (app, instances)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_external_services_have_no_data() {
        let mut w = world();
        w.get_or_create_application(ApplicationId::external("external postgres"), false);
        let audit = audit(&w);
        let a = audit.get(&ApplicationId::external("external postgres")).unwrap();
        assert_eq!(a.reports.len(), 1);
        let (check, report) = a.check(INSTANCE_AVAILABILITY.id).unwrap();
        assert_eq!(report, ReportName::Instances);
        assert_eq!(check.status, Status::Unknown);
        assert_eq!(check.message, "no data");
    }

    #[test]
    fn test_removed_applications_are_skipped() {
        let mut w = world();
        let (app, _) = app_with_instances(&mut w, "api", 1);
        w.applications[app].removed = true;
        assert!(audit(&w).applications.is_empty());
    }

    #[test]
    fn test_apply_statuses() {
        let mut w = world();
        let (_, instances) = app_with_instances(&mut w, "api", 2);
        w.instances[instances[1]].pod.as_mut().unwrap().ready = ts(0.0);
        let audit = audit(&w);
        assert_eq!(audit.get(&app_id("api")).unwrap().status, Status::Warning);
        audit.apply_statuses(&mut w);
        assert_eq!(w.applications[0].status, Status::Warning);
        assert_eq!(audit.count_by_status().get(&Status::Warning), Some(&1));
    }

    #[test]
    fn test_mean_and_sum_skip_gaps() {
        let s = ts_fn(|i| if i % 2 == 0 { 2.0 } else { f32::NAN });
        assert_eq!(mean(&s), 2.0);
        assert_eq!(sum(&s), 62.0);
        assert!(mean(&worldview_core::TimeSeries::default()).is_nan());
    }
}
