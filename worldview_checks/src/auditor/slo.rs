use super::{sum, AppAuditor};
use crate::burnrate::check_burn_rates;
use crate::catalogue::{SLO_AVAILABILITY, SLO_LATENCY};
use crate::check::{Check, ReportName};
use worldview_core::{Status, TimeSeries};

impl AppAuditor<'_> {
    pub(super) fn slo(&mut self) {
        let mut checks = Vec::new();
        if let Some(c) = self.slo_availability() {
            checks.push(c);
        }
        if let Some(c) = self.slo_latency() {
            checks.push(c);
        }
        self.add_report(ReportName::Slo, checks);
    }

    fn slo_availability(&self) -> Option<Check> {
        let sli = self.app.availability_slis.first()?;
        let mut check = self.check(&SLO_AVAILABILITY);
        check.threshold = sli.config.objective_percentage;
        let total = sum(&sli.total_requests);
        if total > 0.0 {
            let failed = sum(&sli.failed_requests);
            let failed = if failed.is_nan() { 0.0 } else { failed };
            check.set_value(100.0 - failed / total * 100.0);
        }
        self.apply_burn_rate(
            &mut check,
            &sli.failed_requests_raw,
            &sli.total_requests_raw,
            sli.config.objective_percentage,
        );
        Some(check)
    }

    fn slo_latency(&self) -> Option<Check> {
        let sli = self.app.latency_slis.first()?;
        let mut check = self.check(&SLO_LATENCY);
        check.threshold = sli.config.objective_percentage;

        let total = sum(&sli.total_requests(false));
        if total > 0.0 {
            let fast = sum(&sli.fast_requests(false));
            let fast = if fast.is_nan() { 0.0 } else { fast };
            check.set_value(fast / total * 100.0);
        }

        let total_raw = sli.total_requests(true);
        let fast_raw = sli.fast_requests(true);
        let slow_raw = if fast_raw.is_empty() {
            total_raw.clone()
        } else {
            TimeSeries::sub(&total_raw, &fast_raw).unwrap_or_default()
        };
        self.apply_burn_rate(&mut check, &slow_raw, &total_raw, sli.config.objective_percentage);
        Some(check)
    }

    fn apply_burn_rate(&self, check: &mut Check, bad: &TimeSeries, total: &TimeSeries, objective: f32) {
        let br = check_burn_rates(self.world.ctx.to, bad, total, objective, self.burn_rate_rules);
        match br.severity {
            Status::Unknown => check.set_status(Status::Unknown, "no data"),
            Status::Ok => {}
            severity => check.set_status(severity, br.format_slo_status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::{audit, Auditor};
    use crate::catalogue::{SLO_AVAILABILITY, SLO_LATENCY};
    use crate::check::ReportName;
    use worldview_core::model::{AvailabilitySli, CheckConfigSloAvailability, CheckConfigSloLatency, LatencySli};
    use worldview_core::timeseries::HistogramBucket;
    use worldview_core::Status;

    fn availability(failed: f32) -> AvailabilitySli {
        AvailabilitySli {
            config: CheckConfigSloAvailability {
                objective_percentage: 99.9,
                ..Default::default()
            },
            total_requests: ts(100.0),
            failed_requests: ts(failed),
            total_requests_raw: ts(100.0),
            failed_requests_raw: ts(failed),
        }
    }

    #[test]
    fn test_availability_burning_budget_is_critical() {
        let mut w = world();
        let (app, _) = app_with_instances(&mut w, "api", 1);
        w.applications[app].availability_slis.push(availability(2.0));
        let audit = audit(&w);
        let a = audit.get(&app_id("api")).unwrap();
        let (check, report) = a.check(SLO_AVAILABILITY.id).unwrap();
        assert_eq!(report, ReportName::Slo);
        assert_eq!(check.status, Status::Critical);
        assert_eq!(check.message, "error budget burn rate is 20.0x within 1 hour");
        assert!((check.value() - 98.0).abs() < 0.001);
        assert_eq!(check.threshold, 99.9);
        assert_eq!(a.status, Status::Critical);
    }

    #[test]
    fn test_availability_within_budget() {
        let mut w = world();
        let (app, _) = app_with_instances(&mut w, "api", 1);
        w.applications[app].availability_slis.push(availability(0.0));
        let audit = Auditor::new().with_slow_burn().audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(SLO_AVAILABILITY.id).unwrap();
        assert_eq!(check.status, Status::Ok);
        assert!(check.message.is_empty());
        assert_eq!(check.value(), 100.0);
    }

    #[test]
    fn test_latency_without_fast_buckets_burns_everything() {
        let mut w = world();
        let (app, _) = app_with_instances(&mut w, "api", 1);
        let histogram = vec![
            HistogramBucket {
                le: 0.5,
                series: ts(10.0),
            },
            HistogramBucket {
                le: f32::INFINITY,
                series: ts(10.0),
            },
        ];
        w.applications[app].latency_slis.push(LatencySli {
            config: CheckConfigSloLatency {
                objective_bucket: 0.1,
                objective_percentage: 99.0,
                ..Default::default()
            },
            histogram: histogram.clone(),
            histogram_raw: histogram,
        });
        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(SLO_LATENCY.id).unwrap();
        assert_eq!(check.status, Status::Critical);
        assert_eq!(check.value(), 0.0);
    }

    #[test]
    fn test_no_sli_no_report() {
        let mut w = world();
        app_with_instances(&mut w, "api", 1);
        let audit = audit(&w);
        assert!(audit.get(&app_id("api")).unwrap().report(ReportName::Slo).is_none());
    }
}
