use super::{sum, AppAuditor};
use crate::catalogue::LOG_ERRORS;
use crate::check::ReportName;
use worldview_core::Status;

impl AppAuditor<'_> {
    pub(super) fn logs(&mut self) {
        let mut check = self.check(&LOG_ERRORS);
        if self.app.log_messages.is_empty() {
            check.set_status(Status::Unknown, "no data");
        }
        for (level, msgs) in &self.app.log_messages {
            if !level.is_error() {
                continue;
            }
            let n = sum(&msgs.messages);
            if !n.is_nan() {
                check.inc(n as i64);
            }
        }
        self.add_report(ReportName::Logs, vec![check]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::audit;
    use super::super::testing::*;
    use crate::catalogue::LOG_ERRORS;
    use worldview_core::model::LogLevel;
    use worldview_core::Status;

    #[test]
    fn test_error_and_critical_messages_are_counted() {
        let mut w = world();
        let (app, _) = app_with_instances(&mut w, "api", 1);
        let a = &mut w.applications[app];
        a.log_messages_mut(LogLevel::Info).messages = ts(100.0);
        a.log_messages_mut(LogLevel::Error).messages = ts_fn(|p| if p < 3 { 1.0 } else { 0.0 });
        a.log_messages_mut(LogLevel::Critical).messages = ts_fn(|p| if p == 10 { 2.0 } else { f32::NAN });

        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(LOG_ERRORS.id).unwrap();
        assert_eq!(check.count, 5);
        assert_eq!(check.status, Status::Warning);
        assert_eq!(check.message, "5 errors occurred");
    }

    #[test]
    fn test_no_logs_is_unknown() {
        let mut w = world();
        app_with_instances(&mut w, "api", 1);
        let audit = audit(&w);
        let (check, _) = audit.get(&app_id("api")).unwrap().check(LOG_ERRORS.id).unwrap();
        assert_eq!(check.status, Status::Unknown);
        assert_eq!(check.message, "no data");
    }
}
