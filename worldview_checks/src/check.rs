use crate::catalogue::{self, format_value, CheckSpec, CheckType, Unit};
use crate::error::ChecksError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use worldview_core::Status;

/// One evaluated check of one application.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub id: &'static str,
    pub title: &'static str,
    pub status: Status,
    pub message: String,
    pub threshold: f32,
    pub unit: Unit,
    pub items: BTreeSet<String>,
    pub count: i64,
    value: f32,
    #[serde(skip)]
    spec: &'static CheckSpec,
    #[serde(skip)]
    fired: bool,
    #[serde(skip)]
    explicit: bool,
}

impl Check {
    pub fn new(spec: &'static CheckSpec, threshold: f32) -> Self {
        Self {
            id: spec.id,
            title: spec.title,
            status: Status::Unknown,
            message: String::new(),
            threshold,
            unit: spec.unit,
            items: BTreeSet::new(),
            count: 0,
            value: f32::NAN,
            spec,
            fired: false,
            explicit: false,
        }
    }

    pub fn add_item(&mut self, item: impl Into<String>) {
        self.items.insert(item.into());
    }

    pub fn inc(&mut self, n: i64) {
        self.count += n;
    }

    pub fn set_value(&mut self, v: f32) {
        self.value = v;
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn formatted_value(&self) -> String {
        format_value(self.unit, self.value)
    }

    /// Marks a manual check as firing; the message is rendered by `calc`.
    pub fn fire(&mut self) {
        self.fired = true;
    }

    /// Overrides the computed status; `calc` leaves it untouched.
    pub fn set_status(&mut self, status: Status, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.explicit = true;
    }

    pub fn condition(&self) -> String {
        self.spec
            .condition_format_template
            .replace("<threshold>", &format_value(self.unit, self.threshold))
    }

    pub fn is_firing(&self) -> bool {
        match self.spec.check_type {
            CheckType::EventBased => self.count as f32 > self.threshold,
            CheckType::ItemBased => !self.items.is_empty(),
            CheckType::ValueBased => !self.value.is_nan() && self.value > self.threshold,
            CheckType::Manual => self.fired,
        }
    }

    pub fn template_context(&self) -> tera::Context {
        let mut ctx = tera::Context::new();
        ctx.insert("items", &self.items.len());
        ctx.insert("item_list", &self.items.iter().cloned().collect::<Vec<_>>().join(", "));
        ctx.insert("count", &self.count);
        ctx.insert("value", &self.formatted_value());
        ctx.insert("threshold", &format_value(self.unit, self.threshold));
        ctx
    }

    /// Derives the status from what the auditor collected.
    pub fn calc(&mut self) {
        if self.explicit {
            return;
        }
        if !self.is_firing() {
            self.status = Status::Ok;
            self.message.clear();
            return;
        }
        match catalogue::render(self.spec.message_template, &self.template_context()) {
            Ok(message) => {
                self.status = Status::Warning;
                self.message = message;
            }
            Err(ChecksError::InvalidTemplate(_)) => {
                self.status = Status::Unknown;
                self.message = "invalid template".to_string();
            }
            Err(_) => {
                self.status = Status::Unknown;
                self.message = "failed to render message".to_string();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ReportName {
    #[serde(rename = "SLO")]
    Slo,
    Instances,
    Deployments,
    #[serde(rename = "CPU")]
    Cpu,
    Memory,
    Storage,
    Network,
    #[serde(rename = "DNS")]
    Dns,
    Logs,
    Postgres,
    Redis,
    #[serde(rename = "JVM")]
    Jvm,
}

impl ReportName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportName::Slo => "SLO",
            ReportName::Instances => "Instances",
            ReportName::Deployments => "Deployments",
            ReportName::Cpu => "CPU",
            ReportName::Memory => "Memory",
            ReportName::Storage => "Storage",
            ReportName::Network => "Network",
            ReportName::Dns => "DNS",
            ReportName::Logs => "Logs",
            ReportName::Postgres => "Postgres",
            ReportName::Redis => "Redis",
            ReportName::Jvm => "JVM",
        }
    }
}

impl fmt::Display for ReportName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub name: ReportName,
    pub status: Status,
    pub checks: Vec<Check>,
}

impl AuditReport {
    pub fn new(name: ReportName) -> Self {
        Self {
            name,
            status: Status::Unknown,
            checks: Vec::new(),
        }
    }

    pub fn check(&self, id: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.id == id)
    }

    pub fn calc(&mut self) {
        for c in &mut self.checks {
            c.calc();
        }
        self.status = self.checks.iter().map(|c| c.status).max().unwrap_or(Status::Unknown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{INSTANCE_RESTARTS, LOG_ERRORS, MEMORY_LEAK, STORAGE_SPACE};

    #[test]
    fn test_event_based() {
        let mut c = Check::new(&INSTANCE_RESTARTS, 2.0);
        c.inc(2);
        c.calc();
        assert_eq!(c.status, Status::Ok);
        c.inc(1);
        c.calc();
        assert_eq!(c.status, Status::Warning);
        assert_eq!(c.message, "app containers have been restarted 3 times");
    }

    #[test]
    fn test_item_based() {
        let mut c = Check::new(&STORAGE_SPACE, 80.0);
        c.calc();
        assert_eq!(c.status, Status::Ok);
        assert!(c.message.is_empty());
        c.add_item("db-0:/data");
        c.add_item("db-0:/data");
        c.calc();
        assert_eq!(c.message, "disk space on 1 volume will be exhausted soon");
        assert_eq!(c.condition(), "the space usage of a volume > 80%");
    }

    #[test]
    fn test_value_based() {
        let mut c = Check::new(&MEMORY_LEAK, 10.0);
        c.calc();
        assert_eq!(c.status, Status::Ok);
        c.set_value(12.5);
        c.calc();
        assert_eq!(c.status, Status::Warning);
        assert_eq!(c.message, "memory usage is growing by 12.5% per hour");
    }

    #[test]
    fn test_explicit_status_wins() {
        let mut c = Check::new(&LOG_ERRORS, 0.0);
        c.inc(10);
        c.set_status(Status::Unknown, "no data");
        c.calc();
        assert_eq!(c.status, Status::Unknown);
        assert_eq!(c.message, "no data");
    }

    #[test]
    fn test_report_status_is_the_worst() {
        let mut restarts = Check::new(&INSTANCE_RESTARTS, 0.0);
        restarts.inc(1);
        let mut r = AuditReport::new(ReportName::Instances);
        r.checks = vec![restarts, Check::new(&LOG_ERRORS, 0.0)];
        r.calc();
        assert_eq!(r.status, Status::Warning);
        assert_eq!(r.check(LOG_ERRORS.id).unwrap().status, Status::Ok);
    }
}
