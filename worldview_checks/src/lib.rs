//! Health checks, audit reports and alerting over a constructed world.

pub mod alerting;
pub mod auditor;
pub mod burnrate;
pub mod catalogue;
pub mod check;
pub mod error;
pub mod report;

pub use alerting::{
    builtin_rules, load_rules, Alert, AlertEvaluator, AlertJournal, AlertingRule, InMemoryJournal, Transition,
};
pub use auditor::{audit, AppAudit, Audit, Auditor};
pub use check::{AuditReport, Check, ReportName};
pub use error::{ChecksError, Result};
pub use report::AuditExporter;
