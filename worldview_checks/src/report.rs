//! Human-readable renderings of an audit.

use crate::auditor::Audit;
use anyhow::Result;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use worldview_core::Status;

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Application")]
    application: String,
    #[tabled(rename = "Report")]
    report: String,
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Status")]
    status: Status,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn rows(audit: &Audit, problems_only: bool) -> Vec<CheckRow> {
    let mut rows = Vec::new();
    for (id, app) in &audit.applications {
        for report in &app.reports {
            for check in &report.checks {
                if problems_only && check.status == Status::Ok {
                    continue;
                }
                rows.push(CheckRow {
                    application: id.string_without_cluster_id(),
                    report: report.name.to_string(),
                    check: check.title.to_string(),
                    status: check.status,
                    value: check.formatted_value(),
                    message: check.message.clone(),
                });
            }
        }
    }
    rows
}

pub struct AuditExporter;

impl AuditExporter {
    pub async fn export(audit: &Audit, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(audit)?,
            _ => Self::format_markdown(audit),
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// A table of checks for the terminal.
    pub fn format_table(audit: &Audit, problems_only: bool) -> String {
        let rows = rows(audit, problems_only);
        if rows.is_empty() {
            return "no problems found".to_string();
        }
        Table::new(rows).with(Style::rounded()).to_string()
    }

    pub fn format_markdown(audit: &Audit) -> String {
        let by_status = audit.count_by_status();
        let count = |s: Status| by_status.get(&s).copied().unwrap_or(0);
        let problems = rows(audit, true);
        let details = if problems.is_empty() {
            "No problems found.\n".to_string()
        } else {
            format!("{}\n", Table::new(problems).with(Style::markdown()))
        };
        format!(
            r#"# Application Health Report

## Summary

| Status | Applications |
|--------|--------------|
| Critical | {} |
| Warning | {} |
| OK | {} |
| Unknown | {} |

## Problems

{}"#,
            count(Status::Critical),
            count(Status::Warning),
            count(Status::Ok),
            count(Status::Unknown),
            details,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auditor::testing::*;
    use crate::auditor::Auditor;

    #[test]
    fn test_markdown_lists_only_problems() {
        let mut w = world();
        let (_, instances) = app_with_instances(&mut w, "api", 2);
        app_with_instances(&mut w, "web", 1);
        w.instances[instances[0]].pod.as_mut().unwrap().ready = ts(0.0);
        let audit = Auditor::new().audit(&w);

        let md = AuditExporter::format_markdown(&audit);
        assert!(md.contains("| Warning | 1 |"));
        assert!(md.contains("1 instance unavailable"));
        assert!(md.contains("shop:Deployment:api"));
        assert!(!md.contains("Restarts"));
    }

    #[test]
    fn test_table_without_problems() {
        let mut w = world();
        app_with_instances(&mut w, "api", 1);
        let audit = Auditor::new().audit(&w);
        // the logs check has no data
        assert!(AuditExporter::format_table(&audit, true).contains("no data"));
        assert!(AuditExporter::format_table(&Default::default(), true).contains("no problems"));
    }
}
