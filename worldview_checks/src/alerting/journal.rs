//! Persistent alert state.

use crate::error::{ChecksError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;
use worldview_core::{ApplicationId, Status, Time};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDetail {
    pub name: String,
    pub value: String,
    /// Rendered verbatim (a log sample, a query).
    #[serde(default)]
    pub code: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub fingerprint: String,
    pub project_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub application_id: Option<ApplicationId>,
    #[serde(default)]
    pub category: String,
    pub severity: Status,
    pub summary: String,
    #[serde(default)]
    pub details: Vec<AlertDetail>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub log_pattern_hash: String,
    pub opened_at: Time,
    pub updated_at: Time,
    /// Zero while the alert is open.
    #[serde(default)]
    pub resolved_at: Time,
    #[serde(default)]
    pub manually_resolved_at: Time,
    #[serde(default)]
    pub suppressed: bool,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_zero() && self.manually_resolved_at.is_zero()
    }
}

/// Storage of alerts, one writer per project.
#[async_trait]
pub trait AlertJournal: Send + Sync {
    /// Open alerts of the project, suppressed ones included.
    async fn open_alerts(&self, project_id: &str) -> Result<Vec<Alert>>;

    async fn create(&self, alert: Alert) -> Result<()>;

    async fn update(&self, alert: &Alert) -> Result<()>;

    async fn resolve(&self, project_id: &str, id: Uuid, at: Time) -> Result<Alert>;

    /// Silences an open alert until its condition clears.
    async fn suppress(&self, project_id: &str, id: Uuid) -> Result<()>;

    /// Closes an alert by hand; a later firing opens a new one.
    async fn manually_resolve(&self, project_id: &str, id: Uuid, at: Time) -> Result<()>;

    /// Every alert of the project, most recently opened first.
    async fn history(&self, project_id: &str) -> Result<Vec<Alert>>;
}

#[derive(Debug, Default)]
pub struct InMemoryJournal {
    alerts: Mutex<HashMap<String, Vec<Alert>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<T>(
        &self,
        project_id: &str,
        id: Uuid,
        f: impl FnOnce(&mut Alert) -> T + Send,
    ) -> Result<T> {
        let mut alerts = self.alerts.lock().await;
        let alert = alerts
            .get_mut(project_id)
            .and_then(|list| list.iter_mut().find(|a| a.id == id))
            .ok_or_else(|| ChecksError::AlertNotFound(id.to_string()))?;
        Ok(f(alert))
    }
}

#[async_trait]
impl AlertJournal for InMemoryJournal {
    async fn open_alerts(&self, project_id: &str) -> Result<Vec<Alert>> {
        let alerts = self.alerts.lock().await;
        Ok(alerts
            .get(project_id)
            .map(|list| list.iter().filter(|a| a.is_open()).cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, alert: Alert) -> Result<()> {
        let mut alerts = self.alerts.lock().await;
        alerts.entry(alert.project_id.clone()).or_default().push(alert);
        Ok(())
    }

    async fn update(&self, alert: &Alert) -> Result<()> {
        let updated = alert.clone();
        self.modify(&alert.project_id, alert.id, move |a| *a = updated).await
    }

    async fn resolve(&self, project_id: &str, id: Uuid, at: Time) -> Result<Alert> {
        self.modify(project_id, id, |a| {
            a.resolved_at = at;
            a.clone()
        })
        .await
    }

    async fn suppress(&self, project_id: &str, id: Uuid) -> Result<()> {
        self.modify(project_id, id, |a| a.suppressed = true).await
    }

    async fn manually_resolve(&self, project_id: &str, id: Uuid, at: Time) -> Result<()> {
        self.modify(project_id, id, |a| a.manually_resolved_at = at).await
    }

    async fn history(&self, project_id: &str) -> Result<Vec<Alert>> {
        let alerts = self.alerts.lock().await;
        let mut res = alerts.get(project_id).cloned().unwrap_or_default();
        res.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(project: &str, fingerprint: &str, opened_at: i64) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            fingerprint: fingerprint.to_string(),
            project_id: project.to_string(),
            rule_id: "storage-space".to_string(),
            rule_name: "Disk space".to_string(),
            application_id: None,
            category: String::new(),
            severity: Status::Warning,
            summary: "disk space".to_string(),
            details: Vec::new(),
            labels: BTreeMap::new(),
            log_pattern_hash: String::new(),
            opened_at: Time(opened_at),
            updated_at: Time(opened_at),
            resolved_at: Time(0),
            manually_resolved_at: Time(0),
            suppressed: false,
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let journal = InMemoryJournal::new();
        let a = alert("p1", "f1", 100);
        let b = alert("p1", "f2", 200);
        journal.create(a.clone()).await.unwrap();
        journal.create(b.clone()).await.unwrap();
        journal.create(alert("p2", "f1", 100)).await.unwrap();
        assert_eq!(journal.open_alerts("p1").await.unwrap().len(), 2);

        let resolved = journal.resolve("p1", a.id, Time(300)).await.unwrap();
        assert_eq!(resolved.resolved_at, Time(300));
        journal.suppress("p1", b.id).await.unwrap();
        let open = journal.open_alerts("p1").await.unwrap();
        assert_eq!(open.len(), 1);
        assert!(open[0].suppressed);

        journal.manually_resolve("p1", b.id, Time(400)).await.unwrap();
        assert!(journal.open_alerts("p1").await.unwrap().is_empty());
        let history = journal.history("p1").await.unwrap();
        assert_eq!(history[0].fingerprint, "f2");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_alert() {
        let journal = InMemoryJournal::new();
        let res = journal.resolve("p1", Uuid::new_v4(), Time(1)).await;
        assert!(matches!(res, Err(ChecksError::AlertNotFound(_))));
    }
}
