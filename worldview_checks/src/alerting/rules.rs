//! Alerting rule definitions and the builtin rule set.

use crate::catalogue;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use worldview_core::model::LogLevel;
use worldview_core::{Application, Status};

pub const DEFAULT_LOG_MIN_COUNT: i64 = 10;
pub const DEFAULT_MAX_ALERTS_PER_APP: usize = 20;

/// What makes a rule fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertSource {
    /// Fires while the check's status is worse than OK.
    Check { check_id: String },
    /// Fires for every log pattern with at least `min_count` messages in the window.
    LogPatterns {
        #[serde(default = "default_log_severities")]
        severities: Vec<LogLevel>,
        #[serde(default = "default_log_min_count")]
        min_count: i64,
        #[serde(default = "default_max_alerts_per_app")]
        max_alerts_per_app: usize,
    },
    /// Fires for every series of the expression with a value at the last point.
    Promql { expression: String },
}

fn default_log_severities() -> Vec<LogLevel> {
    vec![LogLevel::Error, LogLevel::Critical]
}

fn default_log_min_count() -> i64 {
    DEFAULT_LOG_MIN_COUNT
}

fn default_max_alerts_per_app() -> usize {
    DEFAULT_MAX_ALERTS_PER_APP
}

/// Which applications a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppSelector {
    #[default]
    All,
    Category { categories: Vec<String> },
    /// Globs over `namespace:kind:name`.
    Applications { application_id_patterns: Vec<String> },
}

impl AppSelector {
    pub fn matches(&self, app: &Application) -> bool {
        match self {
            AppSelector::All => true,
            AppSelector::Category { categories } => categories.iter().any(|c| *c == app.category),
            AppSelector::Applications {
                application_id_patterns,
            } => {
                let id = app.id.string_without_cluster_id();
                application_id_patterns.iter().any(|p| {
                    glob::Pattern::new(p)
                        .map(|p| p.matches(&id))
                        .unwrap_or(false)
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertTemplates {
    /// Overrides the generated summary.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub source: AlertSource,
    #[serde(default)]
    pub selector: AppSelector,
    /// UNKNOWN lets check rules take the severity of the check.
    #[serde(default = "default_severity")]
    pub severity: Status,
    #[serde(default, rename = "for", with = "humantime_serde")]
    pub for_: Duration,
    #[serde(default = "default_keep_firing_for", with = "humantime_serde")]
    pub keep_firing_for: Duration,
    #[serde(default)]
    pub templates: AlertTemplates,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(skip)]
    pub builtin: bool,
    /// Set when the definition is invalid; such rules are not evaluated.
    #[serde(skip)]
    pub error: Option<String>,
}

fn default_severity() -> Status {
    Status::Warning
}

fn default_keep_firing_for() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_enabled() -> bool {
    true
}

impl AlertingRule {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id must not be empty".to_string());
        }
        match &self.source {
            AlertSource::Check { check_id } => {
                if catalogue::lookup(check_id).is_none() {
                    return Err(format!("unknown check: {}", check_id));
                }
            }
            AlertSource::LogPatterns {
                severities,
                min_count,
                max_alerts_per_app,
            } => {
                if severities.is_empty() {
                    return Err("at least one log severity is required".to_string());
                }
                if *min_count <= 0 {
                    return Err("min_count must be greater than 0".to_string());
                }
                if *max_alerts_per_app == 0 {
                    return Err("max_alerts_per_app must be greater than 0".to_string());
                }
            }
            AlertSource::Promql { expression } => {
                if expression.trim().is_empty() {
                    return Err("expression must not be empty".to_string());
                }
            }
        }
        if let AppSelector::Applications {
            application_id_patterns,
        } = &self.selector
        {
            for p in application_id_patterns {
                glob::Pattern::new(p).map_err(|e| format!("invalid pattern {}: {}", p, e))?;
            }
        }
        for t in [&self.templates.summary, &self.templates.description] {
            catalogue::validate_template(t).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.error.is_none()
    }

    pub fn matches(&self, app: &Application) -> bool {
        !app.removed && self.selector.matches(app)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

fn check_rule(id: &str, name: &str, check: &catalogue::CheckSpec, severity: Status) -> AlertingRule {
    AlertingRule {
        id: id.to_string(),
        name: name.to_string(),
        source: AlertSource::Check {
            check_id: check.id.to_string(),
        },
        selector: AppSelector::All,
        severity,
        for_: Duration::ZERO,
        keep_firing_for: default_keep_firing_for(),
        templates: AlertTemplates::default(),
        enabled: true,
        builtin: true,
        error: None,
    }
}

pub fn builtin_rules() -> Vec<AlertingRule> {
    use catalogue::*;
    let mut rules = vec![
        check_rule("storage-space", "Disk space", &STORAGE_SPACE, Status::Warning),
        check_rule("memory-oom", "Out of memory", &MEMORY_OOM, Status::Warning),
        check_rule("memory-pressure", "Memory pressure", &MEMORY_PRESSURE, Status::Warning),
        check_rule("cpu-limit", "CPU throttling", &CPU_CONTAINER, Status::Warning),
        check_rule(
            "instance-availability",
            "Instance availability",
            &INSTANCE_AVAILABILITY,
            Status::Warning,
        ),
        check_rule("instance-restarts", "Instance restarts", &INSTANCE_RESTARTS, Status::Warning),
        check_rule("slo-availability", "SLO availability", &SLO_AVAILABILITY, Status::Unknown),
        check_rule("slo-latency", "SLO latency", &SLO_LATENCY, Status::Unknown),
    ];
    rules.push(AlertingRule {
        id: "log-patterns".to_string(),
        name: "Errors in logs".to_string(),
        source: AlertSource::LogPatterns {
            severities: default_log_severities(),
            min_count: DEFAULT_LOG_MIN_COUNT,
            max_alerts_per_app: DEFAULT_MAX_ALERTS_PER_APP,
        },
        severity: Status::Warning,
        keep_firing_for: Duration::from_secs(30 * 60),
        ..check_rule("log-patterns", "", &LOG_ERRORS, Status::Warning)
    });
    rules
}

/// Builtin rules with the user's definitions applied on top.
///
/// A user rule replaces the builtin rule with the same id. Definitions that
/// fail to parse or validate are kept in the error state.
pub fn load_rules(raw: &[serde_json::Value]) -> Vec<AlertingRule> {
    let mut rules = builtin_rules();
    for (i, value) in raw.iter().enumerate() {
        let rule = match serde_json::from_value::<AlertingRule>(value.clone()) {
            Ok(mut rule) => {
                if let Err(e) = rule.validate() {
                    warn!("Invalid alerting rule '{}': {}", rule.id, e);
                    rule.error = Some(e);
                }
                rule
            }
            Err(e) => {
                let id = value
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("rule-{}", i));
                warn!("Failed to parse alerting rule '{}': {}", id, e);
                AlertingRule {
                    error: Some(e.to_string()),
                    enabled: false,
                    builtin: false,
                    source: AlertSource::Promql {
                        expression: String::new(),
                    },
                    ..check_rule(&id, &id, &catalogue::LOG_ERRORS, Status::Warning)
                }
            }
        };
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }
    rules
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use worldview_core::{ApplicationId, ApplicationKind};

    fn app(ns: &str, name: &str, category: &str) -> Application {
        let mut a = Application::new(ApplicationId::new("c1", ns, ApplicationKind::Deployment, name));
        a.category = category.to_string();
        a
    }

    #[test]
    fn test_builtin_rules_are_valid() {
        let rules = builtin_rules();
        assert_eq!(rules.len(), 9);
        for r in &rules {
            assert!(r.validate().is_ok(), "{}", r.id);
            assert!(r.builtin);
        }
    }

    #[test]
    fn test_parse_rule_from_yaml() {
        let yaml = r#"
id: payments-errors
name: Payment errors
source:
  type: promql
  expression: sum(rate(payment_errors_total[5m])) > 0
selector:
  type: applications
  application_id_patterns: ["payments:*"]
severity: critical
for: 2m
keep_firing_for: 10m
templates:
  summary: "payment errors: {{ value }}"
"#;
        let rule: AlertingRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.severity, Status::Critical);
        assert_eq!(rule.for_, Duration::from_secs(120));
        assert_eq!(rule.keep_firing_for, Duration::from_secs(600));
        assert!(rule.enabled);
        assert!(rule.validate().is_ok());
        assert!(rule.matches(&app("payments", "api", "application")));
        assert!(!rule.matches(&app("shop", "api", "application")));
    }

    #[test]
    fn test_selectors() {
        let by_category = AppSelector::Category {
            categories: vec!["monitoring".into()],
        };
        assert!(by_category.matches(&app("mon", "prometheus", "monitoring")));
        assert!(!by_category.matches(&app("shop", "api", "application")));
        assert!(AppSelector::All.matches(&app("shop", "api", "application")));
    }

    #[test]
    fn test_load_rules_overrides_and_errors() {
        let raw = vec![
            json!({"id": "storage-space", "source": {"type": "check", "check_id": "StorageSpace"}, "enabled": false}),
            json!({"id": "bad-check", "source": {"type": "check", "check_id": "Nope"}}),
            json!({"id": "bad-template", "source": {"type": "check", "check_id": "MemoryOOM"},
                   "templates": {"description": "{{ app"}}),
            json!({"id": "unparsable", "source": {"type": "magic"}}),
        ];
        let rules = load_rules(&raw);
        assert_eq!(rules.len(), 12);
        let get = |id: &str| rules.iter().find(|r| r.id == id).unwrap();
        assert!(!get("storage-space").enabled);
        assert!(!get("storage-space").builtin);
        assert_eq!(get("bad-check").error.as_deref(), Some("unknown check: Nope"));
        assert!(get("bad-template").error.as_ref().unwrap().starts_with("Invalid template"));
        assert!(get("unparsable").error.is_some());
        assert!(!get("unparsable").is_active());
        assert!(get("memory-oom").is_active());
    }
}
