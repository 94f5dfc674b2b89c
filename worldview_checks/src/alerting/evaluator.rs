//! Turns an audited world into alert transitions.
//!
//! Every evaluation computes, per rule and application, whether the rule
//! fires and under which fingerprint. The fingerprints are then reconciled
//! with the open alerts of the journal:
//!
//! - firing and no open alert: the alert is opened, after `for` if set
//! - firing and an open alert: the alert is updated
//! - not firing and an open alert: the alert is resolved once `keep_firing_for`
//!   has passed since its last update
//!
//! Open alerts whose rule is gone, disabled or no longer selects the
//! application are resolved.

use super::journal::{Alert, AlertDetail, AlertJournal};
use super::rules::{AlertSource, AlertingRule};
use crate::auditor::Audit;
use crate::catalogue::{self, format_float};
use crate::check::Check;
use crate::error::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use worldview_core::model::{Labels, LogLevel};
use worldview_core::timeseries::MINUTE;
use worldview_core::{Application, ApplicationId, Duration, Reducer, Status, Time, World};
use worldview_query::DynPromClient;
use xxhash_rust::xxh3::xxh3_64;

/// Pending entries not refreshed for this long are dropped.
const PENDING_TTL: Duration = Duration(30 * MINUTE.0);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transition", content = "alert", rename_all = "lowercase")]
pub enum Transition {
    Opened(Alert),
    Updated(Alert),
    Resolved(Alert),
}

impl Transition {
    pub fn alert(&self) -> &Alert {
        match self {
            Transition::Opened(a) | Transition::Updated(a) | Transition::Resolved(a) => a,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transition::Opened(_) => "opened",
            Transition::Updated(_) => "updated",
            Transition::Resolved(_) => "resolved",
        }
    }
}

/// Stable identity of an alert: the rule, the application and the key labels.
pub fn fingerprint(rule_id: &str, app_id: Option<&ApplicationId>, labels: &Labels) -> String {
    let mut key = String::from(rule_id);
    key.push('\0');
    if let Some(id) = app_id {
        key.push_str(&id.to_string());
    }
    for (k, v) in labels {
        key.push('\0');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    format!("{:016x}", xxh3_64(key.as_bytes()))
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    first_seen: Time,
    last_seen: Time,
}

/// What a firing rule wants the alert to look like.
struct Candidate {
    fingerprint: String,
    application_id: Option<ApplicationId>,
    category: String,
    severity: Status,
    summary: String,
    details: Vec<AlertDetail>,
    labels: Labels,
    log_pattern_hash: String,
}

impl Candidate {
    fn new(fingerprint: String, severity: Status, summary: String) -> Self {
        Self {
            fingerprint,
            application_id: None,
            category: String::new(),
            severity,
            summary,
            details: Vec::new(),
            labels: Labels::new(),
            log_pattern_hash: String::new(),
        }
    }

    fn for_app(mut self, app: &Application) -> Self {
        self.application_id = Some(app.id.clone());
        self.category = app.category.clone();
        self
    }

    fn detail(&mut self, name: &str, value: String, code: bool) {
        self.details.push(AlertDetail {
            name: name.to_string(),
            value,
            code,
        });
    }
}

/// State of one evaluation.
struct Tick {
    now: Time,
    open: HashMap<String, Alert>,
    seen: HashSet<String>,
    transitions: Vec<Transition>,
}

impl Tick {
    fn open_fingerprints(&self, rule_id: &str, app_id: Option<&ApplicationId>) -> Vec<String> {
        self.open
            .values()
            .filter(|a| a.rule_id == rule_id && (app_id.is_none() || a.application_id.as_ref() == app_id))
            .map(|a| a.fingerprint.clone())
            .collect()
    }
}

pub struct AlertEvaluator {
    project_id: String,
    journal: Arc<dyn AlertJournal>,
    prom: Option<DynPromClient>,
    pending: HashMap<String, Pending>,
}

impl AlertEvaluator {
    pub fn new(project_id: impl Into<String>, journal: Arc<dyn AlertJournal>) -> Self {
        Self {
            project_id: project_id.into(),
            journal,
            prom: None,
            pending: HashMap::new(),
        }
    }

    /// Enables PromQL rules.
    pub fn with_prom_client(mut self, prom: DynPromClient) -> Self {
        self.prom = Some(prom);
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub async fn evaluate(
        &mut self,
        rules: &[AlertingRule],
        world: &World,
        audit: &Audit,
        now: Time,
    ) -> Result<Vec<Transition>> {
        let open = self.journal.open_alerts(&self.project_id).await?;
        let mut tick = Tick {
            now,
            open: open.into_iter().map(|a| (a.fingerprint.clone(), a)).collect(),
            seen: HashSet::new(),
            transitions: Vec::new(),
        };

        for rule in rules {
            if !rule.is_active() {
                if let Some(e) = &rule.error {
                    debug!("Skipping rule '{}' in error state: {}", rule.id, e);
                }
                continue;
            }
            match &rule.source {
                AlertSource::Check { check_id } => {
                    self.eval_check(&mut tick, rule, check_id, world, audit).await?
                }
                AlertSource::LogPatterns {
                    severities,
                    min_count,
                    max_alerts_per_app,
                } => {
                    self.eval_log_patterns(&mut tick, rule, severities, *min_count, *max_alerts_per_app, world)
                        .await?
                }
                AlertSource::Promql { expression } => self.eval_promql(&mut tick, rule, expression, world).await?,
            }
        }

        let unmatched: Vec<String> = tick
            .open
            .keys()
            .filter(|fp| !tick.seen.contains(*fp))
            .cloned()
            .collect();
        for fp in unmatched {
            debug!("Alert {} no longer matches any rule", fp);
            self.resolve(&mut tick, &fp).await?;
        }

        self.cleanup_pending(now);
        info!(
            "Evaluated {} alerting rules: {} open, {} pending, {} transitions",
            rules.len(),
            tick.open.len(),
            self.pending.len(),
            tick.transitions.len()
        );
        Ok(tick.transitions)
    }

    async fn eval_check(
        &mut self,
        tick: &mut Tick,
        rule: &AlertingRule,
        check_id: &str,
        world: &World,
        audit: &Audit,
    ) -> Result<()> {
        for app in world.applications.iter().filter(|a| rule.matches(a)) {
            let fp = fingerprint(&rule.id, Some(&app.id), &Labels::new());
            let check = audit
                .get(&app.id)
                .and_then(|a| a.check(check_id))
                .map(|(c, _)| c)
                .filter(|c| c.status > Status::Ok);
            let Some(check) = check else {
                self.clear(tick, rule, &fp).await?;
                continue;
            };
            let severity = if rule.severity == Status::Unknown {
                check.status
            } else {
                rule.severity
            };
            let ctx = check_context(app, check);
            let summary = render(rule, &rule.templates.summary, &ctx).unwrap_or_else(|| check.message.clone());
            let mut candidate = Candidate::new(fp, severity, summary).for_app(app);
            if let Some(description) = render(rule, &rule.templates.description, &ctx) {
                candidate.detail("Description", description, false);
            }
            self.fire(tick, rule, candidate).await?;
        }
        Ok(())
    }

    async fn eval_log_patterns(
        &mut self,
        tick: &mut Tick,
        rule: &AlertingRule,
        severities: &[LogLevel],
        min_count: i64,
        max_alerts_per_app: usize,
        world: &World,
    ) -> Result<()> {
        let window = world.ctx.window();
        for app in world.applications.iter().filter(|a| rule.matches(a)) {
            let mut open = tick.open_fingerprints(&rule.id, Some(&app.id)).len();
            let mut firing = HashSet::new();
            for (level, msgs) in app.log_messages.iter().filter(|(l, _)| severities.contains(l)) {
                for (hash, pattern) in &msgs.patterns {
                    let n = pattern.messages.reduce(&Reducer::NanSum);
                    if n.is_nan() || (n as i64) < min_count {
                        continue;
                    }
                    let labels = Labels::from([("ph".to_string(), hash.clone())]);
                    let fp = fingerprint(&rule.id, Some(&app.id), &labels);
                    if !tick.open.contains_key(&fp) && open >= max_alerts_per_app {
                        debug!("{}: too many log pattern alerts, skipping {}", app.id, hash);
                        continue;
                    }
                    let summary = format!("new {} in the logs ({} messages in the last {})", level, n as i64, window);
                    let mut candidate = Candidate::new(fp.clone(), rule.severity, summary).for_app(app);
                    candidate.log_pattern_hash = hash.clone();
                    candidate.labels = labels;

                    let mut ctx = app_context(app);
                    ctx.insert("level", level.as_str());
                    ctx.insert("pattern", &pattern.pattern.words());
                    ctx.insert("count", &(n as i64));
                    if let Some(description) = render(rule, &rule.templates.description, &ctx) {
                        candidate.detail("Description", description, false);
                    }
                    candidate.detail("Sample", pattern.sample.clone(), true);

                    if self.fire(tick, rule, candidate).await? {
                        open += 1;
                    }
                    firing.insert(fp);
                }
            }
            for fp in tick.open_fingerprints(&rule.id, Some(&app.id)) {
                if !firing.contains(&fp) {
                    self.clear(tick, rule, &fp).await?;
                }
            }
        }
        Ok(())
    }

    async fn eval_promql(&mut self, tick: &mut Tick, rule: &AlertingRule, expression: &str, world: &World) -> Result<()> {
        let Some(prom) = self.prom.clone() else {
            warn!("No metrics backend configured, skipping rule '{}'", rule.id);
            let keep = tick.open_fingerprints(&rule.id, None);
            tick.seen.extend(keep);
            return Ok(());
        };
        let series = match prom
            .query_range(expression, world.ctx.from, world.ctx.to, world.ctx.step)
            .await
        {
            Ok(series) => series,
            Err(e) => {
                // a failed query must not resolve what is firing
                warn!("Rule '{}' query failed: {}", rule.id, e);
                let keep = tick.open_fingerprints(&rule.id, None);
                tick.seen.extend(keep);
                return Ok(());
            }
        };

        let mut firing = HashSet::new();
        for mv in series {
            let value = mv.values.last();
            if value.is_nan() {
                continue;
            }
            let fp = fingerprint(&rule.id, None, &mv.labels);
            let mut ctx = tera::Context::new();
            ctx.insert("value", &format_float(value));
            ctx.insert("labels", &mv.labels);
            let summary =
                render(rule, &rule.templates.summary, &ctx).unwrap_or_else(|| format!("{} = {}", expression, format_float(value)));
            let mut candidate = Candidate::new(fp.clone(), rule.severity, summary);
            if let Some(description) = render(rule, &rule.templates.description, &ctx) {
                candidate.detail("Description", description, false);
            }
            candidate.detail("Expression", expression.to_string(), true);
            candidate.labels = mv.labels;
            self.fire(tick, rule, candidate).await?;
            firing.insert(fp);
        }
        for fp in tick.open_fingerprints(&rule.id, None) {
            if !firing.contains(&fp) {
                self.clear(tick, rule, &fp).await?;
            }
        }
        Ok(())
    }

    /// Opens or updates the alert of a firing candidate. Returns true when a
    /// new alert was opened.
    async fn fire(&mut self, tick: &mut Tick, rule: &AlertingRule, c: Candidate) -> Result<bool> {
        let now = tick.now;
        tick.seen.insert(c.fingerprint.clone());

        if let Some(existing) = tick.open.get_mut(&c.fingerprint) {
            self.pending.remove(&c.fingerprint);
            if existing.suppressed {
                return Ok(false);
            }
            let changed = existing.severity != c.severity
                || existing.summary != c.summary
                || existing.details != c.details;
            existing.severity = c.severity;
            existing.summary = c.summary;
            existing.details = c.details;
            existing.rule_name = rule.display_name().to_string();
            existing.updated_at = now;
            self.journal.update(existing).await?;
            if changed {
                tick.transitions.push(Transition::Updated(existing.clone()));
            }
            return Ok(false);
        }

        let wait = Duration::from_std(rule.for_);
        if !wait.is_zero() {
            let p = self.pending.entry(c.fingerprint.clone()).or_insert(Pending {
                first_seen: now,
                last_seen: now,
            });
            p.last_seen = now;
            if now - p.first_seen < wait {
                debug!("Alert {} of rule '{}' is pending", c.fingerprint, rule.id);
                return Ok(false);
            }
        }
        self.pending.remove(&c.fingerprint);

        let alert = Alert {
            id: Uuid::new_v4(),
            fingerprint: c.fingerprint.clone(),
            project_id: self.project_id.clone(),
            rule_id: rule.id.clone(),
            rule_name: rule.display_name().to_string(),
            application_id: c.application_id,
            category: c.category,
            severity: c.severity,
            summary: c.summary,
            details: c.details,
            labels: c.labels,
            log_pattern_hash: c.log_pattern_hash,
            opened_at: now,
            updated_at: now,
            resolved_at: Time(0),
            manually_resolved_at: Time(0),
            suppressed: false,
        };
        self.journal.create(alert.clone()).await?;
        info!("Alert opened: [{}] {} ({})", alert.severity, alert.summary, rule.id);
        tick.transitions.push(Transition::Opened(alert.clone()));
        tick.open.insert(c.fingerprint, alert);
        Ok(true)
    }

    /// Handles a fingerprint the rule evaluated as not firing.
    async fn clear(&mut self, tick: &mut Tick, rule: &AlertingRule, fp: &str) -> Result<()> {
        tick.seen.insert(fp.to_string());
        self.pending.remove(fp);
        let Some(existing) = tick.open.get(fp) else {
            return Ok(());
        };
        let keep = Duration::from_std(rule.keep_firing_for);
        if !existing.suppressed && tick.now - existing.updated_at < keep {
            return Ok(());
        }
        self.resolve(tick, fp).await
    }

    async fn resolve(&self, tick: &mut Tick, fp: &str) -> Result<()> {
        let Some(alert) = tick.open.remove(fp) else {
            return Ok(());
        };
        let resolved = self.journal.resolve(&self.project_id, alert.id, tick.now).await?;
        info!("Alert resolved: {} ({})", resolved.summary, resolved.rule_id);
        tick.transitions.push(Transition::Resolved(resolved));
        Ok(())
    }

    fn cleanup_pending(&mut self, now: Time) {
        self.pending.retain(|_, p| now - p.last_seen < PENDING_TTL);
    }
}

fn app_context(app: &Application) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("app", &app.id.name);
    ctx.insert("namespace", &app.id.namespace);
    ctx.insert("application", &app.id.to_string());
    ctx
}

fn check_context(app: &Application, check: &Check) -> tera::Context {
    let mut ctx = app_context(app);
    ctx.insert("check_title", check.title);
    ctx.insert("check_message", &check.message);
    ctx.insert("check_value", &check.formatted_value());
    ctx
}

/// Renders a rule template; empty templates and failures yield `None`.
fn render(rule: &AlertingRule, template: &str, ctx: &tera::Context) -> Option<String> {
    if template.is_empty() {
        return None;
    }
    match catalogue::render(template, ctx) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Rule '{}': {}", rule.id, e);
            None
        }
    }
}
