use super::WindowArgs;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use worldview_checks::alerting::Transition;
use worldview_checks::{load_rules, AlertEvaluator, AlertJournal, Auditor, InMemoryJournal};
use worldview_constructor::parse_config_from_file;
use worldview_core::{Context, Duration};
use worldview_query::CancellationToken;

pub async fn execute(
    config_file: PathBuf,
    window: WindowArgs,
    ticks: u32,
    interval: std::time::Duration,
) -> Result<()> {
    let config = parse_config_from_file(&config_file).await?;
    let project_id = config.project_id.clone();
    let rules = load_rules(&config.alerting_rules);
    let prom = window.prom_client(&config)?;
    let start = window.context()?;
    let constructor = window.constructor(config)?;

    ui::print_header("Alert Evaluation");
    println!("Project: {}", project_id.green());
    println!("Rules: {} ({} active)", rules.len(), rules.iter().filter(|r| r.is_active()).count());
    for r in rules.iter().filter(|r| r.error.is_some()) {
        ui::print_warning(&format!("rule '{}' is skipped: {}", r.id, r.error.as_deref().unwrap_or_default()));
    }

    let journal = Arc::new(InMemoryJournal::new());
    let mut evaluator = AlertEvaluator::new(project_id.clone(), journal.clone()).with_prom_client(prom);
    let auditor = Auditor::new();
    let token = CancellationToken::new();
    let shift = Duration::from_std(interval);

    let pb = ProgressBar::new(ticks as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ticks")?
            .progress_chars("=>-"),
    );

    let mut transitions = Vec::new();
    for tick in 0..ticks {
        let offset = shift * tick as i64;
        let ctx = Context::new(start.from + offset, start.to + offset, start.step);
        let (world, _) = constructor.load_world(&token, ctx).await?;
        let audit = auditor.audit(&world);
        let res = evaluator.evaluate(&rules, &world, &audit, ctx.to).await?;
        info!("tick {} at {}: {} transitions", tick + 1, ctx.to, res.len());
        transitions.extend(res.into_iter().map(|t| (ctx.to, t)));
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("\n{}", "Transitions:".bold());
    if transitions.is_empty() {
        println!("  none");
    }
    for (at, t) in &transitions {
        print_transition(*at, t);
    }

    let open = journal.open_alerts(&project_id).await?;
    println!("\n{} {}", "Open alerts:".bold(), open.len());
    for a in &open {
        let app = a.application_id.as_ref().map(|id| id.to_string()).unwrap_or_default();
        println!("  [{}] {} {} {}", ui::status(a.severity), a.rule_name.cyan(), app, a.summary);
    }
    Ok(())
}

fn print_transition(at: worldview_core::Time, t: &Transition) {
    let a = t.alert();
    let kind = match t {
        Transition::Opened(_) => "OPENED".red().bold(),
        Transition::Updated(_) => "UPDATED".yellow(),
        Transition::Resolved(_) => "RESOLVED".green(),
    };
    let app = a.application_id.as_ref().map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
    println!("  {} {:<8} [{}] {} {}: {}", at, kind, ui::status(a.severity), a.rule_id, app, a.summary);
}
