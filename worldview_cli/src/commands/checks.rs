use super::world::print_profile;
use super::WindowArgs;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use worldview_checks::{AuditExporter, Auditor};
use worldview_constructor::parse_config_from_file;
use worldview_core::Status;
use worldview_query::CancellationToken;

pub async fn execute(
    config_file: PathBuf,
    window: WindowArgs,
    all: bool,
    slow_burn: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = parse_config_from_file(&config_file).await?;
    let ctx = window.context()?;
    let constructor = window.constructor(config)?;

    ui::print_header("Application Health");
    let (mut world, profile) = constructor.load_world(&CancellationToken::new(), ctx).await?;

    let mut auditor = Auditor::new();
    if slow_burn {
        auditor = auditor.with_slow_burn();
    }
    let audit = auditor.audit(&world);
    audit.apply_statuses(&mut world);

    println!("{}", AuditExporter::format_table(&audit, !all));

    println!("\n{}", "Summary:".bold());
    for (status, count) in audit.count_by_status().iter().rev() {
        println!("  {}: {}", ui::status(*status), count);
    }
    if tracing::enabled!(tracing::Level::DEBUG) {
        print_profile(&profile);
    }

    if let Some(path) = output {
        println!("\nSaving audit to: {}", path.display());
        AuditExporter::export(&audit, &path).await?;
    }

    let critical = world.applications.iter().filter(|a| a.status == Status::Critical).count();
    if critical > 0 {
        println!("\n{}", format!("{} application(s) in critical state", critical).red().bold());
    }
    Ok(())
}
