use super::WindowArgs;
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use worldview_constructor::{parse_config_from_file, Profile};
use worldview_core::World;
use worldview_query::CancellationToken;

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "Application")]
    id: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Instances")]
    instances: String,
    #[tabled(rename = "Upstreams")]
    upstreams: usize,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "CPU %")]
    cpu: String,
    #[tabled(rename = "Disks")]
    disks: usize,
}

pub async fn execute(config_file: PathBuf, window: WindowArgs) -> Result<()> {
    let config = parse_config_from_file(&config_file).await?;
    let ctx = window.context()?;
    let constructor = window.constructor(config)?;

    ui::print_header("Building World");
    println!("Window: {}..{} step {}", ctx.from, ctx.to, ctx.step);
    let (world, profile) = constructor.load_world(&CancellationToken::new(), ctx).await?;

    print_world(&world);
    print_profile(&profile);
    Ok(())
}

fn print_world(world: &World) {
    let apps: Vec<AppRow> = world
        .applications
        .iter()
        .enumerate()
        .map(|(idx, app)| {
            let total = app.instances.len();
            let up = world.app_instances(idx).filter(|i| i.is_up()).count();
            AppRow {
                id: app.id.to_string(),
                category: app.category.clone(),
                instances: format!("{}/{}", up, total),
                upstreams: app.upstreams.len(),
            }
        })
        .collect();
    println!("\n{} ({})", "Applications".bold(), apps.len());
    if !apps.is_empty() {
        println!("{}", Table::new(apps).with(Style::rounded()));
    }

    let nodes: Vec<NodeRow> = world
        .nodes
        .iter()
        .map(|n| NodeRow {
            name: n.get_name().to_string(),
            cpu: worldview_checks::catalogue::format_float(n.cpu_usage_percent.last_not_null().1),
            disks: n.disks.len(),
        })
        .collect();
    println!("\n{} ({})", "Nodes".bold(), nodes.len());
    if !nodes.is_empty() {
        println!("{}", Table::new(nodes).with(Style::rounded()));
    }
    println!("\nInstances: {}, connections: {}", world.instances.len(), world.connections.len());
}

pub fn print_profile(profile: &Profile) {
    println!("\n{}", "Profile:".bold());
    for (stage, secs) in &profile.stages {
        println!("  {} {:.3}s", stage.yellow(), secs);
    }
    println!(
        "  queries: {} in {:.3}s",
        profile.queries.len(),
        profile.total_query_time().as_secs_f32()
    );
    for (name, stats) in profile.failed_queries() {
        ui::print_warning(&format!("{}: {}", name, stats.error.as_deref().unwrap_or("failed")));
    }
}
