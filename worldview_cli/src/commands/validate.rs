use crate::ui;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use worldview_checks::load_rules;
use worldview_constructor::parse_config_from_file;

pub async fn execute(config_file: PathBuf) -> Result<()> {
    ui::print_header("Validating Configuration");
    println!("File: {}", config_file.display());

    let config = match parse_config_from_file(&config_file).await {
        Ok(config) => config,
        Err(e) => {
            println!();
            ui::print_error("Configuration is invalid!");
            println!("\nError: {}", e);
            return Err(e);
        }
    };

    println!();
    ui::print_success("Configuration is valid!");
    println!("\nProject: {}", config.project_id.green());
    println!("  Prometheus: {}", config.prometheus.url);
    println!("  Refresh interval: {}", humantime::format_duration(config.prometheus.effective_refresh_interval()));
    if !config.prometheus.extra_selector.is_empty() {
        println!("  Extra selector: {}", config.prometheus.extra_selector);
    }

    let clusters = config.cluster_list();
    println!("  Clusters: {}", clusters.len());
    for c in &clusters {
        println!("    {} {}", "•".green(), c.id);
    }
    println!("  Categories: {}", config.categories.len());
    println!("  Check overrides: {}", config.check_configs.0.len());
    println!("  Custom SLIs: {}", config.custom_slis.len());

    let rules = load_rules(&config.alerting_rules);
    println!("  Alerting rules: {} ({} custom)", rules.len(), rules.iter().filter(|r| !r.builtin).count());
    let broken: Vec<_> = rules.iter().filter(|r| r.error.is_some()).collect();
    for r in &broken {
        ui::print_warning(&format!("rule '{}': {}", r.id, r.error.as_deref().unwrap_or_default()));
    }
    if !broken.is_empty() {
        println!("\n{}", "Rules in error state are not evaluated".yellow());
    }

    Ok(())
}
