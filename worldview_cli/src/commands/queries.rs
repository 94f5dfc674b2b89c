use crate::ui;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use worldview_constructor::{parse_config_from_file, ProjectConfig, QUERIES};
use worldview_core::Duration;
use worldview_query::selector::parse_selector;
use worldview_query::ExecutorConfig;

pub async fn execute(config_file: Option<PathBuf>, filter: Option<String>) -> Result<()> {
    let config = match config_file {
        Some(path) => parse_config_from_file(&path).await?,
        None => ProjectConfig::default(),
    };
    let matchers = parse_selector(&config.prometheus.extra_selector)?;
    let executor = ExecutorConfig::from_cache_config(&config.cache, matchers);
    let step = Duration::from_std(config.prometheus.effective_refresh_interval());

    ui::print_header("Query Catalogue");
    let mut shown = 0;
    for (name, template) in QUERIES {
        if filter.as_ref().is_some_and(|f| !name.contains(f.as_str())) {
            continue;
        }
        shown += 1;
        println!("\n{}", name.bold());
        println!("  {}", executor.render(template, step));
    }
    println!("\nTotal queries: {} of {}", shown, QUERIES.len());
    Ok(())
}
