use crate::ui;
use anyhow::Result;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use worldview_checks::Auditor;
use worldview_constructor::{parse_config_from_file, Constructor, QueryPlan, QuerySource};
use worldview_core::{Context, Duration, Time};
use worldview_query::selector::{add_extra_selector, parse_selector};
use worldview_query::{Cache, CancellationToken, ExecutorConfig, HttpPromClient};

pub async fn execute(config_file: PathBuf, metrics_port: Option<u16>) -> Result<()> {
    let config = parse_config_from_file(&config_file).await?;
    let project_id = config.project_id.clone();
    let interval = config.prometheus.effective_refresh_interval();

    ui::print_header("Watching Project");
    println!("Project: {}", project_id.green());
    println!("Prometheus: {}", config.prometheus.url);
    println!("Refresh interval: {}", humantime::format_duration(interval));

    if let Some(port) = metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        println!("Metrics: http://{}/metrics", addr);
    }

    // the cache keys series by template with the cluster selector applied
    let check_configs = config.effective_check_configs();
    let mut templates = BTreeMap::new();
    for cluster in config.cluster_list() {
        let matchers = parse_selector(&cluster.extra_selector)?;
        for t in QueryPlan::new(&check_configs, &cluster.id, true, false).templates(false).values() {
            let t = add_extra_selector(t, &matchers);
            templates.insert(t.clone(), t);
        }
    }

    let cache = Arc::new(Cache::new(config.cache.clone())?);
    let project = cache
        .add_project(
            &project_id,
            Arc::new(HttpPromClient::new(&config.prometheus)?),
            ExecutorConfig::from_cache_config(&config.cache, parse_selector(&config.prometheus.extra_selector)?),
            Duration::from_std(interval),
            templates,
        )
        .await;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        ctrl_c.cancel();
    });

    let constructor = Constructor::new(config, QuerySource::Cache(project));
    let builder = tokio::spawn(build_worlds(constructor, interval, token.clone()));

    cache.run(&project_id, interval, token.clone()).await?;
    token.cancel();
    if let Err(e) = builder.await {
        warn!("world builder stopped abnormally: {}", e);
    }

    println!("\n{}", "Cache status:".bold());
    print!("{}", cache.render_metrics().await?);
    Ok(())
}

/// Builds a world from the cache on every tick and logs its health.
async fn build_worlds(constructor: Constructor, interval: std::time::Duration, token: CancellationToken) {
    let auditor = Auditor::new();
    let step = Duration::from_std(interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let to = Time::now();
        let ctx = Context::new(to - worldview_core::timeseries::HOUR, to, step);
        match constructor.load_world(&token, ctx).await {
            Ok((world, _)) => {
                let audit = auditor.audit(&world);
                let by_status = audit.count_by_status();
                info!(
                    "{} applications: {:?}",
                    world.applications.len(),
                    by_status.iter().map(|(s, n)| format!("{}={}", s, n)).collect::<Vec<_>>()
                );
            }
            Err(e) if token.is_cancelled() => {
                info!("world build interrupted: {}", e);
                return;
            }
            Err(e) => warn!("failed to build world: {:#}", e),
        }
    }
}
