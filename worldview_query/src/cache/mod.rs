//! Per-project metric cache in front of the metrics backend.
//!
//! Each project has a single writer (its refresh loop or a background
//! refill) that builds a new [`Snapshot`] and swaps it in; readers load the
//! current snapshot without locking.

pub mod chunk;
pub mod client;
pub mod status;
mod updater;

pub use chunk::{CachedSeries, Chunk};
pub use client::CacheClient;
pub use status::{CacheStatus, StatusMetrics};

use crate::config::CacheConfig;
use crate::error::{QueryError, Result};
use crate::executor::ExecutorConfig;
use crate::prom::DynPromClient;
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use worldview_core::{Duration, Time};

/// Cached series of one query template, keyed by labels hash.
#[derive(Debug, Clone, Default)]
pub struct QueryData {
    pub series: BTreeMap<u64, CachedSeries>,
}

impl QueryData {
    pub fn first(&self) -> Option<Time> {
        self.series.values().filter_map(CachedSeries::first).min()
    }
}

/// Immutable view of a project cache at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub queries: HashMap<String, Arc<QueryData>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    pub last_ts: Option<Time>,
    /// Earliest timestamp ever requested from the backend.
    pub fetched_from: Option<Time>,
    pub last_error: Option<String>,
    pub failed_at: Option<Time>,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Time>,
}

impl QueryState {
    pub fn in_cooldown(&self, now: Time) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

pub struct ProjectCache {
    id: String,
    config: CacheConfig,
    executor: ExecutorConfig,
    client: DynPromClient,
    step: Duration,
    snapshot: ArcSwap<Snapshot>,
    queries: Mutex<BTreeMap<String, String>>,
    states: Mutex<HashMap<String, QueryState>>,
    in_flight: Mutex<HashSet<String>>,
    running: AtomicBool,
    writer: tokio::sync::Mutex<()>,
}

impl ProjectCache {
    pub fn new(
        id: &str,
        config: CacheConfig,
        executor: ExecutorConfig,
        client: DynPromClient,
        step: Duration,
        queries: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            config,
            executor,
            client,
            step,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            queries: Mutex::new(queries),
            states: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Refresh step; `$RANGE` is rendered with it when fetching.
    pub fn raw_step(&self) -> Duration {
        self.step
    }

    pub fn compacted_step(&self) -> Duration {
        Duration::from_std(self.config.compacted_step).max(self.step)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Adds a query template refreshed on every tick from now on.
    pub fn register(&self, template: &str) -> bool {
        match self.queries.lock() {
            Ok(mut queries) => {
                if queries.values().any(|q| q == template) {
                    return false;
                }
                queries.insert(template.to_string(), template.to_string());
                true
            }
            Err(_) => false,
        }
    }

    pub fn registered(&self) -> BTreeMap<String, String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// The oldest of the per-query "last cached" timestamps.
    pub fn to(&self) -> Option<Time> {
        let states = self.states.lock().ok()?;
        states.values().filter_map(|s| s.last_ts).min()
    }

    /// Step that can serve `[from, to]` at time `now`.
    pub fn step_for(&self, from: Time, _to: Time, now: Time) -> Duration {
        if from >= now - Duration::from_std(self.config.raw_retention) {
            self.step
        } else {
            self.compacted_step()
        }
    }

    pub fn status_at(&self, now: Time) -> CacheStatus {
        let Ok(states) = self.states.lock() else {
            return CacheStatus::default();
        };
        let lags: Vec<Duration> = states
            .values()
            .filter_map(|s| s.last_ts)
            .map(|ts| (now - ts).max(Duration(0)))
            .collect();
        let error = states
            .iter()
            .filter_map(|(q, s)| Some((s.failed_at?, q, s.last_error.as_ref()?)))
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, q, e)| format!("{}: {}", q, e));
        CacheStatus::from_lags(&lags, error)
    }
}

/// All project caches of the process.
pub struct Cache {
    config: CacheConfig,
    projects: RwLock<HashMap<String, Arc<ProjectCache>>>,
    metrics: StatusMetrics,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Ok(Self {
            config,
            projects: RwLock::new(HashMap::new()),
            metrics: StatusMetrics::new()?,
        })
    }

    pub async fn add_project(
        &self,
        project_id: &str,
        client: DynPromClient,
        executor: ExecutorConfig,
        step: Duration,
        queries: BTreeMap<String, String>,
    ) -> Arc<ProjectCache> {
        let project = Arc::new(ProjectCache::new(
            project_id,
            self.config.clone(),
            executor,
            client,
            step,
            queries,
        ));
        info!("Registered cache for project '{}' ({} queries, step {})", project_id, project.registered().len(), step);
        self.projects
            .write()
            .await
            .insert(project_id.to_string(), project.clone());
        project
    }

    pub async fn project(&self, project_id: &str) -> Result<Arc<ProjectCache>> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| QueryError::UnknownProject(project_id.to_string()))
    }

    pub async fn get(&self, project_id: &str) -> Result<CacheClient> {
        Ok(CacheClient::new(self.project(project_id).await?))
    }

    pub async fn status(&self, project_id: &str) -> Result<CacheStatus> {
        let status = self.project(project_id).await?.status_at(Time::now());
        self.metrics.observe(project_id, &status);
        Ok(status)
    }

    /// Text exposition of the cache gauges of every project.
    pub async fn render_metrics(&self) -> Result<String> {
        let ids: Vec<String> = self.projects.read().await.keys().cloned().collect();
        for id in ids {
            self.status(&id).await?;
        }
        self.metrics.render()
    }

    /// Refreshes `project_id` on `interval` until `token` is cancelled.
    pub async fn run(&self, project_id: &str, interval: std::time::Duration, token: CancellationToken) -> Result<()> {
        let project = self.project(project_id).await?;
        let interval = interval.max(crate::config::MIN_REFRESH_INTERVAL);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Starting cache refresh for project '{}' every {:?}", project_id, interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Cache refresh for project '{}' stopped", project_id);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match project.refresh_all(&token).await {
                        Ok(_) => {}
                        Err(QueryError::Cancelled) => return Ok(()),
                        Err(e) => warn!("cache refresh for project '{}' failed: {}", project_id, e),
                    }
                    let status = self.status(project_id).await?;
                    info!(
                        "Project '{}' cache lag avg={} max={}",
                        project_id, status.lag_avg, status.lag_max
                    );
                }
            }
        }
    }
}
