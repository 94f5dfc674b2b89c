use super::{ProjectCache, Snapshot};
use crate::error::Result;
use crate::prom::PromClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use worldview_core::{Context, Duration, MetricValues, Time, TimeSeries};

/// Read handle on one project cache.
///
/// The snapshot is pinned when the client is created, so every query made
/// through one client sees the same point-in-time view. Queries are the
/// templates as registered (with `$RANGE` unrendered).
#[derive(Clone)]
pub struct CacheClient {
    project: Arc<ProjectCache>,
    snapshot: Arc<Snapshot>,
}

impl CacheClient {
    pub fn new(project: Arc<ProjectCache>) -> Self {
        let snapshot = project.snapshot();
        Self { project, snapshot }
    }

    pub fn project_id(&self) -> &str {
        self.project.id()
    }

    /// Oldest "last cached" timestamp across queries.
    pub fn to(&self) -> Option<Time> {
        self.project.to()
    }

    pub fn step(&self, from: Time, to: Time) -> Duration {
        self.step_at(from, to, Time::now())
    }

    pub fn step_at(&self, from: Time, to: Time, now: Time) -> Duration {
        self.project.step_for(from, to, now)
    }

    /// Serves `[from, to]` from the pinned snapshot.
    ///
    /// Points the cache does not hold are NaN. An unknown template is
    /// registered for refresh and yields nothing; a window reaching past
    /// the cached range schedules a background refill.
    pub fn read(&self, query: &str, from: Time, to: Time, step: Duration) -> Vec<MetricValues> {
        let Some(data) = self.snapshot.queries.get(query) else {
            if self.project.register(query) {
                debug!("project '{}': registered query '{}'", self.project.id(), query);
            }
            self.project.spawn_refill(query, Some(from));
            return Vec::new();
        };

        let cached_to = self
            .project
            .states
            .lock()
            .ok()
            .and_then(|s| s.get(query).and_then(|st| st.last_ts));
        let missing_head = data.first().map_or(true, |first| from < first);
        let missing_tail = cached_to.map_or(true, |last| to > last + self.project.raw_step());
        if missing_head || missing_tail {
            self.project
                .spawn_refill(query, if missing_head { Some(from) } else { None });
        }

        let ctx = Context::new(from, to, step);
        let mut res = Vec::with_capacity(data.series.len());
        for s in data.series.values() {
            let values: Vec<f32> = ctx.times().map(|t| s.value_at(t)).collect();
            if values.iter().all(|v| v.is_nan()) {
                continue;
            }
            res.push(MetricValues::new(s.labels.clone(), TimeSeries::from_data(ctx.from, ctx.step, values)));
        }
        res
    }
}

#[async_trait]
impl PromClient for CacheClient {
    async fn query_range(&self, query: &str, from: Time, to: Time, step: Duration) -> Result<Vec<MetricValues>> {
        Ok(self.read(query, from, to, step))
    }
}
