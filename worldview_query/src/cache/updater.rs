use super::{CachedSeries, ProjectCache, QueryState};
use crate::error::Result;
use crate::executor::parallel_query_range;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use worldview_core::{Duration, Time};

/// Releases claimed queries when a refresh finishes.
struct InFlight<'a> {
    project: &'a ProjectCache,
    templates: Vec<String>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.project.in_flight.lock() {
            for t in &self.templates {
                in_flight.remove(t);
            }
        }
    }
}

struct Running<'a>(&'a ProjectCache);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl ProjectCache {
    fn claim(&self, templates: Vec<String>) -> InFlight<'_> {
        let mut claimed = Vec::new();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            for t in templates {
                if in_flight.insert(t.clone()) {
                    claimed.push(t);
                }
            }
        }
        InFlight {
            project: self,
            templates: claimed,
        }
    }

    /// One refresh tick over every registered query. A tick that starts
    /// while the previous one is still running is skipped.
    pub async fn refresh_all(&self, token: &CancellationToken) -> Result<usize> {
        self.refresh_all_at(Time::now(), token).await
    }

    pub async fn refresh_all_at(&self, now: Time, token: &CancellationToken) -> Result<usize> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("project '{}': previous refresh is still running, skipping tick", self.id);
            return Ok(0);
        }
        let _running = Running(self);
        let templates: Vec<String> = self.registered().into_values().collect::<HashSet<_>>().into_iter().collect();
        self.refresh_queries_at(templates, None, now, token).await
    }

    /// Fetches the missing tail of `templates` and, when `want_from` is
    /// older than anything fetched so far, the history back to it.
    ///
    /// Returns the number of queries fetched successfully.
    pub async fn refresh_queries_at(
        &self,
        templates: Vec<String>,
        want_from: Option<Time>,
        now: Time,
        token: &CancellationToken,
    ) -> Result<usize> {
        let claim = self.claim(templates);
        if claim.templates.is_empty() {
            return Ok(0);
        }
        let step = self.step;
        let to = now.truncate(step);
        let backfill = Duration::from_std(self.config.backfill).truncate(step);
        let oldest = (now - Duration::from_std(self.config.retention)).truncate(step);

        let mut groups: BTreeMap<Time, BTreeMap<String, String>> = BTreeMap::new();
        {
            let Ok(states) = self.states.lock() else {
                return Ok(0);
            };
            for t in &claim.templates {
                let state = states.get(t).cloned().unwrap_or_default();
                if state.in_cooldown(now) {
                    debug!("project '{}': query '{}' is in cooldown", self.id, t);
                    continue;
                }
                let mut from = match state.last_ts {
                    Some(ts) => ts + step,
                    None => to - backfill,
                };
                if let Some(want) = want_from {
                    let want = want.truncate(step).max(oldest);
                    if state.fetched_from.map_or(true, |f| want < f) {
                        from = from.min(want);
                    }
                }
                if from > to {
                    continue;
                }
                groups.entry(from).or_default().insert(t.clone(), t.clone());
            }
        }

        let mut ok = 0;
        for (from, queries) in groups {
            let (results, stats) =
                parallel_query_range(token, self.client.clone(), from, to, step, &queries, &self.executor).await?;

            let _writer = self.writer.lock().await;
            let current = self.snapshot.load_full();
            let mut next = (*current).clone();
            let Ok(mut states) = self.states.lock() else {
                continue;
            };
            for (template, s) in stats {
                let state = states.entry(template.clone()).or_insert_with(QueryState::default);
                if s.failed {
                    self.record_failure(&template, state, s.error.unwrap_or_default(), now);
                    continue;
                }
                let mut data = next
                    .queries
                    .get(&template)
                    .map(|d| (**d).clone())
                    .unwrap_or_default();
                for mv in results.get(&template).into_iter().flatten() {
                    data.series
                        .entry(mv.labels_hash)
                        .or_insert_with(|| CachedSeries::new(mv.labels.clone(), step, self.compacted_step()))
                        .raw
                        .insert(&mv.values);
                }
                self.compact(&mut data.series, now);
                next.queries.insert(template, Arc::new(data));

                state.last_ts = Some(state.last_ts.map_or(to, |ts| ts.max(to)));
                state.fetched_from = Some(state.fetched_from.map_or(from, |f| f.min(from)));
                state.consecutive_failures = 0;
                state.last_error = None;
                state.failed_at = None;
                state.cooldown_until = None;
                ok += 1;
            }
            self.snapshot.store(Arc::new(next));
        }
        Ok(ok)
    }

    fn record_failure(&self, template: &str, state: &mut QueryState, error: String, now: Time) {
        state.consecutive_failures += 1;
        state.last_error = Some(error);
        state.failed_at = Some(now);
        if state.consecutive_failures >= self.config.max_consecutive_failures {
            let until = now + Duration::from_std(self.config.cooldown);
            warn!(
                "project '{}': query '{}' failed {} times in a row, cooling down until {}",
                self.id, template, state.consecutive_failures, until
            );
            state.cooldown_until = Some(until);
        }
    }

    fn compact(&self, series: &mut BTreeMap<u64, CachedSeries>, now: Time) {
        let boundary = now - Duration::from_std(self.config.raw_retention);
        let oldest = now - Duration::from_std(self.config.retention);
        for s in series.values_mut() {
            let CachedSeries { raw, compacted, .. } = s;
            raw.compact_into(boundary, compacted);
            compacted.prune(oldest);
        }
        series.retain(|_, s| !s.raw.is_empty() || !s.compacted.is_empty());
    }

    /// Schedules a refresh of `template` on the current runtime without
    /// waiting for it. Outside a runtime this is a no-op.
    pub fn spawn_refill(self: &Arc<Self>, template: &str, want_from: Option<Time>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self
            .in_flight
            .lock()
            .map(|f| f.contains(template))
            .unwrap_or(true)
        {
            return;
        }
        let project = self.clone();
        let template = template.to_string();
        handle.spawn(async move {
            let token = CancellationToken::new();
            if let Err(e) = project
                .refresh_queries_at(vec![template.clone()], want_from, Time::now(), &token)
                .await
            {
                warn!("project '{}': refill of '{}' failed: {}", project.id, template, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::ProjectCache;
    use crate::config::CacheConfig;
    use crate::error::{QueryError, Result};
    use crate::executor::ExecutorConfig;
    use crate::prom::{PromClient, StaticPromClient};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;
    use worldview_core::{Duration, MetricValues, Time};

    /// Records every request and answers with a constant series.
    struct Recorder {
        calls: Mutex<Vec<(String, Time, Time)>>,
        fail: bool,
    }

    #[async_trait]
    impl PromClient for Recorder {
        async fn query_range(&self, query: &str, from: Time, to: Time, step: Duration) -> Result<Vec<MetricValues>> {
            self.calls.lock().unwrap().push((query.to_string(), from, to));
            if self.fail {
                return Err(QueryError::Backend("down".into()));
            }
            let mut fixture = StaticPromClient::new();
            let values = (from.0..=to.0).step_by(step.0 as usize).map(|t| (t, 1.0)).collect();
            fixture.add(query, &[("job", "a")], values);
            fixture.query_range(query, from, to, step).await
        }
    }

    fn project(client: Arc<Recorder>, cfg: CacheConfig) -> ProjectCache {
        let queries: BTreeMap<String, String> =
            [("up".to_string(), "up".to_string()), ("rate".to_string(), "rate(x[$RANGE])".to_string())].into();
        ProjectCache::new("p", cfg, ExecutorConfig::default(), client, Duration(30), queries)
    }

    fn recorder(fail: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[tokio::test]
    async fn test_backfill_then_incremental() {
        let client = recorder(false);
        let p = project(client.clone(), CacheConfig::default());
        let token = CancellationToken::new();
        let now = Time(100_000);
        assert_eq!(p.refresh_all_at(now, &token).await.unwrap(), 2);
        {
            let calls = client.calls.lock().unwrap();
            assert!(calls.iter().any(|(q, _, _)| q == "rate(x[30s])"));
            assert!(calls.iter().all(|(_, from, to)| *to == Time(99_990) && *from == Time(99_990 - 7200)));
        }
        client.calls.lock().unwrap().clear();
        p.refresh_all_at(now + Duration(60), &token).await.unwrap();
        let calls = client.calls.lock().unwrap();
        assert!(calls.iter().all(|(_, from, to)| *from == Time(100_020) && *to == Time(100_050)));
        assert_eq!(p.to(), Some(Time(100_050)));
        let snapshot = p.snapshot();
        assert_eq!(snapshot.queries["up"].series.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_after_consecutive_failures() {
        let client = recorder(true);
        let cfg = CacheConfig {
            max_consecutive_failures: 2,
            ..Default::default()
        };
        let exec = ExecutorConfig {
            retries: 0,
            ..Default::default()
        };
        let p = ProjectCache::new(
            "p",
            cfg,
            exec,
            client.clone(),
            Duration(30),
            [("up".to_string(), "up".to_string())].into(),
        );
        let token = CancellationToken::new();
        for i in 0..2 {
            p.refresh_all_at(Time(1000 + i * 30), &token).await.unwrap();
        }
        assert_eq!(client.calls.lock().unwrap().len(), 2);
        p.refresh_all_at(Time(1060), &token).await.unwrap();
        assert_eq!(client.calls.lock().unwrap().len(), 2, "no request during cooldown");
        let status = p.status_at(Time(1060));
        assert!(status.error.unwrap().contains("down"));
        p.refresh_all_at(Time(1030 + 301), &token).await.unwrap();
        assert_eq!(client.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_refill_older_window_once() {
        let client = recorder(false);
        let p = project(client.clone(), CacheConfig::default());
        let token = CancellationToken::new();
        let now = Time(100_000);
        p.refresh_all_at(now, &token).await.unwrap();
        client.calls.lock().unwrap().clear();
        let want = Some(Time(90_000));
        p.refresh_queries_at(vec!["up".into()], want, now, &token).await.unwrap();
        assert_eq!(client.calls.lock().unwrap()[0].1, Time(90_000));
        p.refresh_queries_at(vec!["up".into()], want, now, &token).await.unwrap();
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    struct Slow(AtomicUsize);

    #[async_trait]
    impl PromClient for Slow {
        async fn query_range(&self, _: &str, _: Time, _: Time, _: Duration) -> Result<Vec<MetricValues>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_overlapping_ticks_coalesce() {
        let slow = Arc::new(Slow(AtomicUsize::new(0)));
        let p = ProjectCache::new(
            "p",
            CacheConfig::default(),
            ExecutorConfig::default(),
            slow.clone(),
            Duration(30),
            [("up".to_string(), "up".to_string())].into(),
        );
        let token = CancellationToken::new();
        let (a, b) = tokio::join!(p.refresh_all_at(Time(1000), &token), p.refresh_all_at(Time(1000), &token));
        assert_eq!(a.unwrap() + b.unwrap(), 1);
        assert_eq!(slow.0.load(Ordering::SeqCst), 1);
    }
}
