use crate::config::CacheConfig;
use crate::error::{QueryError, Result};
use crate::prom::DynPromClient;
use crate::selector::{self, LabelMatcher};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use worldview_core::{Duration, MetricValues, Time};

pub type QueryResults = HashMap<String, Vec<MetricValues>>;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub query_timeout: std::time::Duration,
    pub retries: u32,
    pub retry_backoff: std::time::Duration,
    pub extra_selector: Vec<LabelMatcher>,
    /// Off when the client is a [`crate::CacheClient`], which keys its data
    /// by template and renders on its own.
    pub render_templates: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            query_timeout: std::time::Duration::from_secs(30),
            retries: 1,
            retry_backoff: std::time::Duration::from_millis(200),
            extra_selector: Vec::new(),
            render_templates: true,
        }
    }
}

impl ExecutorConfig {
    pub fn from_cache_config(cfg: &CacheConfig, extra_selector: Vec<LabelMatcher>) -> Self {
        Self {
            concurrency: cfg.concurrency.max(1),
            query_timeout: cfg.query_timeout,
            retries: cfg.retries,
            extra_selector,
            ..Default::default()
        }
    }

    /// Settings for reading through a cache client.
    pub fn passthrough() -> Self {
        Self {
            retries: 0,
            render_templates: false,
            ..Default::default()
        }
    }

    /// Final query text sent to the backend.
    pub fn render(&self, template: &str, step: Duration) -> String {
        if !self.render_templates {
            return template.to_string();
        }
        let q = selector::substitute_range(template, step);
        selector::add_extra_selector(&q, &self.extra_selector)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    pub metrics_count: usize,
    pub query_time: std::time::Duration,
    pub failed: bool,
    pub error: Option<String>,
}

fn backoff(base: std::time::Duration, attempt: u32) -> std::time::Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 2 + 1);
    exp + std::time::Duration::from_millis(jitter)
}

async fn query_with_retry(
    client: &DynPromClient,
    query: &str,
    from: Time,
    to: Time,
    step: Duration,
    cfg: &ExecutorConfig,
) -> Result<Vec<MetricValues>> {
    let mut attempt = 0;
    loop {
        let res = match tokio::time::timeout(cfg.query_timeout, client.query_range(query, from, to, step)).await {
            Ok(res) => res,
            Err(_) => Err(QueryError::Timeout(cfg.query_timeout)),
        };
        match res {
            Ok(mvs) => return Ok(mvs),
            Err(e) if attempt < cfg.retries => {
                debug!("query {} failed (attempt {}): {}", query, attempt + 1, e);
                tokio::time::sleep(backoff(cfg.retry_backoff, attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Evaluates every named template over `[from, to]` with bounded parallelism.
///
/// Individual failures are reported through the returned stats with an empty
/// result; only cancellation fails the whole call.
pub async fn parallel_query_range(
    token: &CancellationToken,
    client: DynPromClient,
    from: Time,
    to: Time,
    step: Duration,
    queries: &BTreeMap<String, String>,
    cfg: &ExecutorConfig,
) -> Result<(QueryResults, BTreeMap<String, QueryStats>)> {
    let tasks = queries.iter().map(|(name, template)| {
        let client = client.clone();
        let query = cfg.render(template, step);
        async move {
            let started = Instant::now();
            let res = query_with_retry(&client, &query, from, to, step, cfg).await;
            let elapsed = started.elapsed();
            metrics::histogram!("worldview_query_duration_seconds").record(elapsed.as_secs_f64());
            let stats = match &res {
                Ok(mvs) => {
                    metrics::counter!("worldview_queries_total", "status" => "ok").increment(1);
                    QueryStats {
                        metrics_count: mvs.len(),
                        query_time: elapsed,
                        ..Default::default()
                    }
                }
                Err(e) => {
                    metrics::counter!("worldview_queries_total", "status" => "failed").increment(1);
                    warn!("query '{}' failed: {}", name, e);
                    QueryStats {
                        query_time: elapsed,
                        failed: true,
                        error: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            (name.clone(), res.unwrap_or_default(), stats)
        }
    }).collect::<Vec<_>>();

    let collect = stream::iter(tasks)
        .buffer_unordered(cfg.concurrency.max(1))
        .collect::<Vec<_>>();

    let done = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(QueryError::Cancelled),
        done = collect => done,
    };

    let mut results = QueryResults::with_capacity(done.len());
    let mut stats = BTreeMap::new();
    for (name, mvs, s) in done {
        results.insert(name.clone(), mvs);
        stats.insert(name, s);
    }
    Ok((results, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prom::{MockPromClient, PromClient, StaticPromClient};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn catalogue() -> BTreeMap<String, String> {
        [
            ("up", "up"),
            ("cpu", "rate(cpu_seconds_total[$RANGE])"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[tokio::test]
    async fn test_range_substitution_and_results() {
        let mut fixture = StaticPromClient::new();
        fixture.add("up", &[("job", "a")], vec![(0, 1.0), (30, 1.0)]);
        fixture.add("rate(cpu_seconds_total[30s])", &[("job", "a")], vec![(0, 0.5)]);
        let client: DynPromClient = Arc::new(fixture);
        let token = CancellationToken::new();
        let (res, stats) = parallel_query_range(
            &token,
            client,
            Time(0),
            Time(60),
            Duration(30),
            &catalogue(),
            &ExecutorConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(res["up"].len(), 1);
        assert_eq!(res["cpu"].len(), 1);
        assert_eq!(stats["cpu"].metrics_count, 1);
        assert!(!stats["up"].failed);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut mock = MockPromClient::new();
        mock.expect_query_range().returning(|q, _, _, _| {
            if q == "up" {
                Err(QueryError::Backend("boom".into()))
            } else {
                Ok(Vec::new())
            }
        });
        let cfg = ExecutorConfig {
            retries: 2,
            retry_backoff: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let (res, stats) = parallel_query_range(
            &CancellationToken::new(),
            Arc::new(mock),
            Time(0),
            Time(60),
            Duration(30),
            &catalogue(),
            &cfg,
        )
        .await
        .unwrap();
        assert!(res["up"].is_empty());
        assert!(stats["up"].failed);
        assert!(stats["up"].error.as_deref().unwrap_or("").contains("boom"));
        assert!(!stats["cpu"].failed);
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PromClient for Flaky {
        async fn query_range(&self, _: &str, _: Time, _: Time, _: Duration) -> Result<Vec<MetricValues>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(QueryError::Backend("transient".into()));
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let flaky = Arc::new(Flaky { calls: AtomicUsize::new(0) });
        let cfg = ExecutorConfig {
            retry_backoff: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let queries: BTreeMap<String, String> = [("up".to_string(), "up".to_string())].into();
        let (_, stats) = parallel_query_range(
            &CancellationToken::new(),
            flaky.clone(),
            Time(0),
            Time(60),
            Duration(30),
            &queries,
            &cfg,
        )
        .await
        .unwrap();
        assert!(!stats["up"].failed);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    struct Slow;

    #[async_trait::async_trait]
    impl PromClient for Slow {
        async fn query_range(&self, _: &str, _: Time, _: Time, _: Duration) -> Result<Vec<MetricValues>> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let cfg = ExecutorConfig {
            query_timeout: std::time::Duration::from_millis(20),
            retries: 0,
            ..Default::default()
        };
        let queries: BTreeMap<String, String> = [("up".to_string(), "up".to_string())].into();
        let (_, stats) =
            parallel_query_range(&CancellationToken::new(), Arc::new(Slow), Time(0), Time(60), Duration(30), &queries, &cfg)
                .await
                .unwrap();
        assert!(stats["up"].failed);
        assert!(stats["up"].error.as_deref().unwrap_or("").contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_discards_results() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let res = parallel_query_range(
            &token,
            Arc::new(Slow),
            Time(0),
            Time(60),
            Duration(30),
            &catalogue(),
            &ExecutorConfig::default(),
        )
        .await;
        assert!(matches!(res, Err(QueryError::Cancelled)));
    }

    #[test]
    fn test_render_with_extra_selector() {
        let cfg = ExecutorConfig {
            extra_selector: selector::parse_selector(r#"{cluster="c1"}"#).unwrap(),
            ..Default::default()
        };
        assert_eq!(
            cfg.render("rate(x[$RANGE])", Duration(60)),
            r#"rate(x{cluster="c1"}[60s])"#
        );
    }
}
