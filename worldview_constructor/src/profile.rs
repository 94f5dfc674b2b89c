use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use worldview_query::QueryStats;

/// Where the time of one world build went.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Profile {
    /// stage -> seconds; a stage run once per cluster keeps its slowest run
    pub stages: BTreeMap<String, f32>,
    pub queries: BTreeMap<String, QueryStats>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage(&mut self, name: &str, elapsed: Duration) {
        let secs = elapsed.as_secs_f32();
        let entry = self.stages.entry(name.to_string()).or_insert(0.0);
        if secs > *entry {
            *entry = secs;
        }
    }

    /// Starts timing a stage; the time is recorded when the guard is
    /// passed back to [`Profile::finish`].
    pub fn stage(&self, name: &'static str) -> Stage {
        Stage {
            name,
            started: Instant::now(),
        }
    }

    pub fn finish(&mut self, stage: Stage) {
        let elapsed = stage.started.elapsed();
        tracing::debug!("stage {} done in {:?}", stage.name, elapsed);
        self.record_stage(stage.name, elapsed);
    }

    /// Folds per-query stats in; repeated names add up their time and series.
    pub fn add_queries(&mut self, stats: BTreeMap<String, QueryStats>) {
        for (name, s) in stats {
            let entry = self.queries.entry(name).or_default();
            entry.metrics_count += s.metrics_count;
            entry.query_time += s.query_time;
            entry.failed |= s.failed;
            if s.error.is_some() {
                entry.error = s.error;
            }
        }
    }

    pub fn failed_queries(&self) -> impl Iterator<Item = (&String, &QueryStats)> {
        self.queries.iter().filter(|(_, s)| s.failed)
    }

    pub fn total_query_time(&self) -> Duration {
        self.queries.values().map(|s| s.query_time).sum()
    }
}

pub struct Stage {
    name: &'static str,
    started: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slowest_run_is_kept() {
        let mut p = Profile::new();
        p.record_stage("nodes", Duration::from_millis(200));
        p.record_stage("nodes", Duration::from_millis(100));
        assert!((p.stages["nodes"] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_query_stats_accumulate() {
        let mut p = Profile::new();
        let stats = |count, failed| {
            BTreeMap::from([(
                "up".to_string(),
                QueryStats {
                    metrics_count: count,
                    query_time: Duration::from_millis(10),
                    failed,
                    error: failed.then(|| "timeout".to_string()),
                },
            )])
        };
        p.add_queries(stats(3, false));
        p.add_queries(stats(2, true));
        assert_eq!(p.queries["up"].metrics_count, 5);
        assert_eq!(p.total_query_time(), Duration::from_millis(20));
        assert_eq!(p.failed_queries().count(), 1);
    }
}
