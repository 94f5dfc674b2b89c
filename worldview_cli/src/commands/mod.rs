pub mod alerts;
pub mod checks;
pub mod queries;
pub mod validate;
pub mod watch;
pub mod world;

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use worldview_constructor::{Constructor, ProjectConfig, QuerySource};
use worldview_core::{Context, Duration, Time};
use worldview_query::{DynPromClient, HttpPromClient, StaticPromClient};

/// The time window of a world and where its metrics come from.
#[derive(Args, Clone, Debug)]
pub struct WindowArgs {
    /// Window start, unix seconds (default: `to` minus `window`)
    #[arg(long)]
    pub from: Option<i64>,

    /// Window end, unix seconds (default: now)
    #[arg(long)]
    pub to: Option<i64>,

    /// Window length when `from` is not given
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    pub window: std::time::Duration,

    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    pub step: std::time::Duration,

    /// Read series from a JSON fixture `{query name: [series]}` instead of Prometheus
    #[arg(long)]
    pub fixture: Option<PathBuf>,
}

impl WindowArgs {
    pub fn context(&self) -> Result<Context> {
        let to = self.to.map(Time).unwrap_or_else(Time::now);
        let from = self
            .from
            .map(Time)
            .unwrap_or_else(|| to - Duration::from_std(self.window));
        if from >= to {
            anyhow::bail!("Empty window: from {} is not before to {}", from, to);
        }
        Ok(Context::new(from, to, Duration::from_std(self.step)))
    }

    /// The metrics backend: the fixture when given, Prometheus otherwise.
    pub fn prom_client(&self, config: &ProjectConfig) -> Result<DynPromClient> {
        match &self.fixture {
            Some(path) => Ok(Arc::new(StaticPromClient::from_file(path)?)),
            None => Ok(Arc::new(HttpPromClient::new(&config.prometheus)?)),
        }
    }

    pub fn constructor(&self, config: ProjectConfig) -> Result<Constructor> {
        let source = match &self.fixture {
            Some(path) => QuerySource::Fixture(Arc::new(StaticPromClient::from_file(path)?)),
            None => QuerySource::Prometheus(Arc::new(HttpPromClient::new(&config.prometheus)?)),
        };
        Ok(Constructor::new(config, source))
    }
}
