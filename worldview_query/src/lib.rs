pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod prom;
pub mod selector;

pub use cache::{Cache, CacheClient, CacheStatus};
pub use config::{CacheConfig, PrometheusConfig};
pub use error::{QueryError, Result};
pub use executor::{parallel_query_range, ExecutorConfig, QueryResults, QueryStats};
pub use prom::{DynPromClient, HttpPromClient, PromClient, StaticPromClient};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
