pub mod config;
pub mod constructor;
mod loaders;
pub mod multicluster;
pub mod parser;
pub mod profile;
pub mod queries;
pub mod recording_rules;

pub use config::{ClusterConfig, ProjectConfig};
pub use constructor::{Constructor, QuerySource};
pub use parser::{parse_config_from_file, parse_config_from_str};
pub use profile::Profile;
pub use queries::{QueryPlan, QUERIES};
pub use recording_rules::{RecordingRuleStore, SharedRecordingRuleStore};
