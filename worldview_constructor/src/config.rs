use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use worldview_core::model::check_config::{SLO_AVAILABILITY, SLO_LATENCY};
use worldview_core::model::{Categories, CheckConfigSloAvailability, CheckConfigSloLatency, CheckConfigs};
use worldview_core::ApplicationId;
use worldview_query::{CacheConfig, PrometheusConfig};

/// Everything the constructor needs to know about one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_id: String,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Clusters sharing one metrics backend. Empty means a single cluster
    /// named after the project.
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    /// category -> glob patterns over `"<namespace>/<name>"`
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub check_configs: CheckConfigs,
    #[serde(default = "default_instrumentation")]
    pub instrumentation: BTreeMap<String, InstrumentationConfig>,
    /// application id -> SLI queries provided by the user
    #[serde(default)]
    pub custom_slis: BTreeMap<String, CustomSli>,
    /// Raw rule definitions, appended to the builtin alerting rules.
    #[serde(default)]
    pub alerting_rules: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfigFile {
    pub project: ProjectConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Selector isolating this cluster's series, e.g. `{cluster="eu-1"}`.
    #[serde(default)]
    pub extra_selector: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    pub port: u16,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomSli {
    #[serde(default)]
    pub availability: Option<CheckConfigSloAvailability>,
    #[serde(default)]
    pub latency: Option<CheckConfigSloLatency>,
}

fn default_instrumentation() -> BTreeMap<String, InstrumentationConfig> {
    [
        ("postgres", 5432),
        ("redis", 6379),
        ("mongodb", 27017),
        ("memcached", 11211),
        ("mysql", 3306),
    ]
    .into_iter()
    .map(|(kind, port)| (kind.to_string(), InstrumentationConfig { port, disabled: false }))
    .collect()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_id: "default".to_string(),
            prometheus: PrometheusConfig::default(),
            cache: CacheConfig::default(),
            clusters: Vec::new(),
            categories: BTreeMap::new(),
            check_configs: CheckConfigs::default(),
            instrumentation: default_instrumentation(),
            custom_slis: BTreeMap::new(),
            alerting_rules: Vec::new(),
        }
    }
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.is_empty() {
            return Err("Project id cannot be empty".to_string());
        }
        self.prometheus.validate()?;
        self.cache.validate()?;

        let mut seen = std::collections::BTreeSet::new();
        for cluster in &self.clusters {
            if cluster.id.is_empty() {
                return Err("Cluster id cannot be empty".to_string());
            }
            if cluster.id.contains(':') {
                return Err(format!("Cluster id '{}' cannot contain ':'", cluster.id));
            }
            if !seen.insert(cluster.id.as_str()) {
                return Err(format!("Duplicate cluster id '{}'", cluster.id));
            }
            worldview_query::selector::parse_selector(&cluster.extra_selector)
                .map_err(|e| format!("cluster '{}': {}", cluster.id, e))?;
        }

        for (kind, instrumentation) in &self.instrumentation {
            if instrumentation.port == 0 && !instrumentation.disabled {
                return Err(format!("Instrumentation '{}' must have a port", kind));
            }
        }

        for (id, sli) in &self.custom_slis {
            ApplicationId::parse(id, &self.project_id).map_err(|e| e.to_string())?;
            if let Some(a) = &sli.availability {
                if a.total_requests_query.is_empty() || a.failed_requests_query.is_empty() {
                    return Err(format!("Availability SLI of '{}' needs both total and failed queries", id));
                }
                validate_objective(id, a.objective_percentage)?;
            }
            if let Some(l) = &sli.latency {
                if l.histogram_query.is_empty() {
                    return Err(format!("Latency SLI of '{}' needs a histogram query", id));
                }
                if l.objective_bucket <= 0.0 {
                    return Err(format!("Latency SLI of '{}' needs a positive objective bucket", id));
                }
                validate_objective(id, l.objective_percentage)?;
            }
        }
        Ok(())
    }

    /// `(id, name, extra selector)` of every cluster to load.
    pub fn cluster_list(&self) -> Vec<ClusterConfig> {
        if self.clusters.is_empty() {
            return vec![ClusterConfig {
                id: self.project_id.clone(),
                name: self.project_id.clone(),
                extra_selector: self.prometheus.extra_selector.clone(),
            }];
        }
        self.clusters.clone()
    }

    pub fn categories(&self) -> Categories {
        Categories::new(&self.categories)
    }

    /// Check settings with the custom SLIs folded in as explicit SLO configs.
    pub fn effective_check_configs(&self) -> CheckConfigs {
        let mut res = self.check_configs.clone();
        for (id, sli) in &self.custom_slis {
            let key = match ApplicationId::parse(id, &self.project_id) {
                Ok(id) => id.to_string(),
                Err(_) => continue,
            };
            let entry = res.0.entry(key).or_default();
            if let Some(a) = &sli.availability {
                let cfg = CheckConfigSloAvailability { custom: true, ..a.clone() };
                if let Ok(v) = serde_json::to_value(vec![cfg]) {
                    entry.insert(SLO_AVAILABILITY.to_string(), v);
                }
            }
            if let Some(l) = &sli.latency {
                let cfg = CheckConfigSloLatency { custom: true, ..l.clone() };
                if let Ok(v) = serde_json::to_value(vec![cfg]) {
                    entry.insert(SLO_LATENCY.to_string(), v);
                }
            }
        }
        res
    }

    /// Default port of each enabled instrumentation kind.
    pub fn instrumented_ports(&self) -> BTreeMap<u16, String> {
        self.instrumentation
            .iter()
            .filter(|(_, i)| !i.disabled)
            .map(|(kind, i)| (i.port, kind.clone()))
            .collect()
    }
}

fn validate_objective(id: &str, objective: f32) -> Result<(), String> {
    if !(0.0..=100.0).contains(&objective) || objective == 0.0 {
        return Err(format!("Objective of '{}' must be within (0, 100]", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ProjectConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.instrumentation["postgres"].port, 5432);
        assert_eq!(cfg.instrumented_ports()[&27017], "mongodb");
        let clusters = cfg.cluster_list();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, "default");
    }

    #[test]
    fn test_duplicate_clusters() {
        let cfg = ProjectConfig {
            clusters: vec![
                ClusterConfig {
                    id: "eu".into(),
                    name: String::new(),
                    extra_selector: String::new(),
                },
                ClusterConfig {
                    id: "eu".into(),
                    name: String::new(),
                    extra_selector: String::new(),
                },
            ],
            ..Default::default()
        };
        assert!(cfg.validate().unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn test_invalid_cluster_selector() {
        let cfg = ProjectConfig {
            clusters: vec![ClusterConfig {
                id: "eu".into(),
                name: "Europe".into(),
                extra_selector: "{cluster=eu}".into(),
            }],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_custom_sli_becomes_check_config() {
        let mut cfg = ProjectConfig::default();
        cfg.custom_slis.insert(
            "shop:Deployment:api".into(),
            CustomSli {
                availability: Some(CheckConfigSloAvailability {
                    custom: false,
                    total_requests_query: "http_requests_total".into(),
                    failed_requests_query: "http_requests_total{code=~\"5..\"}".into(),
                    objective_percentage: 99.9,
                }),
                latency: None,
            },
        );
        assert!(cfg.validate().is_ok());
        let configs = cfg.effective_check_configs();
        let id = ApplicationId::parse("default:shop:Deployment:api", "").unwrap();
        let (availability, is_default) = configs.get_availability(&id);
        assert!(!is_default);
        assert!(availability[0].custom);
        assert_eq!(availability[0].objective_percentage, 99.9);
    }

    #[test]
    fn test_custom_sli_requires_queries() {
        let mut cfg = ProjectConfig::default();
        cfg.custom_slis.insert(
            "shop:Deployment:api".into(),
            CustomSli {
                availability: None,
                latency: Some(CheckConfigSloLatency::default()),
            },
        );
        assert!(cfg.validate().is_err());
    }
}
