use super::id::ApplicationId;
use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const DEFAULT_KEY: &str = "default";
pub const SLO_AVAILABILITY: &str = "SLOAvailability";
pub const SLO_LATENCY: &str = "SLOLatency";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckConfigSimple {
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfigSloAvailability {
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub total_requests_query: String,
    #[serde(default)]
    pub failed_requests_query: String,
    pub objective_percentage: f32,
}

impl CheckConfigSloAvailability {
    pub fn total(&self) -> String {
        format!("sum(rate({}[$RANGE]))", self.total_requests_query)
    }

    pub fn failed(&self) -> String {
        format!("sum(rate({}[$RANGE]))", self.failed_requests_query)
    }
}

impl Default for CheckConfigSloAvailability {
    fn default() -> Self {
        Self {
            custom: false,
            total_requests_query: String::new(),
            failed_requests_query: String::new(),
            objective_percentage: 99.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfigSloLatency {
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub histogram_query: String,
    pub objective_bucket: f32,
    pub objective_percentage: f32,
}

impl CheckConfigSloLatency {
    pub fn histogram(&self) -> String {
        format!("sum by(le)(rate({}[$RANGE]))", self.histogram_query)
    }
}

impl Default for CheckConfigSloLatency {
    fn default() -> Self {
        Self {
            custom: false,
            histogram_query: String::new(),
            objective_bucket: 0.5,
            objective_percentage: 99.0,
        }
    }
}

/// Per-application check settings: `key -> check id -> raw JSON`.
///
/// A key is a full application id, an id without the cluster, a glob over
/// `"<namespace>/<name>"`, or `"default"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckConfigs(pub BTreeMap<String, BTreeMap<String, serde_json::Value>>);

impl CheckConfigs {
    /// Returns the raw setting and whether it came from the default entry.
    pub fn get(&self, app_id: &ApplicationId, check_id: &str) -> Option<(&serde_json::Value, bool)> {
        let lookup = |key: &str| self.0.get(key).and_then(|m| m.get(check_id));
        if let Some(v) = lookup(&app_id.to_string()).or_else(|| lookup(&app_id.string_without_cluster_id())) {
            return Some((v, false));
        }
        let subject = format!("{}/{}", app_id.namespace, app_id.name);
        for (key, checks) in &self.0 {
            if key == DEFAULT_KEY || !key.contains(['*', '?', '[']) {
                continue;
            }
            let matched = Pattern::new(key).map(|p| p.matches(&subject)).unwrap_or(false);
            if let Some(v) = checks.get(check_id).filter(|_| matched) {
                return Some((v, false));
            }
        }
        lookup(DEFAULT_KEY).map(|v| (v, true))
    }

    fn typed<T: DeserializeOwned>(&self, app_id: &ApplicationId, check_id: &str) -> Option<(T, bool)> {
        let (raw, is_default) = self.get(app_id, check_id)?;
        match serde_json::from_value(raw.clone()) {
            Ok(v) => Some((v, is_default)),
            Err(e) => {
                warn!("failed to unmarshal config of check {} for {}: {}", check_id, app_id, e);
                None
            }
        }
    }

    pub fn get_simple(&self, check_id: &str, app_id: &ApplicationId, default_threshold: f32) -> CheckConfigSimple {
        self.typed(app_id, check_id)
            .map(|(cfg, _)| cfg)
            .unwrap_or(CheckConfigSimple {
                threshold: default_threshold,
            })
    }

    /// Availability objectives; the flag is set when nothing specific was configured.
    pub fn get_availability(&self, app_id: &ApplicationId) -> (Vec<CheckConfigSloAvailability>, bool) {
        match self.typed::<Vec<CheckConfigSloAvailability>>(app_id, SLO_AVAILABILITY) {
            Some((cfgs, is_default)) if !cfgs.is_empty() => (cfgs, is_default),
            _ => (vec![CheckConfigSloAvailability::default()], true),
        }
    }

    pub fn get_latency(&self, app_id: &ApplicationId) -> (Vec<CheckConfigSloLatency>, bool) {
        match self.typed::<Vec<CheckConfigSloLatency>>(app_id, SLO_LATENCY) {
            Some((cfgs, is_default)) if !cfgs.is_empty() => (cfgs, is_default),
            _ => (vec![CheckConfigSloLatency::default()], true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApplicationKind;
    use serde_json::json;

    fn configs() -> CheckConfigs {
        serde_json::from_value(json!({
            "default": {"CPUNode": {"threshold": 70}},
            "shop/*": {"CPUNode": {"threshold": 60}},
            "shop:Deployment:cart": {"CPUNode": {"threshold": 50}},
            "c1:shop:Deployment:web": {"SLOAvailability": [{"objective_percentage": 99.9}]},
        }))
        .unwrap()
    }

    #[test]
    fn test_lookup_order() {
        let cc = configs();
        let cart = ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "cart");
        let api = ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "api");
        let other = ApplicationId::new("c1", "misc", ApplicationKind::Deployment, "x");
        assert_eq!(cc.get_simple("CPUNode", &cart, 80.0).threshold, 50.0);
        assert_eq!(cc.get_simple("CPUNode", &api, 80.0).threshold, 60.0);
        assert_eq!(cc.get_simple("CPUNode", &other, 80.0).threshold, 70.0);
        assert!(cc.get(&other, "CPUNode").unwrap().1);
        assert_eq!(cc.get_simple("MemoryOOM", &other, 0.0).threshold, 0.0);
    }

    #[test]
    fn test_slo_configs() {
        let cc = configs();
        let web = ApplicationId::new("c1", "shop", ApplicationKind::Deployment, "web");
        let (cfgs, is_default) = cc.get_availability(&web);
        assert!(!is_default);
        assert_eq!(cfgs[0].objective_percentage, 99.9);
        let (lat, is_default) = cc.get_latency(&web);
        assert!(is_default);
        assert_eq!(lat[0].objective_bucket, 0.5);
    }

    #[test]
    fn test_query_wrappers() {
        let cfg = CheckConfigSloAvailability {
            custom: true,
            total_requests_query: "http_requests_total".into(),
            failed_requests_query: "http_requests_total{code=~\"5..\"}".into(),
            objective_percentage: 99.0,
        };
        assert_eq!(cfg.total(), "sum(rate(http_requests_total[$RANGE]))");
        let lat = CheckConfigSloLatency {
            histogram_query: "h_bucket".into(),
            ..Default::default()
        };
        assert_eq!(lat.histogram(), "sum by(le)(rate(h_bucket[$RANGE]))");
    }
}
