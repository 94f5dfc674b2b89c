use super::id::ApplicationId;
use glob::Pattern;
use std::collections::BTreeMap;
use tracing::warn;

pub const CATEGORY_APPLICATION: &str = "application";
pub const CATEGORY_CONTROL_PLANE: &str = "control-plane";
pub const CATEGORY_MONITORING: &str = "monitoring";

/// Glob rules mapping `"<namespace>/<name>"` to a category.
///
/// Categories are tried in name order and the first matching one wins;
/// anything unmatched falls into [`CATEGORY_APPLICATION`].
#[derive(Debug, Clone)]
pub struct Categories {
    rules: BTreeMap<String, Vec<Pattern>>,
}

fn builtin() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        (CATEGORY_APPLICATION, &[]),
        (CATEGORY_CONTROL_PLANE, &["kube-system/*", "*/kubelet", "*/kube-apiserver"]),
        (
            CATEGORY_MONITORING,
            &[
                "monitoring/*",
                "prometheus/*",
                "*/*prometheus*",
                "grafana/*",
                "*/*grafana*",
                "*/*alertmanager*",
                "coroot/*",
            ],
        ),
    ]
}

fn compile(patterns: &[impl AsRef<str>]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p.as_ref()) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("invalid category pattern '{}': {}", p.as_ref(), e);
                None
            }
        })
        .collect()
}

impl Default for Categories {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl Categories {
    /// Builtin categories extended by the project's own; custom patterns of a
    /// builtin category are appended to the builtin ones.
    pub fn new(custom: &BTreeMap<String, Vec<String>>) -> Self {
        let mut rules: BTreeMap<String, Vec<Pattern>> = BTreeMap::new();
        for (name, patterns) in builtin() {
            rules.insert(name.to_string(), compile(patterns));
        }
        for (name, patterns) in custom {
            rules.entry(name.clone()).or_default().extend(compile(patterns));
        }
        Self { rules }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn matching(&self, id: &ApplicationId) -> Option<&str> {
        let subject = format!("{}/{}", id.namespace, id.name);
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.matches(&subject)))
            .map(|(name, _)| name.as_str())
    }

    pub fn categorize(&self, id: &ApplicationId) -> String {
        self.matching(id).unwrap_or(CATEGORY_APPLICATION).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApplicationKind;

    fn id(ns: &str, name: &str) -> ApplicationId {
        ApplicationId::new("c1", ns, ApplicationKind::Deployment, name)
    }

    #[test]
    fn test_builtin_categories() {
        let c = Categories::default();
        assert_eq!(c.categorize(&id("kube-system", "coredns")), CATEGORY_CONTROL_PLANE);
        assert_eq!(c.categorize(&id("default", "kube-prometheus-stack")), CATEGORY_MONITORING);
        assert_eq!(c.categorize(&id("shop", "cart")), CATEGORY_APPLICATION);
    }

    #[test]
    fn test_custom_first_match_in_name_order() {
        let mut custom = BTreeMap::new();
        custom.insert("batch".to_string(), vec!["jobs/*".to_string()]);
        custom.insert("zz-all".to_string(), vec!["*".to_string()]);
        custom.insert("a-infra".to_string(), vec!["*/ingress*".to_string(), "[bad".to_string()]);
        let c = Categories::new(&custom);
        assert_eq!(c.categorize(&id("jobs", "nightly")), "batch");
        assert_eq!(c.categorize(&id("edge", "ingress-nginx")), "a-infra");
        assert_eq!(c.categorize(&id("shop", "cart")), "zz-all");
    }

    proptest::proptest! {
        #[test]
        fn categorize_is_total(ns in "[a-z-]{0,12}", name in "[a-z0-9-]{1,12}", pat in "[a-z*/]{1,8}") {
            let mut custom = BTreeMap::new();
            custom.insert("custom".to_string(), vec![pat]);
            let c = Categories::new(&custom);
            let category = c.categorize(&id(&ns, &name));
            proptest::prop_assert!(c.names().any(|n| n == category));
        }
    }
}
