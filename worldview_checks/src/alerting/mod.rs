//! Alerting rules evaluated against audited worlds.

pub mod evaluator;
pub mod journal;
pub mod rules;

pub use evaluator::{fingerprint, AlertEvaluator, Transition};
pub use journal::{Alert, AlertDetail, AlertJournal, InMemoryJournal};
pub use rules::{builtin_rules, load_rules, AlertSource, AlertTemplates, AlertingRule, AppSelector};
