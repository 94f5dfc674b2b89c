use super::Loader;
use crate::recording_rules::RR_APPLICATION_LOG_MESSAGES;
use tracing::warn;
use worldview_core::model::{LogLevel, Pattern};
use worldview_core::timeseries::merge;
use worldview_core::{ApplicationId, Reducer};

impl Loader<'_> {
    /// Log message counts per application, level and pattern, taken from the
    /// log recording rule so that patterns stay stable across builds.
    pub fn load_logs(&mut self) {
        for m in self.recording_rule(RR_APPLICATION_LOG_MESSAGES, false).to_vec() {
            let app_id = match ApplicationId::parse(m.label("application"), &self.cluster_id) {
                Ok(id) => id,
                Err(e) => {
                    warn!("{}: {}", RR_APPLICATION_LOG_MESSAGES, e);
                    continue;
                }
            };
            let Some(app) = self.world.app_idx(&app_id) else {
                continue;
            };
            let level = LogLevel::parse(m.label("level"));
            let msgs = self.world.applications[app].log_messages_mut(level);
            merge(&mut msgs.messages, &m.values, Reducer::NanSum);

            let hash = m.label("pattern_hash");
            if hash.is_empty() {
                continue;
            }
            let mut hashes = vec![hash];
            hashes.extend(m.label("similar").split(',').filter(|h| !h.is_empty() && *h != hash));
            msgs.add_pattern(
                &hashes,
                Pattern::from_words(m.label("words")),
                m.label("sample"),
                m.label("multiline") == "true",
                &m.values,
            );
        }
    }
}
