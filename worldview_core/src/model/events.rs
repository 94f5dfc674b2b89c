use crate::timeseries::Time;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationEventType {
    Rollout,
    Switchover,
    InstanceUp,
    InstanceDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationEvent {
    pub start: Time,
    /// Zero while still in progress.
    pub end: Time,
    pub kind: ApplicationEventType,
    pub details: String,
}

pub fn sort_events(events: &mut [ApplicationEvent]) {
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.details.cmp(&b.details)));
}
