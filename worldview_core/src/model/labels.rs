use crate::timeseries::{Time, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xxhash_rust::xxh3::xxh3_64;

pub type Labels = BTreeMap<String, String>;

/// Stable hash of a label set, independent of insertion order.
pub fn labels_hash(labels: &Labels) -> u64 {
    let mut buf = Vec::with_capacity(labels.len() * 16);
    for (k, v) in labels {
        buf.extend_from_slice(k.as_bytes());
        buf.push(0xff);
        buf.extend_from_slice(v.as_bytes());
        buf.push(0xfe);
    }
    xxh3_64(&buf)
}

/// One observed series returned by the metrics backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValues {
    pub labels: Labels,
    pub labels_hash: u64,
    pub values: TimeSeries,
}

impl MetricValues {
    pub fn new(labels: Labels, values: TimeSeries) -> Self {
        Self {
            labels_hash: labels_hash(&labels),
            labels,
            values,
        }
    }

    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map(String::as_str).unwrap_or("")
    }
}

/// A slowly changing label value: keeps the value seen at the latest sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelLastValue {
    value: String,
    ts: Time,
}

impl LabelLastValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ts: Time(0),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn update(&mut self, series: &TimeSeries, value: &str) {
        if value.is_empty() {
            return;
        }
        let (t, v) = series.last_not_null();
        if v.is_nan() {
            return;
        }
        if self.value.is_empty() || t >= self.ts {
            self.value = value.to_string();
            self.ts = t;
        }
    }
}
