use super::labels::LabelLastValue;
use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Rds {
    pub status: LabelLastValue,
    pub engine: LabelLastValue,
    pub engine_version: LabelLastValue,
    pub instance_type: LabelLastValue,
    pub storage_type: LabelLastValue,
    pub multi_az: bool,
    pub life_span: TimeSeries,
    /// level -> messages per step
    pub log_messages: BTreeMap<String, TimeSeries>,
}

impl Rds {
    pub fn is_available(&self) -> bool {
        self.status.value() == "available"
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Elasticache {
    pub engine: LabelLastValue,
    pub engine_version: LabelLastValue,
    pub instance_type: LabelLastValue,
    pub status: LabelLastValue,
    pub life_span: TimeSeries,
}

impl Elasticache {
    pub fn is_available(&self) -> bool {
        self.status.value() == "available"
    }
}
