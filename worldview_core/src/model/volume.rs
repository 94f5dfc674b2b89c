use super::labels::LabelLastValue;
use crate::timeseries::{TimeSeries, NAN};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Ebs {
    pub storage_type: String,
    pub provisioned_iops: TimeSeries,
    pub allocated_gibibytes: TimeSeries,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Volume {
    pub name: LabelLastValue,
    pub mount_point: String,
    pub device: LabelLastValue,
    pub capacity_bytes: TimeSeries,
    pub used_bytes: TimeSeries,
    pub ebs: Option<Ebs>,
}

impl Volume {
    pub fn usage_percent(&self) -> f32 {
        let capacity = self.capacity_bytes.last();
        let used = self.used_bytes.last();
        if capacity.is_nan() || used.is_nan() || capacity <= 0.0 {
            return NAN;
        }
        used / capacity * 100.0
    }
}
