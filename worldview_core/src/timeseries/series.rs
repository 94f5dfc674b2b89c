use super::aggregate::Reducer;
use super::time::{Context, Duration, Time};
use crate::error::{CoreError, Result};
use std::fmt;
use std::sync::Arc;

pub const NAN: f32 = f32::NAN;

/// Counter deltas above this value are treated as a reset artefact.
pub const RESET_THRESHOLD: f32 = 5_000_000.0;

/// Dense fixed-step vector; `NaN` marks a missing sample.
///
/// A series with no points is "absent". Data is shared and never mutated
/// after construction, so clones are cheap.
#[derive(Clone, Default)]
pub struct TimeSeries {
    from: Time,
    step: Duration,
    data: Arc<[f32]>,
}

impl TimeSeries {
    /// A series bound to `ctx` with every point missing.
    pub fn new(ctx: &Context) -> Self {
        Self::filled(ctx, NAN)
    }

    pub fn zeros(ctx: &Context) -> Self {
        Self::filled(ctx, 0.0)
    }

    pub fn filled(ctx: &Context, value: f32) -> Self {
        Self::from_data(ctx.from, ctx.step, vec![value; ctx.points_count()])
    }

    pub fn from_data(from: Time, step: Duration, data: Vec<f32>) -> Self {
        Self {
            from,
            step,
            data: data.into(),
        }
    }

    pub fn from(&self) -> Time {
        self.from
    }

    pub fn to(&self) -> Time {
        if self.data.is_empty() {
            return self.from;
        }
        self.from + self.step * (self.data.len() as i64 - 1)
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// True when the series is absent (has no points at all).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_all_nan(&self) -> bool {
        self.data.iter().all(|v| v.is_nan())
    }

    pub fn last(&self) -> f32 {
        self.data.last().copied().unwrap_or(NAN)
    }

    pub fn last_not_null(&self) -> (Time, f32) {
        self.iter()
            .filter(|(_, v)| !v.is_nan())
            .last()
            .unwrap_or((Time(0), NAN))
    }

    /// True when none of the last three points carries a sample.
    pub fn tail_is_empty(&self) -> bool {
        self.data.iter().rev().take(3).all(|v| v.is_nan())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Time, f32)> + '_ {
        let from = self.from;
        let step = self.step;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, v)| (from + step * i as i64, *v))
    }

    pub fn get(&self, t: Time) -> f32 {
        if self.step.0 <= 0 || t < self.from || t > self.to() {
            return NAN;
        }
        let offset = t - self.from;
        if offset.0 % self.step.0 != 0 {
            return NAN;
        }
        self.data[(offset / self.step) as usize]
    }

    pub fn map(&self, f: impl Fn(Time, f32) -> f32) -> Self {
        if self.is_empty() {
            return Self::default();
        }
        self.with_data(self.iter().map(|(t, v)| f(t, v)).collect())
    }

    pub fn reduce(&self, reducer: &Reducer) -> f32 {
        self.iter()
            .fold(NAN, |acc, (t, v)| reducer.apply(t, acc, v))
    }

    pub fn with_new_value(&self, value: f32) -> Self {
        if self.is_empty() {
            return Self::default();
        }
        self.with_data(vec![value; self.len()])
    }

    /// A new series on the same grid.
    pub fn with_data(&self, data: Vec<f32>) -> Self {
        Self::from_data(self.from, self.step, data)
    }

    pub fn same_grid(&self, other: &TimeSeries) -> bool {
        self.from == other.from && self.step == other.step && self.len() == other.len()
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        self.from == ctx.from && self.step == ctx.step && self.len() == ctx.points_count()
    }

    fn check_grid(&self, other: &TimeSeries) -> Result<()> {
        if self.same_grid(other) {
            return Ok(());
        }
        Err(CoreError::GridMismatch(format!(
            "[{}, {}, {}] vs [{}, {}, {}]",
            self.from,
            self.len(),
            self.step.0,
            other.from,
            other.len(),
            other.step.0
        )))
    }

    fn binary(x: &TimeSeries, y: &TimeSeries, f: impl Fn(f32, f32) -> f32) -> Result<TimeSeries> {
        if x.is_empty() || y.is_empty() {
            return Ok(TimeSeries::default());
        }
        x.check_grid(y)?;
        Ok(x.with_data(
            x.data
                .iter()
                .zip(y.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        ))
    }

    pub fn sum(x: &TimeSeries, y: &TimeSeries) -> Result<TimeSeries> {
        Self::binary(x, y, |a, b| a + b)
    }

    pub fn sub(x: &TimeSeries, y: &TimeSeries) -> Result<TimeSeries> {
        Self::binary(x, y, |a, b| a - b)
    }

    pub fn mul(x: &TimeSeries, y: &TimeSeries) -> Result<TimeSeries> {
        Self::binary(x, y, |a, b| a * b)
    }

    pub fn div(x: &TimeSeries, y: &TimeSeries) -> Result<TimeSeries> {
        Self::binary(x, y, |a, b| a / b)
    }

    /// Positive per-step delta of a counter, masked by the exporter status series.
    ///
    /// A negative delta or one above [`RESET_THRESHOLD`] is a counter reset and
    /// yields `NaN`. After a gap the first sample counts as a delta only if the
    /// exporter was up right before it; the very first point of the window is 0.
    pub fn increase(x: &TimeSeries, status: &TimeSeries) -> Result<TimeSeries> {
        if x.is_empty() || status.is_empty() {
            return Ok(TimeSeries::default());
        }
        x.check_grid(status)?;
        let mut data = Vec::with_capacity(x.len());
        let (mut prev, mut prev_status) = (NAN, NAN);
        for (i, (v, s)) in x.data.iter().zip(status.data.iter()).enumerate() {
            let v = *v;
            let mut d = NAN;
            if !v.is_nan() {
                if !prev.is_nan() {
                    let delta = v - prev;
                    if (0.0..=RESET_THRESHOLD).contains(&delta) {
                        d = delta;
                    }
                } else if prev_status == 1.0 {
                    d = v;
                } else if i == 0 {
                    d = 0.0;
                }
            }
            prev = v;
            prev_status = *s;
            data.push(d);
        }
        Ok(x.with_data(data))
    }
}

pub fn defined(_: Time, v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        1.0
    }
}

pub fn nan_to_zero(_: Time, v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

impl PartialEq for TimeSeries {
    fn eq(&self, other: &Self) -> bool {
        self.same_grid(other)
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}

impl fmt::Display for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self
            .data
            .iter()
            .map(|v| if v.is_nan() { ".".to_string() } else { format!("{}", v) })
            .collect();
        write!(
            f,
            "TimeSeries({}, {}, {}, [{}])",
            self.from,
            self.len(),
            self.step.0,
            values.join(" ")
        )
    }
}

impl fmt::Debug for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl serde::Serialize for TimeSeries {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for v in self.data.iter() {
            if v.is_nan() {
                seq.serialize_element(&Option::<f32>::None)?;
            } else {
                seq.serialize_element(&Some(*v))?;
            }
        }
        seq.end()
    }
}

#[cfg(test)]
pub(crate) fn ts(values: &[f32]) -> TimeSeries {
    TimeSeries::from_data(Time(0), Duration(30), values.to_vec())
}
