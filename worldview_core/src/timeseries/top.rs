use super::aggregate::{Aggregate, Reducer};
use super::series::TimeSeries;
use std::collections::BTreeMap;

pub const OTHER: &str = "~other";

#[derive(Debug, Clone, PartialEq)]
pub struct Named {
    pub name: String,
    pub series: TimeSeries,
}

impl Named {
    pub fn new(name: impl Into<String>, series: TimeSeries) -> Self {
        Self {
            name: name.into(),
            series,
        }
    }
}

/// The `n` heaviest series by `by`, followed by an `~other` series summing the rest.
///
/// Series whose weight is `NaN` are left out entirely.
pub fn top(input: &BTreeMap<String, TimeSeries>, by: &Reducer, n: usize) -> Vec<Named> {
    let mut weighted: Vec<(f32, &String, &TimeSeries)> = input
        .iter()
        .filter_map(|(name, series)| {
            let w = series.reduce(by);
            (!w.is_nan()).then_some((w, name, series))
        })
        .collect();
    weighted.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut res: Vec<Named> = Vec::with_capacity(n + 1);
    let mut other = Aggregate::new(Reducer::NanSum);
    for (i, (_, name, series)) in weighted.into_iter().enumerate() {
        if i < n {
            res.push(Named::new(name.clone(), series.clone()));
        } else {
            other.add(series);
        }
    }
    if !other.is_empty() {
        if let Ok(series) = other.get() {
            res.push(Named::new(OTHER, series));
        }
    }
    res
}
