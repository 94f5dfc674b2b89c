//! Multi-window error budget burn rates.

use serde::Serialize;
use worldview_core::timeseries::{DAY, HOUR, MINUTE};
use worldview_core::{Duration, Reducer, Status, Time, TimeSeries};

/// Fires when both windows burn the budget at least `burn_rate` times faster
/// than allowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurnRateRule {
    pub long_window: Duration,
    pub short_window: Duration,
    pub burn_rate: f32,
    pub severity: Status,
}

pub const DEFAULT_RULES: [BurnRateRule; 3] = [
    BurnRateRule {
        long_window: HOUR,
        short_window: Duration(5 * MINUTE.0),
        burn_rate: 14.4,
        severity: Status::Critical,
    },
    BurnRateRule {
        long_window: Duration(6 * HOUR.0),
        short_window: Duration(30 * MINUTE.0),
        burn_rate: 6.0,
        severity: Status::Critical,
    },
    BurnRateRule {
        long_window: DAY,
        short_window: Duration(2 * HOUR.0),
        burn_rate: 3.0,
        severity: Status::Warning,
    },
];

/// Catches slow budget exhaustion; only meaningful when raw data covers three days.
pub const SLOW_BURN_RULE: BurnRateRule = BurnRateRule {
    long_window: Duration(3 * DAY.0),
    short_window: Duration(6 * HOUR.0),
    burn_rate: 1.0,
    severity: Status::Warning,
};

pub fn rules(with_slow_burn: bool) -> Vec<BurnRateRule> {
    let mut res = DEFAULT_RULES.to_vec();
    if with_slow_burn {
        res.push(SLOW_BURN_RULE);
    }
    res
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurnRate {
    pub value: f32,
    pub window: Duration,
    pub severity: Status,
}

impl BurnRate {
    pub fn format_slo_status(&self) -> String {
        let hours = self.window.0 / HOUR.0;
        let unit = if hours == 1 { "hour" } else { "hours" };
        format!("error budget burn rate is {:.1}x within {} {}", self.value, hours, unit)
    }
}

/// Sum of the points at or after `from`.
fn sum_from(ts: &TimeSeries, from: Time) -> f32 {
    ts.iter()
        .filter(|(t, _)| *t >= from)
        .fold(f32::NAN, |acc, (t, v)| Reducer::NanSum.apply(t, acc, v))
}

fn burn_rate(bad: &TimeSeries, total: &TimeSeries, from: Time, budget: f32) -> f32 {
    let br = sum_from(bad, from) / sum_from(total, from) / budget;
    if br.is_nan() {
        0.0
    } else {
        br
    }
}

/// Evaluates `rules` in order and returns the first one whose long and short
/// windows both burn at least the rule's rate.
///
/// Without data the result is UNKNOWN; when nothing fires it is OK with the
/// long-window rate of the first rule.
pub fn check_burn_rates(
    now: Time,
    bad: &TimeSeries,
    total: &TimeSeries,
    objective_percentage: f32,
    rules: &[BurnRateRule],
) -> BurnRate {
    if bad.is_empty() || total.is_empty() {
        return BurnRate {
            value: 0.0,
            window: Duration(0),
            severity: Status::Unknown,
        };
    }
    let budget = 1.0 - objective_percentage / 100.0;

    let mut first: Option<BurnRate> = None;
    for r in rules {
        let long = burn_rate(bad, total, now - r.long_window, budget);
        if first.is_none() {
            first = Some(BurnRate {
                value: long,
                window: r.long_window,
                severity: Status::Ok,
            });
        }
        if long < r.burn_rate {
            continue;
        }
        let short = burn_rate(bad, total, now - r.short_window, budget);
        if short < r.burn_rate {
            continue;
        }
        return BurnRate {
            value: short,
            window: r.long_window,
            severity: r.severity,
        };
    }
    first.unwrap_or(BurnRate {
        value: 0.0,
        window: Duration(0),
        severity: Status::Ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration(60);

    /// A day of per-minute samples ending at `now`, `value_at` taking the
    /// point's age in seconds.
    fn day(now: Time, value_at: impl Fn(i64) -> f32) -> TimeSeries {
        let from = now - DAY;
        let data = (0..=DAY.0 / STEP.0).map(|i| value_at(DAY.0 - i * STEP.0)).collect();
        TimeSeries::from_data(from, STEP, data)
    }

    #[test]
    fn test_constant_error_rate_fires_fast_burn() {
        let now = Time(10 * DAY.0);
        let total = day(now, |_| 100.0);
        let bad = day(now, |_| 2.0);
        let br = check_burn_rates(now, &bad, &total, 99.9, &DEFAULT_RULES);
        assert_eq!(br.severity, Status::Critical);
        assert_eq!(br.window, HOUR);
        assert!((br.value - 20.0).abs() < 0.01);
        assert_eq!(br.format_slo_status(), "error budget burn rate is 20.0x within 1 hour");
    }

    #[test]
    fn test_recovered_short_windows_do_not_fire() {
        let now = Time(10 * DAY.0);
        let total = day(now, |_| 100.0);
        // an incident between six and two hours ago
        let bad = day(now, |age| if age > 2 * HOUR.0 && age <= 6 * HOUR.0 { 20.0 } else { 0.0 });
        let br = check_burn_rates(now, &bad, &total, 99.0, &DEFAULT_RULES);
        assert_eq!(br.severity, Status::Ok);
        assert_eq!(br.window, HOUR);
        assert_eq!(br.value, 0.0);
    }

    #[test]
    fn test_slow_burn_is_a_warning() {
        let now = Time(10 * DAY.0);
        let total = day(now, |_| 100.0);
        let bad = day(now, |_| 3.5);
        let br = check_burn_rates(now, &bad, &total, 99.0, &DEFAULT_RULES);
        assert_eq!(br.severity, Status::Warning);
        assert_eq!(br.window, DAY);
        assert_eq!(br.format_slo_status(), "error budget burn rate is 3.5x within 24 hours");
    }

    #[test]
    fn test_no_data() {
        let now = Time(DAY.0);
        let total = day(now, |_| 1.0);
        let br = check_burn_rates(now, &TimeSeries::default(), &total, 99.0, &rules(true));
        assert_eq!(br.severity, Status::Unknown);
        let br = check_burn_rates(now, &day(now, |_| 0.0), &day(now, |_| f32::NAN), 99.0, &rules(true));
        assert_eq!(br.severity, Status::Ok);
        assert_eq!(br.value, 0.0);
    }
}
