use super::series::{TimeSeries, NAN};
use super::time::{Context, Time};

/// Places raw `(timestamp, value)` samples onto the grid of `ctx`.
///
/// A grid point takes an exact sample if there is one, a linear interpolation
/// between its neighbours if both are within one step, or the nearer
/// neighbour within one step. Samples outside the window are dropped.
pub fn from_values(ctx: &Context, raw: &[(Time, f32)]) -> TimeSeries {
    let mut samples: Vec<(Time, f32)> = raw
        .iter()
        .copied()
        .filter(|(t, v)| !v.is_nan() && *t >= ctx.from - ctx.step && *t <= ctx.to + ctx.step)
        .collect();
    samples.sort_by_key(|(t, _)| *t);
    samples.dedup_by_key(|(t, _)| *t);

    let step = ctx.step.0 as f32;
    let mut data = Vec::with_capacity(ctx.points_count());
    let mut j = 0;
    for t in ctx.times() {
        while j < samples.len() && samples[j].0 < t {
            j += 1;
        }
        let after = samples.get(j);
        let before = if j > 0 { samples.get(j - 1) } else { None };
        let v = match (before, after) {
            (_, Some((ta, va))) if *ta == t => *va,
            (Some((tb, vb)), Some((ta, va))) if (t - *tb).0 < ctx.step.0 && (*ta - t).0 < ctx.step.0 => {
                let span = (*ta - *tb).0 as f32;
                vb + (va - vb) * (t - *tb).0 as f32 / span
            }
            (Some((tb, vb)), _) if ((t - *tb).0 as f32) < step => *vb,
            (_, Some((ta, va))) if ((*ta - t).0 as f32) < step => *va,
            _ => NAN,
        };
        data.push(v);
    }
    TimeSeries::from_data(ctx.from, ctx.step, data)
}

/// Re-samples a series living on another grid into `ctx`.
pub fn align(ctx: &Context, ts: &TimeSeries) -> TimeSeries {
    if ts.is_empty() || ts.matches(ctx) {
        return ts.clone();
    }
    let raw: Vec<(Time, f32)> = ts.iter().collect();
    from_values(ctx, &raw)
}

#[cfg(test)]
mod tests {
    use super::super::time::Duration;
    use super::*;

    fn ctx() -> Context {
        Context::new(Time(0), Time(120), Duration(30))
    }

    #[test]
    fn test_exact_samples() {
        let res = from_values(&ctx(), &[(Time(0), 1.0), (Time(60), 3.0)]);
        assert_eq!(res.data()[0], 1.0);
        assert_eq!(res.data()[2], 3.0);
    }

    #[test]
    fn test_interpolation_and_nearest() {
        let res = from_values(&ctx(), &[(Time(20), 2.0), (Time(40), 4.0)]);
        assert_eq!(res.data()[1], 3.0);
        assert_eq!(res.data()[0], 2.0);
        assert_eq!(res.data()[2], 4.0);
        assert!(res.data()[4].is_nan());
    }

    #[test]
    fn test_out_of_range_dropped() {
        let res = from_values(&ctx(), &[(Time(1000), 2.0)]);
        assert!(res.is_all_nan());
        assert_eq!(res.len(), 5);
    }

    #[test]
    fn test_align_downsamples() {
        let fine = TimeSeries::from_data(Time(0), Duration(15), (0..9).map(|i| i as f32).collect());
        let res = align(&ctx(), &fine);
        assert!(res.matches(&ctx()));
        assert_eq!(res.data(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    }
}
