pub mod aggregate;
pub mod align;
pub mod histogram;
pub mod series;
pub mod time;
pub mod top;

pub use aggregate::{merge, Aggregate, Reducer};
pub use align::{align, from_values};
pub use histogram::{quantile, sort_buckets, HistogramBucket};
pub use series::{defined, nan_to_zero, TimeSeries, NAN};
pub use time::{Context, Duration, Time, DAY, HOUR, MINUTE, SECOND};
pub use top::{top, Named, OTHER};

#[cfg(test)]
mod laws {
    use super::series::ts;
    use super::*;
    use proptest::prelude::*;

    fn series_strategy(len: usize) -> impl Strategy<Value = Vec<f32>> {
        proptest::collection::vec(prop_oneof![Just(f32::NAN), (0u16..500).prop_map(|v| v as f32)], len)
    }

    proptest! {
        #[test]
        fn prop_nan_sum_minus_member(xs in proptest::collection::vec(series_strategy(6), 2..6)) {
            let all: Vec<TimeSeries> = xs.iter().map(|v| ts(v)).collect();
            let mut full = Aggregate::new(Reducer::NanSum);
            full.add_all(all.iter());
            let mut rest = Aggregate::new(Reducer::NanSum);
            rest.add_all(all[1..].iter());
            let full = full.get().unwrap();
            let rest = rest.get().unwrap().map(nan_to_zero);
            let removed = all[0].map(nan_to_zero);
            let diff = TimeSeries::sub(&full, &removed).unwrap();
            for (a, b) in diff.data().iter().zip(rest.data().iter()) {
                prop_assert!((a - b).abs() < 1e-3);
            }
        }

        #[test]
        fn prop_increase_is_non_negative(values in series_strategy(12), up in proptest::collection::vec(prop_oneof![Just(1.0f32), Just(0.0f32), Just(f32::NAN)], 12)) {
            let res = TimeSeries::increase(&ts(&values), &ts(&up)).unwrap();
            prop_assert!(res.data().iter().all(|v| v.is_nan() || *v >= 0.0));
        }
    }
}
