use super::series::{TimeSeries, NAN};

/// A cumulative histogram bucket: the number of observations `<= le`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HistogramBucket {
    pub le: f32,
    pub series: TimeSeries,
}

pub fn sort_buckets(buckets: &mut [HistogramBucket]) {
    buckets.sort_by(|a, b| a.le.total_cmp(&b.le));
}

/// Per-point quantile estimated by linear interpolation inside the bucket that
/// contains the requested rank. `buckets` must be sorted by `le`.
pub fn quantile(buckets: &[HistogramBucket], q: f32) -> TimeSeries {
    let Some(last) = buckets.last() else {
        return TimeSeries::default();
    };
    let len = last.series.len();
    let mut data = vec![NAN; len];
    for (i, value) in data.iter_mut().enumerate() {
        let total = last.series.data()[i];
        if total.is_nan() || total <= 0.0 {
            continue;
        }
        let rank = q * total;
        let mut lower_le = 0.0;
        let mut lower_count = 0.0;
        for b in buckets {
            let count = b.series.data().get(i).copied().unwrap_or(NAN);
            if count.is_nan() {
                continue;
            }
            if count >= rank {
                if b.le.is_infinite() {
                    *value = lower_le;
                } else if count == lower_count {
                    *value = b.le;
                } else {
                    *value = lower_le + (b.le - lower_le) * (rank - lower_count) / (count - lower_count);
                }
                break;
            }
            lower_le = b.le;
            lower_count = count;
        }
    }
    last.series.with_data(data)
}

/// The cumulative count of observations not exceeding `le`.
pub fn count_le(buckets: &[HistogramBucket], le: f32) -> TimeSeries {
    buckets
        .iter()
        .filter(|b| b.le <= le)
        .last()
        .map(|b| b.series.clone())
        .unwrap_or_default()
}

pub fn total(buckets: &[HistogramBucket]) -> TimeSeries {
    buckets.last().map(|b| b.series.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::super::series::ts;
    use super::*;

    fn buckets() -> Vec<HistogramBucket> {
        vec![
            HistogramBucket { le: 0.1, series: ts(&[50.0, 0.0]) },
            HistogramBucket { le: 0.5, series: ts(&[90.0, 0.0]) },
            HistogramBucket { le: f32::INFINITY, series: ts(&[100.0, 0.0]) },
        ]
    }

    #[test]
    fn test_quantile() {
        let q = quantile(&buckets(), 0.5);
        assert!((q.data()[0] - 0.1).abs() < 1e-6);
        assert!(q.data()[1].is_nan());
        let q = quantile(&buckets(), 0.7);
        assert!((q.data()[0] - 0.3).abs() < 1e-6);
        let q = quantile(&buckets(), 0.99);
        assert!((q.data()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_count_le() {
        assert_eq!(count_le(&buckets(), 0.5).data()[0], 90.0);
        assert!(count_le(&buckets(), 0.01).is_empty());
        assert_eq!(total(&buckets()).data()[0], 100.0);
    }
}
