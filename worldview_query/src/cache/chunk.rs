use std::collections::BTreeMap;
use worldview_core::model::Labels;
use worldview_core::timeseries::NAN;
use worldview_core::{Duration, Time, TimeSeries};

/// Samples of one series at a fixed step. Missing samples are not stored.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    step: Duration,
    points: BTreeMap<Time, f32>,
}

impl Chunk {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            points: BTreeMap::new(),
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn first(&self) -> Option<Time> {
        self.points.keys().next().copied()
    }

    pub fn last(&self) -> Option<Time> {
        self.points.keys().next_back().copied()
    }

    pub fn get(&self, t: Time) -> f32 {
        self.points.get(&t).copied().unwrap_or(NAN)
    }

    pub fn insert(&mut self, ts: &TimeSeries) {
        for (t, v) in ts.iter() {
            if !v.is_nan() {
                self.points.insert(t.truncate(self.step), v);
            }
        }
    }

    /// Moves points older than `before` into `dest`, keeping the last
    /// present value of each `dest` bucket.
    pub fn compact_into(&mut self, before: Time, dest: &mut Chunk) {
        let recent = self.points.split_off(&before);
        let old = std::mem::replace(&mut self.points, recent);
        for (t, v) in old {
            dest.points.insert(t.truncate(dest.step), v);
        }
    }

    pub fn prune(&mut self, before: Time) {
        self.points = self.points.split_off(&before);
    }
}

/// One cached series: recent samples at the raw step, older ones compacted.
#[derive(Debug, Clone)]
pub struct CachedSeries {
    pub labels: Labels,
    pub raw: Chunk,
    pub compacted: Chunk,
}

impl CachedSeries {
    pub fn new(labels: Labels, raw_step: Duration, compacted_step: Duration) -> Self {
        Self {
            labels,
            raw: Chunk::new(raw_step),
            compacted: Chunk::new(compacted_step),
        }
    }

    pub fn first(&self) -> Option<Time> {
        match (self.compacted.first(), self.raw.first()) {
            (Some(c), Some(r)) => Some(c.min(r)),
            (c, r) => c.or(r),
        }
    }

    /// Value served at `t`: the raw sample if kept, else its compacted bucket.
    pub fn value_at(&self, t: Time) -> f32 {
        let v = self.raw.get(t);
        if !v.is_nan() {
            return v;
        }
        let bucket = t.truncate(self.compacted.step());
        if bucket == t || self.raw.first().map_or(true, |first| t < first) {
            return self.compacted.get(bucket);
        }
        NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_skips_nan() {
        let mut c = Chunk::new(Duration(30));
        c.insert(&TimeSeries::from_data(Time(0), Duration(30), vec![1.0, NAN, 3.0]));
        assert_eq!(c.len(), 2);
        assert_eq!(c.first(), Some(Time(0)));
        assert_eq!(c.last(), Some(Time(60)));
        assert!(c.get(Time(30)).is_nan());
    }

    #[test]
    fn test_compaction_keeps_last_value_per_bucket() {
        let mut raw = Chunk::new(Duration(30));
        raw.insert(&TimeSeries::from_data(
            Time(0),
            Duration(30),
            vec![1.0, 2.0, NAN, 4.0, 5.0, 6.0, 7.0],
        ));
        let mut compacted = Chunk::new(Duration(120));
        raw.compact_into(Time(150), &mut compacted);
        assert_eq!(raw.first(), Some(Time(150)));
        assert_eq!(compacted.get(Time(0)), 4.0);
        assert_eq!(compacted.get(Time(120)), 5.0);
    }

    #[test]
    fn test_value_at_falls_back_to_compacted() {
        let mut s = CachedSeries::new(Labels::new(), Duration(30), Duration(120));
        s.compacted.insert(&TimeSeries::from_data(Time(0), Duration(120), vec![9.0]));
        s.raw.insert(&TimeSeries::from_data(Time(240), Duration(30), vec![1.0, 2.0]));
        assert_eq!(s.value_at(Time(0)), 9.0);
        assert_eq!(s.value_at(Time(30)), 9.0);
        assert_eq!(s.value_at(Time(270)), 2.0);
        assert!(s.value_at(Time(300)).is_nan());
        assert_eq!(s.first(), Some(Time(0)));
    }
}
