use super::series::{TimeSeries, NAN};
use super::time::Time;
use crate::error::{CoreError, Result};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

pub type ReduceFn = Arc<dyn Fn(Time, f32, f32) -> f32 + Send + Sync>;

/// Fold step `F(t, acc, v) -> acc`. The accumulator starts as `NaN`.
#[derive(Clone)]
pub enum Reducer {
    /// First non-NaN value.
    Any,
    NanSum,
    Max,
    Min,
    Sub,
    Div,
    Mul,
    Custom(ReduceFn),
}

impl Reducer {
    pub fn custom(f: impl Fn(Time, f32, f32) -> f32 + Send + Sync + 'static) -> Self {
        Reducer::Custom(Arc::new(f))
    }

    pub fn apply(&self, t: Time, acc: f32, v: f32) -> f32 {
        match self {
            Reducer::Any => {
                if !acc.is_nan() {
                    acc
                } else {
                    v
                }
            }
            Reducer::NanSum => {
                let acc = if acc.is_nan() { 0.0 } else { acc };
                if v.is_nan() {
                    acc
                } else {
                    acc + v
                }
            }
            Reducer::Max => {
                if acc.is_nan() || (!v.is_nan() && v > acc) {
                    v
                } else {
                    acc
                }
            }
            Reducer::Min => {
                if acc.is_nan() || (!v.is_nan() && v < acc) {
                    v
                } else {
                    acc
                }
            }
            Reducer::Sub => acc - v,
            Reducer::Div => acc / v,
            Reducer::Mul => acc * v,
            Reducer::Custom(f) => f(t, acc, v),
        }
    }

    // Element-wise operators seed the accumulator with the first operand.
    fn seeds_from_first(&self) -> bool {
        matches!(self, Reducer::Sub | Reducer::Div | Reducer::Mul)
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::Any => "Any",
            Reducer::NanSum => "NanSum",
            Reducer::Max => "Max",
            Reducer::Min => "Min",
            Reducer::Sub => "Sub",
            Reducer::Div => "Div",
            Reducer::Mul => "Mul",
            Reducer::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// Lazy fold over a set of series sharing one grid.
///
/// Absent inputs are skipped. The result is computed on the first `get` and
/// cached until another input is added.
#[derive(Clone)]
pub struct Aggregate {
    reducer: Reducer,
    inputs: Vec<TimeSeries>,
    mismatch: Option<String>,
    cached: OnceLock<TimeSeries>,
}

impl Aggregate {
    pub fn new(reducer: Reducer) -> Self {
        Self {
            reducer,
            inputs: Vec::new(),
            mismatch: None,
            cached: OnceLock::new(),
        }
    }

    pub fn add(&mut self, ts: &TimeSeries) -> &mut Self {
        if ts.is_empty() {
            return self;
        }
        if let Some(first) = self.inputs.first() {
            if !first.same_grid(ts) && self.mismatch.is_none() {
                self.mismatch = Some(format!("{} vs {}", first.len(), ts.len()));
            }
        }
        self.inputs.push(ts.clone());
        self.cached = OnceLock::new();
        self
    }

    pub fn add_all<'a>(&mut self, tss: impl IntoIterator<Item = &'a TimeSeries>) -> &mut Self {
        for ts in tss {
            self.add(ts);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn get(&self) -> Result<TimeSeries> {
        if let Some(m) = &self.mismatch {
            return Err(CoreError::GridMismatch(m.clone()));
        }
        Ok(self.cached.get_or_init(|| self.compute()).clone())
    }

    pub fn reduce(&self, reducer: &Reducer) -> Result<f32> {
        Ok(self.get()?.reduce(reducer))
    }

    fn compute(&self) -> TimeSeries {
        let Some(first) = self.inputs.first() else {
            return TimeSeries::default();
        };
        if self.inputs.len() == 1 {
            return first.clone();
        }
        let (mut data, rest) = if self.reducer.seeds_from_first() {
            (first.data().to_vec(), &self.inputs[1..])
        } else {
            (vec![NAN; first.len()], &self.inputs[..])
        };
        for src in rest {
            for (i, (t, v)) in src.iter().enumerate() {
                data[i] = self.reducer.apply(t, data[i], v);
            }
        }
        first.with_data(data)
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("reducer", &self.reducer)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// Folds `ts` into `dest`: an absent `dest` simply takes `ts`.
pub fn merge(dest: &mut TimeSeries, ts: &TimeSeries, reducer: Reducer) {
    if ts.is_empty() {
        return;
    }
    if dest.is_empty() {
        *dest = ts.clone();
        return;
    }
    match Aggregate::new(reducer).add(dest).add(ts).get() {
        Ok(merged) => *dest = merged,
        Err(e) => warn!("failed to merge series: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::series::ts;
    use super::*;

    #[test]
    fn test_nan_sum() {
        let res = Aggregate::new(Reducer::NanSum)
            .add(&ts(&[1.0, NAN, NAN]))
            .add(&ts(&[2.0, 3.0, NAN]))
            .get()
            .unwrap();
        assert_eq!(res, ts(&[3.0, 3.0, 0.0]));
    }

    #[test]
    fn test_single_input_is_returned_as_is() {
        let input = ts(&[NAN, 1.0]);
        let res = Aggregate::new(Reducer::NanSum).add(&input).get().unwrap();
        assert_eq!(res, input);
    }

    #[test]
    fn test_empty_inputs_are_skipped() {
        let mut agg = Aggregate::new(Reducer::Max);
        agg.add(&TimeSeries::default());
        assert!(agg.is_empty());
        assert!(agg.get().unwrap().is_empty());
    }

    #[test]
    fn test_any_max_min() {
        let a = ts(&[NAN, 5.0, 1.0]);
        let b = ts(&[2.0, 3.0, NAN]);
        let get = |r: Reducer| Aggregate::new(r).add(&a).add(&b).get().unwrap();
        assert_eq!(get(Reducer::Any), ts(&[2.0, 5.0, 1.0]));
        assert_eq!(get(Reducer::Max), ts(&[2.0, 5.0, 1.0]));
        assert_eq!(get(Reducer::Min), ts(&[2.0, 3.0, 1.0]));
    }

    #[test]
    fn test_element_wise_operators() {
        let a = ts(&[6.0, 1.0, NAN]);
        let b = ts(&[3.0, 4.0, 1.0]);
        let get = |r: Reducer| Aggregate::new(r).add(&a).add(&b).get().unwrap();
        assert_eq!(get(Reducer::Div), ts(&[2.0, 0.25, NAN]));
        assert_eq!(get(Reducer::Sub), ts(&[3.0, -3.0, NAN]));
        assert_eq!(get(Reducer::Mul), ts(&[18.0, 4.0, NAN]));
    }

    #[test]
    fn test_grid_mismatch() {
        let res = Aggregate::new(Reducer::NanSum)
            .add(&ts(&[1.0]))
            .add(&ts(&[1.0, 2.0]))
            .get();
        assert!(matches!(res, Err(CoreError::GridMismatch(_))));
    }

    #[test]
    fn test_result_is_recomputed_after_add() {
        let mut agg = Aggregate::new(Reducer::NanSum);
        agg.add(&ts(&[1.0])).add(&ts(&[1.0]));
        assert_eq!(agg.get().unwrap(), ts(&[2.0]));
        agg.add(&ts(&[1.0]));
        assert_eq!(agg.get().unwrap(), ts(&[3.0]));
    }

    #[test]
    fn test_merge() {
        let mut dest = TimeSeries::default();
        merge(&mut dest, &ts(&[1.0, NAN]), Reducer::NanSum);
        assert_eq!(dest, ts(&[1.0, NAN]));
        merge(&mut dest, &ts(&[1.0, 1.0]), Reducer::NanSum);
        assert_eq!(dest, ts(&[2.0, 1.0]));
    }

    #[test]
    fn test_custom_reducer() {
        let conflict = Reducer::custom(|_, acc, v| {
            if acc.is_nan() {
                v
            } else if v.is_nan() || acc == v {
                acc
            } else {
                -1.0
            }
        });
        let res = Aggregate::new(conflict)
            .add(&ts(&[0.0, NAN, 0.0]))
            .add(&ts(&[NAN, 1.0, 1.0]))
            .get()
            .unwrap();
        assert_eq!(res, ts(&[0.0, 1.0, -1.0]));
    }
}
