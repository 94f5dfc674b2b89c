use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Unix timestamp with a one second resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(pub i64);

/// Signed number of seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration(pub i64);

pub const SECOND: Duration = Duration(1);
pub const MINUTE: Duration = Duration(60);
pub const HOUR: Duration = Duration(3600);
pub const DAY: Duration = Duration(86400);

impl Duration {
    pub const fn seconds(s: i64) -> Self {
        Self(s)
    }

    pub fn from_std(d: std::time::Duration) -> Self {
        Self(d.as_secs() as i64)
    }

    pub fn to_std(self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0.max(0) as u64)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    pub fn as_secs_f32(self) -> f32 {
        self.0 as f32
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn truncate(self, m: Duration) -> Duration {
        if m.0 <= 0 {
            return self;
        }
        Duration(self.0 - self.0 % m.0)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0 {
            write!(f, "-{}", humantime::format_duration(Duration(-self.0).to_std()))
        } else {
            write!(f, "{}", humantime::format_duration(self.to_std()))
        }
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: i64) -> Duration {
        Duration(self.0 * rhs)
    }
}

impl Div for Duration {
    type Output = i64;
    fn div(self, rhs: Duration) -> i64 {
        if rhs.0 == 0 {
            return 0;
        }
        self.0 / rhs.0
    }
}

impl Neg for Duration {
    type Output = Duration;
    fn neg(self) -> Duration {
        Duration(-self.0)
    }
}

impl Time {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn truncate(self, d: Duration) -> Time {
        if d.0 <= 0 {
            return self;
        }
        Time(self.0 - self.0.rem_euclid(d.0))
    }

    pub fn since(self, other: Time) -> Duration {
        Duration(self.0 - other.0)
    }

    pub fn to_chrono(self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.0, 0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, rhs: Duration) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl Sub<Duration> for Time {
    type Output = Time;
    fn sub(self, rhs: Duration) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl Sub for Time {
    type Output = Duration;
    fn sub(self, rhs: Time) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

/// The grid every series of one world is bound to. The step is always
/// positive, deserialized contexts included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawContext")]
pub struct Context {
    pub from: Time,
    pub to: Time,
    pub step: Duration,
}

#[derive(Deserialize)]
struct RawContext {
    from: Time,
    to: Time,
    step: Duration,
}

impl From<RawContext> for Context {
    fn from(raw: RawContext) -> Self {
        Context::new(raw.from, raw.to, raw.step)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(Time(0), Time(0), SECOND)
    }
}

impl Context {
    pub fn new(from: Time, to: Time, step: Duration) -> Self {
        let step = if step.0 <= 0 { SECOND } else { step };
        Self {
            from: from.truncate(step),
            to: to.truncate(step),
            step,
        }
    }

    pub fn points_count(&self) -> usize {
        if self.to < self.from {
            return 0;
        }
        ((self.to - self.from) / self.step) as usize + 1
    }

    pub fn times(&self) -> impl Iterator<Item = Time> + '_ {
        (0..self.points_count()).map(move |i| self.from + self.step * i as i64)
    }

    pub fn window(&self) -> Duration {
        self.to - self.from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_alignment() {
        let ctx = Context::new(Time(1001), Time(1305), Duration(30));
        assert_eq!(ctx.from, Time(990));
        assert_eq!(ctx.to, Time(1290));
        assert_eq!(ctx.points_count(), 11);
        assert_eq!(ctx.times().last(), Some(Time(1290)));
    }

    #[test]
    fn test_context_step_is_never_zero() {
        let ctx = Context::default();
        assert_eq!(ctx.step, SECOND);
        assert_eq!(ctx.points_count(), 1);

        let ctx: Context = serde_json::from_str(r#"{"from": 95, "to": 190, "step": 0}"#).unwrap();
        assert_eq!(ctx.step, SECOND);
        assert_eq!(ctx.points_count(), 96);

        let ctx: Context = serde_json::from_str(r#"{"from": 95, "to": 190, "step": 30}"#).unwrap();
        assert_eq!(ctx, Context::new(Time(90), Time(180), Duration(30)));
        assert_eq!(ctx.points_count(), 4);
    }

    #[test]
    fn test_duration_display() {
        assert_eq!(HOUR.to_string(), "1h");
        assert_eq!((MINUTE * 5).to_string(), "5m");
        assert_eq!(Duration(-30).to_string(), "-30s");
    }

    #[test]
    fn test_time_arithmetic() {
        let t = Time(600);
        assert_eq!(t + MINUTE, Time(660));
        assert_eq!(t - Time(300), Duration(300));
        assert_eq!(Time(-7).truncate(Duration(5)), Time(-10));
    }
}
