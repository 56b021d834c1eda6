//! Presentation timestamps.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Presentation timestamp in nanoseconds on the capture clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs * 1e9).round() as i64)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Time elapsed since `origin`, or `None` when `self` precedes it.
    pub fn since(self, origin: Timestamp) -> Option<Duration> {
        let delta = self.0.checked_sub(origin.0)?;
        u64::try_from(delta).ok().map(Duration::from_nanos)
    }

    /// Signed seconds from `origin` to `self`, saturating at the `i64` range.
    pub fn secs_since(self, origin: Timestamp) -> f64 {
        self.0.saturating_sub(origin.0) as f64 / 1e9
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_origin() {
        let origin = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(1_250);
        assert_eq!(later.since(origin), Some(Duration::from_millis(250)));
        assert_eq!(origin.since(later), None);
    }

    #[test]
    fn test_secs_roundtrip_precision() {
        let ts = Timestamp::from_secs_f64(1.5);
        assert_eq!(ts.as_nanos(), 1_500_000_000);
        assert_eq!(ts.to_string(), "1.500s");
    }

    #[test]
    fn test_secs_since_is_signed_and_saturates() {
        let origin = Timestamp::from_millis(2_000);
        assert_eq!(Timestamp::from_millis(2_500).secs_since(origin), 0.5);
        assert_eq!(Timestamp::from_millis(1_750).secs_since(origin), -0.25);

        let extreme = Timestamp::from_nanos(i64::MIN).secs_since(Timestamp::from_nanos(i64::MAX));
        assert_eq!(extreme, i64::MIN as f64 / 1e9);
        let extreme = Timestamp::from_nanos(i64::MAX).secs_since(Timestamp::from_nanos(i64::MIN));
        assert_eq!(extreme, i64::MAX as f64 / 1e9);
    }

    #[test]
    fn test_saturating_add() {
        let ts = Timestamp::ZERO.saturating_add(Duration::from_millis(33));
        assert_eq!(ts, Timestamp::from_millis(33));
    }
}
