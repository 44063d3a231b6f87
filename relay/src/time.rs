//! Monotonic stamps and strongly-typed durations.
//!
//! Stamps come from [`minstant`], which reads the TSC where available and
//! falls back to `CLOCK_MONOTONIC`. Durations carry their unit in the type so a
//! nanosecond count can never be reported as milliseconds by accident.
use core::fmt;
use core::marker::PhantomData;

/// A monotonic point in time with nanosecond resolution.
pub type Timestamp = minstant::Instant;

/// Reads the monotonic clock.
#[inline]
#[must_use]
pub fn now() -> Timestamp {
    minstant::Instant::now()
}

/// Marker trait for a time unit.
pub trait TimeUnit {
    /// Human-readable suffix for logs and reports.
    const NAME: &'static str;
    /// Number of nanoseconds in one unit.
    const NANOS: u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Nanos {}
impl TimeUnit for Nanos {
    const NAME: &'static str = "ns";
    const NANOS: u64 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Millis {}
impl TimeUnit for Millis {
    const NAME: &'static str = "ms";
    const NANOS: u64 = 1_000_000;
}

/// Strongly-typed duration in a given unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Duration<U: TimeUnit>(u64, PhantomData<U>);

impl<U: TimeUnit> Duration<U> {
    pub const ZERO: Self = Self::new(0);

    /// Create a new duration.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value, PhantomData)
    }

    /// Return the raw value.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Converts to another unit, truncating toward zero.
    #[inline]
    #[must_use]
    pub const fn truncate<V: TimeUnit>(self) -> Duration<V> {
        let nanos = self.0.saturating_mul(U::NANOS);
        Duration::new(nanos / V::NANOS)
    }
}

impl Duration<Nanos> {
    /// Elapsed nanoseconds from `start` to `end`, zero if `end` precedes `start`.
    #[inline]
    #[must_use]
    pub fn between(start: Timestamp, end: Timestamp) -> Self {
        let nanos = end.duration_since(start).as_nanos();
        Self::new(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Duration<Millis> {
    /// Convenience constructor for milliseconds.
    #[inline]
    pub const fn from_millis(value: u64) -> Self {
        Self::new(value)
    }
}

impl<U: TimeUnit> From<Duration<U>> for std::time::Duration {
    fn from(d: Duration<U>) -> Self {
        std::time::Duration::from_nanos(d.0.saturating_mul(U::NANOS))
    }
}

impl<U: TimeUnit> core::ops::Add for Duration<U> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Duration::new(self.0 + rhs.0)
    }
}

impl<U: TimeUnit> fmt::Display for Duration<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0, U::NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_rounds_toward_zero() {
        let d = Duration::<Nanos>::new(2_999_999);
        assert_eq!(d.truncate::<Millis>().as_u64(), 2);

        let d = Duration::<Nanos>::new(999_999);
        assert_eq!(d.truncate::<Millis>(), Duration::<Millis>::ZERO);
    }

    #[test]
    fn widening_conversion_multiplies() {
        let d = Duration::<Millis>::from_millis(3);
        assert_eq!(d.truncate::<Nanos>().as_u64(), 3_000_000);
    }

    #[test]
    fn between_is_never_negative() {
        let a = now();
        let b = now();
        assert_eq!(Duration::between(b.max(a), a.min(b)).as_u64(), 0);
        assert!(Duration::between(a.min(b), b.max(a)).as_u64() < u64::MAX);
    }

    #[test]
    fn display_includes_unit() {
        assert_eq!(Duration::<Millis>::from_millis(12).to_string(), "12ms");
        assert_eq!(Duration::<Nanos>::new(7).to_string(), "7ns");
    }

    #[test]
    fn converts_to_std_duration() {
        let d: std::time::Duration = Duration::<Millis>::from_millis(5).into();
        assert_eq!(d, std::time::Duration::from_millis(5));
    }
}
