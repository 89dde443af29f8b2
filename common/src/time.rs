//! Time primitives for single-threaded protocol code.
//!
//! Protocol state machines never read the system clock directly; they are
//! generic over [`Clock`] so tests can drive time by hand. The transport
//! side additionally uses [`Deadline`], a restartable timeout over
//! monotonic time.

use std::cell::Cell;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

/// A span of protocol time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct LocalDuration(Duration);

impl LocalDuration {
    /// Duration of one millisecond.
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Duration of `secs` seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Duration of `mins` minutes.
    pub const fn from_mins(mins: u64) -> Self {
        Self(Duration::from_secs(mins * 60))
    }

    /// The duration in milliseconds.
    pub const fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }
}

impl fmt::Display for LocalDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

impl From<Duration> for LocalDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<LocalDuration> for Duration {
    fn from(d: LocalDuration) -> Self {
        d.0
    }
}

/// A point in protocol time, measured from the unix epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct LocalTime(Duration);

impl LocalTime {
    /// The time `secs` seconds past the epoch. Mostly useful in tests.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// The time `millis` milliseconds past the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn duration_since(&self, earlier: LocalTime) -> LocalDuration {
        LocalDuration(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_millis())
    }
}

impl Sub for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: LocalTime) -> LocalDuration {
        self.duration_since(other)
    }
}

impl Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime(self.0 + other.0)
    }
}

impl AddAssign<LocalDuration> for LocalTime {
    fn add_assign(&mut self, other: LocalDuration) {
        self.0 += other.0;
    }
}

/// Source of local time.
pub trait Clock {
    /// The current protocol time.
    fn local_time(&self) -> LocalTime;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_time(&self) -> LocalTime {
        let since_epoch = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();

        LocalTime(since_epoch)
    }
}

/// A manually driven clock, shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct RefClock(Rc<Cell<LocalTime>>);

impl RefClock {
    /// Create a clock stopped at `time`.
    pub fn from(time: LocalTime) -> Self {
        Self(Rc::new(Cell::new(time)))
    }

    /// Set the current time.
    pub fn set(&self, time: LocalTime) {
        self.0.set(time);
    }

    /// Advance the clock by `duration`.
    pub fn elapse(&self, duration: LocalDuration) {
        self.0.set(self.0.get() + duration);
    }
}

impl Clock for RefClock {
    fn local_time(&self) -> LocalTime {
        self.0.get()
    }
}

/// A restartable deadline over monotonic time.
///
/// A deadline created with `None` never expires; `remaining` is then
/// unbounded. Callers that poll use `remaining()` as their wait budget and
/// `elapsed()` for diagnostics.
#[derive(Debug)]
pub struct Deadline {
    started: Instant,
    period: Option<Duration>,
}

impl Deadline {
    /// Start a deadline `period` from now.
    pub fn new(period: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            period,
        }
    }

    /// Restart the deadline from the current instant.
    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    /// Time since the last reset.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left until expiry, `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.period
            .map(|period| period.saturating_sub(self.started.elapsed()))
    }

    /// Whether the deadline has passed. Unbounded deadlines never expire.
    pub fn expired(&self) -> bool {
        match self.period {
            Some(period) => self.started.elapsed() > period,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_time_arithmetic() {
        let t = LocalTime::from_secs(100);
        let d = LocalDuration::from_secs(3);

        assert_eq!(t + d, LocalTime::from_secs(103));
        assert_eq!((t + d) - t, d);
        // Subtraction saturates rather than going negative.
        assert_eq!(t - (t + d), LocalDuration::default());

        let mut t = t;
        t += d;
        assert_eq!(t, LocalTime::from_secs(103));
    }

    #[test]
    fn ref_clock_is_shared() {
        let clock = RefClock::from(LocalTime::from_secs(7));
        let other = clock.clone();

        other.elapse(LocalDuration::from_secs(2));
        assert_eq!(clock.local_time(), LocalTime::from_secs(9));
    }

    #[test]
    fn unbounded_deadline_never_expires() {
        let deadline = Deadline::new(None);

        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn zero_deadline_expires_at_once() {
        let deadline = Deadline::new(Some(Duration::from_secs(0)));

        std::thread::sleep(Duration::from_millis(2));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::from_secs(0)));
    }

    #[test]
    fn reset_restarts_the_period() {
        let mut deadline = Deadline::new(Some(Duration::from_millis(1)));

        std::thread::sleep(Duration::from_millis(3));
        assert!(deadline.expired());

        deadline.reset();
        assert!(deadline.remaining().unwrap() <= Duration::from_millis(1));
    }
}
