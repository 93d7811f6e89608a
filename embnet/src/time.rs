/*! Points in time and deadlines.

The stack never reads a clock. Every entry point that can start or fire a timer takes the current
time as an [`Instant`] from the caller, in whatever epoch the caller chooses.

 - [`Instant`] is a point in time with millisecond resolution.
 - [`Duration`] is the relative time of `core`.
 - [`Expiration`] is a deadline that may also never occur. Protocol timers are stored as such
   deadlines and are cancelled by resetting them to `Never`.

[`Instant`]: struct.Instant.html
[`Duration`]: https://doc.rust-lang.org/core/time/struct.Duration.html
[`Expiration`]: enum.Expiration.html
*/
use core::{cmp, fmt, ops};
pub use core::time::Duration;

/// A point in time, in milliseconds since an arbitrary epoch.
///
/// Negative values are before the epoch. Instants of different epochs must not be mixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    /// Milliseconds since the epoch.
    pub millis: i64,
}

/// A deadline, ordered such that `Never` is later than every point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// The deadline is at the point in time.
    When(Instant),
    /// There is no deadline.
    Never,
}

use Expiration::{When, Never};

impl Instant {
    /// An instant the given number of milliseconds after the epoch.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// An instant the given number of seconds after the epoch.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    /// Milliseconds since the epoch.
    pub fn total_millis(&self) -> i64 {
        self.millis
    }

    /// The time that passed since `earlier`, zero if it is actually later.
    pub fn since(self, earlier: Instant) -> Duration {
        let millis = self.millis.saturating_sub(earlier.millis).max(0);
        Duration::from_millis(millis as u64)
    }
}

impl Expiration {
    /// Whether the deadline is at or before `now`.
    pub fn is_expired(self, now: Instant) -> bool {
        match self {
            When(deadline) => deadline <= now,
            Never => false,
        }
    }

    /// Whether there is a deadline at all.
    pub fn is_set(self) -> bool {
        self != Never
    }

    /// Remove the deadline.
    pub fn clear(&mut self) {
        *self = Never;
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign = if self.millis < 0 { "-" } else { "" };
        let abs = self.millis.wrapping_abs() as u64;
        write!(f, "{}{}.{:03}s", sign, abs / 1000, abs % 1000)
    }
}

fn as_millis(duration: Duration) -> i64 {
    cmp::min(duration.as_millis(), i64::max_value() as u128) as i64
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant { millis: self.millis.saturating_add(as_millis(rhs)) }
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant { millis: self.millis.saturating_sub(as_millis(rhs)) }
    }
}

/// Saturates at zero, see `Instant::since`.
impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.since(rhs)
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Never
    }
}

impl From<Instant> for Expiration {
    fn from(instant: Instant) -> Self {
        When(instant)
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(opt: Option<Instant>) -> Self {
        opt.map_or(Never, When)
    }
}

impl From<Expiration> for Option<Instant> {
    fn from(expiration: Expiration) -> Self {
        match expiration {
            When(instant) => Some(instant),
            Never => None,
        }
    }
}

impl cmp::PartialOrd<Self> for Expiration {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl cmp::Ord for Expiration {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        match (self, other) {
            (Never, Never) => cmp::Ordering::Equal,
            (Never, When(_)) => cmp::Ordering::Greater,
            (When(_), Never) => cmp::Ordering::Less,
            (When(a), When(b)) => a.cmp(b),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let start = Instant::from_secs(2);
        assert_eq!(start + Duration::from_millis(250), Instant::from_millis(2250));
        assert_eq!(start - Duration::from_millis(2500), Instant::from_millis(-500));
        let mut moving = start;
        moving += Duration::from_secs(1);
        assert_eq!(moving - start, Duration::from_secs(1));
        // Going backwards is no time at all.
        assert_eq!(start - moving, Duration::from_secs(0));
        assert_eq!(start.since(moving), Duration::from_secs(0));
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Instant::from_millis(5674)), "5.674s");
        assert_eq!(format!("{}", Instant::from_millis(5005)), "5.005s");
        assert_eq!(format!("{}", Instant::from_millis(-1500)), "-1.500s");
    }

    #[test]
    fn expiration_order() {
        let soon = Expiration::When(Instant::from_millis(10));
        let later = Expiration::When(Instant::from_millis(20));
        assert!(soon < later);
        assert!(later < Expiration::Never);
        assert_eq!(later.min(soon), soon);
        assert_eq!(soon.min(Expiration::Never), soon);
        assert_eq!(Expiration::from(None), Expiration::Never);
        assert_eq!(Option::<Instant>::from(later), Some(Instant::from_millis(20)));
    }

    #[test]
    fn expiration_expired() {
        let mut deadline = Expiration::When(Instant::from_millis(10));
        assert!(!deadline.is_expired(Instant::from_millis(9)));
        assert!(deadline.is_expired(Instant::from_millis(10)));
        deadline.clear();
        assert!(!deadline.is_set());
        assert!(!deadline.is_expired(Instant::from_millis(1_000_000)));
    }
}
