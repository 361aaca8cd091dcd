use std::time::Duration;

use tokio::time::Instant;

/// Microseconds since the queue's epoch. All task timestamps and durations
/// are stored in this unit.
pub type Micros = u64;

/// Default time-to-live applied when neither the put nor the store supplies
/// one: five hundred years, a practical infinity.
pub const TTL_FOREVER: Micros = 500 * 365 * 86_400 * 1_000_000;

/// Converts a wall-clock duration to microseconds, saturating rather than
/// wrapping for absurd inputs.
pub fn to_micros(d: Duration) -> Micros {
    u64::try_from(d.as_micros()).unwrap_or(Micros::MAX)
}

/// Absolute deadline `after` microseconds past `now`. Saturates so that
/// "forever" deadlines stay representable.
pub fn deadline(now: Micros, after: Micros) -> Micros {
    now.saturating_add(after)
}

/// Monotonic microsecond clock anchored at queue construction.
///
/// Built on [`tokio::time::Instant`] so a paused test clock drives the queue
/// deterministically.
#[derive(Clone, Debug)]
pub(crate) struct Clock {
    epoch: Instant,
}

impl Clock {
    pub(crate) fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> Micros {
        to_micros(self.epoch.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_micros_saturates() {
        assert_eq!(to_micros(Duration::from_micros(7)), 7);
        assert_eq!(to_micros(Duration::MAX), Micros::MAX);
    }

    #[test]
    fn deadline_saturates() {
        assert_eq!(deadline(5, 10), 15);
        assert_eq!(deadline(Micros::MAX - 1, TTL_FOREVER), Micros::MAX);
    }
}
