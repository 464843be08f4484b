//! Rate limiting for progress reports.

use std::time::{Duration, Instant};

/// Allows at most one event per `interval`.
///
/// Time is passed in by the caller so behaviour can be checked with synthetic
/// instants.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Throttle {
    /// New throttle; the first call to [`ready`](Self::ready) always passes
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns true and records `now` if an interval has passed since the last
    /// accepted event.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_event_passes() {
        let mut throttle = Throttle::new(Duration::from_millis(200));
        assert!(throttle.ready(Instant::now()));
    }

    #[test]
    fn test_events_within_interval_are_dropped() {
        let mut throttle = Throttle::new(Duration::from_millis(200));
        let t0 = Instant::now();
        assert!(throttle.ready(t0));
        assert!(!throttle.ready(t0 + Duration::from_millis(50)));
        assert!(!throttle.ready(t0 + Duration::from_millis(199)));
        assert!(throttle.ready(t0 + Duration::from_millis(200)));
        assert!(!throttle.ready(t0 + Duration::from_millis(300)));
    }

    #[test]
    fn test_emitted_count_is_bounded() {
        let interval = Duration::from_millis(200);
        let mut throttle = Throttle::new(interval);
        let t0 = Instant::now();
        let span = Duration::from_secs(3);

        // One attempt per simulated millisecond
        let emitted = (0..span.as_millis() as u64)
            .filter(|ms| throttle.ready(t0 + Duration::from_millis(*ms)))
            .count();

        let bound = (span.as_millis() / interval.as_millis()) as usize + 1;
        assert!(emitted <= bound, "{emitted} > {bound}");
        assert!(emitted >= bound - 1);
    }
}
