use std::time::{Duration, Instant};

/// Coalesces bursts of input into a single value once input goes quiet.
///
/// Every `input` restarts the quiet window. Time is passed in by the caller
/// so the daemon loop and tests drive the same code.
#[derive(Debug)]
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    pub fn quiet(&self) -> Duration {
        self.quiet
    }

    pub fn set_quiet(&mut self, quiet: Duration) {
        self.quiet = quiet;
    }

    pub fn input(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    /// Time left before the pending value settles; `None` when idle.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let (_, at) = self.pending.as_ref()?;
        Some(self.quiet.saturating_sub(now.saturating_duration_since(*at)))
    }

    /// The pending value once the quiet window has passed. It stays pending
    /// until the caller takes it.
    pub fn ready(&self, now: Instant) -> Option<&T> {
        match self.remaining(now) {
            Some(left) if left.is_zero() => self.pending.as_ref().map(|(v, _)| v),
            _ => None,
        }
    }

    pub fn take(&mut self) -> Option<T> {
        self.pending.take().map(|(v, _)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(300);

    #[test]
    fn ready_after_quiet_window() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.input("ab", t0);
        assert_eq!(d.ready(t0 + Duration::from_millis(299)), None);
        assert_eq!(d.ready(t0 + QUIET), Some(&"ab"));
        // Still pending until taken.
        assert_eq!(d.ready(t0 + QUIET * 2), Some(&"ab"));
        assert_eq!(d.take(), Some("ab"));
        assert_eq!(d.ready(t0 + QUIET * 2), None);
        assert_eq!(d.remaining(t0), None);
    }

    #[test]
    fn new_input_restarts_window_and_replaces_value() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.input("a", t0);
        d.input("ab", t0 + Duration::from_millis(200));
        assert_eq!(d.ready(t0 + Duration::from_millis(400)), None);
        assert_eq!(
            d.remaining(t0 + Duration::from_millis(400)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(d.ready(t0 + Duration::from_millis(500)), Some(&"ab"));
    }

    #[test]
    fn take_drops_pending_value() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(QUIET);
        d.input(1, t0);
        assert_eq!(d.take(), Some(1));
        assert_eq!(d.ready(t0 + QUIET), None);
        assert_eq!(d.take(), None);
    }

    #[test]
    fn zero_quiet_is_ready_immediately() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(Duration::ZERO);
        d.input("x", t0);
        assert_eq!(d.ready(t0), Some(&"x"));
    }
}
