use std::time::Duration;
use tokio::time::Instant;

/// A consumable time budget, derived once per top-level call.
///
/// Built on the monotonic clock, so it is insensitive to wall-clock
/// adjustments, and on [`tokio::time::Instant`] specifically, so tests can
/// drive it with a paused clock. A deadline is never extended.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: Duration,
    end: Instant,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        let now = Instant::now();
        let end = now
            .checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365));
        Self { budget, end }
    }

    /// Time remaining; saturates at zero once expired.
    pub fn time_left(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }

    pub fn has_time_left(&self) -> bool {
        self.time_left() > Duration::ZERO
    }

    /// The original budget this deadline was derived from.
    pub fn budget(&self) -> Duration {
        self.budget
    }
}
