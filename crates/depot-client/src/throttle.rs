use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter for repetitive log statements.
///
/// The first event is allowed immediately. After the n-th allowed event the
/// next one is held back for `min(cap, step * n)`, so a prolonged failure
/// keeps surfacing in the logs at a geometrically decreasing frequency
/// instead of flooding them. [`reset`](Self::reset) returns the throttle to
/// its initial state once the condition clears.
#[derive(Debug)]
pub struct LogThrottle {
    step: Duration,
    cap: Duration,
    count: u32,
    next_allowed: Option<Instant>,
}

impl LogThrottle {
    pub fn new(step: Duration, cap: Duration) -> Self {
        Self {
            step,
            cap,
            count: 0,
            next_allowed: None,
        }
    }

    /// Records an event and reports whether it should be logged.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let due = match self.next_allowed {
            None => true,
            Some(at) => now > at,
        };
        if due {
            self.count += 1;
            let quiet = self.cap.min(self.step * self.count);
            self.next_allowed = Some(now + quiet);
        }
        due
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.next_allowed = None;
    }
}
