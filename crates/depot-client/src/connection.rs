//! Shared connection management.
//!
//! One [`Connection`] is shared by every resolve call in the process. It
//! lends out the single live [`RpcTarget`], and when that is missing or has
//! dropped it reconnects with exponential backoff, ping-probing each fresh
//! connection before handing it out. The internal mutex makes the reconnect
//! sequence single-flight; at steady state callers only hold the lock long
//! enough to clone the target handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use depot_protocol::methods;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::rpc::{Outcome, RpcTarget};
use crate::throttle::LogThrottle;

const INITIAL_PAUSE_MS: u64 = 500;
const MAX_PAUSE_MS: u64 = 60_000;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const WARN_STEP: Duration = Duration::from_secs(30);
const WARN_CAP: Duration = Duration::from_secs(86_400);

/// Reconnect pause schedule: no pause on a cold start, then 500 ms growing
/// by 1.5x up to one minute. Reset to the start on any successful connect.
#[derive(Debug)]
pub(crate) struct Backoff {
    pause_ms: u64,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { pause_ms: 0 }
    }

    /// Returns the pause to apply before the next attempt and advances the
    /// schedule.
    pub(crate) fn next_pause(&mut self) -> Duration {
        if self.pause_ms == 0 {
            self.pause_ms = INITIAL_PAUSE_MS;
            Duration::ZERO
        } else {
            let pause = Duration::from_millis(self.pause_ms);
            self.pause_ms = MAX_PAUSE_MS.min(self.pause_ms + self.pause_ms / 2);
            pause
        }
    }

    pub(crate) fn reset(&mut self) {
        self.pause_ms = 0;
    }
}

struct ConnState {
    target: Option<Arc<RpcTarget>>,
    backoff: Backoff,
    throttle: LogThrottle,
    shut_down: bool,
}

pub(crate) struct Connection {
    endpoint: SocketAddr,
    state: Mutex<ConnState>,
}

impl Connection {
    pub(crate) fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            state: Mutex::new(ConnState {
                target: None,
                backoff: Backoff::new(),
                throttle: LogThrottle::new(WARN_STEP, WARN_CAP),
                shut_down: false,
            }),
        }
    }

    /// Returns the live target, reconnecting if necessary.
    ///
    /// Waiting for the internal lock and the whole reconnect sequence are
    /// bounded by `deadline`; returns `None` if no connection could be made
    /// in time or after [`shutdown`](Self::shutdown).
    pub(crate) async fn target(&self, deadline: &Deadline) -> Option<Arc<RpcTarget>> {
        let mut state = match timeout(deadline.time_left(), self.state.lock()).await {
            Ok(state) => state,
            Err(_) => return None,
        };
        if state.shut_down {
            return None;
        }

        let held_valid = state.target.as_ref().map(|t| t.is_valid()).unwrap_or(false);
        if !held_valid {
            self.connect(&mut state, deadline).await;
        }
        state.target.clone()
    }

    /// Reconnect loop. Runs with the state lock held, so at most one
    /// sequence is in flight.
    async fn connect(&self, state: &mut ConnState, deadline: &Deadline) {
        if let Some(stale) = state.target.take() {
            stale.close().await;
        }

        while deadline.has_time_left() {
            let pause = state.backoff.next_pause();
            if !pause.is_zero() {
                // Clamped so a long pause cannot push past the caller's budget.
                tokio::time::sleep(pause.min(deadline.time_left())).await;
            }

            let target = match RpcTarget::connect(self.endpoint).await {
                Ok(target) => target,
                Err(e) => {
                    if state.throttle.allow() {
                        warn!(endpoint = %self.endpoint, error = %e, "could not connect to the depot daemon");
                    }
                    continue;
                }
            };

            match target.invoke(methods::PING, json!({}), PROBE_TIMEOUT).await {
                Outcome::Success(_) => {
                    debug!(endpoint = %self.endpoint, "connected to the depot daemon");
                    state.backoff.reset();
                    state.throttle.reset();
                    state.target = Some(Arc::new(target));
                    return;
                }
                Outcome::Error { code, message } => {
                    if state.throttle.allow() {
                        warn!(endpoint = %self.endpoint, code, %message, "depot daemon did not answer ping");
                    }
                    target.close().await;
                }
            }
        }
    }

    /// Closes any held target. Idempotent; later `target` calls return `None`.
    pub(crate) async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shut_down = true;
        if let Some(target) = state.target.take() {
            target.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_is_deterministic() {
        let mut backoff = Backoff::new();
        let mut pauses = Vec::new();
        for _ in 0..6 {
            pauses.push(backoff.next_pause().as_millis() as u64);
        }
        assert_eq!(pauses, vec![0, 500, 750, 1125, 1687, 2530]);
    }

    #[test]
    fn backoff_caps_at_one_minute() {
        let mut backoff = Backoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            last = backoff.next_pause();
        }
        assert_eq!(last, Duration::from_millis(MAX_PAUSE_MS));
        assert_eq!(backoff.next_pause(), Duration::from_millis(MAX_PAUSE_MS));
    }

    #[test]
    fn backoff_reset_returns_to_cold_start() {
        let mut backoff = Backoff::new();
        backoff.next_pause();
        backoff.next_pause();
        backoff.reset();
        assert_eq!(backoff.next_pause(), Duration::ZERO);
        assert_eq!(backoff.next_pause(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn expired_deadline_yields_no_target() {
        let connection = Connection::new("127.0.0.1:1".parse().unwrap());
        let deadline = Deadline::new(Duration::ZERO);
        assert!(connection.target(&deadline).await.is_none());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_final() {
        let connection = Connection::new("127.0.0.1:1".parse().unwrap());
        connection.shutdown().await;
        connection.shutdown().await;
        let deadline = Deadline::new(Duration::from_secs(5));
        assert!(connection.target(&deadline).await.is_none());
    }
}
