//! The resolver entry point.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use depot_protocol::error_code::ErrorKind;
use depot_protocol::methods;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::deadline::Deadline;
use crate::reference::ContentRef;
use crate::rpc::Outcome;

/// Well-known port the depot daemon listens on locally.
pub const DEFAULT_DAEMON_PORT: u16 = 19090;

/// A single RPC never blocks longer than this, even with budget to spare,
/// so the retry loop gets to re-evaluate the deadline at least once a minute.
const MAX_RPC_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Terminal failures of [`DepotClient::resolve`].
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The caller's budget elapsed without a resolution. Transient daemon
    /// errors along the way are absorbed into this.
    #[error("timed out waiting for {reference} after {timeout:?}")]
    Timeout {
        reference: ContentRef,
        timeout: Duration,
    },

    /// The daemon reported an error that retrying will not fix.
    #[error("resolving {reference} failed: {message} ({code})")]
    Failed {
        reference: ContentRef,
        code: i32,
        message: String,
    },

    /// The daemon answered success but not with a path string; a protocol
    /// mismatch, not a transient condition.
    #[error("invalid response while resolving {reference}: {detail}")]
    InvalidResponse {
        reference: ContentRef,
        detail: String,
    },
}

/// Resolves content references to local paths via the co-located depot
/// daemon.
///
/// Meant to be created once and shared; all concurrent resolve calls ride
/// the same lazily established connection.
pub struct DepotClient {
    connection: Connection,
}

impl DepotClient {
    /// Client against the well-known local daemon endpoint
    /// (`127.0.0.1:19090`, overridable via `DEPOT_DAEMON_PORT`).
    pub fn new() -> Self {
        Self::with_endpoint(default_endpoint())
    }

    pub fn with_endpoint(endpoint: SocketAddr) -> Self {
        Self {
            connection: Connection::new(endpoint),
        }
    }

    /// Returns the local path the daemon placed `reference` at, waiting for
    /// the daemon to fetch it if it is not there yet.
    ///
    /// Retries transient daemon errors (including "reference not found yet")
    /// until `timeout` elapses. Permanent daemon errors and protocol
    /// mismatches fail immediately.
    pub async fn resolve(
        &self,
        reference: &ContentRef,
        timeout: Duration,
    ) -> Result<PathBuf, ResolveError> {
        let deadline = Deadline::new(timeout);

        while deadline.has_time_left() {
            let Some(target) = self.connection.target(&deadline).await else {
                break;
            };

            let rpc_timeout = deadline.time_left().min(MAX_RPC_TIMEOUT);
            debug!(reference = %reference, timeout = ?rpc_timeout, "invoking resolve");
            let outcome = target
                .invoke(
                    methods::RESOLVE,
                    json!({ "reference": reference }),
                    rpc_timeout,
                )
                .await;

            match outcome {
                Outcome::Success(Value::String(path)) => return Ok(PathBuf::from(path)),
                Outcome::Success(other) => {
                    return Err(ResolveError::InvalidResponse {
                        reference: reference.clone(),
                        detail: format!("expected a path string, got {other}"),
                    })
                }
                Outcome::Error { code, message } => {
                    if ErrorKind::from_code(code).is_transient() {
                        info!(reference = %reference, code, %message, "retrying resolve");
                        tokio::time::sleep(RETRY_PAUSE).await;
                    } else {
                        return Err(ResolveError::Failed {
                            reference: reference.clone(),
                            code,
                            message,
                        });
                    }
                }
            }
        }

        Err(ResolveError::Timeout {
            reference: reference.clone(),
            timeout,
        })
    }

    /// Closes the daemon connection. Further resolve calls time out without
    /// reconnecting.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

impl Default for DepotClient {
    fn default() -> Self {
        Self::new()
    }
}

fn default_endpoint() -> SocketAddr {
    let port = std::env::var("DEPOT_DAEMON_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(DEFAULT_DAEMON_PORT);
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_times_out_when_no_daemon_listens() {
        // Reserved port with nothing behind it; connects are refused fast.
        let client = DepotClient::with_endpoint("127.0.0.1:1".parse().unwrap());
        let reference = ContentRef::new("ref:none");

        let err = client
            .resolve(&reference, Duration::from_millis(300))
            .await
            .unwrap_err();
        match err {
            ResolveError::Timeout { timeout, .. } => {
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_after_shutdown_times_out() {
        let client = DepotClient::with_endpoint("127.0.0.1:1".parse().unwrap());
        client.shutdown().await;

        let err = client
            .resolve(&ContentRef::new("ref:late"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { .. }));
    }

    #[test]
    fn timeout_error_names_reference_and_budget() {
        let err = ResolveError::Timeout {
            reference: ContentRef::new("ref:A"),
            timeout: Duration::from_secs(5),
        };
        let text = err.to_string();
        assert!(text.contains("ref:A"));
        assert!(text.contains("5s"));
    }
}
