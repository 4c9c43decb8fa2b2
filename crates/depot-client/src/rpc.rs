//! Live RPC connection handle.
//!
//! A [`RpcTarget`] wraps one TCP connection to the daemon: the write half
//! behind a mutex, and a background reader task that matches line-delimited
//! JSON-RPC responses to waiting callers by request id. Any number of calls
//! may be in flight concurrently. When the stream breaks the target marks
//! itself invalid and every waiting call fails with `CONNECTION_LOST`; the
//! connection manager discards invalid targets and reconnects.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depot_protocol::{error_code, Request, RequestId, Response};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of one RPC invocation. Transport-level failures are folded into
/// the daemon error-code space so the caller classifies everything the
/// same way.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success(Value),
    Error { code: i32, message: String },
}

type PendingMap = SyncMutex<HashMap<u64, oneshot::Sender<Response>>>;

/// Removes a call's pending-map entry when the call ends for any reason,
/// including cancellation of the calling future between the insert and the
/// response await. Removing an id the reader already answered is a no-op.
struct PendingEntry {
    pending: Arc<PendingMap>,
    id: u64,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

pub(crate) struct RpcTarget {
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    valid: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl RpcTarget {
    pub(crate) async fn connect(endpoint: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(endpoint).await?;
        let (read, write) = stream.into_split();

        let pending: Arc<PendingMap> = Arc::new(SyncMutex::new(HashMap::new()));
        let valid = Arc::new(AtomicBool::new(true));
        let reader_task = tokio::spawn(read_loop(
            BufReader::new(read),
            Arc::clone(&pending),
            Arc::clone(&valid),
        ));

        Ok(Self {
            writer: Mutex::new(write),
            pending,
            next_id: AtomicU64::new(1),
            valid,
            reader_task,
        })
    }

    /// False once the underlying stream has dropped or `close` was called.
    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub(crate) async fn invoke(
        &self,
        method: &str,
        params: Value,
        call_timeout: Duration,
    ) -> Outcome {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(RequestId::Number(id), method, params);
        let mut frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(e) => {
                return Outcome::Error {
                    code: error_code::GENERAL_ERROR,
                    message: format!("failed to encode request: {e}"),
                }
            }
        };
        frame.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _entry = PendingEntry {
            pending: Arc::clone(&self.pending),
            id,
        };

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                self.valid.store(false, Ordering::SeqCst);
                return Outcome::Error {
                    code: error_code::CONNECTION_LOST,
                    message: format!("write to depot daemon failed: {e}"),
                };
            }
        }

        // The reader task may have torn down the pending map before our
        // entry went in; without this check such a call would sit out its
        // full timeout instead of reporting the lost connection.
        if !self.is_valid() {
            return Outcome::Error {
                code: error_code::CONNECTION_LOST,
                message: "connection to depot daemon lost".to_string(),
            };
        }

        let response = match timeout(call_timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped by the reader's teardown or by close(): the
            // connection is gone.
            Ok(Err(_)) => {
                return Outcome::Error {
                    code: error_code::CONNECTION_LOST,
                    message: "connection to depot daemon lost".to_string(),
                }
            }
            Err(_) => {
                return Outcome::Error {
                    code: error_code::CALL_TIMEOUT,
                    message: format!("no response to {method} within {call_timeout:?}"),
                };
            }
        };

        match response.error {
            Some(error) => Outcome::Error {
                code: error.code,
                message: error.message,
            },
            None => Outcome::Success(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Tears the connection down. Idempotent.
    pub(crate) async fn close(&self) {
        self.valid.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        // The aborted reader never runs its own teardown, so fail the
        // in-flight calls here rather than leaving them to their timeouts.
        self.pending.lock().clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pending: Arc<PendingMap>,
    valid: Arc<AtomicBool>,
) {
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "read from depot daemon failed");
                break;
            }
        }

        let response: Response = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "unparseable frame from depot daemon, dropping connection");
                break;
            }
        };

        let Some(RequestId::Number(id)) = response.id else {
            // Not a reply to anything we sent.
            continue;
        };
        if let Some(tx) = pending.lock().remove(&id) {
            let _ = tx.send(response);
        }
    }

    valid.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiting call with a closed channel,
    // which invoke() reports as CONNECTION_LOST.
    pending.lock().clear();
}
