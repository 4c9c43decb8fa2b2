//! Client library for the depot file-distribution daemon.
//!
//! The daemon runs co-located with the host process and is responsible for
//! fetching content and placing it on local disk. This crate resolves an
//! opaque [`ContentRef`] into the local path the daemon placed it at,
//! blocking (awaiting) until the content is available or the caller's
//! budget runs out:
//!
//! ```ignore
//! let client = DepotClient::new();
//! let path = client
//!     .resolve(&ContentRef::new("ref:A"), Duration::from_secs(30))
//!     .await?;
//! ```
//!
//! One [`DepotClient`] is meant to be shared process-wide; any number of
//! tasks may resolve concurrently over the single underlying connection.
//! The client reconnects lazily with exponential backoff, so it is safe to
//! create it before the daemon is up.

mod client;
mod connection;
mod deadline;
mod reference;
mod rpc;
mod throttle;

pub use client::{DepotClient, ResolveError, DEFAULT_DAEMON_PORT};
pub use deadline::Deadline;
pub use reference::ContentRef;
pub use throttle::LogThrottle;
