//! Shared wire-protocol types for talking to the depot daemon.
//!
//! The daemon speaks line-delimited JSON-RPC 2.0: one JSON value per line,
//! requests matched to responses by id. This crate carries the framing
//! types, the method names the daemon exposes, and the daemon's error-code
//! space with its transient/permanent classification. It does no I/O.

pub mod error_code;
mod protocol;

pub use protocol::{Request, RequestId, Response, RpcError};

/// RPC method names exposed by the depot daemon.
pub mod methods {
    /// Liveness probe; no parameters, empty success response.
    pub const PING: &str = "ping";
    /// Resolve a content reference to a local path.
    ///
    /// Params: `{"reference": <string>}`. Success result is one JSON
    /// string, the resolved path.
    pub const RESOLVE: &str = "resolve";
}
