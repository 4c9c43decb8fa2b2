//! Error codes returned by the depot daemon, and their classification.
//!
//! The classification is a closed set: every code the client is allowed to
//! retry is named here, and anything unrecognized is permanent. A new daemon
//! code must be added to [`ErrorKind`] explicitly before the client will
//! treat it as transient.

/// Generic daemon/transport failure.
pub const GENERAL_ERROR: i32 = 100;
/// The daemon aborted the call.
pub const ABORT: i32 = 101;
/// The connection dropped before a response arrived.
pub const CONNECTION_LOST: i32 = 102;
/// The per-call timeout expired.
pub const CALL_TIMEOUT: i32 = 103;
/// The daemon is overloaded and shed the call.
pub const OVERLOAD: i32 = 104;

/// Base of the file-distribution application error space.
pub const BASE_ERROR_CODE: i32 = 0x10000;
pub const BASE_PROVIDER_ERROR_CODE: i32 = BASE_ERROR_CODE + 0x1000;
/// The daemon has not (yet) placed the referenced content on disk.
pub const REFERENCE_NOT_FOUND: i32 = BASE_PROVIDER_ERROR_CODE;

/// Classified view of a daemon error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Abort,
    ConnectionLost,
    General,
    Overload,
    CallTimeout,
    /// The reference is not on local disk yet; the daemon may still be
    /// fetching it, so the client keeps polling.
    ReferenceNotFound,
    /// Any code not named above. Never retried.
    Other(i32),
}

impl ErrorKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            ABORT => Self::Abort,
            CONNECTION_LOST => Self::ConnectionLost,
            GENERAL_ERROR => Self::General,
            OVERLOAD => Self::Overload,
            CALL_TIMEOUT => Self::CallTimeout,
            REFERENCE_NOT_FOUND => Self::ReferenceNotFound,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Abort => ABORT,
            Self::ConnectionLost => CONNECTION_LOST,
            Self::General => GENERAL_ERROR,
            Self::Overload => OVERLOAD,
            Self::CallTimeout => CALL_TIMEOUT,
            Self::ReferenceNotFound => REFERENCE_NOT_FOUND,
            Self::Other(code) => code,
        }
    }

    /// Whether a retry could plausibly succeed. Unknown codes are permanent.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Abort
                | Self::ConnectionLost
                | Self::General
                | Self::Overload
                | Self::CallTimeout
                | Self::ReferenceNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_codes_are_transient() {
        for code in [
            ABORT,
            CONNECTION_LOST,
            GENERAL_ERROR,
            OVERLOAD,
            CALL_TIMEOUT,
            REFERENCE_NOT_FOUND,
        ] {
            let kind = ErrorKind::from_code(code);
            assert!(kind.is_transient(), "{kind:?} should be transient");
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn unknown_codes_default_to_permanent() {
        for code in [0, 1, 99, 105, BASE_ERROR_CODE, REFERENCE_NOT_FOUND + 1] {
            let kind = ErrorKind::from_code(code);
            assert_eq!(kind, ErrorKind::Other(code));
            assert!(!kind.is_transient());
        }
    }

    #[test]
    fn reference_not_found_sits_in_the_provider_code_space() {
        assert_eq!(REFERENCE_NOT_FOUND, 0x11000);
    }
}
