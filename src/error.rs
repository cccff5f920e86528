//! Unified error handling for the content server.
//!
//! A single `thiserror`-derived enum covers every wire-facing error code
//! plus the handful of internal/bootstrap failures that never reach a
//! client.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type CustodianResult<T> = Result<T, ServerError>;

/// All error conditions the server can produce.
///
/// Variants map 1:1 onto the wire error codes in the protocol table except
/// for `Bootstrap`, `Io`, and `Internal`, which never cross the wire — a
/// request that fails with one of these gets its connection torn down
/// instead of a reply.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("no permission for requested operation")]
    NoPerms,

    #[error("invalid path: {0}")]
    PathInval(String),

    #[error("invalid parameter: {0}")]
    ParamInval(String),

    #[error("no such database: {0}")]
    NoDb(String),

    #[error("failed to open file: {0}")]
    FileOpen(PathBuf),

    #[error("failed to read file: {0}")]
    FileRead(PathBuf),

    #[error("failed to write file: {0}")]
    FileWrite(PathBuf),

    #[error("parent collection does not exist: {0}")]
    ParentCollInval(String),

    #[error("invalid collection: {0}")]
    CollInval(String),

    #[error("item creation failed: {0}")]
    ItemCreate(String),

    #[error("no such session")]
    NoSession,

    #[error("no such account")]
    NoAccount,

    #[error("duplicate session")]
    DuplicateSession,

    #[error("duplicate account")]
    DuplicateAccount,

    #[error("bad login")]
    BadLogin,

    #[error("malformed command")]
    CommandFormat,

    /// Fatal startup failure; the process aborts rather than serving.
    #[error("bootstrap failure: {0}")]
    Bootstrap(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Map to the numeric wire code from the protocol specification.
    ///
    /// Returns `None` for `Bootstrap`, `Io`, and `Internal` — these never
    /// have a wire representation. A connection that produces one of these
    /// mid-request cannot be given a reply (the stream itself may be the
    /// problem) and must be torn down instead; see `handle_one_request`.
    pub fn to_wire_code(&self) -> Option<u16> {
        match self {
            ServerError::Parse(_) => Some(1),
            ServerError::NoPerms => Some(2),
            ServerError::PathInval(_) => Some(3),
            ServerError::ParamInval(_) => Some(4),
            ServerError::NoDb(_) => Some(5),
            ServerError::FileOpen(_) => Some(6),
            ServerError::FileRead(_) => Some(7),
            ServerError::FileWrite(_) => Some(8),
            ServerError::ParentCollInval(_) => Some(9),
            ServerError::CollInval(_) => Some(10),
            ServerError::ItemCreate(_) => Some(11),
            ServerError::NoSession => Some(12),
            ServerError::NoAccount => Some(13),
            ServerError::DuplicateSession => Some(14),
            ServerError::DuplicateAccount => Some(15),
            ServerError::BadLogin => Some(16),
            ServerError::CommandFormat => Some(17),
            ServerError::Bootstrap(_) | ServerError::Io(_) | ServerError::Internal(_) => None,
        }
    }

    /// True for errors that should be logged server-side in addition to
    /// being surfaced to the client (storage errors per the error
    /// handling taxonomy).
    pub fn should_log(&self) -> bool {
        matches!(
            self,
            ServerError::FileOpen(_)
                | ServerError::FileRead(_)
                | ServerError::FileWrite(_)
                | ServerError::ParentCollInval(_)
                | ServerError::CollInval(_)
                | ServerError::ItemCreate(_)
                | ServerError::Io(_)
                | ServerError::Bootstrap(_)
                | ServerError::Internal(_)
        )
    }
}

pub const SUCCESS: u16 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_spec_table() {
        assert_eq!(ServerError::Parse(String::new()).to_wire_code(), Some(1));
        assert_eq!(ServerError::NoPerms.to_wire_code(), Some(2));
        assert_eq!(ServerError::PathInval(String::new()).to_wire_code(), Some(3));
        assert_eq!(ServerError::CommandFormat.to_wire_code(), Some(17));
    }

    #[test]
    fn non_wire_variants_have_no_wire_code() {
        assert_eq!(ServerError::Bootstrap(String::new()).to_wire_code(), None);
        assert_eq!(ServerError::Internal(String::new()).to_wire_code(), None);
        let io_err = ServerError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(io_err.to_wire_code(), None);
    }

    #[test]
    fn storage_errors_are_logged_input_errors_are_not() {
        assert!(ServerError::FileOpen(PathBuf::from("x")).should_log());
        assert!(!ServerError::PathInval("x".into()).should_log());
        assert!(!ServerError::NoPerms.should_log());
    }
}
