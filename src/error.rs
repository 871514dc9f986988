//! Typed error taxonomy shared by the session engine and the listener.
//!
//! The session engine's public return type is [`Outcome`]; callers match on
//! that, not on [`SessionError`] directly. The listener has its own,
//! smaller [`RequestError`] for request-shaped-but-unserviceable datagrams,
//! since those never spawn a session at all.

use thiserror::Error;

use crate::protocol::DecodeError;

/// Everything that can go wrong inside a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed message from peer: {0}")]
    MalformedPeerMessage(#[from] DecodeError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("local I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// The terminal result of a session's `run`.
#[derive(Debug)]
pub enum Outcome {
    /// The transfer ran to completion per the wire protocol.
    Completed,
    /// The peer sent an ERROR packet; the session does not reply.
    PeerError { code: u16, message: String },
    /// A local decode, protocol, or I/O failure ended the session.
    LocalError(SessionError),
    /// The retry budget was exhausted waiting for a response.
    TimedOut,
    /// The session was cancelled by a server-wide shutdown signal.
    Aborted,
}

impl Outcome {
    /// Short, human-readable tag for log lines (`transfer completed`, `transfer
    /// timed out`, ...), matching the original server's event vocabulary.
    pub fn log_event(&self) -> String {
        match self {
            Outcome::Completed => "transfer completed".to_string(),
            Outcome::PeerError { code, message } => {
                format!("error message received: {code} {message}")
            }
            Outcome::LocalError(e) => format!("transfer killed: {e}"),
            Outcome::TimedOut => "transfer timed out".to_string(),
            Outcome::Aborted => "transfer aborted: server shutting down".to_string(),
        }
    }
}

/// Failures the listener can encounter before a session ever exists: a
/// malformed initial datagram, a request naming a path outside the base
/// directory, or a file that can't be opened. Each carries enough
/// information to build the matching wire ERROR reply (see
/// [`RequestError::wire_error`]).
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request with invalid size received")]
    InvalidSize,

    #[error("invalid filename or mode")]
    MalformedRequest,

    #[error("transfer mode not specified")]
    ModeNotSpecified,

    #[error("invalid transfer mode")]
    UnknownMode,

    #[error("filename outside base directory")]
    PathRejected,

    #[error("invalid opcode")]
    UnsupportedOpcode,

    #[error("{0}")]
    OpenFailure(#[source] std::io::Error),
}

impl RequestError {
    /// The wire-level (code, message) pair the listener should send back.
    pub fn wire_error(&self) -> (u16, String) {
        match self {
            RequestError::InvalidSize => (0, "invalid request size".to_string()),
            RequestError::MalformedRequest => (0, "invalid filename or mode".to_string()),
            RequestError::ModeNotSpecified => (0, "transfer mode not specified".to_string()),
            RequestError::UnknownMode => (0, "invalid transfer mode".to_string()),
            RequestError::PathRejected => (0, "filename outside base directory".to_string()),
            RequestError::UnsupportedOpcode => (4, "invalid opcode".to_string()),
            RequestError::OpenFailure(io_err) => {
                (open_error_code(io_err), open_error_message(io_err))
            }
        }
    }
}

/// Map a file-open failure onto the wire-level TFTP error code taxonomy:
/// `NotFound` -> 1, `PermissionDenied` -> 2, out-of-space -> 3,
/// `AlreadyExists` -> 6, anything else -> 0.
fn open_error_code(err: &std::io::Error) -> u16 {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => 1,
        ErrorKind::PermissionDenied => 2,
        ErrorKind::AlreadyExists => 6,
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => 3,
        _ => 0,
    }
}

/// `strerror(errno)`-style message for a file-open failure, with no
/// `(os error N)` suffix: the original passes `strerror(errno)` straight
/// into the ERROR packet's message field, and scenario S7 (spec §8) gives
/// the literal wire string `"No such file or directory"` for a missing
/// file, not `"No such file or directory (os error 2)"`.
fn open_error_message(err: &std::io::Error) -> String {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => "No such file or directory".to_string(),
        ErrorKind::PermissionDenied => "Permission denied".to_string(),
        ErrorKind::AlreadyExists => "File exists".to_string(),
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => "No space left on device".to_string(),
        _ => {
            let full = err.to_string();
            full.split(" (os error")
                .next()
                .unwrap_or(&full)
                .to_string()
        }
    }
}
