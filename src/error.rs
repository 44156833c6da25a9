//! Error types for session setup and packet construction.
//!
//! The error taxonomy is a closed set of four kinds, deliberately decoupled
//! from OS errno values: the OS error text and number are captured only as
//! diagnostic context inside the message. Callers are expected to match on
//! [`ErrorKind`] rather than parse message text.

use std::io;

/// Discriminant for [`Error`], for callers that dispatch on the failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Adapter enumeration found nothing, the named device is absent, or the
    /// selected port is not an active Ethernet port.
    NoDevice,
    /// Hugepage reservation or mapping failed.
    NoMemory,
    /// Textual MAC or IPv4 address failed to parse.
    BadAddress,
    /// Any other adapter API failure: registration, CQ/QP creation, state
    /// modify. Also reported for misuse of the session API itself (an
    /// out-of-order state transition, a payload exceeding its ring slot).
    ApiError,
}

/// Session setup and packet construction errors.
///
/// Each variant carries a human-readable description naming the failing
/// operation and, where applicable, the OS error text and numeric code.
#[derive(Debug)]
pub enum Error {
    /// No usable device: enumeration empty, name unknown, or port unusable.
    NoDevice(String),
    /// Hugepage reservation or mapping failed.
    NoMemory(String),
    /// MAC or IPv4 text failed to parse.
    BadAddress(String),
    /// Adapter API call failed, or the session API was misused.
    ApiError(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoDevice(_) => ErrorKind::NoDevice,
            Error::NoMemory(_) => ErrorKind::NoMemory,
            Error::BadAddress(_) => ErrorKind::BadAddress,
            Error::ApiError(_) => ErrorKind::ApiError,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoDevice(msg) => write!(f, "no device: {}", msg),
            Error::NoMemory(msg) => write!(f, "no memory: {}", msg),
            Error::BadAddress(msg) => write!(f, "bad address: {}", msg),
            Error::ApiError(msg) => write!(f, "api error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::ApiError(format!(
            "{} (errno {})",
            e,
            e.raw_os_error().unwrap_or(0)
        ))
    }
}
