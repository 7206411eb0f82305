//! switchboard default `Error`
use std;
use std::net::AddrParseError;

use crate::sid::Sid;

/// Result type: `std::result::Result<T, Error>`
pub type Result<T> = std::result::Result<T, Error>;


/// Wrapping error type.
#[derive(Debug)]
pub enum Error {
    /// std::io::Error
    Io(std::io::Error),

    /// Failed to parse a listener address.
    AddrParse(AddrParseError),

    /// The `Registry` (or any `PreVec`-backed collection) has no capacity
    /// left for the new entry and is not allowed to grow.
    NoCapacity,

    /// No live session matches the given `Sid` (stale generation, or the
    /// slot was never occupied).
    NoConnection(Sid),

    /// The session was already registered.
    /// A session can only be registered once
    /// (but reregistered multiple times)
    AlreadyRegistered,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::AddrParse(e) => write!(f, "address parse error: {}", e),
            Error::NoCapacity => write!(f, "no capacity left"),
            Error::NoConnection(sid) => write!(f, "no connection for {}", sid),
            Error::AlreadyRegistered => write!(f, "session already registered"),
        }
    }
}

impl std::error::Error for Error {}

// -----------------------------------------------------------------------------
// 		- IO error -
// -----------------------------------------------------------------------------
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Error {
        Error::AddrParse(err)
    }
}

// -----------------------------------------------------------------------------
// 		- channel errors -
// -----------------------------------------------------------------------------
impl From<crossbeam::channel::TryRecvError> for Error {
    fn from(err: crossbeam::channel::TryRecvError) -> Error {
        Error::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, err))
    }
}
