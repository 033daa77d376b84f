//! Unified error types for the gnsslink driver stack.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! public API's error handling uniform. All variants are `Copy` so they can
//! be cheaply passed between the dispatcher thread and synchronous callers
//! without allocation.

use core::fmt;

/// Every fallible operation in the driver funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A required argument was null-equivalent or zero-sized.
    InvalidParameter,
    /// Operation on a torn-down or never-created store/instance.
    NotInitialized,
    /// No matching frame arrived within the time budget; the caller may retry.
    Timeout,
    /// The module explicitly rejected the message; terminal for that attempt.
    Nack,
    /// The fixed-size response buffer is too small; use the allocating variant.
    BufferTooSmall,
    /// The underlying transport read/write failed.
    TransportIo,
    /// Payload larger than the buffer capacity; never retried.
    CapacityExceeded,
    /// All read cursors are outstanding; give one back first.
    CursorUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::Timeout => write!(f, "timed out"),
            Self::Nack => write!(f, "message rejected by module (NACK)"),
            Self::BufferTooSmall => write!(f, "response buffer too small"),
            Self::TransportIo => write!(f, "transport I/O failed"),
            Self::CapacityExceeded => write!(f, "payload exceeds buffer capacity"),
            Self::CursorUnavailable => write!(f, "no read cursor available"),
        }
    }
}

impl std::error::Error for Error {}

/// Driver-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
