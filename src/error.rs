//! # Error Types
//!
//! Error handling for the Source Engine protocol pipeline.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level framing problems to handshake and routing
//! failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and stream failures from the transport layer
//! - **Framing Errors**: Unknown headers, bad discriminators, malformed packets
//! - **Handshake Errors**: Challenge escalation, authentication failures
//! - **Routing Errors**: Unmatched responses, timeouts
//!
//! Framing errors are recovered locally by the codec layer and never crash a
//! connection; everything else reaches the caller through its completion
//! handle, signaled at most once.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Correlator-related error messages
    pub const ERR_CORRELATOR_WRITE_LOCK: &str = "Failed to acquire write lock on correlator";
    pub const ERR_CORRELATOR_READ_LOCK: &str = "Failed to acquire read lock on correlator";

    /// Assembler-related error messages
    pub const ERR_SPLIT_WRITE_LOCK: &str = "Failed to acquire write lock on split-packet registry";
    pub const ERR_AUTH_WRITE_LOCK: &str = "Failed to acquire write lock on auth registry";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Marker the server embeds in a command response when credentials
    /// became invalid after a successful authentication.
    pub const BAD_PASSWORD_MARKER: &str = "Bad Password";
}

/// Reason attached to an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The server rejected the password outright (auth reply id == -1 or mismatched).
    BadPassword,
    /// The connection lost its authenticated state and must re-authenticate.
    Reauthenticate,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::BadPassword => write!(f, "BAD_PASSWORD"),
            AuthFailure::Reauthenticate => write!(f, "REAUTHENTICATE"),
        }
    }
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown packet header: {0}")]
    UnknownPacketHeader(i32),

    #[error("Invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Compressed split packets are not supported")]
    CompressionNotSupported,

    #[error("Incomplete split packet: received {received} of {expected} fragments")]
    IncompleteSplitPacket { received: usize, expected: usize },

    #[error("Challenge received from server: {0}")]
    ChallengeReceived(i32),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(AuthFailure),

    #[error("Unexpected response type: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("No request pending for this response")]
    NoPendingRequest,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
