//! Domain-specific error types for truss.
//!
//! All fallible operations return `Result<T, TrussError>`. Queue misses are
//! `Option`/`bool` and decrypt failures are a `Received` sentinel, so neither
//! shows up here.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for truss.
#[derive(Debug, Error)]
pub enum TrussError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the frame magic.
    #[error("invalid magic bytes: expected TRS1")]
    InvalidMagic,

    /// The frame body failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Text did not name any known wire token.
    #[error("unknown token: {0:?}")]
    UnknownToken(String),

    /// A peer broke the expected message sequence.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The peer answered with something other than the expected reply.
    #[error("unexpected reply: expected {expected}, got {actual:?}")]
    UnexpectedReply { expected: &'static str, actual: String },

    /// The connection state machine refused a transition.
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// A `job:<suffix>:<os>:<level>` payload could not be parsed.
    #[error("invalid job request: {0}")]
    InvalidJobRequest(String),

    // ── Crypto Errors ────────────────────────────────────────────
    /// Sealing a frame under the session key failed.
    #[error("encryption failed")]
    Encryption,

    /// A received prime or base is malformed or out of range.
    #[error("invalid DH parameter: {0}")]
    InvalidDhParameter(&'static str),

    /// A peer public key is malformed or outside `[2, p-2]`.
    #[error("invalid DH public key")]
    InvalidPublicKey,

    /// A key exchange exhausted its mismatch or idle budget.
    #[error("rekey aborted: {0}")]
    RekeyAborted(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The peer closed the connection mid-exchange.
    #[error("peer closed the connection")]
    PeerClosed,

    /// A frame arrived that the current key cannot open.
    #[error("frame could not be decrypted")]
    Undecryptable,

    /// No frame arrived before the deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The handshake reply did not echo the test message.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON encoding of a snapshot failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Application Errors ───────────────────────────────────────
    /// A job descriptor line was rejected.
    #[error("descriptor line {line}: {source}")]
    Descriptor {
        line: usize,
        #[source]
        source: DescriptorError,
    },

    /// A configuration value is missing or unusable.
    #[error("config error: {0}")]
    Config(String),

    /// A blocking or spawned task failed to complete.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DescriptorError ───────────────────────────────────────────────

/// Why a single `OS SECLEVEL COMMAND` line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("expected `OS SECLEVEL COMMAND`")]
    MissingFields,

    #[error("unknown OS {0:?} (expected any, windows or linux)")]
    InvalidOs(String),

    #[error("security level {0:?} is not a non-negative integer")]
    InvalidSecurityLevel(String),

    #[error("command is empty")]
    EmptyCommand,
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TrussError {
    fn from(s: String) -> Self {
        TrussError::Other(s)
    }
}

impl From<&str> for TrussError {
    fn from(s: &str) -> Self {
        TrussError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for TrussError {
    fn from(e: serde_json::Error) -> Self {
        TrussError::Encoding(e.to_string())
    }
}

impl TrussError {
    /// Whether this error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TrussError::PeerClosed => true,
            TrussError::Connection(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
