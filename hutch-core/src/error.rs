//! Hutch Error Types
//!
//! A single error type shared by the transport kernel and the protocol layer.
//! It is `Clone` because one sticky error is handed to every outstanding
//! operation when a connection or channel unwinds.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for Hutch operations
#[derive(Error, Debug, Clone)]
pub enum HutchError {
    /// IO error on the socket boundary
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// Close sent by the server (connection.close / channel.close)
    #[error("Protocol error {reply_code} ({class_id}/{method_id}): {reply_text}")]
    Protocol {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },

    /// Socket failure or EOF, converted into a protocol-shaped error without a reply code
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid frame on the wire
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// All gate slots of a ring buffer are in use
    #[error("Gate table full ({capacity} gates open)")]
    GateTableFull { capacity: usize },

    /// The outstanding-reply queue of a channel is full
    #[error("Outstanding reply queue full on channel {channel} (max: {capacity})")]
    ReplyQueueFull { channel: u16, capacity: usize },

    /// The completion pool has no free handle and may not grow
    #[error("Completion pool exhausted (max: {capacity})")]
    PoolExhausted { capacity: usize },

    /// Ring buffer capacity is zero, not a power of two, or below the minimum
    #[error("Invalid ring capacity {capacity} (power of two >= {min} required)")]
    InvalidCapacity { capacity: usize, min: usize },

    /// A single transfer asked for more bytes than the ring can ever hold
    #[error("Request of {requested} bytes exceeds ring capacity {capacity}")]
    RequestTooLarge { requested: usize, capacity: usize },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection or channel is closed
    #[error("Closed")]
    Closed,

    /// No channel registered under this number
    #[error("Channel {0} not found")]
    ChannelNotFound(u16),

    /// Every channel number up to channel-max is taken
    #[error("No free channel number (channel-max: {0})")]
    ChannelLimit(u16),

    /// Result requested from a completion handle that has not resolved yet
    #[error("Completion not yet resolved")]
    NotCompleted,

    /// A second continuation was registered on a completion handle
    #[error("Continuation already registered")]
    ContinuationAlreadySet,
}

/// Result type alias for Hutch operations
pub type Result<T> = std::result::Result<T, HutchError>;

impl From<io::Error> for HutchError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl HutchError {
    /// Create a transport error with a message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Reply code carried by a server close, if any
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        match self {
            Self::Protocol { reply_code, .. } => Some(*reply_code),
            _ => None,
        }
    }

    /// Class/method id of the offending command named by a server close
    #[must_use]
    pub const fn offending_method(&self) -> Option<(u16, u16)> {
        match self {
            Self::Protocol {
                class_id,
                method_id,
                ..
            } if *class_id != 0 => Some((*class_id, *method_id)),
            _ => None,
        }
    }

    /// Check if this error means the connection is gone
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Transport(_) | Self::InvalidFrame(_) | Self::Closed
        )
    }

    /// Check if this error is a resource limit that is fatal only to the offending call
    #[must_use]
    pub const fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::GateTableFull { .. } | Self::ReplyQueueFull { .. } | Self::PoolExhausted { .. }
        )
    }
}
