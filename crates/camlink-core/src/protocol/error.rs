//! Protocol errors

use thiserror::Error;

/// Errors raised while decoding a response frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Wrong marker byte, or a declared length that can never fit
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Fewer bytes than the frame declares; the caller should read more
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the complete frame occupies
        needed: usize,
        /// Bytes buffered so far
        available: usize,
    },

    /// Encoded frame would not fit the length byte or the transport limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Requested size
        size: usize,
        /// Largest size that fits
        max: usize,
    },
}

/// Errors that can occur while driving the camera
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port could not be opened at all
    #[error("Serial link unavailable at {baud_rate} baud: {reason}")]
    LinkUnavailable {
        /// Speed the open was attempted at
        baud_rate: u32,
        /// Error reported by the transport
        reason: String,
    },

    /// Raw link read or write ran out of time
    #[error("Link operation timed out")]
    Timeout,

    /// Raw link I/O failed
    #[error("Serial link error: {0}")]
    LinkError(String),

    /// No link is open
    #[error("Not connected to camera")]
    NotConnected,

    /// Codec error
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// No reply with the expected address and opcode arrived in time
    #[error("No matching response for opcode {opcode:#04x} within {timeout_ms}ms")]
    DispatchTimeout {
        /// Opcode of the command that went unanswered
        opcode: u8,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// The link broke during a command. The link is closed afterwards.
    #[error("Link failed during command {opcode:#04x}: {reason}")]
    DispatchLinkError {
        /// Opcode of the command in flight
        opcode: u8,
        /// Underlying link error
        reason: String,
    },

    /// The camera answered with a non-zero status
    #[error("Camera rejected command {opcode:#04x} with status {status:#04x}")]
    DeviceRejected {
        /// Opcode of the rejected command
        opcode: u8,
        /// Status byte from the reply
        status: u8,
    },

    /// The port opened but nothing answered at any candidate speed
    #[error("Camera not responding at any known speed (tried {tried:?})")]
    NegotiationFailed {
        /// Speeds attempted, in order
        tried: Vec<u32>,
    },

    /// The frame buffer is empty
    #[error("Camera has no captured image")]
    NoImageAvailable,

    /// The image sink refused data or failed to flush
    #[error("Image sink error: {0}")]
    SinkError(String),

    /// A capture failed after the frame was frozen
    #[error("Transfer failed after {bytes_transferred} of {total_bytes} bytes: {source}")]
    TransferFailed {
        /// Bytes already handed to the sink
        bytes_transferred: u32,
        /// Image length reported by the camera
        total_bytes: u32,
        /// What stopped the transfer
        #[source]
        source: Box<ProtocolError>,
    },

    /// A reply payload could not be interpreted
    #[error("Unexpected response payload: {0}")]
    InvalidResponse(String),

    /// Caller supplied an out-of-range value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The camera has no command for this
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Filesystem or other I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Bytes already delivered to the sink when a transfer failed
    pub fn bytes_transferred(&self) -> Option<u32> {
        match self {
            ProtocolError::TransferFailed {
                bytes_transferred, ..
            } => Some(*bytes_transferred),
            _ => None,
        }
    }

    /// Whether this error came from the link itself rather than the camera
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::LinkUnavailable { .. }
                | ProtocolError::LinkError(_)
                | ProtocolError::DispatchLinkError { .. }
                | ProtocolError::NotConnected
        )
    }
}
