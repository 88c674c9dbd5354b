//! Frame encoding/decoding
//!
//! Command frame (host to camera):
//! - 1 byte: marker `0x56`
//! - 1 byte: device address
//! - 1 byte: opcode
//! - 1 byte: argument length N
//! - N bytes: arguments
//!
//! Response frame (camera to host):
//! - 1 byte: marker `0x76`
//! - 1 byte: device address (echoed)
//! - 1 byte: opcode (echoed)
//! - 1 byte: status, 0 = success
//! - 1 byte: payload length N
//! - N bytes: payload

use byteorder::{BigEndian, ByteOrder};

use super::{FrameError, MAX_ARGS_LEN};

/// Marker byte opening a command frame
pub const COMMAND_MARKER: u8 = 0x56;

/// Marker byte opening a response frame
pub const RESPONSE_MARKER: u8 = 0x76;

/// Command frame header size (marker, address, opcode, length)
pub const COMMAND_HEADER_LEN: usize = 4;

/// Response frame header size (marker, address, opcode, status, length)
pub const RESPONSE_HEADER_LEN: usize = 5;

/// A host-to-camera command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Camera address, 0 unless reassigned
    pub address: u8,
    /// Command opcode
    pub opcode: u8,
    /// Argument bytes, at most 255
    pub args: Vec<u8>,
}

impl CommandFrame {
    /// Build a frame; length is checked when it is encoded
    pub fn new(address: u8, opcode: u8, args: Vec<u8>) -> Self {
        Self {
            address,
            opcode,
            args,
        }
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.address, self.opcode, &self.args)
    }

    /// Decode a command frame; used by the simulated camera
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < COMMAND_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: COMMAND_HEADER_LEN,
                available: data.len(),
            });
        }
        if data[0] != COMMAND_MARKER {
            return Err(FrameError::MalformedFrame(format!(
                "expected command marker {:#04x}, got {:#04x}",
                COMMAND_MARKER, data[0]
            )));
        }
        let len = data[3] as usize;
        let total = COMMAND_HEADER_LEN + len;
        if data.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: data.len(),
            });
        }
        Ok(Self {
            address: data[1],
            opcode: data[2],
            args: data[COMMAND_HEADER_LEN..total].to_vec(),
        })
    }

    /// Get the total encoded size
    pub fn encoded_len(&self) -> usize {
        COMMAND_HEADER_LEN + self.args.len()
    }
}

/// A camera-to-host response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Address of the answering camera
    pub address: u8,
    /// Echo of the command opcode
    pub opcode: u8,
    /// 0 on success
    pub status: u8,
    /// Reply data
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    /// Build a reply frame
    pub fn new(address: u8, opcode: u8, status: u8, payload: Vec<u8>) -> Self {
        Self {
            address,
            opcode,
            status,
            payload,
        }
    }

    /// Decode the frame at the start of `data`.
    ///
    /// Bytes after the frame are ignored; use [`ResponseFrame::encoded_len`]
    /// to learn how many were consumed.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if let Some(&marker) = data.first() {
            if marker != RESPONSE_MARKER {
                return Err(FrameError::MalformedFrame(format!(
                    "expected response marker {:#04x}, got {:#04x}",
                    RESPONSE_MARKER, marker
                )));
            }
        }
        if data.len() < RESPONSE_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: RESPONSE_HEADER_LEN,
                available: data.len(),
            });
        }

        let len = data[4] as usize;
        let total = RESPONSE_HEADER_LEN + len;
        if data.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: data.len(),
            });
        }

        Ok(Self {
            address: data[1],
            opcode: data[2],
            status: data[3],
            payload: data[RESPONSE_HEADER_LEN..total].to_vec(),
        })
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_ARGS_LEN {
            return Err(FrameError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_ARGS_LEN,
            });
        }
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.push(RESPONSE_MARKER);
        bytes.push(self.address);
        bytes.push(self.opcode);
        bytes.push(self.status);
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Get the total encoded size
    pub fn encoded_len(&self) -> usize {
        RESPONSE_HEADER_LEN + self.payload.len()
    }

    /// Whether the camera accepted the command
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Whether this frame answers a request with the given address and opcode
    pub fn matches(&self, address: u8, opcode: u8) -> bool {
        self.address == address && self.opcode == opcode
    }

    /// Payload interpreted as a big-endian u16
    pub fn payload_u16(&self) -> Option<u16> {
        (self.payload.len() >= 2).then(|| BigEndian::read_u16(&self.payload[..2]))
    }

    /// Payload interpreted as a big-endian u32
    pub fn payload_u32(&self) -> Option<u32> {
        (self.payload.len() >= 4).then(|| BigEndian::read_u32(&self.payload[..4]))
    }
}

/// Encode a command: marker, address, opcode, length, args
pub fn encode(address: u8, opcode: u8, args: &[u8]) -> Result<Vec<u8>, FrameError> {
    if args.len() > MAX_ARGS_LEN {
        return Err(FrameError::FrameTooLarge {
            size: args.len(),
            max: MAX_ARGS_LEN,
        });
    }
    let mut bytes = Vec::with_capacity(COMMAND_HEADER_LEN + args.len());
    bytes.push(COMMAND_MARKER);
    bytes.push(address);
    bytes.push(opcode);
    bytes.push(args.len() as u8);
    bytes.extend_from_slice(args);
    Ok(bytes)
}

/// Decode the response frame at the start of `data`
pub fn decode(data: &[u8]) -> Result<ResponseFrame, FrameError> {
    ResponseFrame::from_bytes(data)
}

/// Builder for command arguments
pub struct ArgsBuilder {
    args: Vec<u8>,
}

impl ArgsBuilder {
    /// Start with no arguments
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.args.push(b);
        self
    }

    /// Add a 16-bit value (big-endian)
    pub fn u16_be(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.args.extend_from_slice(&bytes);
        self
    }

    /// Add a 32-bit value (big-endian)
    pub fn u32_be(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.args.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.args.extend_from_slice(data);
        self
    }

    /// Finish and return the argument bytes
    pub fn build(self) -> Vec<u8> {
        self.args
    }
}

impl Default for ArgsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
