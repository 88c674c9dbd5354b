//! Serial Protocol Communication
//!
//! Implements the VC0706 command/response protocol: framing, link lifecycle,
//! command dispatch with response correlation, and baud rate discovery.

pub mod commands;
mod dispatcher;
mod error;
pub mod frame;
mod link;
pub mod negotiate;
pub mod serial;
mod stream;

pub use commands::{Command, FrameAction, ReadBufferParams, Register};
pub use dispatcher::{Dispatcher, ScopedLink};
pub use error::{FrameError, ProtocolError};
pub use frame::{ArgsBuilder, CommandFrame, ResponseFrame};
pub use link::{LinkCounters, LinkManager, LinkState};
pub use negotiate::{negotiate, Probe, SUPPORTED_BAUD_RATES};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use stream::{SerialLink, Transport};

/// Speed the camera ships with
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Default device address ("serial number" byte)
pub const DEFAULT_ADDRESS: u8 = 0x00;

/// Default timeout for command responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Default timeout for a baud rate probe in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 200;

/// Maximum argument/payload length; the length field is one byte
pub const MAX_ARGS_LEN: usize = u8::MAX as usize;

/// Largest frame buffer chunk requested in one READ_FBUF
pub const MAX_CHUNK_SIZE: u32 = 8192;
