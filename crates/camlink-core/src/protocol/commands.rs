//! Protocol commands
//!
//! Opcodes understood by VC0706-class camera modules.

use serde::{Deserialize, Serialize};

/// Camera command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Firmware version string (0x11)
    GetVersion,

    /// Change the UART speed (0x24)
    SetPortSpeed,

    /// Soft reset; the camera reboots at its stored speed (0x26)
    SystemReset,

    /// Read a configuration register (0x30)
    ReadData,

    /// Write a configuration register (0x31)
    WriteData,

    /// Read bytes from the frame buffer (0x32)
    ReadBuffer,

    /// Length of the captured frame buffer (0x34)
    GetBufferLength,

    /// Frame buffer control: freeze, step, resume (0x36)
    FrameControl,

    /// Enable or disable comm-motion reporting (0x37)
    MotionDetectControl,

    /// Comm-motion reporting state (0x38)
    MotionDetectStatus,

    /// Unsolicited "motion detected" notification (0x39)
    MotionDetected,

    /// Set color mode (0x3C)
    ColorControl,

    /// Current color mode (0x3D)
    ColorStatus,

    /// Enable or disable the composite video output (0x44)
    TvOutputControl,

    /// Set image downscaling (0x54)
    DownsizeControl,

    /// Current image downscaling (0x55)
    DownsizeStatus,
}

impl Command {
    /// Every modelled command
    pub const ALL: [Command; 16] = [
        Command::GetVersion,
        Command::SetPortSpeed,
        Command::SystemReset,
        Command::ReadData,
        Command::WriteData,
        Command::ReadBuffer,
        Command::GetBufferLength,
        Command::FrameControl,
        Command::MotionDetectControl,
        Command::MotionDetectStatus,
        Command::MotionDetected,
        Command::ColorControl,
        Command::ColorStatus,
        Command::TvOutputControl,
        Command::DownsizeControl,
        Command::DownsizeStatus,
    ];

    /// Wire opcode byte
    pub fn opcode(&self) -> u8 {
        match self {
            Command::GetVersion => 0x11,
            Command::SetPortSpeed => 0x24,
            Command::SystemReset => 0x26,
            Command::ReadData => 0x30,
            Command::WriteData => 0x31,
            Command::ReadBuffer => 0x32,
            Command::GetBufferLength => 0x34,
            Command::FrameControl => 0x36,
            Command::MotionDetectControl => 0x37,
            Command::MotionDetectStatus => 0x38,
            Command::MotionDetected => 0x39,
            Command::ColorControl => 0x3C,
            Command::ColorStatus => 0x3D,
            Command::TvOutputControl => 0x44,
            Command::DownsizeControl => 0x54,
            Command::DownsizeStatus => 0x55,
        }
    }

    /// Look up a command by its opcode byte
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.opcode() == opcode)
    }

    /// Get the expected response timeout in milliseconds
    pub fn timeout_ms(&self) -> u64 {
        match self {
            Command::SystemReset => 2000,  // camera reboots before answering
            Command::FrameControl => 1000, // freeze waits for the JPEG encoder
            Command::ReadBuffer => 1000,
            _ => 500,
        }
    }
}

/// Frame buffer control actions carried by [`Command::FrameControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Freeze the current frame into the buffer
    StopCurrent = 0x00,
    /// Freeze the next frame
    StopNext = 0x01,
    /// Step one frame
    Step = 0x02,
    /// Release the buffer and resume live video
    Resume = 0x03,
}

/// Configuration register address used with READ_DATA/WRITE_DATA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    /// Memory type selector (1 = chip register, 4 = I2C EEPROM)
    pub memory: u8,
    /// Register address
    pub address: u16,
    /// Register width in bytes
    pub width: u8,
}

impl Register {
    /// Image resolution, persisted in EEPROM
    pub const IMAGE_SIZE: Register = Register {
        memory: 0x04,
        address: 0x0019,
        width: 1,
    };

    /// JPEG compression ratio, chip register
    pub const COMPRESSION: Register = Register {
        memory: 0x01,
        address: 0x1204,
        width: 1,
    };

    /// UART speed code, persisted in EEPROM
    pub const PORT_SPEED: Register = Register {
        memory: 0x04,
        address: 0x0007,
        width: 2,
    };

    /// READ_DATA arguments for this register
    pub fn read_args(&self) -> Vec<u8> {
        let [hi, lo] = self.address.to_be_bytes();
        vec![self.memory, self.width, hi, lo]
    }

    /// WRITE_DATA arguments for this register followed by `value`
    pub fn write_args(&self, value: &[u8]) -> Vec<u8> {
        let mut args = self.read_args();
        args.extend_from_slice(value);
        args
    }
}

/// Read frame buffer command parameters
#[derive(Debug, Clone, Copy)]
pub struct ReadBufferParams {
    /// Byte offset into the frame buffer
    pub offset: u32,
    /// Number of bytes to read
    pub length: u32,
    /// Camera-side delay before it starts sending, in units of 0.01ms
    pub delay: u16,
}

impl ReadBufferParams {
    /// Read `length` bytes at `offset` with the default camera-side delay
    pub fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            delay: 0x000A,
        }
    }

    /// READ_FBUF arguments: buffer type, transfer mode, offset, length, delay
    pub fn to_args(&self) -> Vec<u8> {
        let mut args = Vec::with_capacity(12);
        args.push(0x00); // current frame
        args.push(0x0A); // MCU transfer mode
        args.extend_from_slice(&self.offset.to_be_bytes());
        args.extend_from_slice(&self.length.to_be_bytes());
        args.extend_from_slice(&self.delay.to_be_bytes());
        args
    }
}
