//! Camera settings
//!
//! Every configurable value is a [`Setting`] variant carrying its typed
//! payload. [`SettingKind`] names a setting without a value and knows how to
//! query it and decode the answer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{Command, ProtocolError, ResponseFrame, Register};

/// JPEG resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    /// 640x480 VGA
    Res640x480,
    /// 320x240 QVGA
    Res320x240,
    /// 160x120 QQVGA
    Res160x120,
}

impl ImageSize {
    /// Register value for this resolution
    pub fn code(&self) -> u8 {
        match self {
            ImageSize::Res640x480 => 0x00,
            ImageSize::Res320x240 => 0x11,
            ImageSize::Res160x120 => 0x22,
        }
    }

    /// Inverse of [`ImageSize::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ImageSize::Res640x480),
            0x11 => Some(ImageSize::Res320x240),
            0x22 => Some(ImageSize::Res160x120),
            _ => None,
        }
    }

    /// (width, height) in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ImageSize::Res640x480 => (640, 480),
            ImageSize::Res320x240 => (320, 240),
            ImageSize::Res160x120 => (160, 120),
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{}x{}", w, h)
    }
}

/// Color output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    /// Camera switches to black and white in low light
    Automatic,
    /// Always color
    Color,
    /// Always black and white
    BlackWhite,
}

impl ColorMode {
    /// Argument byte for COLOR_CTRL
    pub fn code(&self) -> u8 {
        match self {
            ColorMode::Automatic => 0x00,
            ColorMode::Color => 0x01,
            ColorMode::BlackWhite => 0x02,
        }
    }

    /// Decode a COLOR_STATUS reply byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ColorMode::Automatic),
            0x01 => Some(ColorMode::Color),
            0x02 => Some(ColorMode::BlackWhite),
            _ => None,
        }
    }
}

/// Image downscaling applied by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Downsize {
    /// No scaling
    Full,
    /// 1/2 width and height
    Half,
    /// 1/4 width and height
    Quarter,
}

impl Downsize {
    /// Argument byte for DOWNSIZE_CTRL
    pub fn code(&self) -> u8 {
        match self {
            Downsize::Full => 0x00,
            Downsize::Half => 0x11,
            Downsize::Quarter => 0x22,
        }
    }

    /// Decode a DOWNSIZE_STATUS reply byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Downsize::Full),
            0x11 => Some(Downsize::Half),
            0x22 => Some(Downsize::Quarter),
            _ => None,
        }
    }
}

/// UART speeds the camera can be switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaudRate {
    /// 9600 baud
    B9600,
    /// 19200 baud
    B19200,
    /// 38400 baud, the power-on default
    B38400,
    /// 57600 baud
    B57600,
    /// 115200 baud
    B115200,
}

impl BaudRate {
    /// Every supported speed, fastest first
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B115200,
        BaudRate::B57600,
        BaudRate::B38400,
        BaudRate::B19200,
        BaudRate::B9600,
    ];

    /// Speed in bits per second
    pub fn bits_per_second(&self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    /// Divisor code the camera expects in SET_PORT
    pub fn code(&self) -> u16 {
        match self {
            BaudRate::B9600 => 0xAEC8,
            BaudRate::B19200 => 0x56E4,
            BaudRate::B38400 => 0x2AF2,
            BaudRate::B57600 => 0x1C4C,
            BaudRate::B115200 => 0x0DA6,
        }
    }

    /// Inverse of [`BaudRate::code`]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.code() == code)
    }

    /// Map a plain speed like `38400` to a supported rate
    pub fn from_bits_per_second(bps: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.bits_per_second() == bps)
    }
}

/// A setting together with its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Setting {
    /// Capture resolution
    ImageSize(ImageSize),
    /// JPEG compression ratio, higher means smaller files
    Compression(u8),
    /// Color output mode
    ColorMode(ColorMode),
    /// Comm-motion reporting on or off
    MotionDetect(bool),
    /// Composite video output on or off
    TvOutput(bool),
    /// UART speed
    PortSpeed(BaudRate),
    /// Camera-side downscaling
    Downsize(Downsize),
}

/// A setting without a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingKind {
    /// See [`Setting::ImageSize`]
    ImageSize,
    /// See [`Setting::Compression`]
    Compression,
    /// See [`Setting::ColorMode`]
    ColorMode,
    /// See [`Setting::MotionDetect`]
    MotionDetect,
    /// See [`Setting::TvOutput`]
    TvOutput,
    /// See [`Setting::PortSpeed`]
    PortSpeed,
    /// See [`Setting::Downsize`]
    Downsize,
}

impl Setting {
    /// The setting this value belongs to
    pub fn kind(&self) -> SettingKind {
        match self {
            Setting::ImageSize(_) => SettingKind::ImageSize,
            Setting::Compression(_) => SettingKind::Compression,
            Setting::ColorMode(_) => SettingKind::ColorMode,
            Setting::MotionDetect(_) => SettingKind::MotionDetect,
            Setting::TvOutput(_) => SettingKind::TvOutput,
            Setting::PortSpeed(_) => SettingKind::PortSpeed,
            Setting::Downsize(_) => SettingKind::Downsize,
        }
    }

    /// Command and arguments that apply this setting
    pub fn to_command(&self) -> (Command, Vec<u8>) {
        match *self {
            Setting::ImageSize(size) => (
                Command::WriteData,
                Register::IMAGE_SIZE.write_args(&[size.code()]),
            ),
            Setting::Compression(ratio) => {
                (Command::WriteData, Register::COMPRESSION.write_args(&[ratio]))
            }
            Setting::ColorMode(mode) => (Command::ColorControl, vec![0x01, mode.code()]),
            Setting::MotionDetect(on) => (Command::MotionDetectControl, vec![on as u8]),
            Setting::TvOutput(on) => (Command::TvOutputControl, vec![on as u8]),
            Setting::PortSpeed(speed) => {
                let [hi, lo] = speed.code().to_be_bytes();
                (Command::SetPortSpeed, vec![0x01, hi, lo])
            }
            Setting::Downsize(scale) => (Command::DownsizeControl, vec![scale.code()]),
        }
    }
}

impl SettingKind {
    /// Every setting
    pub const ALL: [SettingKind; 7] = [
        SettingKind::ImageSize,
        SettingKind::Compression,
        SettingKind::ColorMode,
        SettingKind::MotionDetect,
        SettingKind::TvOutput,
        SettingKind::PortSpeed,
        SettingKind::Downsize,
    ];

    /// Command and arguments that read this setting back.
    ///
    /// `None` for write-only settings; the camera has no TV output query.
    pub fn query(&self) -> Option<(Command, Vec<u8>)> {
        match self {
            SettingKind::ImageSize => Some((Command::ReadData, Register::IMAGE_SIZE.read_args())),
            SettingKind::Compression => {
                Some((Command::ReadData, Register::COMPRESSION.read_args()))
            }
            SettingKind::ColorMode => Some((Command::ColorStatus, vec![0x01])),
            SettingKind::MotionDetect => Some((Command::MotionDetectStatus, vec![])),
            SettingKind::TvOutput => None,
            SettingKind::PortSpeed => Some((Command::ReadData, Register::PORT_SPEED.read_args())),
            SettingKind::Downsize => Some((Command::DownsizeStatus, vec![])),
        }
    }

    /// Decode the answer to [`SettingKind::query`]
    pub fn decode(&self, response: &ResponseFrame) -> Result<Setting, ProtocolError> {
        let payload = &response.payload;
        let invalid = || {
            ProtocolError::InvalidResponse(format!("{:?} payload {:02x?}", self, payload))
        };
        let first = || payload.first().copied().ok_or_else(invalid);

        match self {
            SettingKind::ImageSize => ImageSize::from_code(first()?)
                .map(Setting::ImageSize)
                .ok_or_else(invalid),
            SettingKind::Compression => Ok(Setting::Compression(first()?)),
            // [control source, show mode]
            SettingKind::ColorMode => payload
                .get(1)
                .copied()
                .and_then(ColorMode::from_code)
                .map(Setting::ColorMode)
                .ok_or_else(invalid),
            SettingKind::MotionDetect => Ok(Setting::MotionDetect(first()? != 0)),
            SettingKind::TvOutput => Err(ProtocolError::Unsupported(
                "TV output state cannot be queried".to_string(),
            )),
            SettingKind::PortSpeed => response
                .payload_u16()
                .and_then(BaudRate::from_code)
                .map(Setting::PortSpeed)
                .ok_or_else(invalid),
            SettingKind::Downsize => Downsize::from_code(first()?)
                .map(Setting::Downsize)
                .ok_or_else(invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(payload: Vec<u8>) -> ResponseFrame {
        ResponseFrame::new(0, 0x30, 0, payload)
    }

    #[test]
    fn test_baud_codes() {
        for speed in BaudRate::ALL {
            assert_eq!(BaudRate::from_code(speed.code()), Some(speed));
            assert_eq!(
                BaudRate::from_bits_per_second(speed.bits_per_second()),
                Some(speed)
            );
        }
        assert_eq!(BaudRate::from_bits_per_second(4800), None);
    }

    #[test]
    fn test_setting_commands() {
        assert_eq!(
            Setting::ImageSize(ImageSize::Res160x120).to_command(),
            (Command::WriteData, vec![0x04, 0x01, 0x00, 0x19, 0x22])
        );
        assert_eq!(
            Setting::PortSpeed(BaudRate::B115200).to_command(),
            (Command::SetPortSpeed, vec![0x01, 0x0D, 0xA6])
        );
        assert_eq!(
            Setting::ColorMode(ColorMode::BlackWhite).to_command(),
            (Command::ColorControl, vec![0x01, 0x02])
        );
        assert_eq!(
            Setting::TvOutput(true).to_command(),
            (Command::TvOutputControl, vec![0x01])
        );
    }

    #[test]
    fn test_kind_matches_setting() {
        let settings = [
            Setting::ImageSize(ImageSize::Res320x240),
            Setting::Compression(0x36),
            Setting::ColorMode(ColorMode::Color),
            Setting::MotionDetect(true),
            Setting::TvOutput(false),
            Setting::PortSpeed(BaudRate::B38400),
            Setting::Downsize(Downsize::Half),
        ];
        let kinds: Vec<SettingKind> = settings.iter().map(Setting::kind).collect();
        assert_eq!(kinds, SettingKind::ALL.to_vec());
    }

    #[test]
    fn test_decode_payloads() {
        assert_eq!(
            SettingKind::ImageSize.decode(&response(vec![0x11])).unwrap(),
            Setting::ImageSize(ImageSize::Res320x240)
        );
        assert_eq!(
            SettingKind::ColorMode.decode(&response(vec![0x01, 0x02])).unwrap(),
            Setting::ColorMode(ColorMode::BlackWhite)
        );
        assert_eq!(
            SettingKind::PortSpeed.decode(&response(vec![0x2A, 0xF2])).unwrap(),
            Setting::PortSpeed(BaudRate::B38400)
        );
        assert_eq!(
            SettingKind::MotionDetect.decode(&response(vec![0x01])).unwrap(),
            Setting::MotionDetect(true)
        );
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(matches!(
            SettingKind::ImageSize.decode(&response(vec![0x33])),
            Err(ProtocolError::InvalidResponse(_))
        ));
        assert!(matches!(
            SettingKind::Compression.decode(&response(vec![])),
            Err(ProtocolError::InvalidResponse(_))
        ));
        assert!(SettingKind::TvOutput.query().is_none());
    }

    #[test]
    fn test_image_size_display() {
        assert_eq!(ImageSize::Res640x480.to_string(), "640x480");
    }
}
