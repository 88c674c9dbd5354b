//! Camera configuration
//!
//! Stored as pretty-printed JSON, by default in `<config dir>/camlink/camera.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::settings::{BaudRate, ImageSize};
use crate::protocol::{
    ProtocolError, DEFAULT_ADDRESS, DEFAULT_BAUD_RATE, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_TIMEOUT_MS, MAX_CHUNK_SIZE, SUPPORTED_BAUD_RATES,
};

/// Connection and capture settings for one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0")
    pub port_name: String,

    /// Device address ("serial number" byte)
    pub address: u8,

    /// Speeds to probe, in order
    pub candidate_baud_rates: Vec<u32>,

    /// Speed to switch to once the camera has been found
    pub target_baud_rate: u32,

    /// Resolution applied by `Camera::initialize`
    pub image_size: ImageSize,

    /// Response timeout for ordinary commands in milliseconds
    pub command_timeout_ms: u64,

    /// Response timeout for each baud rate probe in milliseconds
    pub probe_timeout_ms: u64,

    /// Bytes requested per READ_FBUF
    pub chunk_size: u32,

    /// Camera-side delay before each chunk, in units of 0.01ms
    pub chunk_delay: u16,

    /// Pause after the camera changes speed or resets, in milliseconds
    pub settle_delay_ms: u64,

    /// How long a motion detection status may be served from cache; 0 disables the cache
    pub motion_cache_ttl_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            address: DEFAULT_ADDRESS,
            candidate_baud_rates: SUPPORTED_BAUD_RATES.to_vec(),
            target_baud_rate: DEFAULT_BAUD_RATE,
            image_size: ImageSize::Res640x480,
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            chunk_size: 32,
            chunk_delay: 0x000A,
            settle_delay_ms: 100,
            motion_cache_ttl_ms: 0,
        }
    }
}

impl CameraConfig {
    /// Defaults for the camera on `port_name`
    pub fn with_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Default location of the config file
    pub fn default_path() -> io::Result<PathBuf> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "Could not find config directory")
            })?;
        Ok(base.join("camlink").join("camera.json"))
    }

    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: CameraConfig = serde_json::from_str(&content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }

    /// Check speeds and chunk size before anything is sent
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.candidate_baud_rates.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "candidate_baud_rates is empty".to_string(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidArgument(format!(
                "chunk_size must be 1..={}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        self.target_speed()?;
        Ok(())
    }

    /// Target speed as a camera baud rate
    pub fn target_speed(&self) -> Result<BaudRate, ProtocolError> {
        BaudRate::from_bits_per_second(self.target_baud_rate).ok_or_else(|| {
            ProtocolError::InvalidArgument(format!(
                "camera cannot run at {} baud",
                self.target_baud_rate
            ))
        })
    }

    /// Per-command reply timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Reply timeout for each speed during negotiation
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Pause after a reset or speed change
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// How long a motion status read stays valid
    pub fn motion_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.motion_cache_ttl_ms)
    }
}
