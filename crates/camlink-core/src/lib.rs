//! # CamLink Core Library
//!
//! Host-side driver for VC0706-class serial JPEG cameras.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command/response framing for the camera's serial protocol
//! - Link management and baud rate discovery
//! - Typed access to camera settings (resolution, compression, color, motion detection)
//! - Still image capture with chunked frame buffer transfer
//! - A simulated camera for tests and demos
//!
//! ## Example
//!
//! ```rust,ignore
//! use camlink_core::camera::{Camera, CameraConfig};
//!
//! let mut camera = Camera::open(CameraConfig::with_port("/dev/ttyUSB0"))?;
//! camera.initialize()?;
//! println!("Firmware: {}", camera.version()?);
//!
//! let report = camera.capture_to_file("snapshot.jpg")?;
//! println!("{} bytes", report.bytes);
//! ```

pub mod camera;
pub mod demo;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::camera::{
        BaudRate, Camera, CameraConfig, CaptureReport, ColorMode, Downsize, ImageSink, ImageSize,
        Setting, SettingKind, WriterSink,
    };
    pub use crate::demo::{SimulatedCamera, SimulatorConfig};
    pub use crate::protocol::{
        list_ports, Dispatcher, LinkManager, LinkState, ProtocolError, SerialTransport, Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
