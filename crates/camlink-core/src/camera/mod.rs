//! Camera facade
//!
//! [`Camera`] ties the protocol layers together: it owns the dispatcher (and
//! through it the serial link), finds the camera's speed, reads and writes
//! settings and runs captures.

pub mod capture;
pub mod config;
pub mod motion;
pub mod settings;

pub use capture::{
    CaptureReport, CaptureSequencer, CaptureSession, CaptureState, ImageSink, TransferOptions,
    WriterSink,
};
pub use config::CameraConfig;
pub use motion::MotionCache;
pub use settings::{BaudRate, ColorMode, Downsize, ImageSize, Setting, SettingKind};

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::protocol::{
    negotiate, Command, Dispatcher, FrameAction, LinkCounters, LinkManager, Probe, ProtocolError,
    ResponseFrame, SerialTransport, Transport,
};

/// A VC0706-class camera on a serial link
pub struct Camera {
    dispatcher: Dispatcher,
    config: CameraConfig,
    motion: MotionCache,
}

impl Camera {
    /// Create a camera over any transport. Nothing is opened until [`Camera::connect`].
    pub fn new(transport: Box<dyn Transport>, config: CameraConfig) -> Self {
        let link = LinkManager::new(transport);
        let motion = MotionCache::new(config.motion_cache_ttl());
        Self {
            dispatcher: Dispatcher::new(link, config.address),
            config,
            motion,
        }
    }

    /// Create a camera on the serial port named in `config`
    pub fn open(config: CameraConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        if config.port_name.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "no serial port configured".to_string(),
            ));
        }
        let transport = SerialTransport::new(config.port_name.clone());
        Ok(Self::new(Box::new(transport), config))
    }

    /// Active configuration
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Direct access to the command layer
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Whether a link is open
    pub fn is_connected(&self) -> bool {
        self.dispatcher.link().is_open()
    }

    /// Speed of the open link
    pub fn baud_rate(&self) -> Option<u32> {
        self.dispatcher.link().current_speed()
    }

    /// Traffic counters of the link
    pub fn counters(&self) -> LinkCounters {
        self.dispatcher.link().counters()
    }

    /// Find the camera's speed among the configured candidates and leave the link open there
    pub fn connect(&mut self) -> Result<u32, ProtocolError> {
        let probe = Probe {
            timeout: self.config.probe_timeout(),
            ..Probe::default()
        };
        info!(
            "Connecting to camera on {} (candidates {:?})",
            self.dispatcher.link().port_name(),
            self.config.candidate_baud_rates
        );
        let speed = negotiate(&mut self.dispatcher, &self.config.candidate_baud_rates, &probe)?;
        self.motion.invalidate();
        Ok(speed)
    }

    /// Startup sequence: find the camera, apply the configured image size,
    /// find it again and move it to the target speed.
    ///
    /// Returns the speed the link ends up at.
    pub fn initialize(&mut self) -> Result<u32, ProtocolError> {
        self.config.validate()?;
        let target = self.config.target_speed()?;

        self.connect()?;
        self.set_image_size(self.config.image_size)?;
        self.connect()?;

        // Sent even when already at the target, which also commits the
        // speed register on the camera.
        self.set_port_speed(target)?;
        let speed = self.baud_rate().ok_or(ProtocolError::NotConnected)?;
        info!("Camera initialized at {} baud", speed);
        Ok(speed)
    }

    /// Close the link. Safe to call when already closed.
    pub fn disconnect(&mut self) {
        self.dispatcher.link_mut().close();
        self.motion.invalidate();
    }

    fn timeout_for(&self, command: Command) -> Duration {
        self.config
            .command_timeout()
            .max(Duration::from_millis(command.timeout_ms()))
    }

    fn send(&mut self, command: Command, args: &[u8]) -> Result<ResponseFrame, ProtocolError> {
        let timeout = self.timeout_for(command);
        self.dispatcher.send(command, args, timeout)
    }

    /// Read a setting back from the camera
    pub fn get(&mut self, kind: SettingKind) -> Result<Setting, ProtocolError> {
        if kind == SettingKind::MotionDetect {
            if let Some(enabled) = self.motion.get() {
                return Ok(Setting::MotionDetect(enabled));
            }
        }

        let (command, args) = kind.query().ok_or_else(|| {
            ProtocolError::Unsupported(format!("{:?} cannot be read back", kind))
        })?;
        let response = self.send(command, &args)?;
        let setting = kind.decode(&response)?;

        if let Setting::MotionDetect(enabled) = setting {
            self.motion.store(enabled);
        }
        debug!("get {:?} -> {:?}", kind, setting);
        Ok(setting)
    }

    /// Apply a setting. A port speed change reopens the link at the new speed.
    pub fn set(&mut self, setting: Setting) -> Result<(), ProtocolError> {
        let (command, args) = setting.to_command();
        self.send(command, &args)?;
        debug!("set {:?}", setting);

        match setting {
            Setting::PortSpeed(speed) => {
                let bps = speed.bits_per_second();
                // The camera already switched; follow it
                self.dispatcher.open_scoped(bps)?.commit();
                std::thread::sleep(self.config.settle_delay());
                info!("Link moved to {} baud", bps);
            }
            Setting::MotionDetect(enabled) => self.motion.store(enabled),
            _ => {}
        }
        Ok(())
    }

    /// Current capture resolution
    pub fn image_size(&mut self) -> Result<ImageSize, ProtocolError> {
        match self.get(SettingKind::ImageSize)? {
            Setting::ImageSize(size) => Ok(size),
            other => Err(mismatch(other)),
        }
    }

    /// Change the capture resolution
    pub fn set_image_size(&mut self, size: ImageSize) -> Result<(), ProtocolError> {
        self.set(Setting::ImageSize(size))
    }

    /// Current JPEG compression ratio
    pub fn compression(&mut self) -> Result<u8, ProtocolError> {
        match self.get(SettingKind::Compression)? {
            Setting::Compression(ratio) => Ok(ratio),
            other => Err(mismatch(other)),
        }
    }

    /// Change the compression ratio
    pub fn set_compression(&mut self, ratio: u8) -> Result<(), ProtocolError> {
        self.set(Setting::Compression(ratio))
    }

    /// Current color mode
    pub fn color_mode(&mut self) -> Result<ColorMode, ProtocolError> {
        match self.get(SettingKind::ColorMode)? {
            Setting::ColorMode(mode) => Ok(mode),
            other => Err(mismatch(other)),
        }
    }

    /// Change the color mode
    pub fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), ProtocolError> {
        self.set(Setting::ColorMode(mode))
    }

    /// Current downscaling
    pub fn downsize(&mut self) -> Result<Downsize, ProtocolError> {
        match self.get(SettingKind::Downsize)? {
            Setting::Downsize(scale) => Ok(scale),
            other => Err(mismatch(other)),
        }
    }

    /// Change the downscaling
    pub fn set_downsize(&mut self, scale: Downsize) -> Result<(), ProtocolError> {
        self.set(Setting::Downsize(scale))
    }

    /// Speed stored in the camera's port register
    pub fn port_speed(&mut self) -> Result<BaudRate, ProtocolError> {
        match self.get(SettingKind::PortSpeed)? {
            Setting::PortSpeed(speed) => Ok(speed),
            other => Err(mismatch(other)),
        }
    }

    /// Switch the camera and the link to `speed`
    pub fn set_port_speed(&mut self, speed: BaudRate) -> Result<(), ProtocolError> {
        self.set(Setting::PortSpeed(speed))
    }

    /// Composite video output. Write-only on this camera.
    pub fn set_tv_output(&mut self, enabled: bool) -> Result<(), ProtocolError> {
        self.set(Setting::TvOutput(enabled))
    }

    /// Whether comm-motion reporting is on; served from cache within the configured TTL
    pub fn motion_detect_enabled(&mut self) -> Result<bool, ProtocolError> {
        match self.get(SettingKind::MotionDetect)? {
            Setting::MotionDetect(enabled) => Ok(enabled),
            other => Err(mismatch(other)),
        }
    }

    /// Turn comm-motion reporting on or off
    pub fn set_motion_detect(&mut self, enabled: bool) -> Result<(), ProtocolError> {
        self.set(Setting::MotionDetect(enabled))
    }

    /// Wait for the camera's unsolicited motion notification.
    ///
    /// Returns `false` if none arrives within `timeout`. Motion reporting must
    /// be enabled first.
    pub fn wait_for_motion(&mut self, timeout: Duration) -> Result<bool, ProtocolError> {
        match self.dispatcher.wait_for(Command::MotionDetected, timeout) {
            Ok(_) => {
                info!("Motion detected");
                Ok(true)
            }
            Err(ProtocolError::DispatchTimeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Firmware version string
    pub fn version(&mut self) -> Result<String, ProtocolError> {
        let response = self.send(Command::GetVersion, &[])?;
        let version = String::from_utf8_lossy(&response.payload)
            .trim_matches(char::from(0))
            .trim()
            .to_string();
        Ok(version)
    }

    /// Reboot the camera and find it again.
    ///
    /// Returns the speed it answers at afterwards.
    pub fn system_reset(&mut self) -> Result<u32, ProtocolError> {
        self.send(Command::SystemReset, &[])?;
        warn!("Camera reset, waiting {:?} before reconnecting", self.config.settle_delay());
        std::thread::sleep(self.config.settle_delay());
        self.disconnect();
        self.connect()
    }

    /// Freeze, step or resume the frame buffer
    pub fn frame_control(&mut self, action: FrameAction) -> Result<(), ProtocolError> {
        self.send(Command::FrameControl, &[action as u8])?;
        Ok(())
    }

    /// Release a frozen frame and return to live video
    pub fn resume_video(&mut self) -> Result<(), ProtocolError> {
        self.frame_control(FrameAction::Resume)
    }

    /// Capture one image into `sink`
    pub fn capture<S: ImageSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<CaptureReport, ProtocolError> {
        let options = TransferOptions::from(&self.config);
        CaptureSequencer::new(&mut self.dispatcher, options).run(sink)
    }

    /// Capture one image into a file at `path`.
    ///
    /// The file keeps whatever arrived if the transfer fails part way. A
    /// failed flush is reported as a failed transfer with a sink error.
    pub fn capture_to_file<P: AsRef<Path>>(
        &mut self,
        path: P,
    ) -> Result<CaptureReport, ProtocolError> {
        let file = File::create(path.as_ref())?;
        let mut sink = WriterSink::new(BufWriter::new(file));
        let report = self.capture(&mut sink)?;
        info!("Saved {} bytes to {}", report.bytes, path.as_ref().display());
        Ok(report)
    }
}

fn mismatch(setting: Setting) -> ProtocolError {
    ProtocolError::InvalidResponse(format!("unexpected setting {:?}", setting))
}
