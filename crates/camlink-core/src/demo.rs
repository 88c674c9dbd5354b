//! Demo Mode - Simulated camera for testing
//!
//! [`SimulatedCamera`] is a [`Transport`] that behaves like a VC0706 module on
//! the other end of the wire: it only answers at its configured baud rate,
//! keeps its own registers, freezes a synthetic JPEG on request and serves it
//! through READ_FBUF. Faults can be injected to exercise the error paths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::trace;

use crate::camera::settings::{BaudRate, ColorMode, ImageSize};
use crate::protocol::frame::{CommandFrame, ResponseFrame, COMMAND_HEADER_LEN, COMMAND_MARKER};
use crate::protocol::{Command, ProtocolError, Register, SerialLink, Transport};

/// VC0706 status codes
const STATUS_OK: u8 = 0x00;
const STATUS_UNSUPPORTED: u8 = 0x01;
const STATUS_BAD_FORMAT: u8 = 0x03;
const STATUS_NOT_NOW: u8 = 0x04;

/// Simulator settings
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Device address the camera answers to
    pub address: u8,
    /// Speed the camera is listening at
    pub baud_rate: u32,
    /// Size of the image produced by a freeze
    pub image_len: usize,
    /// Seed for the synthetic image body
    pub seed: u64,
    /// Most bytes handed out per read, to exercise partial reads
    pub max_read: usize,
    /// Firmware version string
    pub version: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            address: 0x00,
            baud_rate: 38400,
            image_len: 1000,
            seed: 0x0706,
            max_read: 7,
            version: "VC0703 1.00".to_string(),
        }
    }
}

/// Injectable misbehaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never answer anything
    Silent,
    /// Refuse to open the port at any speed
    RefuseOpen,
    /// Send a frame for another opcode before the next reply
    StaleFrameBeforeReply,
    /// Send line noise before the next reply
    GarbageBeforeReply,
    /// Reject the nth READ_FBUF request (0-based)
    RejectChunk(usize),
    /// Break the link while serving the nth READ_FBUF request (0-based)
    DropLinkOnChunk(usize),
}

#[derive(Debug)]
struct DeviceState {
    config: SimulatorConfig,
    faults: Vec<Fault>,
    open_handles: usize,
    open_history: Vec<u32>,
    image_size: u8,
    compression: u8,
    color_mode: u8,
    motion_enabled: bool,
    tv_output: bool,
    downsize: u8,
    frozen: bool,
    image: Vec<u8>,
    chunk_requests: Vec<(u32, u32)>,
    resume_count: usize,
    pending_motion: usize,
    commands: Vec<CommandFrame>,
}

impl DeviceState {
    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(i) => {
                self.faults.remove(i);
                true
            }
            None => false,
        }
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }
}

/// Shared handle to the simulated device; clones see the same device
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedCamera {
    /// Camera in its power-on state
    pub fn new(config: SimulatorConfig) -> Self {
        let image = synthetic_jpeg(config.image_len, config.seed);
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                config,
                faults: Vec::new(),
                open_handles: 0,
                open_history: Vec::new(),
                image_size: ImageSize::Res640x480.code(),
                compression: 0x36,
                color_mode: ColorMode::Automatic.code(),
                motion_enabled: false,
                tv_output: false,
                downsize: 0x00,
                frozen: false,
                image,
                chunk_requests: Vec::new(),
                resume_count: 0,
                pending_motion: 0,
                commands: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a fault; it stays until cleared
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Queue an unsolicited motion notification (sent only if enabled)
    pub fn trigger_motion(&self) {
        self.lock().pending_motion += 1;
    }

    /// Links currently open against this device
    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    /// Speeds of every successful open, in order
    pub fn open_history(&self) -> Vec<u32> {
        self.lock().open_history.clone()
    }

    /// Speed the camera is listening at
    pub fn baud_rate(&self) -> u32 {
        self.lock().config.baud_rate
    }

    /// (offset, length) of every READ_FBUF served or rejected
    pub fn chunk_requests(&self) -> Vec<(u32, u32)> {
        self.lock().chunk_requests.clone()
    }

    /// Number of times the frame buffer was released
    pub fn resume_count(&self) -> usize {
        self.lock().resume_count
    }

    /// Whether the frame buffer is frozen
    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    /// Image a freeze produces
    pub fn image(&self) -> Vec<u8> {
        self.lock().image.clone()
    }

    /// Raw image size register
    pub fn image_size_code(&self) -> u8 {
        self.lock().image_size
    }

    /// Whether composite output is on
    pub fn tv_output(&self) -> bool {
        self.lock().tv_output
    }

    /// Every command frame received at the right speed
    pub fn commands(&self) -> Vec<CommandFrame> {
        self.lock().commands.clone()
    }
}

impl Transport for SimulatedCamera {
    fn open(&mut self, baud_rate: u32) -> Result<Box<dyn SerialLink>, ProtocolError> {
        let mut state = self.lock();
        if state.has_fault(Fault::RefuseOpen) {
            return Err(ProtocolError::LinkUnavailable {
                baud_rate,
                reason: "simulated port refused".to_string(),
            });
        }
        state.open_handles += 1;
        state.open_history.push(baud_rate);
        let max_read = state.config.max_read.max(1);
        drop(state);

        Ok(Box::new(SimLink {
            device: self.clone(),
            baud_rate,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            max_read,
            broken: false,
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

struct SimLink {
    device: SimulatedCamera,
    baud_rate: u32,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    max_read: usize,
    broken: bool,
}

impl SimLink {
    /// Handle every complete command in the inbox
    fn process(&mut self) {
        loop {
            match self.inbox.iter().position(|&b| b == COMMAND_MARKER) {
                Some(0) => {}
                Some(i) => {
                    self.inbox.drain(..i);
                }
                None => {
                    self.inbox.clear();
                    return;
                }
            }
            if self.inbox.len() < COMMAND_HEADER_LEN {
                return;
            }
            let Ok(command) = CommandFrame::from_bytes(&self.inbox) else {
                return;
            };
            self.inbox.drain(..command.encoded_len());
            self.respond(command);
        }
    }

    fn respond(&mut self, command: CommandFrame) {
        let device = self.device.clone();
        let mut state = device.lock();
        if state.config.address != command.address || state.has_fault(Fault::Silent) {
            return;
        }
        state.commands.push(command.clone());
        trace!("sim: command {:#04x} args={:02x?}", command.opcode, command.args);

        if state.take_fault(Fault::GarbageBeforeReply) {
            self.outbox.extend([0xFF, 0x00, 0x42]);
        }
        if state.take_fault(Fault::StaleFrameBeforeReply) {
            let stale = ResponseFrame::new(state.config.address, 0x36, STATUS_OK, vec![]);
            self.push_frame(&stale);
        }

        let address = state.config.address;
        let opcode = command.opcode;
        let reply = |status: u8, payload: Vec<u8>| ResponseFrame::new(address, opcode, status, payload);

        let args = command.args.as_slice();
        let response = match Command::from_opcode(opcode) {
            Some(Command::GetVersion) => reply(STATUS_OK, state.config.version.clone().into_bytes()),
            Some(Command::SetPortSpeed) => match args {
                [0x01, hi, lo] => match BaudRate::from_code(u16::from_be_bytes([*hi, *lo])) {
                    Some(speed) => {
                        // Takes effect after the acknowledgement is on the wire
                        self.push_frame(&reply(STATUS_OK, vec![]));
                        state.config.baud_rate = speed.bits_per_second();
                        return;
                    }
                    None => reply(STATUS_BAD_FORMAT, vec![]),
                },
                _ => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::SystemReset) => {
                state.frozen = false;
                state.motion_enabled = false;
                reply(STATUS_OK, vec![])
            }
            Some(Command::ReadData) => match read_register(&state, args) {
                Some(value) => reply(STATUS_OK, value),
                None => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::WriteData) => {
                if write_register(&mut state, args) {
                    reply(STATUS_OK, vec![])
                } else {
                    reply(STATUS_BAD_FORMAT, vec![])
                }
            }
            Some(Command::GetBufferLength) => {
                let len = if state.frozen { state.image.len() as u32 } else { 0 };
                reply(STATUS_OK, len.to_be_bytes().to_vec())
            }
            Some(Command::ReadBuffer) => {
                self.serve_chunk(&mut state, args, reply);
                return;
            }
            Some(Command::FrameControl) => match args.first() {
                Some(0x00) => {
                    state.frozen = true;
                    reply(STATUS_OK, vec![])
                }
                Some(0x03) => {
                    state.frozen = false;
                    state.resume_count += 1;
                    reply(STATUS_OK, vec![])
                }
                Some(0x01) | Some(0x02) => reply(STATUS_OK, vec![]),
                _ => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::MotionDetectControl) => match args.first() {
                Some(&flag) if flag <= 1 => {
                    state.motion_enabled = flag == 1;
                    reply(STATUS_OK, vec![])
                }
                _ => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::MotionDetectStatus) => {
                reply(STATUS_OK, vec![state.motion_enabled as u8])
            }
            Some(Command::ColorControl) => match args {
                [0x01, mode] if ColorMode::from_code(*mode).is_some() => {
                    state.color_mode = *mode;
                    reply(STATUS_OK, vec![])
                }
                _ => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::ColorStatus) => reply(STATUS_OK, vec![0x01, state.color_mode]),
            Some(Command::TvOutputControl) => match args.first() {
                Some(&flag) if flag <= 1 => {
                    state.tv_output = flag == 1;
                    reply(STATUS_OK, vec![])
                }
                _ => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::DownsizeControl) => match args.first() {
                Some(&value) => {
                    state.downsize = value;
                    reply(STATUS_OK, vec![])
                }
                None => reply(STATUS_BAD_FORMAT, vec![]),
            },
            Some(Command::DownsizeStatus) => reply(STATUS_OK, vec![state.downsize]),
            Some(Command::MotionDetected) | None => reply(STATUS_UNSUPPORTED, vec![]),
        };
        self.push_frame(&response);
    }

    fn serve_chunk(
        &mut self,
        state: &mut DeviceState,
        args: &[u8],
        reply: impl Fn(u8, Vec<u8>) -> ResponseFrame,
    ) {
        if args.len() != 12 {
            self.push_frame(&reply(STATUS_BAD_FORMAT, vec![]));
            return;
        }
        let offset = u32::from_be_bytes([args[2], args[3], args[4], args[5]]);
        let length = u32::from_be_bytes([args[6], args[7], args[8], args[9]]);
        let index = state.chunk_requests.len();
        state.chunk_requests.push((offset, length));

        if state.take_fault(Fault::DropLinkOnChunk(index)) {
            self.broken = true;
            return;
        }
        if !state.frozen || state.take_fault(Fault::RejectChunk(index)) {
            self.push_frame(&reply(STATUS_NOT_NOW, vec![]));
            return;
        }

        let ack = reply(STATUS_OK, vec![]);
        self.push_frame(&ack);
        let start = (offset as usize).min(state.image.len());
        let end = (offset as usize + length as usize).min(state.image.len());
        self.outbox.extend(&state.image[start..end]);
        // Past the end the camera pads with zeros
        self.outbox
            .extend(std::iter::repeat(0u8).take(length as usize - (end - start)));
        self.push_frame(&ack);
    }

    fn push_frame(&mut self, frame: &ResponseFrame) {
        if let Ok(bytes) = frame.to_bytes() {
            self.outbox.extend(bytes);
        }
    }

    fn deliver_motion(&mut self) {
        let device = self.device.clone();
        let mut state = device.lock();
        if state.pending_motion == 0 {
            return;
        }
        if state.motion_enabled {
            let address = state.config.address;
            state.pending_motion -= 1;
            drop(state);
            let frame = ResponseFrame::new(address, Command::MotionDetected.opcode(), 0, vec![]);
            self.push_frame(&frame);
        }
    }
}

impl SerialLink for SimLink {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated link dropped"));
        }
        self.deliver_motion();
        if self.outbox.is_empty() {
            std::thread::sleep(timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.outbox.len()).min(self.max_read);
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8], _timeout: Duration) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated link dropped"));
        }
        // At the wrong speed the camera only sees noise
        if self.baud_rate != self.device.baud_rate() {
            return Ok(());
        }
        self.inbox.extend_from_slice(data);
        self.process();
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.outbox.clear();
        Ok(())
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        let mut state = self.device.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}

fn read_register(state: &DeviceState, args: &[u8]) -> Option<Vec<u8>> {
    let [memory, width, hi, lo] = args else {
        return None;
    };
    let address = u16::from_be_bytes([*hi, *lo]);
    let register = Register {
        memory: *memory,
        address,
        width: *width,
    };
    if register == Register::IMAGE_SIZE {
        Some(vec![state.image_size])
    } else if register == Register::COMPRESSION {
        Some(vec![state.compression])
    } else if register == Register::PORT_SPEED {
        let code = BaudRate::from_bits_per_second(state.config.baud_rate)?.code();
        Some(code.to_be_bytes().to_vec())
    } else {
        None
    }
}

fn write_register(state: &mut DeviceState, args: &[u8]) -> bool {
    if args.len() != 5 {
        return false;
    }
    let register = Register {
        memory: args[0],
        address: u16::from_be_bytes([args[2], args[3]]),
        width: args[1],
    };
    let value = args[4];
    if register == Register::IMAGE_SIZE && ImageSize::from_code(value).is_some() {
        state.image_size = value;
        true
    } else if register == Register::COMPRESSION {
        state.compression = value;
        true
    } else {
        false
    }
}

/// JPEG-shaped bytes: SOI/APP0 header, random body, EOI trailer
pub fn synthetic_jpeg(len: usize, seed: u64) -> Vec<u8> {
    const HEADER: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const TRAILER: [u8; 2] = [0xFF, 0xD9];

    let mut rng = StdRng::seed_from_u64(seed);
    let mut image: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    if len >= HEADER.len() + TRAILER.len() {
        image[..HEADER.len()].copy_from_slice(&HEADER);
        image[len - TRAILER.len()..].copy_from_slice(&TRAILER);
    }
    image
}
