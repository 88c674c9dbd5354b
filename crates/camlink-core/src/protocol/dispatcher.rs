//! Command dispatch
//!
//! Sends one command at a time and waits for the response that carries the
//! same address and opcode. Frames for other opcodes (stale replies, motion
//! notifications) are dropped while waiting. `&mut self` on every call keeps
//! at most one request outstanding.

use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::frame::{self, ResponseFrame, RESPONSE_MARKER};
use super::{Command, FrameError, LinkManager, ProtocolError};

/// Bytes requested from the link per read
const READ_CHUNK: usize = 256;

/// Sends commands over a [`LinkManager`] and matches their replies
pub struct Dispatcher {
    link: LinkManager,
    address: u8,
    rx: Vec<u8>,
    discarded_frames: u64,
}

impl Dispatcher {
    /// Dispatch to the camera at `address` over `link`
    pub fn new(link: LinkManager, address: u8) -> Self {
        Self {
            link,
            address,
            rx: Vec::new(),
            discarded_frames: 0,
        }
    }

    /// Camera address commands are sent to
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The underlying link
    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Mutable access to the underlying link
    pub fn link_mut(&mut self) -> &mut LinkManager {
        &mut self.link
    }

    /// Open the link at `speed` for a single attempt. The link is closed when
    /// the returned guard drops unless [`ScopedLink::commit`] is called.
    pub fn open_scoped(&mut self, speed: u32) -> Result<ScopedLink<'_>, ProtocolError> {
        self.link.open(speed)?;
        self.rx.clear();
        Ok(ScopedLink {
            dispatcher: self,
            committed: false,
        })
    }

    /// Frames dropped because they did not answer the outstanding request
    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    /// Send `command` and wait up to `timeout` for its response
    pub fn send(
        &mut self,
        command: Command,
        args: &[u8],
        timeout: Duration,
    ) -> Result<ResponseFrame, ProtocolError> {
        self.send_opcode(command.opcode(), args, timeout)
    }

    /// Same as [`Dispatcher::send`] for a raw opcode byte
    pub fn send_opcode(
        &mut self,
        opcode: u8,
        args: &[u8],
        timeout: Duration,
    ) -> Result<ResponseFrame, ProtocolError> {
        let deadline = Instant::now() + timeout;
        self.transmit(opcode, args, timeout)?;
        let response = self.await_frame(opcode, deadline, timeout)?;
        check_status(response)
    }

    /// Send a command whose acknowledgement is followed by `data_len` raw
    /// bytes and a closing frame, as READ_FBUF does.
    pub fn send_bulk(
        &mut self,
        command: Command,
        args: &[u8],
        data_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        let opcode = command.opcode();
        let deadline = Instant::now() + timeout;
        self.transmit(opcode, args, timeout)?;
        check_status(self.await_frame(opcode, deadline, timeout)?)?;

        self.fill(data_len, opcode, deadline, timeout)?;
        let data: Vec<u8> = self.rx.drain(..data_len).collect();

        check_status(self.await_frame(opcode, deadline, timeout)?)?;
        trace!("dispatch: bulk {:#04x} delivered {} bytes", opcode, data.len());
        Ok(data)
    }

    /// Wait for an unsolicited frame with `command`'s opcode without sending anything
    pub fn wait_for(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<ResponseFrame, ProtocolError> {
        let deadline = Instant::now() + timeout;
        self.await_frame(command.opcode(), deadline, timeout)
    }

    fn transmit(&mut self, opcode: u8, args: &[u8], timeout: Duration) -> Result<(), ProtocolError> {
        let bytes = frame::encode(self.address, opcode, args)?;

        self.rx.clear();
        if let Err(e) = self.link.clear_input() {
            return Err(self.link_failed(e, opcode, timeout));
        }

        debug!("dispatch: send {:#04x} args={:02x?}", opcode, args);
        match self.link.write(&bytes, timeout) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.link_failed(e, opcode, timeout)),
        }
    }

    /// Map a link error for `opcode`. A broken link is closed so the next
    /// command sees `NotConnected` instead of reusing a dead handle.
    fn link_failed(&mut self, e: ProtocolError, opcode: u8, timeout: Duration) -> ProtocolError {
        let e = dispatch_error(e, opcode, timeout);
        if matches!(e, ProtocolError::DispatchLinkError { .. }) {
            warn!("dispatch: closing link after failure: {}", e);
            self.link.close();
            self.rx.clear();
        }
        e
    }

    /// Read until a frame for `opcode` arrives or `deadline` passes
    fn await_frame(
        &mut self,
        opcode: u8,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<ResponseFrame, ProtocolError> {
        loop {
            if let Some(response) = self.take_frame(opcode) {
                return Ok(response);
            }
            self.read_more(opcode, deadline, timeout)?;
        }
    }

    /// Pull decodable frames off the receive buffer until one matches
    fn take_frame(&mut self, opcode: u8) -> Option<ResponseFrame> {
        loop {
            match frame::decode(&self.rx) {
                Ok(response) => {
                    self.rx.drain(..response.encoded_len());
                    if response.matches(self.address, opcode) {
                        return Some(response);
                    }
                    self.discarded_frames += 1;
                    debug!(
                        "dispatch: discarded frame addr={:#04x} opcode={:#04x} while waiting for {:#04x}",
                        response.address, response.opcode, opcode
                    );
                }
                Err(FrameError::Truncated { .. }) => return None,
                Err(e) => {
                    warn!("dispatch: resyncing after {}", e);
                    self.resync();
                }
            }
        }
    }

    /// Drop bytes up to the next response marker
    fn resync(&mut self) {
        let skip = self
            .rx
            .iter()
            .skip(1)
            .position(|&b| b == RESPONSE_MARKER)
            .map(|p| p + 1)
            .unwrap_or(self.rx.len());
        trace!("dispatch: dropping {} garbage bytes", skip);
        self.rx.drain(..skip);
    }

    /// Make sure at least `len` bytes are buffered
    fn fill(
        &mut self,
        len: usize,
        opcode: u8,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        while self.rx.len() < len {
            self.read_more(opcode, deadline, timeout)?;
        }
        Ok(())
    }

    fn read_more(
        &mut self,
        opcode: u8,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProtocolError::DispatchTimeout {
                opcode,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        match self.link.read(READ_CHUNK, remaining) {
            Ok(bytes) => {
                self.rx.extend_from_slice(&bytes);
                Ok(())
            }
            // Loop back; the deadline check above ends the wait
            Err(ProtocolError::Timeout) => Ok(()),
            Err(e) => Err(self.link_failed(e, opcode, timeout)),
        }
    }
}

/// A link opened for one attempt; closes on drop unless committed
pub struct ScopedLink<'a> {
    dispatcher: &'a mut Dispatcher,
    committed: bool,
}

impl ScopedLink<'_> {
    /// Keep the link open after the guard goes away
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for ScopedLink<'_> {
    type Target = Dispatcher;

    fn deref(&self) -> &Dispatcher {
        self.dispatcher
    }
}

impl DerefMut for ScopedLink<'_> {
    fn deref_mut(&mut self) -> &mut Dispatcher {
        self.dispatcher
    }
}

impl Drop for ScopedLink<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.dispatcher.link.close();
        }
    }
}

fn check_status(response: ResponseFrame) -> Result<ResponseFrame, ProtocolError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ProtocolError::DeviceRejected {
            opcode: response.opcode,
            status: response.status,
        })
    }
}

fn dispatch_error(e: ProtocolError, opcode: u8, timeout: Duration) -> ProtocolError {
    match e {
        ProtocolError::Timeout => ProtocolError::DispatchTimeout {
            opcode,
            timeout_ms: timeout.as_millis() as u64,
        },
        ProtocolError::NotConnected => ProtocolError::NotConnected,
        other => ProtocolError::DispatchLinkError {
            opcode,
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{Fault, SimulatedCamera, SimulatorConfig};
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn dispatcher(camera: &SimulatedCamera) -> Dispatcher {
        let mut link = LinkManager::new(Box::new(camera.clone()));
        link.open(38400).unwrap();
        Dispatcher::new(link, 0x00)
    }

    #[test]
    fn test_send_returns_matched_frame() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        let mut d = dispatcher(&camera);
        let response = d.send(Command::GetVersion, &[], TIMEOUT).unwrap();
        assert_eq!(response.opcode, 0x11);
        assert_eq!(String::from_utf8_lossy(&response.payload), "VC0703 1.00");
    }

    #[test]
    fn test_stale_frames_are_discarded() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        camera.inject(Fault::StaleFrameBeforeReply);
        let mut d = dispatcher(&camera);
        let response = d.send(Command::GetVersion, &[], TIMEOUT).unwrap();
        assert_eq!(response.opcode, Command::GetVersion.opcode());
        assert_eq!(d.discarded_frames(), 1);
    }

    #[test]
    fn test_garbage_before_reply_is_skipped() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        camera.inject(Fault::GarbageBeforeReply);
        let mut d = dispatcher(&camera);
        let response = d.send(Command::ColorStatus, &[0x01], TIMEOUT).unwrap();
        assert_eq!(response.opcode, Command::ColorStatus.opcode());
    }

    #[test]
    fn test_rejected_status() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        let mut d = dispatcher(&camera);
        let err = d.send_opcode(0x7F, &[], TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::DeviceRejected { opcode: 0x7F, .. }
        ));
    }

    #[test]
    fn test_silent_camera_times_out_within_bound() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        camera.inject(Fault::Silent);
        let mut d = dispatcher(&camera);
        let timeout = Duration::from_millis(60);
        let started = Instant::now();
        let err = d.send(Command::GetVersion, &[], timeout).unwrap_err();
        assert!(matches!(err, ProtocolError::DispatchTimeout { opcode: 0x11, .. }));
        assert!(started.elapsed() < timeout + Duration::from_millis(50));
    }

    #[test]
    fn test_send_on_closed_link() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        let link = LinkManager::new(Box::new(camera));
        let mut d = Dispatcher::new(link, 0x00);
        assert!(matches!(
            d.send(Command::GetVersion, &[], TIMEOUT),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_scoped_link_closes_unless_committed() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        let mut d = Dispatcher::new(LinkManager::new(Box::new(camera.clone())), 0x00);
        {
            let attempt = d.open_scoped(9600).unwrap();
            assert!(attempt.link().is_open());
            assert_eq!(camera.open_handles(), 1);
        }
        assert_eq!(camera.open_handles(), 0);
        assert!(!d.link().is_open());

        let attempt = d.open_scoped(38400).unwrap();
        attempt.commit();
        assert_eq!(camera.open_handles(), 1);
        assert_eq!(d.link().current_speed(), Some(38400));
    }

    #[test]
    fn test_resync_skips_to_marker() {
        let camera = SimulatedCamera::new(SimulatorConfig::default());
        let mut d = dispatcher(&camera);
        d.rx = vec![0x00, 0xFF, 0x76, 0x00, 0x11];
        d.resync();
        assert_eq!(d.rx, vec![0x76, 0x00, 0x11]);
        d.rx = vec![0x12, 0x34];
        d.resync();
        assert!(d.rx.is_empty());
    }
}
