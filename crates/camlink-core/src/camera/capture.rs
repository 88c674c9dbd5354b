//! Still image capture
//!
//! A capture freezes the current frame into the camera's buffer, asks how
//! long the JPEG is, pulls it out in READ_FBUF chunks and finally releases the
//! buffer so live video resumes. The release runs whether or not the transfer
//! succeeded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::config::CameraConfig;
use crate::protocol::serial::transmit_time;
use crate::protocol::{
    Command, Dispatcher, FrameAction, ProtocolError, ReadBufferParams, DEFAULT_TIMEOUT_MS,
    MAX_CHUNK_SIZE,
};

/// Frame buffer selector for GET_FBUF_LEN: the current (frozen) frame
const CURRENT_FRAME: u8 = 0x00;

/// Destination for image bytes
pub trait ImageSink {
    /// Append one transferred chunk
    fn append(&mut self, chunk: &[u8]) -> Result<(), ProtocolError>;

    /// Called once after the last chunk, and after a failed transfer.
    /// Buffered sinks flush here.
    fn finish(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

impl ImageSink for Vec<u8> {
    fn append(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// [`ImageSink`] over any [`Write`], e.g. a file
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> WriterSink<W> {
    /// Wrap `writer`
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Bytes handed to the writer so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Give back the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ImageSink for WriterSink<W> {
    fn append(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        self.writer
            .write_all(chunk)
            .map_err(|e| ProtocolError::SinkError(e.to_string()))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ProtocolError> {
        self.writer
            .flush()
            .map_err(|e| ProtocolError::SinkError(e.to_string()))
    }
}

/// Where a capture is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    /// Not started
    Idle,
    /// Frame frozen in the camera's buffer
    Armed,
    /// Reading chunks
    Transferring,
    /// Every byte delivered and the frame released
    Complete,
    /// Stopped early; see the returned error
    Failed,
}

/// Progress of one capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureSession {
    /// Lifecycle state
    pub state: CaptureState,
    /// Image length reported by the camera, 0 until known
    pub total_bytes_expected: u32,
    /// Bytes handed to the sink
    pub bytes_transferred: u32,
    /// Largest chunk requested
    pub chunk_size: u32,
    /// Chunks delivered to the sink
    pub chunks: u32,
}

impl CaptureSession {
    fn new(chunk_size: u32) -> Self {
        Self {
            state: CaptureState::Idle,
            total_bytes_expected: 0,
            bytes_transferred: 0,
            chunk_size,
            chunks: 0,
        }
    }

    /// Bytes still to read
    pub fn remaining(&self) -> u32 {
        self.total_bytes_expected.saturating_sub(self.bytes_transferred)
    }

    /// Size of the next chunk request
    fn next_chunk(&self) -> u32 {
        self.remaining().min(self.chunk_size)
    }
}

/// Summary of a finished capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    /// Image length
    pub bytes: u32,
    /// READ_FBUF requests made
    pub chunks: u32,
    /// Time from freeze to resume
    pub elapsed: Duration,
    /// Wall clock time the transfer finished
    pub completed_at: DateTime<Utc>,
}

/// Chunking and timing for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Largest chunk requested per READ_FBUF
    pub chunk_size: u32,
    /// Camera-side delay before each chunk, in units of 0.01ms
    pub chunk_delay: u16,
    /// Base response timeout; chunk reads add the time the data needs on the wire
    pub timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            chunk_delay: 0x000A,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl From<&CameraConfig> for TransferOptions {
    fn from(config: &CameraConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_delay: config.chunk_delay,
            timeout: config.command_timeout(),
        }
    }
}

impl TransferOptions {
    /// Defaults with a different chunk size
    pub fn with_chunk_size(chunk_size: u32) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    fn command_timeout(&self, command: Command) -> Duration {
        self.timeout
            .max(Duration::from_millis(command.timeout_ms()))
    }

    /// Timeout for one chunk: headers plus data on the wire plus the camera's delay
    fn chunk_timeout(&self, length: u32, baud_rate: u32) -> Duration {
        let on_wire = transmit_time(length as usize + 10, baud_rate);
        let delay = Duration::from_micros(self.chunk_delay as u64 * 10);
        self.command_timeout(Command::ReadBuffer) + on_wire + delay
    }
}

/// Drives one capture over a dispatcher
pub struct CaptureSequencer<'a> {
    dispatcher: &'a mut Dispatcher,
    options: TransferOptions,
    session: CaptureSession,
}

impl<'a> CaptureSequencer<'a> {
    /// Sequencer for one capture over `dispatcher`
    pub fn new(dispatcher: &'a mut Dispatcher, options: TransferOptions) -> Self {
        let chunk_size = options.chunk_size.clamp(1, MAX_CHUNK_SIZE);
        Self {
            dispatcher,
            options,
            session: CaptureSession::new(chunk_size),
        }
    }

    /// Progress so far
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Capture one image into `sink`.
    ///
    /// Chunks already appended stay in the sink when the transfer fails; the
    /// error carries how many bytes made it.
    pub fn run<S: ImageSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<CaptureReport, ProtocolError> {
        let started = Instant::now();
        info!(
            "capture: starting, chunk size {} bytes",
            self.session.chunk_size
        );

        let result = self.arm().and_then(|()| self.transfer(sink));
        let released = self.release();

        match result {
            Ok(()) => {
                if let Err(e) = released {
                    warn!("capture: image transferred but buffer release failed: {}", e);
                }
                self.session.state = CaptureState::Complete;
                let report = CaptureReport {
                    bytes: self.session.bytes_transferred,
                    chunks: self.session.chunks,
                    elapsed: started.elapsed(),
                    completed_at: Utc::now(),
                };
                info!(
                    "capture: complete, {} bytes in {} chunks ({:?})",
                    report.bytes, report.chunks, report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(release_error) = released {
                    debug!("capture: buffer release after failure: {}", release_error);
                }
                if matches!(e, ProtocolError::TransferFailed { .. }) {
                    if let Err(finish_error) = sink.finish() {
                        debug!("capture: sink finish after failure: {}", finish_error);
                    }
                    // Leave no half-read frame or dead handle behind
                    self.dispatcher.link_mut().close();
                }
                self.session.state = CaptureState::Failed;
                warn!("capture: failed: {}", e);
                Err(e)
            }
        }
    }

    /// Freeze the frame and learn its length
    fn arm(&mut self) -> Result<(), ProtocolError> {
        let timeout = self.options.command_timeout(Command::FrameControl);
        self.dispatcher.send(
            Command::FrameControl,
            &[FrameAction::StopCurrent as u8],
            timeout,
        )?;
        self.session.state = CaptureState::Armed;
        debug!("capture: frame frozen");

        let timeout = self.options.command_timeout(Command::GetBufferLength);
        let response = match self
            .dispatcher
            .send(Command::GetBufferLength, &[CURRENT_FRAME], timeout)
        {
            Ok(response) => response,
            Err(ProtocolError::DeviceRejected { .. }) => {
                return Err(ProtocolError::NoImageAvailable)
            }
            Err(e) => return Err(e),
        };
        let total = response.payload_u32().ok_or_else(|| {
            ProtocolError::InvalidResponse(format!(
                "buffer length payload {:02x?}",
                response.payload
            ))
        })?;
        if total == 0 {
            return Err(ProtocolError::NoImageAvailable);
        }

        self.session.total_bytes_expected = total;
        self.session.state = CaptureState::Transferring;
        debug!("capture: {} bytes in frame buffer", total);
        Ok(())
    }

    fn transfer<S: ImageSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), ProtocolError> {
        let baud_rate = self.dispatcher.link().current_speed().unwrap_or(0);

        while self.session.remaining() > 0 {
            let length = self.session.next_chunk();
            let params = ReadBufferParams {
                delay: self.options.chunk_delay,
                ..ReadBufferParams::new(self.session.bytes_transferred, length)
            };
            let timeout = self.options.chunk_timeout(length, baud_rate);

            let chunk = self
                .dispatcher
                .send_bulk(
                    Command::ReadBuffer,
                    &params.to_args(),
                    length as usize,
                    timeout,
                )
                .map_err(|e| self.failed(e))?;

            sink.append(&chunk)
                .map_err(|e| self.failed(sink_error(e)))?;

            self.session.bytes_transferred += length;
            self.session.chunks += 1;
            debug!(
                "capture: chunk {} at offset {} ({} bytes), {}/{}",
                self.session.chunks,
                params.offset,
                length,
                self.session.bytes_transferred,
                self.session.total_bytes_expected
            );
        }
        sink.finish().map_err(|e| self.failed(sink_error(e)))
    }

    /// Resume live video
    fn release(&mut self) -> Result<(), ProtocolError> {
        if !self.dispatcher.link().is_open() {
            return Err(ProtocolError::NotConnected);
        }
        let timeout = self.options.command_timeout(Command::FrameControl);
        self.dispatcher
            .send(
                Command::FrameControl,
                &[FrameAction::Resume as u8],
                timeout,
            )
            .map(|_| debug!("capture: frame buffer released"))
    }

    fn failed(&self, source: ProtocolError) -> ProtocolError {
        ProtocolError::TransferFailed {
            bytes_transferred: self.session.bytes_transferred,
            total_bytes: self.session.total_bytes_expected,
            source: Box::new(source),
        }
    }
}

fn sink_error(e: ProtocolError) -> ProtocolError {
    match e {
        ProtocolError::SinkError(_) => e,
        other => ProtocolError::SinkError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{Fault, SimulatedCamera, SimulatorConfig};
    use crate::protocol::LinkManager;
    use pretty_assertions::assert_eq;

    fn setup(image_len: usize) -> (Dispatcher, SimulatedCamera) {
        let camera = SimulatedCamera::new(SimulatorConfig {
            image_len,
            ..SimulatorConfig::default()
        });
        let mut link = LinkManager::new(Box::new(camera.clone()));
        link.open(38400).unwrap();
        (Dispatcher::new(link, 0x00), camera)
    }

    fn options(chunk_size: u32) -> TransferOptions {
        TransferOptions {
            timeout: Duration::from_millis(100),
            ..TransferOptions::with_chunk_size(chunk_size)
        }
    }

    #[test]
    fn test_chunks_cover_image_exactly() {
        let (mut d, camera) = setup(1000);
        let mut sink = Vec::new();
        let mut capture = CaptureSequencer::new(&mut d, options(256));
        let report = capture.run(&mut sink).unwrap();

        assert_eq!(
            camera.chunk_requests(),
            vec![(0, 256), (256, 256), (512, 256), (768, 232)]
        );
        assert_eq!(report.bytes, 1000);
        assert_eq!(report.chunks, 4);
        assert_eq!(capture.session().bytes_transferred, 1000);
        assert_eq!(capture.session().state, CaptureState::Complete);
        assert_eq!(sink, camera.image());
        assert_eq!(camera.resume_count(), 1);
        assert!(!camera.is_frozen());
    }

    #[test]
    fn test_rejected_chunk_keeps_partial_data() {
        let (mut d, camera) = setup(1000);
        camera.inject(Fault::RejectChunk(2));
        let mut sink = Vec::new();
        let mut capture = CaptureSequencer::new(&mut d, options(256));
        let err = capture.run(&mut sink).unwrap_err();

        assert_eq!(err.bytes_transferred(), Some(512));
        assert!(matches!(
            err,
            ProtocolError::TransferFailed { total_bytes: 1000, .. }
        ));
        assert_eq!(sink, camera.image()[..512].to_vec());
        assert_eq!(capture.session().state, CaptureState::Failed);
        assert_eq!(camera.resume_count(), 1);
        assert!(!d.link().is_open());
        assert_eq!(camera.open_handles(), 0);
    }

    #[test]
    fn test_link_drop_mid_transfer() {
        let (mut d, camera) = setup(300);
        camera.inject(Fault::DropLinkOnChunk(1));
        let mut sink = Vec::new();
        let err = CaptureSequencer::new(&mut d, options(128))
            .run(&mut sink)
            .unwrap_err();

        match err {
            ProtocolError::TransferFailed {
                bytes_transferred,
                source,
                ..
            } => {
                assert_eq!(bytes_transferred, 128);
                assert!(source.is_link_failure());
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(sink.len(), 128);
        assert!(!d.link().is_open());
        assert_eq!(camera.open_handles(), 0);
        assert!(matches!(
            d.send(Command::GetVersion, &[], Duration::from_millis(50)),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_empty_buffer_is_no_image() {
        let (mut d, camera) = setup(0);
        let mut sink = Vec::new();
        let err = CaptureSequencer::new(&mut d, options(32))
            .run(&mut sink)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NoImageAvailable));
        assert!(camera.chunk_requests().is_empty());
        assert_eq!(camera.resume_count(), 1);
        // Nothing was transferred, the link stays usable
        assert!(d.link().is_open());
    }

    struct FullDisk;

    impl ImageSink for FullDisk {
        fn append(&mut self, _chunk: &[u8]) -> Result<(), ProtocolError> {
            Err(ProtocolError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left",
            )))
        }
    }

    #[test]
    fn test_sink_error_surfaces() {
        let (mut d, camera) = setup(100);
        let err = CaptureSequencer::new(&mut d, options(64))
            .run(&mut FullDisk)
            .unwrap_err();
        match err {
            ProtocolError::TransferFailed {
                bytes_transferred: 0,
                source,
                ..
            } => assert!(matches!(*source, ProtocolError::SinkError(_))),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(camera.resume_count(), 1);
    }

    /// Accepts every write but fails to flush, like a full disk behind a buffer
    struct FailingFlush;

    impl Write for FailingFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left",
            ))
        }
    }

    #[test]
    fn test_flush_error_surfaces_as_sink_error() {
        let (mut d, camera) = setup(100);
        let mut sink = WriterSink::new(FailingFlush);
        let err = CaptureSequencer::new(&mut d, options(64))
            .run(&mut sink)
            .unwrap_err();
        match err {
            ProtocolError::TransferFailed {
                bytes_transferred: 100,
                total_bytes: 100,
                source,
            } => assert!(matches!(*source, ProtocolError::SinkError(_))),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(camera.resume_count(), 1);
        assert!(!d.link().is_open());
    }

    #[test]
    fn test_writer_sink_counts_bytes() {
        let mut sink = WriterSink::new(Vec::new());
        sink.append(&[1, 2, 3]).unwrap();
        sink.append(&[4]).unwrap();
        assert_eq!(sink.written(), 4);
        assert_eq!(sink.into_inner(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_chunk_timeout_grows_with_length() {
        let options = TransferOptions::default();
        let small = options.chunk_timeout(32, 9600);
        let large = options.chunk_timeout(4096, 9600);
        assert!(large > small);
        assert!(small >= Duration::from_millis(Command::ReadBuffer.timeout_ms()));
    }
}
