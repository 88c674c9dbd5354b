use camlink_core::protocol::frame::{self, CommandFrame, ResponseFrame};
use camlink_core::protocol::{
    Command, Dispatcher, FrameError, LinkManager, ProtocolError, SerialLink, Transport,
};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Mock port that answers every write with the next scripted reply
#[derive(Clone, Default)]
struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    unplugged: Arc<Mutex<bool>>,
}

impl ScriptedTransport {
    fn with_replies(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Self::default()
        }
    }

    fn unplug(&self) {
        *self.unplugged.lock().unwrap() = true;
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

struct ScriptedLink {
    transport: ScriptedTransport,
    pending: VecDeque<u8>,
}

impl Transport for ScriptedTransport {
    fn open(&mut self, _baud_rate: u32) -> Result<Box<dyn SerialLink>, ProtocolError> {
        Ok(Box::new(ScriptedLink {
            transport: self.clone(),
            pending: VecDeque::new(),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl SerialLink for ScriptedLink {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            std::thread::sleep(timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8], _timeout: Duration) -> io::Result<()> {
        if *self.transport.unplugged.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.transport.written.lock().unwrap().extend_from_slice(data);
        if let Some(reply) = self.transport.replies.lock().unwrap().pop_front() {
            self.pending.extend(reply);
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn dispatcher(transport: &ScriptedTransport) -> Dispatcher {
    let mut link = LinkManager::new(Box::new(transport.clone()));
    link.open(38400).unwrap();
    Dispatcher::new(link, 0x00)
}

fn response(opcode: u8, status: u8, payload: &[u8]) -> Vec<u8> {
    ResponseFrame::new(0x00, opcode, status, payload.to_vec())
        .to_bytes()
        .unwrap()
}

#[test]
fn test_command_encoding_on_the_wire() {
    let transport = ScriptedTransport::with_replies(vec![response(0x11, 0, b"VC0703 1.00")]);
    let mut d = dispatcher(&transport);
    d.send(Command::GetVersion, &[], Duration::from_millis(100))
        .unwrap();
    assert_eq!(transport.written(), vec![0x56, 0x00, 0x11, 0x00]);
}

#[test]
fn test_command_frame_roundtrip() {
    for command in Command::ALL {
        let args: Vec<u8> = (0..command.opcode()).collect();
        let bytes = frame::encode(0x07, command.opcode(), &args).unwrap();
        let decoded = CommandFrame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, CommandFrame::new(0x07, command.opcode(), args));
    }
}

#[test]
fn test_response_decoding() {
    let bytes = response(0x34, 0, &[0x00, 0x00, 0x03, 0xE8]);
    let decoded = frame::decode(&bytes).unwrap();
    assert_eq!(decoded.payload_u32(), Some(1000));
    assert!(decoded.is_success());

    assert!(matches!(
        frame::decode(&bytes[..6]),
        Err(FrameError::Truncated { .. })
    ));
    assert!(matches!(
        frame::decode(&[0x56, 0x00, 0x34, 0x00, 0x00]),
        Err(FrameError::MalformedFrame(_))
    ));
}

#[test]
fn test_oversized_args_rejected() {
    let args = vec![0u8; 256];
    assert!(matches!(
        frame::encode(0x00, 0x31, &args),
        Err(FrameError::FrameTooLarge { size: 256, .. })
    ));
}

#[test]
fn test_mismatched_opcode_is_discarded() {
    // A stale FBUF_CTRL reply arrives ahead of the GET_VERSION answer
    let mut reply = response(0x36, 0, &[]);
    reply.extend(response(0x11, 0, b"VC0703 1.00"));
    let transport = ScriptedTransport::with_replies(vec![reply]);
    let mut d = dispatcher(&transport);

    let answer = d
        .send(Command::GetVersion, &[], Duration::from_millis(100))
        .unwrap();
    assert_eq!(answer.opcode, 0x11);
    assert_eq!(d.discarded_frames(), 1);
}

#[test]
fn test_reply_from_other_address_is_discarded() {
    // Right opcode, but sent by a camera at address 0x05
    let mut reply = ResponseFrame::new(0x05, 0x11, 0, b"VC0703 9.99".to_vec())
        .to_bytes()
        .unwrap();
    reply.extend(response(0x11, 0, b"VC0703 1.00"));
    let transport = ScriptedTransport::with_replies(vec![reply]);
    let mut d = dispatcher(&transport);

    let answer = d
        .send(Command::GetVersion, &[], Duration::from_millis(100))
        .unwrap();
    assert_eq!(answer.address, 0x00);
    assert_eq!(answer.payload, b"VC0703 1.00".to_vec());
    assert_eq!(d.discarded_frames(), 1);
}

#[test]
fn test_only_other_address_times_out() {
    let reply = ResponseFrame::new(0x05, 0x11, 0, b"VC0703 9.99".to_vec())
        .to_bytes()
        .unwrap();
    let transport = ScriptedTransport::with_replies(vec![reply]);
    let mut d = dispatcher(&transport);
    let err = d
        .send(Command::GetVersion, &[], Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DispatchTimeout { opcode: 0x11, .. }));
}

#[test]
fn test_broken_link_is_closed() {
    let transport = ScriptedTransport::default();
    let mut d = dispatcher(&transport);
    transport.unplug();

    let err = d
        .send(Command::GetVersion, &[], Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DispatchLinkError { opcode: 0x11, .. }));
    assert!(!d.link().is_open());
    assert!(matches!(
        d.send(Command::GetVersion, &[], Duration::from_millis(50)),
        Err(ProtocolError::NotConnected)
    ));
}

#[test]
fn test_only_mismatched_frames_times_out() {
    let transport = ScriptedTransport::with_replies(vec![response(0x36, 0, &[])]);
    let mut d = dispatcher(&transport);
    let err = d
        .send(Command::GetVersion, &[], Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DispatchTimeout { opcode: 0x11, .. }));
}

#[test]
fn test_device_rejection() {
    let transport = ScriptedTransport::with_replies(vec![response(0x31, 0x03, &[])]);
    let mut d = dispatcher(&transport);
    let err = d
        .send(Command::WriteData, &[0x04, 0x01, 0x00, 0x19, 0x00], Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::DeviceRejected {
            opcode: 0x31,
            status: 0x03
        }
    ));
}

#[test]
fn test_timeout_is_bounded() {
    let transport = ScriptedTransport::default();
    let mut d = dispatcher(&transport);
    for timeout_ms in [10u64, 40, 80] {
        let timeout = Duration::from_millis(timeout_ms);
        let started = Instant::now();
        assert!(d.send(Command::GetVersion, &[], timeout).is_err());
        assert!(started.elapsed() < timeout + Duration::from_millis(50));
    }
}

#[test]
fn test_bulk_read_splits_data_and_frames() {
    let mut reply = response(0x32, 0, &[]);
    reply.extend([0xFF, 0xD8, 0x01, 0x02]);
    reply.extend(response(0x32, 0, &[]));
    let transport = ScriptedTransport::with_replies(vec![reply]);
    let mut d = dispatcher(&transport);

    let data = d
        .send_bulk(Command::ReadBuffer, &[0; 12], 4, Duration::from_millis(100))
        .unwrap();
    assert_eq!(data, vec![0xFF, 0xD8, 0x01, 0x02]);
}

#[test]
fn test_link_counters() {
    let transport = ScriptedTransport::with_replies(vec![response(0x11, 0, b"VC0703 1.00")]);
    let mut d = dispatcher(&transport);
    d.send(Command::GetVersion, &[], Duration::from_millis(100))
        .unwrap();

    let counters = d.link().counters();
    assert_eq!(counters.tx_bytes, 4);
    assert_eq!(counters.tx_frames, 1);
    assert_eq!(counters.rx_bytes, 5 + 11);
    assert_eq!(counters.opens, 1);
}
