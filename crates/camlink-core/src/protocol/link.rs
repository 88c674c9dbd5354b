//! Link lifecycle
//!
//! [`LinkManager`] owns the transport and at most one open [`SerialLink`].
//! Reopening always closes the previous link first.

use std::io;
use std::time::Duration;
use tracing::{debug, trace};

use super::{ProtocolError, SerialLink, Transport};

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No handle held
    Closed,
    /// Open at the given speed
    Open(u32),
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read
    pub rx_bytes: u64,
    /// Successful writes
    pub tx_frames: u64,
    /// Successful opens
    pub opens: u64,
}

/// Owner of the camera's transport handle
pub struct LinkManager {
    transport: Box<dyn Transport>,
    link: Option<Box<dyn SerialLink>>,
    state: LinkState,
    counters: LinkCounters,
}

impl LinkManager {
    /// Wrap `transport`; nothing is opened yet
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            link: None,
            state: LinkState::Closed,
            counters: LinkCounters::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Speed of the open link, if any
    pub fn current_speed(&self) -> Option<u32> {
        match self.state {
            LinkState::Open(speed) => Some(speed),
            LinkState::Closed => None,
        }
    }

    /// Whether a handle is held
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Counters since creation
    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    /// Name of the underlying port
    pub fn port_name(&self) -> &str {
        self.transport.name()
    }

    /// Open the link at `speed`, closing any link that is already open
    pub fn open(&mut self, speed: u32) -> Result<(), ProtocolError> {
        self.close();
        let link = self.transport.open(speed)?;
        self.link = Some(link);
        self.state = LinkState::Open(speed);
        self.counters.opens += 1;
        debug!("link: opened {} at {} baud", self.transport.name(), speed);
        Ok(())
    }

    /// Close the link. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            drop(link);
            debug!("link: closed {}", self.transport.name());
        }
        self.state = LinkState::Closed;
    }

    /// Read at most `max_bytes`, waiting at most `timeout`
    pub fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut buf = vec![0u8; max_bytes.max(1)];
        match link.read(&mut buf, timeout) {
            Ok(n) => {
                buf.truncate(n);
                self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(n as u64);
                trace!("link: read {} bytes: {:02x?}", n, buf);
                Ok(buf)
            }
            Err(e) => Err(map_io(e)),
        }
    }

    /// Write all of `bytes`, waiting at most `timeout`
    pub fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), ProtocolError> {
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        trace!("link: write {} bytes: {:02x?}", bytes.len(), bytes);
        link.write_all(bytes, timeout).map_err(map_io)?;
        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(bytes.len() as u64);
        self.counters.tx_frames = self.counters.tx_frames.saturating_add(1);
        Ok(())
    }

    /// Drop stale receive data before a new exchange
    pub fn clear_input(&mut self) -> Result<(), ProtocolError> {
        let link = self.link.as_mut().ok_or(ProtocolError::NotConnected)?;
        link.clear_input().map_err(map_io)
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_io(e: io::Error) -> ProtocolError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProtocolError::Timeout,
        _ => ProtocolError::LinkError(e.to_string()),
    }
}
