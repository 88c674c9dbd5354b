//! Serial port handling
//!
//! Provides the [`Transport`] implementation backed by the `serialport` crate.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ProtocolError, SerialLink, Transport, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

/// Cameras usually hang off a USB-TTL adapter or a board UART, so order:
///  - ttyUSB* (numeric)
///  - ttyACM* (numeric)
///  - on-board UARTs: serial*, ttyAMA*, ttyS* (numeric)
///  - everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = |prefix: &str| {
        basename
            .strip_prefix(prefix)
            .map(|rest| rest.parse::<usize>().unwrap_or(usize::MAX))
    };
    if let Some(num) = numbered("ttyUSB") {
        return (0, num, basename.to_string());
    }
    if let Some(num) = numbered("ttyACM") {
        return (1, num, basename.to_string());
    }
    for prefix in ["serial", "ttyAMA", "ttyS"] {
        if let Some(num) = numbered(prefix) {
            return (2, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List candidate serial ports with deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // The enumeration API misses some adapters on Linux
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyAMA") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port at `baud_rate`, 8N1, no flow control
pub fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(20))
        .open()
        .map_err(|e| ProtocolError::LinkUnavailable {
            baud_rate,
            reason: e.to_string(),
        })
}

/// Time the UART needs to shift `len` bytes out at `baud_rate`, 10 bits per byte
pub fn transmit_time(len: usize, baud_rate: u32) -> Duration {
    let baud = if baud_rate == 0 {
        warn!("transmit_time: baud rate is 0, assuming {}", DEFAULT_BAUD_RATE);
        DEFAULT_BAUD_RATE
    } else {
        baud_rate
    };
    let bits = (len as u64) * 10;
    Duration::from_micros(bits * 1_000_000 / baud as u64)
}

/// Serial port wrapper implementing [`SerialLink`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    baud_rate: u32,
}

impl SerialChannel {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>, baud_rate: u32) -> Self {
        Self { port, baud_rate }
    }
}

fn to_io(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl SerialLink for SerialChannel {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout).map_err(to_io)?;
        match self.port.read(buf) {
            Ok(0) => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            other => other,
        }
    }

    /// `flush()` maps to tcdrain which can block indefinitely on some
    /// USB adapters, so wait out the transmit time instead.
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(to_io)?;
        self.port.write_all(data)?;
        let wait = transmit_time(data.len(), self.baud_rate).min(timeout);
        std::thread::sleep(wait);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(to_io)
    }
}

/// [`Transport`] over a named system serial port
#[derive(Debug, Clone)]
pub struct SerialTransport {
    port_name: String,
}

impl SerialTransport {
    /// Transport for the port at `port_name`, e.g. `/dev/ttyUSB0` or `COM3`
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, baud_rate: u32) -> Result<Box<dyn SerialLink>, ProtocolError> {
        let mut port = open_port(&self.port_name, baud_rate)?;
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            debug!("open: failed to clear buffers on {}: {}", self.port_name, e);
        }
        debug!("open: {} at {} baud", self.port_name, baud_rate);
        Ok(Box::new(SerialChannel::new(port, baud_rate)))
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyS0",
            "/dev/ttyACM0",
            "/dev/ttyUSB1",
            "/dev/someport",
            "/dev/ttyAMA0",
            "/dev/ttyUSB10",
            "/dev/ttyUSB0",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyAMA0",
                "/dev/ttyS0",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_transmit_time() {
        // 10 bytes at 9600 baud = 100 bits / 9600 ≈ 10.4ms
        assert_eq!(transmit_time(10, 9600), Duration::from_micros(10416));
        assert!(transmit_time(10, 0) > Duration::ZERO);
    }

    #[test]
    fn test_missing_port_is_unavailable() {
        let mut transport = SerialTransport::new("/dev/camlink-does-not-exist");
        match transport.open(38400) {
            Err(ProtocolError::LinkUnavailable { baud_rate, .. }) => assert_eq!(baud_rate, 38400),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
