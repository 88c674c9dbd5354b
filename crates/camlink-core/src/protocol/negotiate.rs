//! Baud rate discovery
//!
//! The camera powers up at whatever speed was last stored in its EEPROM.
//! The negotiator opens the link at each candidate speed in turn and sends a
//! probe command; the first speed that gets a valid answer wins and its link
//! stays open.

use std::time::Duration;
use tracing::{debug, info};

use super::{Command, Dispatcher, ProtocolError, Register};

/// Speeds the camera supports, fastest first
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [115200, 57600, 38400, 19200, 9600];

/// Command sent at each candidate speed
#[derive(Debug, Clone)]
pub struct Probe {
    /// Command sent at each speed
    pub command: Command,
    /// Its arguments
    pub args: Vec<u8>,
    /// How long to wait for the answer
    pub timeout: Duration,
}

impl Probe {
    /// Probe with an arbitrary command
    pub fn new(command: Command, args: Vec<u8>, timeout: Duration) -> Self {
        Self {
            command,
            args,
            timeout,
        }
    }
}

impl Default for Probe {
    /// Reading the image size register is harmless at any point of a session
    fn default() -> Self {
        Self::new(
            Command::ReadData,
            Register::IMAGE_SIZE.read_args(),
            Duration::from_millis(super::DEFAULT_PROBE_TIMEOUT_MS),
        )
    }
}

/// Try each speed in `candidates` order and return the first that answers.
///
/// Every failed attempt closes its link before the next one opens. Fails with
/// `NegotiationFailed` once all candidates are exhausted, or with the last
/// `LinkUnavailable` error when the port could not be opened at any speed.
pub fn negotiate(
    dispatcher: &mut Dispatcher,
    candidates: &[u32],
    probe: &Probe,
) -> Result<u32, ProtocolError> {
    if candidates.is_empty() {
        return Err(ProtocolError::InvalidArgument(
            "no candidate baud rates".to_string(),
        ));
    }

    let mut tried = Vec::with_capacity(candidates.len());
    let mut opened_any = false;
    let mut last_open_error = None;

    for &speed in candidates {
        tried.push(speed);
        debug!("negotiate: trying {} baud", speed);

        let mut attempt = match dispatcher.open_scoped(speed) {
            Ok(attempt) => attempt,
            Err(e) => {
                debug!("negotiate: cannot open at {} baud: {}", speed, e);
                last_open_error = Some(e);
                continue;
            }
        };
        opened_any = true;

        match attempt.send(probe.command, &probe.args, probe.timeout) {
            Ok(_) => {
                attempt.commit();
                info!("negotiate: camera answered at {} baud", speed);
                return Ok(speed);
            }
            // Dropping the attempt closes the link before the next speed
            Err(e) => debug!("negotiate: no answer at {} baud: {}", speed, e),
        }
    }

    match last_open_error {
        Some(e) if !opened_any => Err(e),
        _ => Err(ProtocolError::NegotiationFailed { tried }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{Fault, SimulatedCamera, SimulatorConfig};
    use crate::protocol::{LinkManager, LinkState};
    use pretty_assertions::assert_eq;

    fn probe() -> Probe {
        Probe {
            timeout: Duration::from_millis(30),
            ..Probe::default()
        }
    }

    fn setup(baud_rate: u32) -> (Dispatcher, SimulatedCamera) {
        let camera = SimulatedCamera::new(SimulatorConfig {
            baud_rate,
            ..SimulatorConfig::default()
        });
        let link = LinkManager::new(Box::new(camera.clone()));
        (Dispatcher::new(link, 0x00), camera)
    }

    #[test]
    fn test_stops_at_first_working_speed() {
        let (mut d, camera) = setup(19200);
        let speed = negotiate(&mut d, &[9600, 19200, 38400], &probe()).unwrap();
        assert_eq!(speed, 19200);
        assert_eq!(camera.open_history(), vec![9600, 19200]);
        assert_eq!(d.link().state(), LinkState::Open(19200));
        assert_eq!(camera.open_handles(), 1);
    }

    #[test]
    fn test_all_speeds_fail() {
        let (mut d, camera) = setup(57600);
        let err = negotiate(&mut d, &[9600, 19200], &probe()).unwrap_err();
        match err {
            ProtocolError::NegotiationFailed { tried } => assert_eq!(tried, vec![9600, 19200]),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(camera.open_handles(), 0);
        assert!(!d.link().is_open());
    }

    #[test]
    fn test_port_missing_reports_unavailable() {
        let (mut d, camera) = setup(38400);
        camera.inject(Fault::RefuseOpen);
        let err = negotiate(&mut d, &[38400, 9600], &probe()).unwrap_err();
        assert!(matches!(err, ProtocolError::LinkUnavailable { .. }));
    }

    #[test]
    fn test_empty_candidates() {
        let (mut d, _camera) = setup(38400);
        assert!(matches!(
            negotiate(&mut d, &[], &probe()),
            Err(ProtocolError::InvalidArgument(_))
        ));
    }
}
