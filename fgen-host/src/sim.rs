//! An in-memory function generator for dry runs and tests.
//!
//! The simulated instrument understands the same SCPI vocabulary the
//! controller speaks, keeps the resulting output state, and records every
//! command it receives so a caller can inspect the exact traffic.

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::rc::Rc;

use fgen_proto::ScpiCommand;
use log::debug;

use crate::error::TransportError;
use crate::transport::{matches_filter, ResourceManager, Transport};

/// Response to `*IDN?`
pub const IDENTIFICATION: &str = "Simulated,FG-1000,SIM00001,1.0";

/// Resource the dry run backend exposes by default
pub const DEFAULT_RESOURCE: &str = "USB0::2391::9479::SIM00001::0::INSTR";

/// Failures the simulated instrument can be told to produce
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Resource enumeration fails
    pub fail_list: bool,

    /// Opening a resource fails
    pub fail_open: bool,

    /// `*IDN?` is accepted but never answered
    pub fail_identify: bool,

    /// Every write fails once this many writes have succeeded
    pub fail_writes_after: Option<usize>,

    /// Answer `SOUR1:FREQ?` with this text instead of the committed frequency
    pub frequency_response: Option<String>,

    /// Closing a transport or the manager fails (the handle is still released)
    pub fail_close: bool,
}

#[derive(Debug, Default)]
struct InstrumentState {
    frequency_hz: f64,
    amplitude_vpp: f64,
    offset_volts: f64,
    pulse_width_seconds: f64,
    output_enabled: bool,

    commands: Vec<String>,
    writes: usize,
    open_handles: usize,
    manager_closed: bool,

    faults: Faults,
}

/// Shared view of the simulated instrument's state
#[derive(Debug, Clone, Default)]
pub struct SimulatedInstrument {
    state: Rc<RefCell<InstrumentState>>,
}

impl SimulatedInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command written so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn frequency_hz(&self) -> f64 {
        self.state.borrow().frequency_hz
    }

    pub fn amplitude_vpp(&self) -> f64 {
        self.state.borrow().amplitude_vpp
    }

    pub fn offset_volts(&self) -> f64 {
        self.state.borrow().offset_volts
    }

    pub fn pulse_width_seconds(&self) -> f64 {
        self.state.borrow().pulse_width_seconds
    }

    /// Whether the output relay is engaged
    pub fn output_enabled(&self) -> bool {
        self.state.borrow().output_enabled
    }

    /// Transports opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.state.borrow().open_handles
    }

    pub fn manager_closed(&self) -> bool {
        self.state.borrow().manager_closed
    }

    pub fn faults_mut(&self) -> RefMut<'_, Faults> {
        RefMut::map(self.state.borrow_mut(), |state| &mut state.faults)
    }

    fn apply(&self, command: ScpiCommand) -> Option<String> {
        let mut state = self.state.borrow_mut();

        match command {
            ScpiCommand::Identify => {
                if state.faults.fail_identify {
                    return None;
                }
                return Some(IDENTIFICATION.to_owned());
            }
            ScpiCommand::QueryFrequency => {
                return Some(
                    state
                        .faults
                        .frequency_response
                        .clone()
                        .unwrap_or_else(|| format_scpi_real(state.frequency_hz)),
                );
            }
            ScpiCommand::SetFrequency(hz) => state.frequency_hz = hz as f64,
            ScpiCommand::SetAmplitude(vpp) => state.amplitude_vpp = vpp,
            ScpiCommand::SetOffset(volts) => state.offset_volts = volts,
            ScpiCommand::SetPulseWidth(seconds) => state.pulse_width_seconds = seconds,
            ScpiCommand::Output(enabled) => state.output_enabled = enabled,
        }

        None
    }
}

/// Resource manager exposing simulated instruments under fixed resource names
pub struct SimulatedResourceManager {
    resources: Vec<String>,
    instrument: SimulatedInstrument,
}

impl SimulatedResourceManager {
    pub fn new(resources: Vec<String>) -> Self {
        Self {
            resources,
            instrument: SimulatedInstrument::new(),
        }
    }

    /// A handle onto the instrument every resource of this manager resolves to
    pub fn instrument(&self) -> SimulatedInstrument {
        self.instrument.clone()
    }
}

impl Default for SimulatedResourceManager {
    fn default() -> Self {
        Self::new(vec![DEFAULT_RESOURCE.to_owned()])
    }
}

impl ResourceManager for SimulatedResourceManager {
    fn list_resources(&mut self, filter: &str) -> Result<Vec<String>, TransportError> {
        if self.instrument.faults_mut().fail_list {
            return Err(TransportError::Instrument(
                "VI_ERROR_RSRC_NFOUND: insufficient location information".to_owned(),
            ));
        }

        Ok(self
            .resources
            .iter()
            .filter(|resource| matches_filter(resource, filter))
            .cloned()
            .collect())
    }

    fn open_resource(&mut self, resource: &str) -> Result<Box<dyn Transport>, TransportError> {
        if !self.resources.iter().any(|known| known == resource) {
            return Err(TransportError::ResourceNotFound(resource.to_owned()));
        }

        if self.instrument.faults_mut().fail_open {
            return Err(TransportError::Io(ErrorKind::ConnectionRefused.into()));
        }

        self.instrument.state.borrow_mut().open_handles += 1;

        Ok(Box::new(SimulatedTransport {
            resource: resource.to_owned(),
            instrument: self.instrument.clone(),
            pending: VecDeque::new(),
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.instrument.state.borrow_mut();
        state.manager_closed = true;

        if state.faults.fail_close {
            return Err(TransportError::Instrument("manager close failed".to_owned()));
        }

        Ok(())
    }
}

struct SimulatedTransport {
    resource: String,
    instrument: SimulatedInstrument,
    pending: VecDeque<String>,
    closed: bool,
}

impl Transport for SimulatedTransport {
    fn resource_name(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Io(ErrorKind::NotConnected.into()));
        }

        {
            let mut state = self.instrument.state.borrow_mut();
            state.commands.push(command.to_owned());

            if let Some(limit) = state.faults.fail_writes_after {
                if state.writes >= limit {
                    return Err(TransportError::Io(ErrorKind::BrokenPipe.into()));
                }
            }

            state.writes += 1;
        }

        let command: ScpiCommand = command
            .parse()
            .map_err(|e| TransportError::Instrument(format!("-113,\"Undefined header\" ({})", e)))?;

        debug!("Simulated instrument received {:?}", command);

        if let Some(response) = self.instrument.apply(command) {
            self.pending.push_back(response);
        }

        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        self.pending
            .pop_front()
            .ok_or_else(|| TransportError::Timeout(self.resource.clone()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.instrument.state.borrow_mut().open_handles -= 1;
        }

        if self.instrument.faults_mut().fail_close {
            return Err(TransportError::Instrument("transport close failed".to_owned()));
        }

        Ok(())
    }
}

/// Formats a value the way instruments answer numeric queries, `+4.400000000000000E+02`
pub fn format_scpi_real(value: f64) -> String {
    let formatted = format!("{:.15E}", value.abs());

    let (mantissa, exponent) = formatted.split_once('E').unwrap_or((formatted.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or_default();

    format!(
        "{}{}E{}{:02}",
        if value.is_sign_negative() { '-' } else { '+' },
        mantissa,
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_responses_use_instrument_notation() {
        assert_eq!(format_scpi_real(440.0), "+4.400000000000000E+02");
        assert_eq!(format_scpi_real(1.0), "+1.000000000000000E+00");
        assert_eq!(format_scpi_real(-0.0025), "-2.500000000000000E-03");
    }

    #[test]
    fn transport_tracks_state_and_answers_queries() {
        let mut manager = SimulatedResourceManager::default();
        let instrument = manager.instrument();
        let mut transport = manager.open_resource(DEFAULT_RESOURCE).unwrap();

        transport.write("SOUR1:FREQ 440").unwrap();
        transport.write("OUTP1 ON").unwrap();

        assert_eq!(transport.query("SOUR1:FREQ?").unwrap(), "+4.400000000000000E+02");
        assert_eq!(transport.query("*IDN?").unwrap(), IDENTIFICATION);
        assert!(instrument.output_enabled());
        assert_eq!(instrument.open_handles(), 1);

        transport.close().unwrap();

        assert_eq!(instrument.open_handles(), 0);
        assert!(transport.write("OUTP1 OFF").is_err());
    }

    #[test]
    fn unknown_commands_are_rejected() {
        let mut manager = SimulatedResourceManager::default();
        let mut transport = manager.open_resource(DEFAULT_RESOURCE).unwrap();

        assert!(matches!(
            transport.write("SOUR1:FUNC SIN"),
            Err(TransportError::Instrument(_))
        ));
    }

    #[test]
    fn unknown_resources_cannot_be_opened() {
        let mut manager = SimulatedResourceManager::default();

        assert!(matches!(
            manager.open_resource("USB0::1::2::OTHER::INSTR"),
            Err(TransportError::ResourceNotFound(_))
        ));
    }
}
