#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Frequency the soft output path parks the generator at while "off"
pub const IDLE_FREQUENCY_HZ: u32 = 1;

/// Frequency committed when a controller is first attached to an instrument
pub const DEFAULT_FREQUENCY_HZ: u32 = 1_000;

/// The subset of SCPI understood by the function generator controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScpiCommand {
    /// `*IDN?`
    Identify,

    /// `SOUR1:FREQ <hz>`
    SetFrequency(u32),

    /// `SOUR1:FREQ?`
    QueryFrequency,

    /// `VOLT <vpp>`
    SetAmplitude(f64),

    /// `VOLT:OFFS <volts>`
    SetOffset(f64),

    /// `FUNC:PULS:WIDT <seconds>`
    SetPulseWidth(f64),

    /// `OUTP1 ON` / `OUTP1 OFF`
    Output(bool),
}

impl fmt::Display for ScpiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScpiCommand::Identify => write!(f, "*IDN?"),
            ScpiCommand::SetFrequency(hz) => write!(f, "SOUR1:FREQ {}", hz),
            ScpiCommand::QueryFrequency => write!(f, "SOUR1:FREQ?"),
            ScpiCommand::SetAmplitude(vpp) => write!(f, "VOLT {}", vpp),
            ScpiCommand::SetOffset(volts) => write!(f, "VOLT:OFFS {}", volts),
            ScpiCommand::SetPulseWidth(seconds) => write!(f, "FUNC:PULS:WIDT {}", seconds),
            ScpiCommand::Output(true) => write!(f, "OUTP1 ON"),
            ScpiCommand::Output(false) => write!(f, "OUTP1 OFF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScpiParseError {
    /// The command header is not part of the supported command set
    UnknownHeader(String),

    /// The header requires an argument but none was given
    MissingArgument(String),

    /// The argument could not be parsed for the given header
    InvalidArgument { header: String, argument: String },
}

impl fmt::Display for ScpiParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScpiParseError::UnknownHeader(header) => {
                write!(f, "unknown command header `{}`", header)
            }
            ScpiParseError::MissingArgument(header) => {
                write!(f, "command `{}` requires an argument", header)
            }
            ScpiParseError::InvalidArgument { header, argument } => {
                write!(f, "invalid argument `{}` for command `{}`", argument, header)
            }
        }
    }
}

impl FromStr for ScpiCommand {
    type Err = ScpiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (header, argument) = match s.split_once(char::is_whitespace) {
            Some((header, argument)) => (header, Some(argument.trim())),
            None => (s, None),
        };

        let header = header.to_ascii_uppercase();

        let invalid = |argument: &str| ScpiParseError::InvalidArgument {
            header: header.clone(),
            argument: argument.to_string(),
        };

        match (header.as_str(), argument) {
            ("*IDN?", None) => Ok(ScpiCommand::Identify),
            ("SOUR1:FREQ?", None) => Ok(ScpiCommand::QueryFrequency),
            ("SOUR1:FREQ", Some(arg)) => arg
                .parse()
                .map(ScpiCommand::SetFrequency)
                .map_err(|_| invalid(arg)),
            ("VOLT", Some(arg)) => arg
                .parse()
                .map(ScpiCommand::SetAmplitude)
                .map_err(|_| invalid(arg)),
            ("VOLT:OFFS", Some(arg)) => arg
                .parse()
                .map(ScpiCommand::SetOffset)
                .map_err(|_| invalid(arg)),
            ("FUNC:PULS:WIDT", Some(arg)) => arg
                .parse()
                .map(ScpiCommand::SetPulseWidth)
                .map_err(|_| invalid(arg)),
            ("OUTP1", Some(arg)) => match arg.to_ascii_uppercase().as_str() {
                "ON" | "1" => Ok(ScpiCommand::Output(true)),
                "OFF" | "0" => Ok(ScpiCommand::Output(false)),
                _ => Err(invalid(arg)),
            },
            ("SOUR1:FREQ" | "VOLT" | "VOLT:OFFS" | "FUNC:PULS:WIDT" | "OUTP1", None) => {
                Err(ScpiParseError::MissingArgument(header.clone()))
            }
            _ => Err(ScpiParseError::UnknownHeader(header.clone())),
        }
    }
}

/// Parameters applied to the generator when a controller attaches to it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeneratorSettings {
    /// Peak to peak amplitude in volts
    pub amplitude_vpp: f64,

    /// DC offset in volts
    pub offset_volts: f64,

    /// Pulse width in seconds
    pub pulse_width_seconds: f64,

    /// Frequency committed (and read back) during construction
    pub initial_frequency_hz: u32,

    /// Frequency used by the soft output path while the output is "off"
    pub idle_frequency_hz: u32,

    /// Fail construction when the frequency read back differs from the one written
    pub verify_readback: bool,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            amplitude_vpp: 2.0,
            offset_volts: 1.0,
            pulse_width_seconds: 8.96984e-4,
            initial_frequency_hz: DEFAULT_FREQUENCY_HZ,
            idle_frequency_hz: IDLE_FREQUENCY_HZ,
            verify_readback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::format;

    #[test]
    fn commands_render_literal_scpi() {
        assert_eq!(format!("{}", ScpiCommand::SetFrequency(440)), "SOUR1:FREQ 440");
        assert_eq!(format!("{}", ScpiCommand::SetAmplitude(2.0)), "VOLT 2");
        assert_eq!(format!("{}", ScpiCommand::SetOffset(-0.5)), "VOLT:OFFS -0.5");
        assert_eq!(
            format!("{}", ScpiCommand::SetPulseWidth(8.96984e-4)),
            "FUNC:PULS:WIDT 0.000896984"
        );
        assert_eq!(format!("{}", ScpiCommand::Output(true)), "OUTP1 ON");
        assert_eq!(format!("{}", ScpiCommand::Output(false)), "OUTP1 OFF");
        assert_eq!(format!("{}", ScpiCommand::QueryFrequency), "SOUR1:FREQ?");
    }

    #[test]
    fn rendered_commands_parse_back() {
        let commands = [
            ScpiCommand::Identify,
            ScpiCommand::SetFrequency(1_000),
            ScpiCommand::QueryFrequency,
            ScpiCommand::SetPulseWidth(8.96984e-4),
            ScpiCommand::Output(false),
        ];

        for command in commands {
            assert_eq!(format!("{}", command).parse::<ScpiCommand>(), Ok(command));
        }
    }

    #[test]
    fn parsing_rejects_unknown_and_incomplete_commands() {
        assert_eq!(
            "SOUR1:FUNC SIN".parse::<ScpiCommand>(),
            Err(ScpiParseError::UnknownHeader("SOUR1:FUNC".into()))
        );
        assert_eq!(
            "VOLT".parse::<ScpiCommand>(),
            Err(ScpiParseError::MissingArgument("VOLT".into()))
        );
        assert!(matches!(
            "SOUR1:FREQ abc".parse::<ScpiCommand>(),
            Err(ScpiParseError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn output_accepts_numeric_booleans() {
        assert_eq!("outp1 1".parse::<ScpiCommand>(), Ok(ScpiCommand::Output(true)));
        assert_eq!("OUTP1 0".parse::<ScpiCommand>(), Ok(ScpiCommand::Output(false)));
    }
}
