use std::thread;
use std::time::Duration;

use fgen_proto::{GeneratorSettings, ScpiCommand};
use log::{info, warn};

use crate::connection::InstrumentConnection;
use crate::error::GeneratorError;

/// How [`FunctionGenerator::play_tone`] ends a tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneOptions {
    /// Turn the output off once the duration has elapsed
    pub stop_after: bool,

    /// Block for the duration of the tone. When false the call returns with
    /// the output still on and the caller owns stopping it later.
    pub wait_for_duration: bool,

    /// Stop by parking the frequency instead of toggling the output relay
    pub soft_stop: bool,
}

impl Default for ToneOptions {
    fn default() -> Self {
        Self {
            stop_after: true,
            wait_for_duration: true,
            soft_stop: true,
        }
    }
}

impl ToneOptions {
    /// Leaves the output on after the tone so the next one follows without a gap
    pub fn legato() -> Self {
        Self {
            stop_after: false,
            ..Self::default()
        }
    }
}

/// Tracks and drives the output of a function generator.
///
/// All state is what this controller last commanded; it is only checked
/// against the instrument once, when the controller is created.
pub struct FunctionGenerator<'a> {
    connection: &'a mut InstrumentConnection,
    idle_frequency_hz: u32,

    frequency_hz: u32,
    amplitude_vpp: f64,
    offset_volts: f64,
    pulse_width_seconds: f64,
    output_enabled: bool,
    relay_engaged: bool,
}

impl<'a> FunctionGenerator<'a> {
    /// Takes over the instrument behind `connection`.
    ///
    /// The output relay is switched off before anything else is touched, then
    /// amplitude, pulse width, offset and the initial frequency are applied and
    /// the frequency is read back.
    pub fn new(
        connection: &'a mut InstrumentConnection,
        settings: &GeneratorSettings,
    ) -> Result<Self, GeneratorError> {
        connection.send(ScpiCommand::Output(false))?;

        let mut generator = Self {
            connection,
            idle_frequency_hz: settings.idle_frequency_hz,
            frequency_hz: settings.initial_frequency_hz,
            amplitude_vpp: settings.amplitude_vpp,
            offset_volts: settings.offset_volts,
            pulse_width_seconds: settings.pulse_width_seconds,
            output_enabled: false,
            relay_engaged: false,
        };

        generator.configure_amplitude(settings.amplitude_vpp)?;
        generator.configure_pulse_width(settings.pulse_width_seconds)?;
        generator.configure_offset(settings.offset_volts)?;
        generator.configure_frequency(settings.initial_frequency_hz)?;

        let response = generator.connection.request(ScpiCommand::QueryFrequency)?;
        let committed = response.parse::<f64>().ok();

        match committed {
            Some(hz) if hz.round() == f64::from(settings.initial_frequency_hz) => {
                info!("Instrument frequency set to {} Hz", hz);
            }
            _ if settings.verify_readback => {
                return Err(GeneratorError::FrequencyReadback {
                    expected: settings.initial_frequency_hz,
                    response,
                });
            }
            _ => warn!(
                "Instrument reported frequency `{}` after {} Hz was written",
                response, settings.initial_frequency_hz
            ),
        }

        Ok(generator)
    }

    pub fn configure_frequency(&mut self, hz: u32) -> Result<(), GeneratorError> {
        self.frequency_hz = hz;
        self.connection.send(ScpiCommand::SetFrequency(hz))?;
        Ok(())
    }

    pub fn configure_amplitude(&mut self, vpp: f64) -> Result<(), GeneratorError> {
        self.amplitude_vpp = vpp;
        self.connection.send(ScpiCommand::SetAmplitude(vpp))?;
        Ok(())
    }

    pub fn configure_offset(&mut self, volts: f64) -> Result<(), GeneratorError> {
        self.offset_volts = volts;
        self.connection.send(ScpiCommand::SetOffset(volts))?;
        Ok(())
    }

    pub fn configure_pulse_width(&mut self, seconds: f64) -> Result<(), GeneratorError> {
        self.pulse_width_seconds = seconds;
        self.connection.send(ScpiCommand::SetPulseWidth(seconds))?;
        Ok(())
    }

    /// Plays `freq_hz` for `duration_seconds`.
    ///
    /// If the relay is not engaged yet (a fresh controller, or after
    /// [`stop`](Self::stop)) the output is switched on hard, otherwise softly.
    /// With `wait_for_duration` unset this returns straight away and the
    /// output stays on until the caller stops it.
    pub fn play_tone(
        &mut self,
        freq_hz: u32,
        duration_seconds: f64,
        options: ToneOptions,
    ) -> Result<(), GeneratorError> {
        let duration = Duration::try_from_secs_f64(duration_seconds)
            .map_err(|_| GeneratorError::InvalidDuration(duration_seconds))?;

        self.configure_frequency(freq_hz)?;

        let soft = self.relay_engaged;
        self.set_output(true, soft)?;

        if !options.wait_for_duration {
            return Ok(());
        }

        thread::sleep(duration);

        if options.stop_after {
            self.set_output(false, options.soft_stop)?;
        }

        Ok(())
    }

    /// Plays one tone, then switches the relay off whether or not it played.
    ///
    /// If the tone fails, that error is returned and a failing stop is only
    /// logged.
    pub fn play_once(
        &mut self,
        freq_hz: u32,
        duration_seconds: f64,
        options: ToneOptions,
    ) -> Result<(), GeneratorError> {
        let played = self.play_tone(freq_hz, duration_seconds, options);
        let stopped = self.stop();

        match (played, stopped) {
            (Err(e), Err(stop_error)) => {
                warn!("Could not stop output after failed tone: {}", stop_error);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), stopped) => stopped,
        }
    }

    /// Turns the output on or off.
    ///
    /// The soft path never touches the relay: "off" parks the generator at the
    /// idle frequency and "on" restores the configured one. The hard path
    /// writes `OUTP1 ON` / `OUTP1 OFF`. The tracked state follows the request
    /// whether or not the write succeeds.
    pub fn set_output(&mut self, enable: bool, soft: bool) -> Result<(), GeneratorError> {
        self.output_enabled = enable;

        let command = if soft {
            match enable {
                true => ScpiCommand::SetFrequency(self.frequency_hz),
                false => ScpiCommand::SetFrequency(self.idle_frequency_hz),
            }
        } else {
            self.relay_engaged = enable;
            ScpiCommand::Output(enable)
        };

        self.connection.send(command)?;
        Ok(())
    }

    /// Switches the output relay off
    pub fn stop(&mut self) -> Result<(), GeneratorError> {
        self.set_output(false, false)
    }

    /// Last frequency configured, not the idle frequency of a soft stop
    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn amplitude_vpp(&self) -> f64 {
        self.amplitude_vpp
    }

    pub fn offset_volts(&self) -> f64 {
        self.offset_volts
    }

    pub fn pulse_width_seconds(&self) -> f64 {
        self.pulse_width_seconds
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    /// Whether the last relay command switched the output on
    pub fn relay_engaged(&self) -> bool {
        self.relay_engaged
    }
}
