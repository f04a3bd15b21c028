use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use fgen_proto::GeneratorSettings;

use crate::sim::SimulatedResourceManager;
use crate::transport::system::SystemResourceManager;
use crate::transport::ResourceManager;

/// Default discovery filter, every instrument class resource
pub const DEFAULT_FILTER: &str = "?*::INSTR";

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FgenConfig {
    /// Which instrument to talk to and how
    pub instrument: InstrumentConfig,

    /// Parameters applied to the generator before playing
    pub generator: GeneratorSettings,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Resource string of the instrument, the first discovered device otherwise
    pub resource: Option<String>,

    /// Filter used when discovering devices
    pub filter: String,

    /// Where resources come from
    pub backend: Backend,

    /// Baud rate for serial (`ASRL`) resources
    pub baud_rate: u32,

    /// I/O timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            resource: None,
            filter: DEFAULT_FILTER.to_owned(),
            backend: Backend::default(),
            baud_rate: 9_600,
            timeout_ms: 2_000,
        }
    }
}

impl InstrumentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Creates a fresh resource manager for the configured backend
    pub fn resource_manager(&self) -> Box<dyn ResourceManager> {
        match self.backend {
            Backend::System => Box::new(SystemResourceManager::new(self.baud_rate, self.timeout())),
            Backend::Simulated => Box::new(SimulatedResourceManager::default()),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Serial ports, raw sockets and (with `usbtmc`) USB instruments on this machine
    #[default]
    System,

    /// An in-memory instrument, nothing is sent anywhere
    Simulated,
}

/// Reads the configuration at `path`, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<FgenConfig> {
    let Some(path) = path else {
        return Ok(FgenConfig::default());
    };

    if !path.exists() {
        return Err(anyhow::anyhow!(
            "configuration file `{}` does not exist",
            path.display()
        ));
    }

    let config_file = std::fs::read_to_string(path)
        .with_context(|| format!("could not read file `{}`", path.display()))?;

    parse_config(&config_file)
        .with_context(|| format!("could not parse file `{}`", path.display()))
}

pub fn parse_config(text: &str) -> Result<FgenConfig> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.generator, GeneratorSettings::default());
        assert_eq!(config.instrument.filter, DEFAULT_FILTER);
        assert_eq!(config.instrument.backend, Backend::System);
        assert_eq!(config.instrument.resource, None);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = parse_config(
            r#"
            [instrument]
            resource = "USB0::2391::9479::MY52102525::0::INSTR"
            backend = "simulated"

            [generator]
            amplitude_vpp = 3.5
            verify_readback = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config.instrument.resource.as_deref(),
            Some("USB0::2391::9479::MY52102525::0::INSTR")
        );
        assert_eq!(config.instrument.backend, Backend::Simulated);
        assert_eq!(config.instrument.baud_rate, 9_600);
        assert_eq!(config.generator.amplitude_vpp, 3.5);
        assert!(!config.generator.verify_readback);
        assert_eq!(config.generator.idle_frequency_hz, 1);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(parse_config("[instrument]\nbackend = \"gpib\"").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/fgen.toml"))).is_err());
    }
}
