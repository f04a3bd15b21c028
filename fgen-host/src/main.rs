use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

use fgen_host::config::{load_config, Backend, FgenConfig};
use fgen_host::connection::with_connection;
use fgen_host::generator::{FunctionGenerator, ToneOptions};
use fgen_host::melody::{play_melody, Melody};
use fgen_host::midi::{parse_midi_file, preview_midi_file};
use fgen_host::resource::{discover, list_devices, Device};
use fgen_host::transport::ALL_RESOURCES;
use fgen_host::{pause, GeneratorSettings};

/// Play tones and melodies on a bench function generator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct FgenArgs {
    /// Minimum log level to print out
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LevelFilter,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Resource string of the instrument to use
    #[arg(short, long, global = true)]
    pub resource: Option<String>,

    /// Discovery filter used when no resource is given
    #[arg(short, long, global = true)]
    pub filter: Option<String>,

    /// Talk to a simulated instrument instead of real hardware
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Serial port baud rate
    #[arg(short, long, global = true)]
    pub baud_rate: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the instruments that can be reached
    List,

    /// Play a single tone, then switch the output off
    Tone {
        /// Frequency in Hz
        frequency: u32,

        /// Duration in seconds
        duration: f64,

        /// Stop by switching the output relay instead of parking the frequency
        #[arg(long)]
        hard: bool,
    },

    /// Play a melody file
    Play {
        /// Melody file, one `NOTE:SECONDS` or `P:SECONDS` per line
        melody: PathBuf,

        /// Wait for a key press after connecting, before playing
        #[arg(short, long)]
        wait_for_key: bool,
    },

    /// Convert a MIDI file into a melody file
    Convert {
        midi: PathBuf,
        output: PathBuf,

        /// Data track to convert (1-based), the first track with notes otherwise
        #[arg(short, long)]
        track: Option<u16>,
    },

    /// Show the first events of every track in a MIDI file
    Preview { midi: PathBuf },
}

#[repr(usize)]
#[derive(ValueEnum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LevelFilter {
    /// A level lower than all log levels.
    Off,
    /// Corresponds to the `Error` log level.
    Error,
    /// Corresponds to the `Warn` log level.
    Warn,
    /// Corresponds to the `Info` log level.
    Info,
    /// Corresponds to the `Debug` log level.
    Debug,
    /// Corresponds to the `Trace` log level.
    Trace,
}

impl From<LevelFilter> for log::LevelFilter {
    fn from(level: LevelFilter) -> Self {
        match level {
            LevelFilter::Off => log::LevelFilter::Off,
            LevelFilter::Error => log::LevelFilter::Error,
            LevelFilter::Warn => log::LevelFilter::Warn,
            LevelFilter::Info => log::LevelFilter::Info,
            LevelFilter::Debug => log::LevelFilter::Debug,
            LevelFilter::Trace => log::LevelFilter::Trace,
        }
    }
}

fn main() -> Result<()> {
    /* Parse the CLI arguments and the configuration file */

    let args = FgenArgs::parse();

    CombinedLogger::init(vec![TermLogger::new(
        args.log_level.into(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .context("Could not configure the logger")?;

    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&args, &mut config);

    match &args.command {
        Command::List => list(&config),
        Command::Tone {
            frequency,
            duration,
            hard,
        } => tone(&config, *frequency, *duration, *hard),
        Command::Play {
            melody,
            wait_for_key,
        } => play(&config, melody, *wait_for_key),
        Command::Convert {
            midi,
            output,
            track,
        } => convert(midi, output, *track),
        Command::Preview { midi } => preview(midi),
    }
}

fn apply_overrides(args: &FgenArgs, config: &mut FgenConfig) {
    if let Some(resource) = &args.resource {
        config.instrument.resource = Some(resource.clone());
    }

    if let Some(filter) = &args.filter {
        config.instrument.filter = filter.clone();
    }

    if let Some(baud_rate) = args.baud_rate {
        config.instrument.baud_rate = baud_rate;
    }

    if args.dry_run {
        config.instrument.backend = Backend::Simulated;
    }
}

fn list(config: &FgenConfig) -> Result<()> {
    let mut manager = config.instrument.resource_manager();
    let devices = discover(manager.as_mut(), &config.instrument.filter);

    if devices.is_empty() {
        println!("No available devices found.");
        return Ok(());
    }

    println!("Available Devices:");
    for device in devices {
        println!("  {}", device);
        println!("    {}", device.resource());
    }

    Ok(())
}

/// Picks the configured resource, or the first device matching the filter
fn select_device(config: &FgenConfig) -> Result<Device> {
    if let Some(resource) = &config.instrument.resource {
        return Ok(Device::from_resource(resource));
    }

    let filter = &config.instrument.filter;
    info!("Device Filter: \"{}\"", filter);

    let mut manager = config.instrument.resource_manager();
    let resources = list_devices(manager.as_mut(), filter);

    if let Some(resource) = resources.first() {
        return Ok(Device::from_resource(resource));
    }

    warn!("No devices matching the filter...");

    let available = list_devices(manager.as_mut(), ALL_RESOURCES);
    if !available.is_empty() {
        info!("Available devices ({}):", available.len());
        for resource in &available {
            info!("{}", resource);
        }
    }

    bail!("no instrument matches the filter `{}`", filter);
}

fn tone(config: &FgenConfig, frequency: u32, duration: f64, hard: bool) -> Result<()> {
    let device = select_device(config)?;
    let settings: &GeneratorSettings = &config.generator;

    with_connection(device, config.instrument.resource_manager(), |connection| -> Result<()> {
        let mut generator = FunctionGenerator::new(connection, settings)?;

        let options = ToneOptions {
            soft_stop: !hard,
            ..ToneOptions::default()
        };

        info!("Playing tone {}Hz for {}s.", frequency, duration);
        generator.play_once(frequency, duration, options)?;

        Ok(())
    })
}

fn play(config: &FgenConfig, path: &Path, wait_for_key: bool) -> Result<()> {
    let melody = Melody::load(path)?;

    for (line, error) in &melody.errors {
        warn!("{}:{}: {}", path.display(), line, error);
    }

    if melody.entries.is_empty() {
        bail!("melody file `{}` has nothing to play", path.display());
    }

    info!(
        "Loaded {} entries ({:.1}s) from {}",
        melody.entries.len(),
        melody.duration(),
        path.display()
    );

    let device = select_device(config)?;

    with_connection(device, config.instrument.resource_manager(), |connection| -> Result<()> {
        let mut generator = FunctionGenerator::new(connection, &config.generator)?;

        if wait_for_key {
            pause!("Press any key to play the melody...")?;
        }

        play_melody(&melody.entries, &mut generator)?;
        info!("Melody playing complete");

        Ok(())
    })
}

fn convert(midi: &Path, output: &Path, track: Option<u16>) -> Result<()> {
    let midi_file = parse_midi_file(midi)?;

    println!();
    println!("Parsed MIDI file");
    println!("================");
    println!("{}", &midi_file.metadata);
    println!();

    let melody = Melody {
        entries: midi_file.melody(track)?,
        errors: Vec::new(),
    };

    std::fs::write(output, melody.to_text())
        .with_context(|| format!("could not write melody file `{}`", output.display()))?;

    println!(
        "Wrote {} entries ({:.1}s) to {}",
        melody.entries.len(),
        melody.duration(),
        output.display()
    );

    Ok(())
}

fn preview(midi: &Path) -> Result<()> {
    for track in preview_midi_file(midi)? {
        println!("{}", track);
    }

    Ok(())
}
