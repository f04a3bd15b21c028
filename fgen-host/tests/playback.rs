use fgen_host::config::{parse_config, Backend};
use fgen_host::connection::{with_connection, ConnectionState, InstrumentConnection};
use fgen_host::error::{ConnectionError, GeneratorError};
use fgen_host::generator::{FunctionGenerator, ToneOptions};
use fgen_host::melody::{play_melody, Melody, MelodyEntry};
use fgen_host::resource::{list_devices, Device};
use fgen_host::sim::{SimulatedInstrument, SimulatedResourceManager, DEFAULT_RESOURCE};
use fgen_host::GeneratorSettings;

const SETUP: [&str; 7] = [
    "*IDN?",
    "OUTP1 OFF",
    "VOLT 2",
    "FUNC:PULS:WIDT 0.000896984",
    "VOLT:OFFS 1",
    "SOUR1:FREQ 1000",
    "SOUR1:FREQ?",
];

fn connect() -> (InstrumentConnection, SimulatedInstrument) {
    let manager = SimulatedResourceManager::default();
    let instrument = manager.instrument();
    let device = Device::from_resource(DEFAULT_RESOURCE);

    let connection = InstrumentConnection::connect(device, Box::new(manager)).unwrap();

    (connection, instrument)
}

/// Commands sent after the generator was set up
fn playback_commands(instrument: &SimulatedInstrument) -> Vec<String> {
    instrument.commands().split_off(SETUP.len())
}

/// Shrinks every entry so tests don't sleep through a whole tune
fn shortened(entries: &[MelodyEntry]) -> Vec<MelodyEntry> {
    entries
        .iter()
        .map(|entry| match entry {
            MelodyEntry::Tone { note, .. } => MelodyEntry::Tone {
                note: *note,
                duration: 0.001,
            },
            MelodyEntry::Pause { .. } => MelodyEntry::Pause { duration: 0.001 },
        })
        .collect()
}

#[test]
fn setup_runs_before_anything_plays() {
    let (mut connection, instrument) = connect();

    let generator = FunctionGenerator::new(&mut connection, &GeneratorSettings::default()).unwrap();

    assert_eq!(instrument.commands(), SETUP);
    assert!(!generator.output_enabled());
    assert!(!instrument.output_enabled());
    assert_eq!(instrument.frequency_hz(), 1_000.0);
    assert_eq!(instrument.amplitude_vpp(), 2.0);
    assert_eq!(instrument.offset_volts(), 1.0);
}

#[test]
fn melody_keeps_relay_on_between_notes() {
    let (mut connection, instrument) = connect();
    let melody = Melody::parse("C4:0.01\nP:0.01\nE4:0.01\n");

    let mut generator = FunctionGenerator::new(&mut connection, &GeneratorSettings::default()).unwrap();
    play_melody(&melody.entries, &mut generator).unwrap();

    assert_eq!(
        playback_commands(&instrument),
        vec![
            "SOUR1:FREQ 261",
            "OUTP1 ON",
            "SOUR1:FREQ 329",
            "SOUR1:FREQ 329",
            "OUTP1 OFF",
        ]
    );
    assert!(!instrument.output_enabled());
    assert!(!generator.relay_engaged());
}

#[test]
fn bundled_melody_plays_through() {
    let melody = Melody::parse(include_str!("../melodies/twinkle.txt"));
    assert!(melody.errors.is_empty());
    assert_eq!(melody.entries.len(), 15);

    let (mut connection, instrument) = connect();
    let mut generator = FunctionGenerator::new(&mut connection, &GeneratorSettings::default()).unwrap();

    play_melody(&shortened(&melody.entries), &mut generator).unwrap();

    let relay: Vec<String> = playback_commands(&instrument)
        .into_iter()
        .filter(|command| command.starts_with("OUTP1"))
        .collect();

    assert_eq!(relay, vec!["OUTP1 ON", "OUTP1 OFF"]);
    assert_eq!(instrument.frequency_hz(), 261.0);
}

#[test]
fn soft_tone_parks_at_idle_frequency() {
    let (mut connection, instrument) = connect();
    let mut generator = FunctionGenerator::new(&mut connection, &GeneratorSettings::default()).unwrap();

    generator.play_tone(440, 0.01, ToneOptions::default()).unwrap();

    assert_eq!(
        playback_commands(&instrument),
        vec!["SOUR1:FREQ 440", "OUTP1 ON", "SOUR1:FREQ 1"]
    );
    assert!(!generator.output_enabled());
    assert!(generator.relay_engaged());
    assert_eq!(generator.frequency_hz(), 440);
}

#[test]
fn hard_tone_releases_the_relay() {
    let (mut connection, instrument) = connect();
    let mut generator = FunctionGenerator::new(&mut connection, &GeneratorSettings::default()).unwrap();

    let options = ToneOptions {
        soft_stop: false,
        ..ToneOptions::default()
    };
    generator.play_tone(440, 0.01, options).unwrap();

    assert_eq!(
        playback_commands(&instrument),
        vec!["SOUR1:FREQ 440", "OUTP1 ON", "OUTP1 OFF"]
    );
    assert!(!instrument.output_enabled());
}

#[test]
fn failed_playback_still_tries_to_stop() {
    let (mut connection, instrument) = connect();
    let mut generator = FunctionGenerator::new(&mut connection, &GeneratorSettings::default()).unwrap();

    // Let the first frequency through, fail from the relay command on
    let written = instrument.commands().len();
    instrument.faults_mut().fail_writes_after = Some(written + 1);

    let melody = Melody::parse("A4:0.01\nB4:0.01\n");
    let result = play_melody(&melody.entries, &mut generator);

    assert!(matches!(
        result,
        Err(GeneratorError::Connection(ConnectionError::Communication { .. }))
    ));
    assert_eq!(
        playback_commands(&instrument),
        vec!["SOUR1:FREQ 440", "OUTP1 ON", "OUTP1 OFF"]
    );
}

#[test]
fn session_scope_closes_after_failure() {
    let manager = SimulatedResourceManager::default();
    let instrument = manager.instrument();
    let device = Device::from_resource(DEFAULT_RESOURCE);

    let result: Result<(), GeneratorError> = with_connection(device, Box::new(manager), |connection| {
        let mut generator = FunctionGenerator::new(connection, &GeneratorSettings::default())?;
        generator.play_tone(440, -5.0, ToneOptions::default())
    });

    assert!(matches!(result, Err(GeneratorError::InvalidDuration(_))));
    assert_eq!(instrument.open_handles(), 0);
    assert!(instrument.manager_closed());
}

#[test]
fn unknown_resource_fails_to_open() {
    let manager = SimulatedResourceManager::default();
    let device = Device::from_resource("TCPIP0::10.0.0.7::5025::SOCKET");

    let mut connection = InstrumentConnection::new(device, Box::new(manager));
    let result = connection.open();

    assert!(matches!(result, Err(ConnectionError::Open { .. })));
    assert_eq!(connection.state(), ConnectionState::Failed);
}

#[test]
fn dry_run_config_discovers_simulated_instrument() {
    let config = parse_config("[instrument]\nbackend = \"simulated\"\n").unwrap();
    assert_eq!(config.instrument.backend, Backend::Simulated);

    let mut manager = config.instrument.resource_manager();
    let resources = list_devices(manager.as_mut(), &config.instrument.filter);

    assert_eq!(resources, vec![DEFAULT_RESOURCE.to_owned()]);
}
