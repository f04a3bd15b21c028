use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::error::{GeneratorError, MelodyError};
use crate::generator::{FunctionGenerator, ToneOptions};

/// Note names by pitch class, sharps only
const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Takes a MIDI note number and returns its frequency in 12-TET with A4 = 440 Hz
pub fn note_to_frequency(midi_note: i32) -> f64 {
    440.0 * 2f64.powf(f64::from(midi_note - 69) / 12.0)
}

/// A note between C0 and B9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Note {
    midi: u8,
}

impl Note {
    pub const LOWEST: u8 = 12;
    pub const HIGHEST: u8 = 131;

    /// Returns the note for a MIDI number, if it can be written with a single octave digit
    pub fn from_midi(midi: u8) -> Option<Self> {
        (Self::LOWEST..=Self::HIGHEST)
            .contains(&midi)
            .then_some(Self { midi })
    }

    pub fn midi(&self) -> u8 {
        self.midi
    }

    pub fn octave(&self) -> u8 {
        self.midi / 12 - 1
    }

    pub fn frequency(&self) -> f64 {
        note_to_frequency(i32::from(self.midi))
    }
}

impl FromStr for Note {
    type Err = MelodyError;

    /// Parses a note name such as `A4`, `C#5` or `Bb3`
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || MelodyError::UnknownNote(name.to_owned());

        let mut chars = name.chars();
        let octave = chars
            .next_back()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| MelodyError::InvalidOctave(name.to_owned()))?;

        let pitch_class: u32 = match chars.as_str() {
            "C" => 0,
            "C#" | "Db" => 1,
            "D" => 2,
            "D#" | "Eb" => 3,
            "E" => 4,
            "F" => 5,
            "F#" | "Gb" => 6,
            "G" => 7,
            "G#" | "Ab" => 8,
            "A" => 9,
            "A#" | "Bb" => 10,
            "B" => 11,
            _ => return Err(unknown()),
        };

        let midi = 12 * (octave + 1) + pitch_class;

        Ok(Self { midi: midi as u8 })
    }
}

impl Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            PITCH_CLASSES[usize::from(self.midi % 12)],
            self.octave()
        )
    }
}

/// One line of a melody file
#[derive(Debug, Clone, PartialEq)]
pub enum MelodyEntry {
    Tone { note: Note, duration: f64 },
    Pause { duration: f64 },
}

impl MelodyEntry {
    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        match self {
            MelodyEntry::Tone { duration, .. } | MelodyEntry::Pause { duration } => *duration,
        }
    }
}

impl Display for MelodyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MelodyEntry::Tone { note, duration } => write!(f, "{}:{}", note, duration),
            MelodyEntry::Pause { duration } => write!(f, "P:{}", duration),
        }
    }
}

/// Parses a `TOKEN:DURATION` line. Blank lines yield `None`, fields past the
/// duration are ignored.
pub fn parse_melody_line(line: &str) -> Result<Option<MelodyEntry>, MelodyError> {
    let line = line.trim();

    if line.is_empty() {
        return Ok(None);
    }

    let mut fields = line.split(':').map(str::trim);

    let (Some(token), Some(duration)) = (fields.next(), fields.next()) else {
        return Err(MelodyError::MissingSeparator(line.to_owned()));
    };

    let duration = duration
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| MelodyError::InvalidDuration(duration.to_owned()))?;

    if token.starts_with('P') {
        return Ok(Some(MelodyEntry::Pause { duration }));
    }

    let note = token.parse()?;

    Ok(Some(MelodyEntry::Tone { note, duration }))
}

/// A parsed melody file.
///
/// Lines that fail to parse are kept in `errors` with their 1-based line
/// number; the remaining lines still make up the melody.
#[derive(Debug, Default)]
pub struct Melody {
    pub entries: Vec<MelodyEntry>,
    pub errors: Vec<(usize, MelodyError)>,
}

impl Melody {
    pub fn parse(text: &str) -> Self {
        let mut melody = Melody::default();

        for (index, line) in text.lines().enumerate() {
            match parse_melody_line(line) {
                Ok(Some(entry)) => melody.entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping melody line {}: {}", index + 1, e);
                    melody.errors.push((index + 1, e));
                }
            }
        }

        melody
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read melody file `{}`", path.display()))?;

        Ok(Self::parse(&text))
    }

    /// Total playing time in seconds
    pub fn duration(&self) -> f64 {
        self.entries.iter().map(MelodyEntry::duration).sum()
    }

    /// Renders the entries back into the melody file format
    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}\n", entry))
            .collect()
    }
}

/// Plays `entries` in order on `generator`, then switches the output relay off.
///
/// The output stays on between tones and through pauses, only the frequency
/// moves. If a command fails the relay is still switched off before the
/// error is returned.
pub fn play_melody(
    entries: &[MelodyEntry],
    generator: &mut FunctionGenerator<'_>,
) -> Result<(), GeneratorError> {
    let result = play_entries(entries, generator);

    match result {
        Ok(()) => generator.stop(),
        Err(e) => {
            if let Err(stop_error) = generator.stop() {
                warn!("Could not stop output after failed playback: {}", stop_error);
            }
            Err(e)
        }
    }
}

fn play_entries(
    entries: &[MelodyEntry],
    generator: &mut FunctionGenerator<'_>,
) -> Result<(), GeneratorError> {
    for entry in entries {
        match entry {
            MelodyEntry::Pause { duration } => {
                let pause = Duration::try_from_secs_f64(*duration)
                    .map_err(|_| GeneratorError::InvalidDuration(*duration))?;

                info!("Pausing for {}s.", duration);
                thread::sleep(pause);
            }
            MelodyEntry::Tone { note, duration } => {
                let frequency = note.frequency() as u32;

                info!("Playing tone {:.3e}Hz ({}) for {}s.", note.frequency(), note, duration);
                generator.play_tone(frequency, *duration, ToneOptions::legato())?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn a4_is_concert_pitch() {
        assert_abs_diff_eq!(note_to_frequency(69), 440.0, epsilon = 1e-9);
        assert_abs_diff_eq!(note_to_frequency(81), 880.0, epsilon = 1e-9);
        assert_abs_diff_eq!(note_to_frequency(57), 220.0, epsilon = 1e-9);
    }

    #[test]
    fn octaves_double_frequency() {
        for n in 0..116 {
            assert_abs_diff_eq!(
                note_to_frequency(n + 12),
                2.0 * note_to_frequency(n),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn parses_sharp_note_line() {
        let entry = parse_melody_line("C#4:0.5").unwrap().unwrap();

        let MelodyEntry::Tone { note, duration } = entry else {
            panic!("expected a tone");
        };

        assert_eq!(note.midi(), 61);
        assert_abs_diff_eq!(duration, 0.5);
    }

    #[test]
    fn parses_pause_line() {
        assert_eq!(
            parse_melody_line("P:1.2").unwrap(),
            Some(MelodyEntry::Pause { duration: 1.2 })
        );
    }

    #[test]
    fn flats_match_their_enharmonic_sharps() {
        assert_eq!("Bb3".parse::<Note>(), "A#3".parse::<Note>());
        assert_eq!("Db5".parse::<Note>().unwrap().midi(), 73);
        assert_eq!("C0".parse::<Note>().unwrap().midi(), 12);
        assert_eq!("B9".parse::<Note>().unwrap().midi(), 131);
    }

    #[test]
    fn trailing_fields_are_ignored() {
        assert_eq!(
            parse_melody_line("C4:0.5:x").unwrap(),
            Some(MelodyEntry::Tone {
                note: "C4".parse().unwrap(),
                duration: 0.5,
            })
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(parse_melody_line("   ").unwrap(), None);
        assert_eq!(parse_melody_line("").unwrap(), None);
    }

    #[test]
    fn malformed_lines_are_reported() {
        assert_eq!(
            parse_melody_line("C4"),
            Err(MelodyError::MissingSeparator("C4".into()))
        );
        assert_eq!(
            parse_melody_line("H4:0.5"),
            Err(MelodyError::UnknownNote("H4".into()))
        );
        assert_eq!(
            parse_melody_line("C:0.5"),
            Err(MelodyError::InvalidOctave("C".into()))
        );
        assert_eq!(
            parse_melody_line("C4:-1"),
            Err(MelodyError::InvalidDuration("-1".into()))
        );
        assert_eq!(
            parse_melody_line("C4:soon"),
            Err(MelodyError::InvalidDuration("soon".into()))
        );
    }

    #[test]
    fn melody_keeps_good_lines_around_bad_ones() {
        let melody = Melody::parse("C4:0.5\nX9:1\n\nP:0.25\nG4:0.5\n");

        assert_eq!(melody.entries.len(), 3);
        assert_eq!(melody.errors.len(), 1);
        assert_eq!(melody.errors[0].0, 2);
        assert_abs_diff_eq!(melody.duration(), 1.25);
    }

    #[test]
    fn melody_text_round_trips() {
        let text = "C4:0.5\nP:0.25\nF#5:1\n";

        assert_eq!(Melody::parse(text).to_text(), text);
    }

    #[test]
    fn note_names_render_with_sharps() {
        assert_eq!(Note::from_midi(61).unwrap().to_string(), "C#4");
        assert_eq!(Note::from_midi(69).unwrap().to_string(), "A4");
        assert_eq!(Note::from_midi(11), None);
        assert_eq!(Note::from_midi(132), None);
    }
}
