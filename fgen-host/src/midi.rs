use std::{fmt::Display, path::Path};

use anyhow::{bail, ensure, Context, Result};
use log::{debug, warn};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};

use crate::melody::{MelodyEntry, Note};

/// Number of events shown per track by [`preview_midi_file`]
pub const PREVIEW_EVENTS: usize = 10;

/// The part of a MIDI message the melody converter cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    On { note: u8, velocity: u8 },
    Off { note: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsoluteMidiEvent {
    pub time_offset: u32,
    pub track: u16,
    pub channel: u8,
    pub message: NoteEvent,
}

pub struct MidiFile {
    pub metadata: MidiMetadata,
    pub ticks_per_beat: u16,
    pub beats_per_minute: f64,
    /// Note events of every data track, in time order
    pub tracks: Vec<Vec<AbsoluteMidiEvent>>,
}

impl MidiFile {
    /// Converts one data track (1-based) into melody entries. Without a track
    /// number the first track that plays any note is used.
    pub fn melody(&self, track: Option<u16>) -> Result<Vec<MelodyEntry>> {
        let events = match track {
            Some(number) => self
                .tracks
                .get(usize::from(number).wrapping_sub(1))
                .with_context(|| {
                    format!("track {} does not exist ({} data tracks)", number, self.tracks.len())
                })?,
            None => self
                .tracks
                .iter()
                .find(|events| {
                    events
                        .iter()
                        .any(|e| matches!(e.message, NoteEvent::On { .. }))
                })
                .context("no track in the MIDI file plays any notes")?,
        };

        Ok(events_to_melody(
            events,
            self.ticks_per_beat,
            self.beats_per_minute,
        ))
    }
}

pub fn parse_midi_file<P: AsRef<Path>>(midi_path: P) -> Result<MidiFile> {
    let midi_path = midi_path.as_ref();
    let midi_file = std::fs::read(midi_path)
        .with_context(|| format!("could not read MIDI file `{}`", midi_path.display()))?;
    let smf = Smf::parse(&midi_file)
        .with_context(|| format!("could not parse MIDI file `{}`", midi_path.display()))?;

    /* Get Header Data */

    debug!("{:?}", smf.header);

    let Timing::Metrical(ticks_per_beat) = smf.header.timing else {
        bail!("only metrical timing is supported");
    };

    /* Parse Metadata Track */

    let meta_track = smf
        .tracks
        .first()
        .with_context(|| "could not get first track")?;

    let metadata = parse_track_metadata(meta_track);

    /* Calculate Tempo Values */

    let ticks_per_beat = ticks_per_beat.as_int();
    let beats_per_minute = tempo_to_bpm(metadata.tempo);

    /* Absolutize the time for each track */

    let tracks = match smf.header.format {
        // Single track with metadata mixed in
        Format::SingleTrack => vec![absolutize_track(meta_track, 1)],
        // Single metadata track + data tracks
        Format::Parallel => smf.tracks[1..]
            .iter()
            .enumerate()
            .map(|(i, track)| absolutize_track(track, (i + 1) as u16))
            .collect::<Vec<_>>(),
        Format::Sequential => bail!("sequential MIDI files are not supported"),
    };

    ensure!(!tracks.is_empty(), "no data tracks found in MIDI file");

    Ok(MidiFile {
        metadata,
        ticks_per_beat,
        beats_per_minute,
        tracks,
    })
}

/// Takes a tempo in microseconds per beat and returns the tempo in beats per minute
pub fn tempo_to_bpm(tempo: u32) -> f64 {
    let beats_per_microsecond = 1.0 / tempo as f64;
    let beats_per_second = beats_per_microsecond * 1_000_000.0;

    beats_per_second * 60.0
}

/// Takes a number of ticks and returns the number of seconds that many ticks represents
pub fn ticks_to_seconds(ticks: u32, ticks_per_beat: u16, beats_per_minute: f64) -> f64 {
    let beats = ticks as f64 / ticks_per_beat as f64;

    beats / beats_per_minute * 60.0
}

#[derive(Debug)]
pub struct MidiMetadata {
    track_name: Option<String>,
    text: Vec<String>,
    copyright: Vec<String>,
    tempo: u32,
    time_signature: (u8, u8, u8, u8),
    key_signature: (i8, bool),
}

impl Display for MidiMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(track_name) = &self.track_name {
            writeln!(f, "Track Name: {}", track_name)?;
        }

        for txt in &self.text {
            writeln!(f, "Text: {}", txt)?;
        }

        for txt in &self.copyright {
            writeln!(f, "Copyright: {}", txt)?;
        }

        writeln!(f, "Tempo: {} bpm", tempo_to_bpm(self.tempo))?;
        writeln!(
            f,
            "Time Signature: {}/{}",
            self.time_signature.0,
            2u32.pow(self.time_signature.1 as u32),
        )?;
        write!(
            f,
            "Key Signature: {} {} {}",
            self.key_signature.0.abs(),
            if self.key_signature.0 < 0 {
                "flat(s)"
            } else {
                "sharp(s)"
            },
            if self.key_signature.1 {
                "minor"
            } else {
                "major"
            }
        )?;

        Ok(())
    }
}

/// Collects the metadata of a track. Only the first tempo is kept, the
/// converter plays the whole file at one speed.
fn parse_track_metadata(track: &Track) -> MidiMetadata {
    let mut track_name = None;
    let mut text = Vec::new();
    let mut copyright = Vec::new();
    let mut tempo = None;
    let mut time_signature = None;
    let mut key_signature = None;

    for TrackEvent { kind, .. } in track.iter() {
        let TrackEventKind::Meta(msg) = kind else {
            continue;
        };

        match msg {
            MetaMessage::TrackName(name) if track_name.is_none() => {
                track_name = Some(String::from_utf8_lossy(name).to_string());
            }
            MetaMessage::Text(txt) => {
                text.push(String::from_utf8_lossy(txt).to_string());
            }
            MetaMessage::Copyright(txt) => {
                copyright.push(String::from_utf8_lossy(txt).to_string());
            }
            MetaMessage::Tempo(tmp) => match tempo {
                None => tempo = Some(tmp.as_int()),
                Some(first) if first != tmp.as_int() => {
                    warn!("Ignoring tempo change to {} bpm", tempo_to_bpm(tmp.as_int()));
                }
                Some(_) => {}
            },
            MetaMessage::TimeSignature(numerator, denominator, _, _) if time_signature.is_none() => {
                time_signature = Some((*numerator, *denominator, 24, 8));
            }
            MetaMessage::KeySignature(key, scale) if key_signature.is_none() => {
                key_signature = Some((*key, *scale));
            }
            _ => {}
        }
    }

    MidiMetadata {
        track_name,
        text,
        copyright,
        // Default BPM is 120 = 500_000 microseconds per beat
        tempo: tempo.unwrap_or(500_000),
        time_signature: time_signature.unwrap_or((4, 2, 24, 8)),
        key_signature: key_signature.unwrap_or((0, false)), // Default to C major
    }
}

fn absolutize_track(track: &Track, track_number: u16) -> Vec<AbsoluteMidiEvent> {
    let mut absolute_time = 0;
    let mut events = Vec::with_capacity(track.len());

    for TrackEvent { delta, kind } in track.iter() {
        // Accumulate the absolute time
        absolute_time += delta.as_int();

        let TrackEventKind::Midi { channel, message } = kind else {
            continue;
        };

        let message = match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => NoteEvent::On {
                note: key.as_int(),
                velocity: vel.as_int(),
            },
            // A note on with zero velocity is a note off
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => NoteEvent::Off {
                note: key.as_int(),
            },
            _ => continue,
        };

        events.push(AbsoluteMidiEvent {
            time_offset: absolute_time,
            track: track_number,
            channel: channel.as_int() + 1,
            message,
        })
    }

    events
}

fn rounded_seconds(ticks: u32, ticks_per_beat: u16, beats_per_minute: f64) -> f64 {
    (ticks_to_seconds(ticks, ticks_per_beat, beats_per_minute) * 1_000.0).round() / 1_000.0
}

/// Collapses a track into a monophonic line.
///
/// While a note sounds every other note on is ignored; silence between notes
/// becomes a pause. Notes outside C0..B9 cannot be written as melody entries
/// and are dropped, leaving a pause in their place.
pub fn events_to_melody(
    events: &[AbsoluteMidiEvent],
    ticks_per_beat: u16,
    beats_per_minute: f64,
) -> Vec<MelodyEntry> {
    let mut melody = Vec::new();
    let mut sounding: Option<(u8, u32)> = None;
    let mut cursor = 0;

    for event in events {
        match (event.message, sounding) {
            (NoteEvent::On { note, .. }, None) => {
                if Note::from_midi(note).is_none() {
                    warn!("Skipping MIDI note {} which has no melody name", note);
                    continue;
                }

                if event.time_offset > cursor {
                    melody.push(MelodyEntry::Pause {
                        duration: rounded_seconds(
                            event.time_offset - cursor,
                            ticks_per_beat,
                            beats_per_minute,
                        ),
                    });
                }

                sounding = Some((note, event.time_offset));
            }
            (NoteEvent::Off { note }, Some((playing, start))) if note == playing => {
                if let Some(note) = Note::from_midi(note) {
                    melody.push(MelodyEntry::Tone {
                        note,
                        duration: rounded_seconds(
                            event.time_offset - start,
                            ticks_per_beat,
                            beats_per_minute,
                        ),
                    });
                }

                cursor = event.time_offset;
                sounding = None;
            }
            _ => {}
        }
    }

    melody
}

/// The first events of one track, as shown by the `preview` command
#[derive(Debug)]
pub struct TrackPreview {
    pub name: String,
    pub total_events: usize,
    pub events: Vec<String>,
}

impl Display for TrackPreview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:", self.name)?;

        for event in &self.events {
            writeln!(f, "  {}", event)?;
        }

        if self.total_events > self.events.len() {
            writeln!(f, "  ...")?;
        }

        Ok(())
    }
}

/// Lists the name and first events of every track with at least
/// [`PREVIEW_EVENTS`] events
pub fn preview_midi_file<P: AsRef<Path>>(midi_path: P) -> Result<Vec<TrackPreview>> {
    let midi_path = midi_path.as_ref();
    let midi_file = std::fs::read(midi_path)
        .with_context(|| format!("could not read MIDI file `{}`", midi_path.display()))?;
    let smf = Smf::parse(&midi_file)
        .with_context(|| format!("could not parse MIDI file `{}`", midi_path.display()))?;

    let previews = smf
        .tracks
        .iter()
        .enumerate()
        .filter(|(_, track)| track.len() >= PREVIEW_EVENTS)
        .map(|(i, track)| {
            let name = track
                .iter()
                .find_map(|event| match event.kind {
                    TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                        Some(String::from_utf8_lossy(name).to_string())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| format!("Track {}", i + 1));

            TrackPreview {
                name,
                total_events: track.len(),
                events: track
                    .iter()
                    .take(PREVIEW_EVENTS)
                    .map(|event| format!("{:?}", event))
                    .collect(),
            }
        })
        .collect();

    Ok(previews)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn event(time_offset: u32, message: NoteEvent) -> AbsoluteMidiEvent {
        AbsoluteMidiEvent {
            time_offset,
            track: 1,
            channel: 1,
            message,
        }
    }

    fn on(note: u8) -> NoteEvent {
        NoteEvent::On { note, velocity: 100 }
    }

    fn off(note: u8) -> NoteEvent {
        NoteEvent::Off { note }
    }

    #[test]
    fn tempo_conversions() {
        assert_abs_diff_eq!(tempo_to_bpm(500_000), 120.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ticks_to_seconds(480, 480, 120.0), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(ticks_to_seconds(960, 480, 60.0), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn chords_collapse_to_first_note_and_gaps_become_pauses() {
        let events = [
            event(0, on(60)),
            event(480, off(60)),
            event(960, on(62)),
            event(960, on(64)),
            event(1200, off(64)),
            event(1440, off(62)),
        ];

        let melody = events_to_melody(&events, 480, 120.0);

        assert_eq!(
            melody,
            vec![
                MelodyEntry::Tone {
                    note: Note::from_midi(60).unwrap(),
                    duration: 0.5
                },
                MelodyEntry::Pause { duration: 0.5 },
                MelodyEntry::Tone {
                    note: Note::from_midi(62).unwrap(),
                    duration: 0.5
                },
            ]
        );
    }

    #[test]
    fn unnamed_notes_are_skipped() {
        let events = [
            event(0, on(5)),
            event(480, off(5)),
            event(480, on(69)),
            event(960, off(69)),
        ];

        let melody = events_to_melody(&events, 480, 120.0);

        assert_eq!(
            melody,
            vec![
                MelodyEntry::Pause { duration: 0.5 },
                MelodyEntry::Tone {
                    note: Note::from_midi(69).unwrap(),
                    duration: 0.5
                },
            ]
        );
    }
}
