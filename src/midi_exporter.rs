use crate::error::EncodeError;
use crate::model::key::key_to_fifths;
use crate::model::song::*;
use crate::model::time_map::{DEFAULT_BPM, DEFAULT_METER};
use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
const MAX_PPQ: u16 = 0x7FFF;
const MAX_MPQN: u32 = 0x00FF_FFFF;
const MAX_DELTA: u64 = 0x0FFF_FFFF;
const MIDI_CLOCKS_PER_CLICK: u8 = 24;
const THIRTY_SECONDS_PER_QUARTER: u8 = 8;

/// Ordering of events sharing a tick: metadata, then program, then note-offs before note-ons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Meta,
    Program,
    NoteOff,
    NoteOn,
}

struct Timed<'a> {
    tick: u64,
    slot: Slot,
    kind: TrackEventKind<'a>,
}

pub fn export_midi_file<P: AsRef<Path>>(song: &Song, path: P) -> Result<()> {
    let bytes = encode(song).map_err(|e| anyhow!("Failed to encode song: {}", e))?;

    fs::write(path.as_ref(), &bytes).map_err(|e| {
        anyhow!(
            "Failed to write MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    info!(
        "Wrote {} bytes of MIDI to {}..!",
        bytes.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Encodes a `Song` as a format 1 Standard MIDI File: a conductor track carrying tempo, time
/// signature and key signature, followed by one track per song track.
pub fn encode(song: &Song) -> Result<Vec<u8>, EncodeError> {
    if song.ppq == 0 || song.ppq > MAX_PPQ {
        return Err(EncodeError::InvalidPpq(song.ppq));
    }

    for (index, note) in song.notes.iter().enumerate() {
        if !note.time.is_finite() || note.time < 0.0 {
            return Err(EncodeError::InvalidNote {
                index,
                reason: format!("start time {} is not a non-negative number", note.time),
            });
        }
        if !note.duration.is_finite() || note.duration < 0.0 {
            return Err(EncodeError::InvalidNote {
                index,
                reason: format!("duration {} is not a non-negative number", note.duration),
            });
        }
    }

    let to_tick = |seconds: f64| -> u64 { song.seconds_to_ticks(seconds).round().max(0.0) as u64 };

    let mut conductor = conductor_events(song, &to_tick)?;
    splice_key_signature(&mut conductor, song.key_signature.as_deref());

    let mut tracks: Vec<Vec<TrackEvent>> = vec![to_track_events(conductor)?];

    let track_ids: BTreeSet<u32> = song
        .tracks
        .keys()
        .copied()
        .chain(song.notes.iter().map(|n| n.track))
        .collect();

    let mut next_channel: u8 = 0;
    for id in track_ids {
        let track = song.tracks.get(&id);
        if track.is_none() {
            debug!("Creating an output track for orphan note track {}..!", id);
        }

        let channel = if track.is_some_and(|t| t.percussion) {
            PERCUSSION_CHANNEL
        } else {
            let ch = next_channel;
            next_channel = (next_channel + 1) % 16;
            if next_channel == PERCUSSION_CHANNEL {
                next_channel += 1;
            }
            ch
        };

        let events = track_events(song, id, track, u4::new(channel), &to_tick);
        tracks.push(to_track_events(events)?);
    }

    let ppq = u15::new(song.ppq);
    let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(ppq)));
    smf.tracks = tracks;

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;

    debug!(
        "Encoded {} notes into {} tracks ({} bytes)",
        song.notes.len(),
        smf.tracks.len(),
        bytes.len()
    );
    Ok(bytes)
}

fn conductor_events<'a>(
    song: &'a Song,
    to_tick: &impl Fn(f64) -> u64,
) -> Result<Vec<Timed<'a>>, EncodeError> {
    let mut events: Vec<Timed> = Vec::new();

    if song.bpms.is_empty() {
        events.push(tempo_event(0, DEFAULT_BPM));
    }
    for bpm in song.bpms.iter() {
        if !bpm.bpm.is_finite() || bpm.bpm <= 0.0 {
            return Err(EncodeError::InvalidTempo {
                time: bpm.time,
                bpm: bpm.bpm,
            });
        }
        events.push(tempo_event(to_tick(bpm.time), bpm.bpm));
    }

    let default_meter = [TimeSignatureEvent {
        time: 0.0,
        numerator: DEFAULT_METER.0,
        denominator: DEFAULT_METER.1,
    }];
    let meters = if song.time_signatures.is_empty() {
        &default_meter[..]
    } else {
        &song.time_signatures[..]
    };

    for ts in meters {
        if ts.numerator == 0 || !ts.denominator.is_power_of_two() {
            return Err(EncodeError::InvalidTimeSignature {
                numerator: ts.numerator,
                denominator: ts.denominator,
            });
        }
        events.push(Timed {
            tick: to_tick(ts.time),
            slot: Slot::Meta,
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
                ts.numerator,
                ts.denominator.trailing_zeros() as u8,
                MIDI_CLOCKS_PER_CLICK,
                THIRTY_SECONDS_PER_QUARTER,
            )),
        });
    }

    Ok(events)
}

fn tempo_event<'a>(tick: u64, bpm: f64) -> Timed<'a> {
    let mpqn = (MICROSECONDS_PER_MINUTE / bpm).round().clamp(1.0, MAX_MPQN as f64) as u32;

    Timed {
        tick,
        slot: Slot::Meta,
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(mpqn))),
    }
}

/// Makes sure the conductor track carries exactly the key signature for `key`, replacing any
/// malformed or conflicting one. Unknown key names are left out.
fn splice_key_signature(conductor: &mut Vec<Timed>, key: Option<&str>) {
    let Some(key) = key else {
        return;
    };

    let Some((fifths, minor)) = key_to_fifths(key) else {
        warn!("No circle-of-fifths entry for key {:?}, omitting key signature..!", key);
        return;
    };

    conductor.retain(|ev| match ev.kind {
        TrackEventKind::Meta(MetaMessage::KeySignature(f, m)) => f == fifths && m == minor,
        _ => true,
    });

    let well_formed = conductor.iter().any(|ev| {
        matches!(
            ev.kind,
            TrackEventKind::Meta(MetaMessage::KeySignature(f, m)) if f == fifths && m == minor
        )
    });

    if !well_formed {
        conductor.insert(
            0,
            Timed {
                tick: 0,
                slot: Slot::Meta,
                kind: TrackEventKind::Meta(MetaMessage::KeySignature(fifths, minor)),
            },
        );
    }
}

fn track_events<'a>(
    song: &'a Song,
    id: u32,
    track: Option<&'a Track>,
    channel: u4,
    to_tick: &impl Fn(f64) -> u64,
) -> Vec<Timed<'a>> {
    let mut events: Vec<Timed<'a>> = Vec::new();

    if let Some(name) = track.and_then(|t| t.name.as_deref()) {
        events.push(Timed {
            tick: 0,
            slot: Slot::Meta,
            kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        });
    }
    if let Some(instrument) = track.and_then(|t| t.instrument.as_deref()) {
        events.push(Timed {
            tick: 0,
            slot: Slot::Meta,
            kind: TrackEventKind::Meta(MetaMessage::InstrumentName(instrument.as_bytes())),
        });
    }

    let program = track.and_then(|t| t.program).unwrap_or(0).min(127);
    events.push(Timed {
        tick: 0,
        slot: Slot::Program,
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange {
                program: u7::new(program),
            },
        },
    });

    for note in song.notes.iter().filter(|n| n.track == id) {
        let start = to_tick(note.time);
        // zero-length notes would be read back as a NoteOn/NoteOff pair on the same tick
        let end = to_tick(note.end()).max(start + 1);
        let key = u7::new(note.midi_note.min(127));
        let vel = u7::new(note.velocity.clamp(1, 127));

        events.push(Timed {
            tick: start,
            slot: Slot::NoteOn,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn { key, vel },
            },
        });
        events.push(Timed {
            tick: end,
            slot: Slot::NoteOff,
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff {
                    key,
                    vel: u7::new(0),
                },
            },
        });
    }

    events
}

/// Sorts absolute-tick events and converts them into delta-timed track events, closing the track
/// with an end-of-track marker.
fn to_track_events(mut events: Vec<Timed>) -> Result<Vec<TrackEvent>, EncodeError> {
    events.sort_by_key(|ev| (ev.tick, ev.slot));

    let mut out: Vec<TrackEvent> = Vec::with_capacity(events.len() + 1);
    let mut last_tick = 0u64;
    for ev in events {
        out.push(TrackEvent {
            delta: delta_since(last_tick, ev.tick)?,
            kind: ev.kind,
        });
        last_tick = ev.tick;
    }

    out.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    Ok(out)
}

fn delta_since(last_tick: u64, tick: u64) -> Result<u28, EncodeError> {
    let delta = tick - last_tick;
    if delta > MAX_DELTA {
        return Err(EncodeError::TickOverflow(delta));
    }
    Ok(u28::new(delta as u32))
}
