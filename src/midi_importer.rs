use crate::error::DecodeError;
use crate::model::key::key_from_fifths;
use crate::model::song::*;
use crate::model::time_map::{MeterChange, TempoChange};
use anyhow::{Result, anyhow};
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fs;
use std::path::Path;

const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
const CHUNK_HEADER_LEN: usize = 8;
const MTHD_LEN: usize = 6;

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<Song> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    let song = decode(&bytes)
        .map_err(|e| anyhow!("Failed to decode {}: {}", path.as_ref().display(), e))?;

    Ok(song)
}

/// Decodes a Standard MIDI File into a `Song`.
pub fn decode(bytes: &[u8]) -> Result<Song, DecodeError> {
    let declared_tracks = check_chunks(bytes)?;
    let smf = Smf::parse(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let ppq = match smf.header.timing {
        Timing::Metrical(t) => t.as_int(),
        Timing::Timecode(fps, subframe) => {
            return Err(DecodeError::Unsupported(format!(
                "SMPTE timecode ({:?} fps, {} subframes)",
                fps, subframe
            )));
        }
    };

    if ppq == 0 {
        return Err(DecodeError::BadHeader(
            "ticks per quarter note is zero".into(),
        ));
    }

    debug!("Ticks per quarter note: {}", ppq);
    debug!(
        "MIDI format: {:?}, tracks: {} (declared {})",
        smf.header.format,
        smf.tracks.len(),
        declared_tracks
    );

    let mut walker = Walker::new(ppq);
    for merged in MergedEvents::new(&smf.tracks) {
        walker.apply(merged);
    }

    Ok(walker.finish())
}

/// Validates the chunk layout before parsing: an `MThd` chunk first, only `MTrk` chunks after
/// it, every length inside the buffer and a track count matching the header.
fn check_chunks(bytes: &[u8]) -> Result<u16, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut offset = 0usize;
    let mut declared_tracks: Option<u16> = None;
    let mut found_tracks: u16 = 0;

    while offset < bytes.len() {
        let available = bytes.len() - offset;
        if available < CHUNK_HEADER_LEN {
            return Err(DecodeError::Truncated {
                offset,
                needed: CHUNK_HEADER_LEN,
                available,
            });
        }

        let id = &bytes[offset..offset + 4];
        let len = u32::from_be_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;

        let body = offset + CHUNK_HEADER_LEN;
        if len > bytes.len() - body {
            return Err(DecodeError::Truncated {
                offset,
                needed: CHUNK_HEADER_LEN + len,
                available,
            });
        }

        match (declared_tracks, id) {
            (None, b"MThd") => {
                if len < MTHD_LEN {
                    return Err(DecodeError::BadHeader(format!(
                        "header chunk is {} bytes, expected at least {}",
                        len, MTHD_LEN
                    )));
                }
                declared_tracks = Some(u16::from_be_bytes([bytes[body + 2], bytes[body + 3]]));
            }
            (None, _) => {
                return Err(DecodeError::BadHeader(format!(
                    "expected MThd, found {:?}",
                    String::from_utf8_lossy(id)
                )));
            }
            (Some(_), b"MTrk") => found_tracks = found_tracks.saturating_add(1),
            (Some(_), b"MThd") => {
                return Err(DecodeError::BadHeader(format!(
                    "second header chunk at byte {}",
                    offset
                )));
            }
            (Some(_), other) => {
                return Err(DecodeError::UnknownChunk {
                    id: String::from_utf8_lossy(other).into_owned(),
                    offset,
                });
            }
        }

        offset = body + len;
    }

    let declared = declared_tracks.unwrap_or(0);
    if declared != found_tracks {
        return Err(DecodeError::BadHeader(format!(
            "header declares {} track(s) but {} were found",
            declared, found_tracks
        )));
    }

    Ok(declared)
}

/// One event from the merged stream, tagged with its absolute tick and source track.
struct MergedEvent<'a, 'b> {
    tick: u64,
    track: u32,
    event: &'b TrackEvent<'a>,
}

/// K-way merge of per-track delta streams into one stream ordered by absolute tick. Events on the
/// same tick keep track order, then file order.
struct MergedEvents<'a, 'b> {
    tracks: &'b [Vec<TrackEvent<'a>>],
    heap: BinaryHeap<Reverse<(u64, usize, usize)>>,
}

impl<'a, 'b> MergedEvents<'a, 'b> {
    fn new(tracks: &'b [Vec<TrackEvent<'a>>]) -> Self {
        let mut heap = BinaryHeap::with_capacity(tracks.len());
        for (track_idx, track) in tracks.iter().enumerate() {
            if let Some(first) = track.first() {
                heap.push(Reverse((first.delta.as_int() as u64, track_idx, 0)));
            }
        }

        Self { tracks, heap }
    }
}

impl<'a, 'b> Iterator for MergedEvents<'a, 'b> {
    type Item = MergedEvent<'a, 'b>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((tick, track_idx, event_idx)) = self.heap.pop()?;
        let track = &self.tracks[track_idx];

        if let Some(next) = track.get(event_idx + 1) {
            let next_tick = tick.saturating_add(next.delta.as_int() as u64);
            self.heap.push(Reverse((next_tick, track_idx, event_idx + 1)));
        }

        Some(MergedEvent {
            tick,
            track: track_idx as u32,
            event: &track[event_idx],
        })
    }
}

/// Decoding state carried across the merged event stream.
struct Walker {
    ppq: u16,
    last_tick: u64,
    tracks: BTreeMap<u32, Track>,
    notes: Vec<TickNote>,
    open_notes: HashMap<(u32, u8), usize>,
    tempos: Vec<TempoChange>,
    meters: Vec<MeterChange>,
    key: Option<(i8, bool)>,
}

impl Walker {
    fn new(ppq: u16) -> Self {
        Self {
            ppq,
            last_tick: 0,
            tracks: BTreeMap::new(),
            notes: Vec::new(),
            open_notes: HashMap::new(),
            tempos: Vec::new(),
            meters: Vec::new(),
            key: None,
        }
    }

    fn apply(&mut self, merged: MergedEvent) {
        let MergedEvent { tick, track, event } = merged;
        self.last_tick = tick;

        match &event.kind {
            TrackEventKind::Meta(meta) => self.apply_meta(tick, track, meta),
            TrackEventKind::Midi { channel, message } => {
                let ch: u8 = channel.as_int();
                if ch == PERCUSSION_CHANNEL
                    && matches!(
                        message,
                        MidiMessage::NoteOn { .. } | MidiMessage::ProgramChange { .. }
                    )
                {
                    self.tracks.entry(track).or_default().percussion = true;
                }

                match message {
                    MidiMessage::NoteOn { key, vel } => {
                        let velocity: u8 = vel.as_int();

                        if velocity == 0 {
                            self.close_note(track, key.as_int(), tick);
                        } else {
                            self.open_note(track, key.as_int(), velocity, tick);
                        }
                    }
                    MidiMessage::NoteOff { key, vel: _ } => {
                        self.close_note(track, key.as_int(), tick);
                    }
                    MidiMessage::ProgramChange { program } => {
                        let entry = self.tracks.entry(track).or_default();
                        if entry.program.is_none() {
                            entry.program = Some(program.as_int());
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn apply_meta(&mut self, tick: u64, track: u32, meta: &MetaMessage) {
        match meta {
            MetaMessage::Tempo(micro) => {
                let mpqn = micro.as_int().max(1);
                let bpm = MICROSECONDS_PER_MINUTE / mpqn as f64;
                self.tempos.push(TempoChange { tick, bpm });
                debug!(
                    "Tempo change at tick {} -> {} us/qn ({:.3} bpm, track {})",
                    tick, mpqn, bpm, track
                );
            }
            MetaMessage::TimeSignature(numerator, denominator_pow, _, _) => {
                let Some(denominator) = 1u8.checked_shl(*denominator_pow as u32) else {
                    warn!(
                        "Ignoring time signature {}/2^{} at tick {}..!",
                        numerator, denominator_pow, tick
                    );
                    return;
                };
                self.meters.push(MeterChange {
                    tick,
                    numerator: *numerator,
                    denominator,
                });
                debug!(
                    "Time signature at tick {} -> {}/{}",
                    tick, numerator, denominator
                );
            }
            MetaMessage::KeySignature(fifths, minor) => {
                if self.key.is_none() {
                    self.key = Some((*fifths, *minor));
                    debug!("Key signature: {} fifths, minor: {}", fifths, minor);
                }
            }
            MetaMessage::TrackName(bytes) => {
                let entry = self.tracks.entry(track).or_default();
                if entry.name.is_none() && !bytes.is_empty() {
                    entry.name = Some(String::from_utf8_lossy(bytes).into_owned());
                    debug!("Track {} name: {:?}", track, entry.name);
                }
            }
            MetaMessage::InstrumentName(bytes) => {
                let entry = self.tracks.entry(track).or_default();
                if entry.instrument.is_none() && !bytes.is_empty() {
                    entry.instrument = Some(String::from_utf8_lossy(bytes).into_owned());
                }
            }
            _ => {}
        }
    }

    fn open_note(&mut self, track: u32, midi: u8, velocity: u8, tick: u64) {
        // Best-effort overlap policy: a repeated NoteOn closes the sounding one first.
        if self.open_notes.contains_key(&(track, midi)) {
            debug!(
                "Overlapping NoteOn for {} on track {} at tick {}, closing the previous note..!",
                midi, track, tick
            );
            self.close_note(track, midi, tick);
        }

        self.tracks.entry(track).or_default();
        self.open_notes.insert((track, midi), self.notes.len());
        self.notes.push(TickNote {
            track,
            midi_note: midi,
            velocity,
            start_tick: tick,
            end_tick: tick,
        });
    }

    fn close_note(&mut self, track: u32, midi: u8, tick: u64) {
        if let Some(idx) = self.open_notes.remove(&(track, midi)) {
            self.notes[idx].end_tick = tick;
        } else {
            debug!(
                "Orphaned NoteOff for {} on track {} at tick {}..!",
                midi, track, tick
            );
        }
    }

    fn finish(mut self) -> Song {
        let last_tick = self.last_tick;
        for ((track, midi), idx) in self.open_notes.drain() {
            let note = &mut self.notes[idx];
            note.end_tick = if last_tick > note.start_tick {
                last_tick
            } else {
                note.start_tick + self.ppq as u64
            };

            warn!(
                "Unclosed NoteOn for {} on track {} at tick {} auto-closing at: {}..!",
                midi, track, note.start_tick, note.end_tick
            );
        }

        let key_signature = self.key.and_then(|(fifths, minor)| {
            let name = key_from_fifths(fifths, minor);
            if name.is_none() {
                warn!("Ignoring key signature with {} fifths..!", fifths);
            }
            name.map(String::from)
        });

        Song::from_parts(SongParts {
            ppq: self.ppq,
            tracks: self.tracks,
            notes: self.notes,
            tempos: self.tempos,
            meters: self.meters,
            key_signature,
        })
    }
}
