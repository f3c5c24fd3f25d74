use crate::model::key::{fits_notes, infer_key};
use crate::model::time_map::{MeterChange, TempoChange, TimeMap};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKey {
    Percussion,
    Program(u8),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    pub name: Option<String>,
    pub instrument: Option<String>,
    pub program: Option<u8>,
    /// Set when the track plays on the reserved drum channel.
    pub percussion: bool,
}

impl Track {
    /// What synthesis should load to voice this track.
    pub fn sound_key(&self) -> SoundKey {
        if self.percussion {
            SoundKey::Percussion
        } else {
            SoundKey::Program(self.program.unwrap_or(0))
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SongNote {
    pub midi_note: u8,
    pub track: u32,
    pub time: f64,
    pub duration: f64,
    pub velocity: u8,
    pub measure: usize,
}

impl SongNote {
    pub fn end(&self) -> f64 {
        self.time + self.duration
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SongMeasure {
    /// 1-based and contiguous.
    pub number: u32,
    pub time: f64,
    pub duration: f64,
}

/// A note or a measure line, referenced by index into `Song::notes` / `Song::measures`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongItem {
    Note(usize),
    Measure(usize),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bpm {
    pub time: f64,
    pub bpm: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TimeSignatureEvent {
    pub time: f64,
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignatureEvent {
    pub fn signature(&self) -> TimeSignature {
        TimeSignature {
            numerator: self.numerator,
            denominator: self.denominator,
        }
    }
}

/// A note in the tick domain, as collected while reading a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickNote {
    pub track: u32,
    pub midi_note: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub end_tick: u64,
}

/// Everything needed to assemble a `Song`.
#[derive(Debug, Clone, Default)]
pub struct SongParts {
    pub ppq: u16,
    pub tracks: BTreeMap<u32, Track>,
    pub notes: Vec<TickNote>,
    pub tempos: Vec<TempoChange>,
    pub meters: Vec<MeterChange>,
    /// Falls back to an inferred key when `None`.
    pub key_signature: Option<String>,
}

/// The decoded score. Read-only once assembled, apart from the backing track reference.
#[derive(Debug, Clone)]
pub struct Song {
    pub tracks: BTreeMap<u32, Track>,
    pub notes: Vec<SongNote>,
    pub measures: Vec<SongMeasure>,
    pub items: Vec<SongItem>,
    pub bpms: Vec<Bpm>,
    pub time_signature: TimeSignature,
    pub time_signatures: Vec<TimeSignatureEvent>,
    pub key_signature: Option<String>,
    pub ppq: u16,
    /// Musical duration: the latest note end.
    pub duration: f64,
    /// Sheet-aligned duration: the end of the last measure.
    pub score_duration: f64,
    pub backing: Option<String>,
    time_map: TimeMap,
    longest_note: f64,
}

impl Song {
    pub fn from_parts(parts: SongParts) -> Self {
        let SongParts {
            ppq,
            mut tracks,
            notes: tick_notes,
            tempos,
            meters,
            key_signature,
        } = parts;

        let mut time_map = TimeMap::new(ppq, &tempos);
        // Notes of one tick or less (how zero-length notes are written) end the grid at their start.
        let end_tick = tick_notes
            .iter()
            .map(|n| {
                if n.end_tick > n.start_tick + 1 {
                    n.end_tick
                } else {
                    n.start_tick
                }
            })
            .max()
            .unwrap_or(0);
        let measures = time_map.build_measures(&meters, end_tick);

        let mut notes: Vec<SongNote> = tick_notes
            .iter()
            .map(|n| {
                let time = time_map.ticks_to_seconds(n.start_tick as f64);
                let end = time_map.ticks_to_seconds(n.end_tick.max(n.start_tick) as f64);
                SongNote {
                    midi_note: n.midi_note,
                    track: n.track,
                    time,
                    duration: (end - time).max(0.0),
                    velocity: n.velocity,
                    measure: time_map.measure_for_tick(n.start_tick),
                }
            })
            .collect();
        notes.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.midi_note.cmp(&b.midi_note))
        });

        for note in notes.iter() {
            tracks.entry(note.track).or_default();
        }
        for track in tracks.values_mut() {
            track.program.get_or_insert(0);
        }

        let bpms: Vec<Bpm> = time_map
            .tempo_changes()
            .into_iter()
            .zip(time_map.tempo_seconds())
            .map(|(tempo, time)| Bpm {
                time,
                bpm: tempo.bpm,
            })
            .collect();

        let time_signatures: Vec<TimeSignatureEvent> = time_map
            .declared_meters()
            .iter()
            .map(|m| TimeSignatureEvent {
                time: time_map.ticks_to_seconds(m.tick as f64),
                numerator: m.numerator,
                denominator: m.denominator,
            })
            .collect();

        // Spurious 1/x headers are common, so prefer the first real meter.
        let time_signature = time_signatures
            .iter()
            .find(|ts| ts.numerator > 1)
            .or(time_signatures.first())
            .map(TimeSignatureEvent::signature)
            .unwrap_or(TimeSignature {
                numerator: 4,
                denominator: 4,
            });

        let key_signature = key_signature
            .filter(|name| {
                let fits = fits_notes(name, &notes);
                if !fits {
                    debug!(
                        "Ignoring declared key {} without accidentals, the song is not all naturals..!",
                        name
                    );
                }
                fits
            })
            .or_else(|| infer_key(&notes).map(String::from));

        let items = merge_items(&notes, &measures);
        let duration = notes.iter().map(SongNote::end).fold(0.0, f64::max);
        let longest_note = notes.iter().map(|n| n.duration).fold(0.0, f64::max);
        let score_duration = measures
            .last()
            .map(|m| m.time + m.duration)
            .unwrap_or(0.0);

        Self {
            tracks,
            notes,
            measures,
            items,
            bpms,
            time_signature,
            time_signatures,
            key_signature,
            ppq: time_map.ppq(),
            duration,
            score_duration,
            backing: None,
            time_map,
            longest_note,
        }
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> f64 {
        self.time_map.seconds_to_ticks(seconds)
    }

    pub fn ticks_to_seconds(&self, ticks: f64) -> f64 {
        self.time_map.ticks_to_seconds(ticks)
    }

    pub fn time_map(&self) -> &TimeMap {
        &self.time_map
    }

    /// The meter in effect at `tick`.
    pub fn meter_at_tick(&self, tick: u64) -> MeterChange {
        self.time_map.meter_at_tick(tick)
    }

    pub fn set_backing(&mut self, backing: Option<String>) {
        self.backing = backing;
    }

    /// Items overlapping `[start, end]`, for windowed consumers such as a renderer.
    pub fn items_in_view(&self, start: f64, end: f64) -> impl Iterator<Item = &SongItem> + '_ {
        let first = self
            .items
            .partition_point(|item| self.item_time(item) < start - self.longest_note);
        self.items[first..]
            .iter()
            .take_while(move |item| self.item_time(item) <= end)
            .filter(move |item| self.item_end(item) >= start)
    }

    /// Duration of the longest note, cached for `items_in_view`.
    pub fn longest_note(&self) -> f64 {
        self.longest_note
    }

    pub fn item_time(&self, item: &SongItem) -> f64 {
        match *item {
            SongItem::Note(i) => self.notes[i].time,
            SongItem::Measure(i) => self.measures[i].time,
        }
    }

    fn item_end(&self, item: &SongItem) -> f64 {
        match *item {
            SongItem::Note(i) => self.notes[i].end(),
            SongItem::Measure(i) => self.measures[i].time,
        }
    }
}

/// Merges the (already sorted) notes and measures into one time-ordered list. Measure lines sort
/// ahead of notes that start on them.
fn merge_items(notes: &[SongNote], measures: &[SongMeasure]) -> Vec<SongItem> {
    let mut items = Vec::with_capacity(notes.len() + measures.len());
    let (mut n, mut m) = (0, 0);

    while n < notes.len() || m < measures.len() {
        let take_measure = match (notes.get(n), measures.get(m)) {
            (Some(note), Some(measure)) => measure.time <= note.time,
            (None, Some(_)) => true,
            _ => false,
        };

        if take_measure {
            items.push(SongItem::Measure(m));
            m += 1;
        } else {
            items.push(SongItem::Note(n));
            n += 1;
        }
    }

    items
}

#[cfg(test)]
mod test {
    use super::*;

    fn tick_note(midi_note: u8, start_tick: u64, end_tick: u64) -> TickNote {
        TickNote {
            track: 1,
            midi_note,
            velocity: 90,
            start_tick,
            end_tick,
        }
    }

    #[test]
    fn assemble_song() {
        let song = Song::from_parts(SongParts {
            ppq: 480,
            notes: vec![tick_note(64, 960, 1_440), tick_note(60, 0, 480)],
            tempos: vec![TempoChange { tick: 0, bpm: 120.0 }],
            ..Default::default()
        });

        assert_eq!(song.notes[0].midi_note, 60);
        assert!((song.notes[1].time - 1.0).abs() < 1e-9);
        assert!((song.notes[1].duration - 0.5).abs() < 1e-9);
        assert!((song.duration - 1.5).abs() < 1e-9);
        assert_eq!(song.measures.len(), 1);
        assert!((song.score_duration - 2.0).abs() < 1e-9);
        assert_eq!(song.tracks[&1].program, Some(0));
        assert_eq!(
            song.time_signature,
            TimeSignature {
                numerator: 4,
                denominator: 4
            }
        );
        assert!(song.time_signatures.is_empty());
        assert_eq!(
            song.items,
            vec![SongItem::Measure(0), SongItem::Note(0), SongItem::Note(1)]
        );
    }

    #[test]
    fn primary_meter_skips_one_beat_headers() {
        let song = Song::from_parts(SongParts {
            ppq: 480,
            notes: vec![tick_note(60, 0, 4_000)],
            meters: vec![
                MeterChange {
                    tick: 0,
                    numerator: 1,
                    denominator: 4,
                },
                MeterChange {
                    tick: 480,
                    numerator: 3,
                    denominator: 4,
                },
            ],
            ..Default::default()
        });

        assert_eq!(song.time_signatures.len(), 2);
        assert_eq!(song.time_signature.numerator, 3);
    }

    #[test]
    fn one_tick_blip_on_bar_line_adds_no_measure() {
        let measures = |last: TickNote| {
            Song::from_parts(SongParts {
                ppq: 480,
                notes: vec![tick_note(60, 0, 1_920), last],
                ..Default::default()
            })
            .measures
            .len()
        };

        assert_eq!(measures(tick_note(64, 1_920, 1_920)), 1);
        assert_eq!(measures(tick_note(64, 1_920, 1_921)), 1);
        assert_eq!(measures(tick_note(64, 1_920, 1_922)), 2);
        assert_eq!(measures(tick_note(64, 1_000, 1_921)), 2);
    }

    #[test]
    fn placeholder_key_falls_back_to_inference() {
        let parts = |midi: u8| SongParts {
            ppq: 480,
            notes: vec![tick_note(69, 0, 480), tick_note(midi, 480, 960)],
            key_signature: Some("Am".into()),
            ..Default::default()
        };

        assert_eq!(Song::from_parts(parts(72)).key_signature.as_deref(), Some("Am"));
        assert_eq!(Song::from_parts(parts(68)).key_signature.as_deref(), Some("A"));
    }

    #[test]
    fn note_measure_indices() {
        let song = Song::from_parts(SongParts {
            ppq: 480,
            notes: vec![
                tick_note(60, 0, 480),
                tick_note(62, 1_919, 1_920),
                tick_note(64, 1_920, 2_400),
                tick_note(65, 4_000, 4_100),
            ],
            ..Default::default()
        });

        let measures: Vec<usize> = song.notes.iter().map(|n| n.measure).collect();
        assert_eq!(measures, vec![0, 0, 1, 2]);
    }

    #[test]
    fn view_window() {
        let song = Song::from_parts(SongParts {
            ppq: 480,
            notes: vec![
                tick_note(60, 0, 1_920),
                tick_note(62, 1_920, 2_400),
                tick_note(64, 4_800, 5_280),
            ],
            ..Default::default()
        });

        assert!((song.longest_note() - 2.0).abs() < 1e-9);

        let in_view: Vec<SongItem> = song.items_in_view(1.5, 2.2).copied().collect();
        // the long first note is still sounding, the second note and the measure line start inside
        assert_eq!(
            in_view,
            vec![SongItem::Note(0), SongItem::Measure(1), SongItem::Note(1)]
        );
    }
}
