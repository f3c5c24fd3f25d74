use crate::model::song::SongNote;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Hit windows in real-world milliseconds.
pub const PERFECT_WINDOW_MS: f64 = 50.0;
pub const GOOD_WINDOW_MS: f64 = 300.0;

const HELD_POINTS_PER_SECOND: f64 = 100.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    Perfect,
    Good,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTiming {
    Early,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDownOutcome {
    Hit {
        index: usize,
        judgement: Judgement,
        timing: HitTiming,
    },
    Extraneous,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ScoreSnapshot {
    pub perfect: u32,
    pub good: u32,
    pub missed: u32,
    pub error: u32,
    pub streak: u32,
    pub combined: i64,
    pub accuracy: f64,
}

impl Default for ScoreSnapshot {
    fn default() -> Self {
        Self {
            perfect: 0,
            good: 0,
            missed: 0,
            error: 0,
            streak: 0,
            combined: 0,
            accuracy: 100.0,
        }
    }
}

/// What the scheduler knows at the moment an input arrives.
pub struct ScoringContext<'a> {
    pub notes: &'a [SongNote],
    pub current_index: usize,
    pub clock: f64,
    pub bpm_modifier: f64,
    pub is_active: &'a dyn Fn(&SongNote) -> bool,
}

/// Converts a song-time difference into real-world milliseconds at the given playback speed.
pub fn diff_ms(t1: f64, t2: f64, bpm_modifier: f64) -> f64 {
    (t2 - t1) * 1000.0 / bpm_modifier
}

pub fn judge(diff_ms: f64) -> Option<Judgement> {
    let diff = diff_ms.abs();
    if diff < PERFECT_WINDOW_MS {
        Some(Judgement::Perfect)
    } else if diff <= GOOD_WINDOW_MS {
        Some(Judgement::Good)
    } else {
        None
    }
}

type Observer = Box<dyn FnMut(&ScoreSnapshot) + Send>;

#[derive(Default)]
pub struct ScoringEngine {
    hit_notes: HashSet<usize>,
    missed_notes: HashSet<usize>,
    late_notes: HashMap<u8, usize>,
    held_notes: HashMap<u8, (usize, f64)>,
    perfect: u32,
    good: u32,
    missed: u32,
    error: u32,
    streak: u32,
    duration_held: f64,
    observers: Vec<Observer>,
}

impl fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("score", &self.snapshot())
            .field("late_notes", &self.late_notes)
            .field("hit_notes", &self.hit_notes.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback that receives the score after every change.
    pub fn subscribe(&mut self, observer: impl FnMut(&ScoreSnapshot) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        let attempts = self.perfect + self.good + self.missed + self.error;
        let accuracy = if attempts == 0 {
            100.0
        } else {
            100.0 * (self.perfect + self.good) as f64 / attempts as f64
        };

        ScoreSnapshot {
            perfect: self.perfect,
            good: self.good,
            missed: self.missed,
            error: self.error,
            streak: self.streak,
            combined: self.perfect as i64 * 100 + self.good as i64 * 50
                - self.error as i64 * 25
                + self.duration_held.round() as i64,
            accuracy,
        }
    }

    fn notify(&mut self) {
        if self.observers.is_empty() {
            return;
        }

        let snapshot = self.snapshot();
        for observer in self.observers.iter_mut() {
            observer(&snapshot);
        }
    }

    /// Clears counters and bookkeeping.
    pub fn reset(&mut self) {
        self.clear_pending();
        self.perfect = 0;
        self.good = 0;
        self.missed = 0;
        self.error = 0;
        self.streak = 0;
        self.duration_held = 0.0;
        self.notify();
    }

    /// Forgets which notes were hit, late or missed. Counters are kept.
    pub fn clear_pending(&mut self) {
        self.hit_notes.clear();
        self.missed_notes.clear();
        self.late_notes.clear();
        self.held_notes.clear();
    }

    pub fn is_hit(&self, index: usize) -> bool {
        self.hit_notes.contains(&index)
    }

    pub fn is_missed(&self, index: usize) -> bool {
        self.missed_notes.contains(&index)
    }

    pub fn late_note(&self, midi_note: u8) -> Option<usize> {
        self.late_notes.get(&midi_note).copied()
    }

    /// Records a due, unhit note as awaiting input.
    pub fn mark_late(&mut self, index: usize, midi_note: u8) {
        if let Some(previous) = self.late_notes.insert(midi_note, index) {
            // a newer note on the same pitch replaces the pending one
            self.record_miss(previous);
            self.notify();
        }
    }

    fn record_miss(&mut self, index: usize) {
        self.missed_notes.insert(index);
        self.missed += 1;
        self.streak = 0;
    }

    /// Moves late notes older than the good window to missed. Returns how many expired.
    pub fn expire_late(&mut self, notes: &[SongNote], clock: f64, bpm_modifier: f64) -> usize {
        let expired: Vec<(u8, usize)> = self
            .late_notes
            .iter()
            .filter(|&(_, &idx)| diff_ms(notes[idx].time, clock, bpm_modifier) > GOOD_WINDOW_MS)
            .map(|(&midi, &idx)| (midi, idx))
            .collect();

        for (midi, idx) in expired.iter() {
            self.late_notes.remove(midi);
            self.record_miss(*idx);
            debug!("Missed note {} at {:.3}s", midi, notes[*idx].time);
        }

        if !expired.is_empty() {
            self.notify();
        }
        expired.len()
    }

    pub fn key_down(&mut self, ctx: &ScoringContext, midi_note: u8) -> KeyDownOutcome {
        self.expire_late(ctx.notes, ctx.clock, ctx.bpm_modifier);

        if let Some(index) = self.late_notes.remove(&midi_note) {
            let diff = diff_ms(ctx.notes[index].time, ctx.clock, ctx.bpm_modifier);
            let judgement = judge(diff).unwrap_or(Judgement::Good);
            return self.record_hit(index, midi_note, judgement, HitTiming::Late, ctx.clock);
        }

        if let Some(next) = ctx.notes.get(ctx.current_index) {
            let upcoming = ctx.notes[ctx.current_index..]
                .iter()
                .enumerate()
                .take_while(|(_, n)| n.time == next.time)
                .map(|(offset, n)| (ctx.current_index + offset, n))
                .find(|&(idx, n)| {
                    n.midi_note == midi_note && (ctx.is_active)(n) && !self.hit_notes.contains(&idx)
                });

            if let Some((index, note)) = upcoming
                && let Some(judgement) = judge(diff_ms(ctx.clock, note.time, ctx.bpm_modifier))
            {
                return self.record_hit(index, midi_note, judgement, HitTiming::Early, ctx.clock);
            }
        }

        self.error += 1;
        self.streak = 0;
        self.notify();
        KeyDownOutcome::Extraneous
    }

    fn record_hit(
        &mut self,
        index: usize,
        midi_note: u8,
        judgement: Judgement,
        timing: HitTiming,
        clock: f64,
    ) -> KeyDownOutcome {
        self.hit_notes.insert(index);
        match judgement {
            Judgement::Perfect => self.perfect += 1,
            Judgement::Good => self.good += 1,
        }
        self.streak += 1;
        self.held_notes.insert(midi_note, (index, clock));
        self.notify();

        KeyDownOutcome::Hit {
            index,
            judgement,
            timing,
        }
    }

    /// Credits the time a hit note was held, capped at the note's length.
    pub fn key_up(&mut self, notes: &[SongNote], midi_note: u8, clock: f64) {
        let Some((index, pressed_at)) = self.held_notes.remove(&midi_note) else {
            return;
        };

        let held = (clock - pressed_at).clamp(0.0, notes[index].duration);
        self.duration_held += held * HELD_POINTS_PER_SECOND;
        self.notify();
    }
}
