use crate::engine::Synth;
use crate::model::song::{SoundKey, Track};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};

/// A synth with no audio backend: it logs what it is asked to play and keeps track of which
/// notes are sounding.
#[derive(Debug, Default)]
pub struct LoggingSynth {
    pub verbose: bool,
    sounding: HashSet<(u32, u8)>,
    volumes: BTreeMap<u32, f64>,
    notes_played: usize,
}

impl LoggingSynth {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn sounding(&self) -> usize {
        self.sounding.len()
    }

    pub fn notes_played(&self) -> usize {
        self.notes_played
    }
}

impl Synth for LoggingSynth {
    fn load_track(&mut self, id: u32, track: &Track) -> anyhow::Result<()> {
        debug!(
            "Loading sound {:?} for track {} ({})",
            track.sound_key(),
            id,
            track.name.as_deref().unwrap_or("unnamed")
        );
        self.volumes.insert(id, 1.0);
        Ok(())
    }

    fn play_note(&mut self, track: u32, sound: SoundKey, midi_note: u8, velocity: u8) {
        if self.volumes.get(&track).is_some_and(|v| *v <= 0.0) {
            return;
        }

        self.sounding.insert((track, midi_note));
        self.notes_played += 1;

        if self.verbose {
            info!(
                "{:>6} | track {:>2} | {:?} | velocity {:>3}",
                format!("on {}", midi_note),
                track,
                sound,
                velocity
            );
        }
    }

    fn stop_note(&mut self, track: u32, midi_note: u8) {
        if self.sounding.remove(&(track, midi_note)) && self.verbose {
            debug!("off {} | track {}", midi_note, track);
        }
    }

    fn set_track_volume(&mut self, track: u32, volume: f64) {
        debug!("Track {} volume -> {}", track, volume);
        self.volumes.insert(track, volume);
        if volume <= 0.0 {
            self.sounding.retain(|(t, _)| *t != track);
        }
    }

    fn click(&mut self, accent: bool) {
        if self.verbose {
            info!("{}", if accent { "TICK" } else { "tick" });
        }
    }

    fn set_backing_rate(&mut self, rate: f64) {
        debug!("Backing track rate -> {:.2}", rate);
    }
}
