use crate::model::song::{SoundKey, Track};

pub mod logging;
pub mod metronome;
pub mod scheduler;
pub mod scoring;

/// The sound output the scheduler drives. Calls are fire-and-forget; implementations report
/// their own failures.
pub trait Synth: Send {
    /// Prepare whatever is needed to voice `track`. Playback stays unavailable until every track
    /// of a song loads.
    fn load_track(&mut self, _id: u32, _track: &Track) -> anyhow::Result<()> {
        Ok(())
    }

    fn play_note(&mut self, track: u32, sound: SoundKey, midi_note: u8, velocity: u8);

    fn stop_note(&mut self, track: u32, midi_note: u8);

    /// Volume is 0.0 (muted) or 1.0.
    fn set_track_volume(&mut self, track: u32, volume: f64);

    /// Audible metronome pulse.
    fn click(&mut self, _accent: bool) {}

    /// Playback rate for a backing audio track, if any.
    fn set_backing_rate(&mut self, _rate: f64) {}
}
