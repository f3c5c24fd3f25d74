use crate::model::config::MetronomeConfig;
use crate::model::song::Song;
use log::debug;

/// One audible metronome pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub tick: u64,
    pub accent: bool,
}

/// Fires pulses on the beat grid of the time signature in effect, independently of note
/// scheduling.
#[derive(Debug, Clone, Default)]
pub struct MetronomeScheduler {
    config: MetronomeConfig,
    last_tick: Option<u64>,
}

struct Grid {
    segment_start: u64,
    ticks_per_beat: f64,
    ticks_per_pulse: f64,
    beats_per_measure: u8,
}

impl MetronomeScheduler {
    pub fn new(config: MetronomeConfig) -> Self {
        Self {
            config,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &MetronomeConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MetronomeConfig) {
        self.config = config;
        self.last_tick = None;
    }

    fn grid(&self, song: &Song, ticks: u64) -> Grid {
        let meter = song.meter_at_tick(ticks);
        let ticks_per_beat = meter.ticks_per_beat(song.ppq);
        let multiplier = if self.config.speed_multiplier > 0.0 {
            self.config.speed_multiplier
        } else {
            1.0
        };

        Grid {
            segment_start: meter.tick,
            ticks_per_beat,
            ticks_per_pulse: ticks_per_beat / multiplier,
            beats_per_measure: meter.numerator.max(1),
        }
    }

    /// The pulse tick at or before `ticks`.
    fn latest_pulse(&self, song: &Song, ticks: u64) -> (u64, Grid) {
        let grid = self.grid(song, ticks);
        let since_segment = (ticks - grid.segment_start) as f64;
        let pulses = (since_segment / grid.ticks_per_pulse).floor();
        let latest = grid.segment_start + (pulses * grid.ticks_per_pulse).round() as u64;

        (latest, grid)
    }

    fn song_ticks(song: &Song, clock: f64) -> u64 {
        song.seconds_to_ticks(clock.max(0.0)).max(0.0).floor() as u64
    }

    /// Advances to `clock` and returns a pulse when a new grid line was crossed. Only moves
    /// forward; `resync` and `clear` are the ways back.
    pub fn update(&mut self, song: &Song, clock: f64) -> Option<Pulse> {
        let (latest, grid) = self.latest_pulse(song, Self::song_ticks(song, clock));
        if self.last_tick.is_some_and(|last| latest <= last) {
            return None;
        }
        self.last_tick = Some(latest);

        if !self.config.enabled {
            return None;
        }

        let beat = (latest - grid.segment_start) as f64 / grid.ticks_per_beat;
        let on_downbeat = (beat % grid.beats_per_measure as f64).abs() < 1e-6;
        let pulse = Pulse {
            tick: latest,
            accent: self.config.emphasize_first && on_downbeat,
        };

        debug!("Metronome pulse at tick {} (accent: {})", pulse.tick, pulse.accent);
        Some(pulse)
    }

    /// Aligns with `clock` after a seek so the landing position doesn't fire again.
    pub fn resync(&mut self, song: &Song, clock: f64) {
        let (latest, _) = self.latest_pulse(song, Self::song_ticks(song, clock));
        self.last_tick = Some(latest);
    }

    pub fn clear(&mut self) {
        self.last_tick = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::song::{SongParts, TickNote};
    use crate::model::time_map::MeterChange;

    fn song(meters: Vec<MeterChange>) -> Song {
        Song::from_parts(SongParts {
            ppq: 480,
            notes: vec![TickNote {
                track: 0,
                midi_note: 60,
                velocity: 80,
                start_tick: 0,
                end_tick: 19_200,
            }],
            meters,
            ..Default::default()
        })
    }

    fn enabled(speed_multiplier: f64) -> MetronomeScheduler {
        MetronomeScheduler::new(MetronomeConfig {
            enabled: true,
            speed_multiplier,
            emphasize_first: true,
        })
    }

    /// Steps the clock in 10ms increments and collects pulses.
    fn run(metronome: &mut MetronomeScheduler, song: &Song, from: f64, to: f64) -> Vec<Pulse> {
        let mut pulses = Vec::new();
        let mut clock = from;
        while clock < to {
            if let Some(p) = metronome.update(song, clock) {
                pulses.push(p);
            }
            clock += 0.01;
        }
        pulses
    }

    #[test]
    fn pulses_on_beats_with_accent() {
        let song = song(vec![]);
        let mut metronome = enabled(1.0);

        // 120bpm: a beat every 0.5s, 4/4 accents every 2s
        let pulses = run(&mut metronome, &song, 0.0, 4.2);
        let ticks: Vec<u64> = pulses.iter().map(|p| p.tick).collect();
        assert_eq!(ticks, (0..9).map(|b| b * 480).collect::<Vec<_>>());

        let accents: Vec<bool> = pulses.iter().map(|p| p.accent).collect();
        assert_eq!(
            accents,
            vec![true, false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn compound_meter_and_multiplier() {
        // 6/8: ticks per beat = 240, six beats per measure
        let song = song(vec![MeterChange {
            tick: 0,
            numerator: 6,
            denominator: 8,
        }]);
        let mut metronome = enabled(2.0);

        let pulses = run(&mut metronome, &song, 0.0, 1.49);
        // a pulse every 120 ticks (0.125s)
        assert_eq!(pulses.len(), 12);
        assert!(pulses[0].accent);
        assert!(!pulses[1].accent);
        assert!(pulses.iter().skip(1).all(|p| !p.accent));
    }

    #[test]
    fn resync_prevents_double_fire() {
        let song = song(vec![]);
        let mut metronome = enabled(1.0);
        run(&mut metronome, &song, 0.0, 1.2);

        metronome.resync(&song, 3.0);
        assert_eq!(metronome.update(&song, 3.0), None);
        assert_eq!(metronome.update(&song, 3.2), None);
        assert!(metronome.update(&song, 3.5).is_some());
    }

    #[test]
    fn stepping_back_does_not_refire() {
        let song = song(vec![]);
        let mut metronome = enabled(1.0);

        assert!(metronome.update(&song, 0.0).is_some());
        assert!(metronome.update(&song, 0.51).is_some());
        for _ in 0..10 {
            assert_eq!(metronome.update(&song, 0.49), None);
            assert_eq!(metronome.update(&song, 0.51), None);
        }

        metronome.resync(&song, 0.2);
        assert!(metronome.update(&song, 0.5).is_some());
    }

    #[test]
    fn disabled_stays_quiet() {
        let song = song(vec![]);
        let mut metronome = MetronomeScheduler::default();
        assert!(run(&mut metronome, &song, 0.0, 3.0).is_empty());
    }
}
