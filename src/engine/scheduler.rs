use crate::engine::Synth;
use crate::engine::metronome::MetronomeScheduler;
use crate::engine::scoring::{HitTiming, KeyDownOutcome, ScoreSnapshot, ScoringContext, ScoringEngine};
use crate::model::config::{DEFAULT_MAX_TICK_SECONDS, Hand, MetronomeConfig, PlayerConfig, SongConfig};
use crate::model::song::{Song, SongNote, SoundKey};
use crate::model::time_map::DEFAULT_BPM;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How far before the loop start playback resumes after wrapping.
pub const LOOP_PRE_ROLL_SECONDS: f64 = 0.5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    CannotPlay,
    Paused,
    Playing,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Down,
    Up,
}

/// A key press or release from a device or virtual keyboard. It takes effect at the scheduler's
/// clock when handled, `time` is only the host's receipt timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub note: u8,
    pub velocity: u8,
    pub time: f64,
}

impl InputEvent {
    pub fn down(note: u8, velocity: u8, time: f64) -> Self {
        Self {
            kind: InputKind::Down,
            note,
            velocity,
            time,
        }
    }

    pub fn up(note: u8, time: f64) -> Self {
        Self {
            kind: InputKind::Up,
            note,
            velocity: 0,
            time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveNote {
    pub index: usize,
    pub sounding: bool,
    /// Sound again on the next `play`.
    pub resume: bool,
}

fn sound_for(song: &Song, note: &SongNote) -> SoundKey {
    song.tracks
        .get(&note.track)
        .map(|t| t.sound_key())
        .unwrap_or(SoundKey::Program(0))
}

/// Drives a song against a clock: starts and stops synthesis, feeds the scoring engine and
/// metronome, and enforces wait mode and loop ranges.
#[derive(Debug)]
pub struct Scheduler<S: Synth> {
    synth: S,
    song: Option<Arc<Song>>,
    config: SongConfig,
    state: PlayerState,
    clock: f64,
    bpm_modifier: f64,
    current_index: usize,
    current_bpm_index: usize,
    active: Vec<ActiveNote>,
    range: Option<(f64, f64)>,
    max_tick_seconds: f64,
    metronome: MetronomeScheduler,
    scoring: ScoringEngine,
}

impl<S: Synth> Scheduler<S> {
    pub fn new(synth: S, config: SongConfig) -> Self {
        let metronome = MetronomeScheduler::new(config.metronome);

        Self {
            synth,
            song: None,
            config,
            state: PlayerState::CannotPlay,
            clock: 0.0,
            bpm_modifier: 1.0,
            current_index: 0,
            current_bpm_index: 0,
            active: Vec::new(),
            range: None,
            max_tick_seconds: DEFAULT_MAX_TICK_SECONDS,
            metronome,
            scoring: ScoringEngine::new(),
        }
    }

    pub fn from_config(synth: S, config: &PlayerConfig) -> Self {
        let mut scheduler = Self::new(synth, config.song.clone());
        scheduler.set_max_tick_seconds(config.max_tick_seconds);
        scheduler.set_bpm_modifier(config.speed);
        scheduler
    }

    /// Replaces the current song. Playback becomes possible once every track has loaded.
    pub fn set_song(&mut self, song: Arc<Song>) {
        self.silence(false);
        self.song = None;
        self.state = PlayerState::CannotPlay;
        self.clock = 0.0;
        self.current_index = 0;
        self.current_bpm_index = 0;
        self.active.clear();
        self.range = None;
        self.scoring.reset();
        self.metronome.clear();

        let mut ready = true;
        for (id, track) in song.tracks.iter() {
            if let Err(why) = self.synth.load_track(*id, track) {
                warn!("Failed to load track {}: {:?}", id, why);
                ready = false;
            }
        }

        for track in self.config.muted_tracks.iter() {
            self.synth.set_track_volume(*track, 0.0);
        }

        info!(
            "Loaded song with {} notes over {} tracks ({:.3}s)..!",
            song.notes.len(),
            song.tracks.len(),
            song.duration
        );

        self.song = Some(song);
        if ready {
            self.state = PlayerState::Paused;
        } else {
            warn!("Not every track could be loaded, playback is unavailable..!");
        }
    }

    pub fn song(&self) -> Option<&Arc<Song>> {
        self.song.as_ref()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn play(&mut self) {
        if self.state != PlayerState::Paused {
            return;
        }
        let Some(song) = self.song.clone() else {
            return;
        };

        if self.clock >= song.duration {
            self.seek(0.0);
        }

        self.state = PlayerState::Playing;
        self.resume_voices(&song);
        debug!("Playing from {:.3}s", self.clock);
    }

    pub fn pause(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }

        self.state = PlayerState::Paused;
        self.silence(true);
        debug!("Paused at {:.3}s", self.clock);
    }

    /// Pauses and rewinds to the start, clearing the loop range and the session score.
    pub fn stop(&mut self) {
        if self.song.is_none() {
            return;
        }

        self.pause();
        self.range = None;
        self.seek(0.0);
        self.scoring.reset();
    }

    /// Jumps to `time` and recomputes everything that depends on the clock.
    pub fn seek(&mut self, time: f64) {
        let Some(song) = self.song.clone() else {
            return;
        };

        let time = if time.is_finite() {
            time.clamp(0.0, song.duration)
        } else {
            0.0
        };

        self.silence(false);
        self.clock = time;
        self.current_index = song.notes.partition_point(|n| n.time < time);
        self.current_bpm_index = song
            .bpms
            .partition_point(|b| b.time <= time)
            .saturating_sub(1);
        self.active = song.notes[..self.current_index]
            .iter()
            .enumerate()
            .filter(|(_, n)| time < n.end())
            .map(|(index, _)| ActiveNote {
                index,
                sounding: false,
                resume: true,
            })
            .collect();

        self.scoring.clear_pending();
        self.metronome.resync(&song, time);

        if self.state == PlayerState::Playing {
            self.resume_voices(&song);
        }
    }

    /// Advances playback by `elapsed` real seconds.
    pub fn tick(&mut self, elapsed: f64) {
        if self.state != PlayerState::Playing {
            return;
        }
        let Some(song) = self.song.clone() else {
            return;
        };

        let mut elapsed = if elapsed.is_finite() { elapsed.max(0.0) } else { 0.0 };
        if elapsed > self.max_tick_seconds {
            warn!(
                "Tick of {:.3}s exceeds {:.3}s, clamping..!",
                elapsed, self.max_tick_seconds
            );
            elapsed = self.max_tick_seconds;
        }

        let previous = self.clock;
        self.clock += elapsed * self.bpm_modifier;

        if self.clock >= song.duration {
            self.seek(song.duration);
            self.pause();
            info!("Reached the end of the song..!");
            return;
        }

        if let Some((start, stop)) = self.range
            && previous < stop
            && self.clock >= stop
        {
            debug!("Looping back to {:.3}s", start);
            self.seek((start - LOOP_PRE_ROLL_SECONDS).max(0.0));
            return;
        }

        while song
            .bpms
            .get(self.current_bpm_index + 1)
            .is_some_and(|b| b.time <= self.clock)
        {
            self.current_bpm_index += 1;
        }

        let clock = self.clock;
        let synth = &mut self.synth;
        self.active.retain(|a| {
            let note = &song.notes[a.index];
            if note.end() > clock {
                return true;
            }
            if a.sounding {
                synth.stop_note(note.track, note.midi_note);
            }
            false
        });

        if let Some(pulse) = self.metronome.update(&song, self.clock) {
            self.synth.click(pulse.accent);
        }

        self.scoring
            .expire_late(&song.notes, self.clock, self.bpm_modifier);

        while let Some(note) = song.notes.get(self.current_index) {
            if note.time >= self.clock {
                break;
            }

            let index = self.current_index;
            let active = self.config.is_active_track(note.track);
            let hit = self.scoring.is_hit(index);

            if active && !hit {
                if self.config.wait {
                    self.clock = note.time;
                    return;
                }
                self.scoring.mark_late(index, note.midi_note);
            }

            let sounding = hit || !(active && self.config.skip_missed_notes);
            if sounding {
                self.synth
                    .play_note(note.track, sound_for(&song, note), note.midi_note, note.velocity);
            }

            self.active.push(ActiveNote {
                index,
                sounding,
                resume: false,
            });
            self.current_index += 1;
        }
    }

    pub fn key_down(&mut self, midi_note: u8) -> Option<KeyDownOutcome> {
        if self.state != PlayerState::Playing {
            return None;
        }
        let song = self.song.clone()?;

        let config = &self.config;
        let is_active = |n: &SongNote| config.is_active_track(n.track);
        let ctx = ScoringContext {
            notes: &song.notes,
            current_index: self.current_index,
            clock: self.clock,
            bpm_modifier: self.bpm_modifier,
            is_active: &is_active,
        };
        let outcome = self.scoring.key_down(&ctx, midi_note);

        // withheld notes sound once the player catches them
        if let KeyDownOutcome::Hit {
            index,
            timing: HitTiming::Late,
            ..
        } = outcome
            && self.config.skip_missed_notes
            && let Some(active) = self.active.iter_mut().find(|a| a.index == index)
            && !active.sounding
        {
            let note = &song.notes[index];
            self.synth
                .play_note(note.track, sound_for(&song, note), note.midi_note, note.velocity);
            active.sounding = true;
        }

        debug!("Key down {} at {:.3}s: {:?}", midi_note, self.clock, outcome);
        Some(outcome)
    }

    pub fn key_up(&mut self, midi_note: u8) {
        if self.state != PlayerState::Playing {
            return;
        }
        let Some(song) = self.song.clone() else {
            return;
        };

        self.scoring.key_up(&song.notes, midi_note, self.clock);
    }

    pub fn handle_input(&mut self, event: InputEvent) -> Option<KeyDownOutcome> {
        match event.kind {
            InputKind::Down => self.key_down(event.note),
            InputKind::Up => {
                self.key_up(event.note);
                None
            }
        }
    }

    pub fn get_time(&self) -> f64 {
        self.clock
    }

    pub fn get_duration(&self) -> f64 {
        self.song.as_ref().map(|s| s.duration).unwrap_or(0.0)
    }

    /// The song's tempo at the clock, scaled by the playback speed.
    pub fn get_bpm(&self) -> f64 {
        let bpm = self
            .song
            .as_ref()
            .and_then(|s| s.bpms.get(self.current_bpm_index))
            .map(|b| b.bpm)
            .unwrap_or(DEFAULT_BPM);

        bpm * self.bpm_modifier
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn bpm_modifier(&self) -> f64 {
        self.bpm_modifier
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    pub fn active_notes(&self) -> &[ActiveNote] {
        &self.active
    }

    pub fn config(&self) -> &SongConfig {
        &self.config
    }

    pub fn score(&self) -> ScoreSnapshot {
        self.scoring.snapshot()
    }

    pub fn scoring_mut(&mut self) -> &mut ScoringEngine {
        &mut self.scoring
    }

    pub fn synth(&self) -> &S {
        &self.synth
    }

    /// Loops playback between `start` and `end` seconds.
    pub fn set_range(&mut self, start: f64, end: f64) {
        if !start.is_finite() || !end.is_finite() || start >= end {
            warn!("Ignoring invalid range {}:{}..!", start, end);
            return;
        }

        self.range = Some((start.max(0.0), end));
    }

    pub fn clear_range(&mut self) {
        self.range = None;
    }

    pub fn set_wait(&mut self, wait: bool) {
        self.config.wait = wait;
    }

    pub fn set_hand(&mut self, hand: Hand) {
        self.config.hand = hand;
    }

    pub fn set_skip_missed_notes(&mut self, skip: bool) {
        self.config.skip_missed_notes = skip;
    }

    pub fn set_metronome(&mut self, metronome: MetronomeConfig) {
        self.config.metronome = metronome;
        self.metronome.set_config(metronome);
        if let Some(song) = self.song.clone() {
            self.metronome.resync(&song, self.clock);
        }
    }

    pub fn set_track_sound(&mut self, track: u32, on: bool) {
        if on {
            self.config.muted_tracks.remove(&track);
        } else {
            self.config.muted_tracks.insert(track);
        }

        self.synth
            .set_track_volume(track, if on { 1.0 } else { 0.0 });
    }

    /// Playback speed relative to the song's own tempo.
    pub fn set_bpm_modifier(&mut self, modifier: f64) {
        if !modifier.is_finite() || modifier <= 0.0 {
            warn!("Ignoring invalid speed {}..!", modifier);
            return;
        }

        self.bpm_modifier = modifier;
        if self.song.as_ref().is_some_and(|s| s.backing.is_some()) {
            self.synth.set_backing_rate(modifier);
        }
    }

    pub fn set_max_tick_seconds(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.max_tick_seconds = seconds;
        }
    }

    fn silence(&mut self, resume: bool) {
        let Some(song) = self.song.as_ref() else {
            return;
        };

        for a in self.active.iter_mut().filter(|a| a.sounding) {
            let note = &song.notes[a.index];
            self.synth.stop_note(note.track, note.midi_note);
            a.sounding = false;
            a.resume = resume;
        }
    }

    fn resume_voices(&mut self, song: &Song) {
        for a in self.active.iter_mut().filter(|a| a.resume) {
            a.resume = false;

            let note = &song.notes[a.index];
            let withheld = self.config.skip_missed_notes
                && self.config.is_active_track(note.track)
                && !self.scoring.is_hit(a.index);
            if withheld {
                continue;
            }

            self.synth
                .play_note(note.track, sound_for(song, note), note.midi_note, note.velocity);
            a.sounding = true;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::scoring::Judgement;
    use crate::engine::testing::{RecordingSynth, SynthCall};
    use crate::model::song::{SongParts, TickNote};

    /// 120bpm at 480ppq: 960 ticks per second.
    fn song(notes: &[(u8, u32, f64, f64)]) -> Song {
        Song::from_parts(SongParts {
            ppq: 480,
            notes: notes
                .iter()
                .map(|&(midi_note, track, start, duration)| TickNote {
                    track,
                    midi_note,
                    velocity: 80,
                    start_tick: (start * 960.0).round() as u64,
                    end_tick: ((start + duration) * 960.0).round() as u64,
                })
                .collect(),
            ..Default::default()
        })
    }

    fn scheduler(song: Song, config: SongConfig) -> Scheduler<RecordingSynth> {
        let mut scheduler = Scheduler::new(RecordingSynth::default(), config);
        scheduler.set_song(Arc::new(song));
        scheduler
    }

    fn run(scheduler: &mut Scheduler<RecordingSynth>, steps: usize, dt: f64) {
        for _ in 0..steps {
            scheduler.tick(dt);
        }
    }

    fn scale() -> Song {
        song(&[
            (60, 0, 1.0, 0.5),
            (62, 0, 2.0, 0.5),
            (64, 0, 3.0, 0.5),
            (65, 0, 4.0, 0.5),
            (67, 0, 6.0, 0.5),
            (69, 0, 8.0, 0.5),
            (71, 0, 9.5, 0.5),
        ])
    }

    #[test]
    fn controls_without_song_are_noops() {
        let mut scheduler = Scheduler::new(RecordingSynth::default(), SongConfig::default());
        scheduler.play();
        scheduler.tick(0.05);
        scheduler.seek(3.0);
        scheduler.pause();
        scheduler.stop();

        assert_eq!(scheduler.state(), PlayerState::CannotPlay);
        assert_eq!(scheduler.get_time(), 0.0);
        assert_eq!(scheduler.get_duration(), 0.0);
        assert_eq!(scheduler.key_down(60), None);
    }

    #[test]
    fn failed_track_load_blocks_playback() {
        let mut scheduler = Scheduler::new(
            RecordingSynth {
                fail_loads: true,
                ..Default::default()
            },
            SongConfig::default(),
        );
        scheduler.set_song(Arc::new(scale()));
        assert_eq!(scheduler.state(), PlayerState::CannotPlay);

        scheduler.play();
        scheduler.tick(0.05);
        assert!(!scheduler.is_playing());
        assert_eq!(scheduler.get_time(), 0.0);
    }

    #[test]
    fn plays_and_stops_notes() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        assert_eq!(scheduler.state(), PlayerState::Paused);

        scheduler.play();
        run(&mut scheduler, 105, 0.01);
        assert_eq!(scheduler.synth().plays(), vec![60]);
        assert_eq!(scheduler.current_index(), 1);
        assert_eq!(scheduler.active_notes().len(), 1);

        run(&mut scheduler, 50, 0.01);
        assert_eq!(scheduler.synth().stops(), vec![60]);
        assert!(scheduler.active_notes().is_empty());
    }

    #[test]
    fn pause_silences_and_play_resumes() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.play();
        run(&mut scheduler, 110, 0.01);

        scheduler.pause();
        assert_eq!(scheduler.synth().stops(), vec![60]);
        let clock = scheduler.get_time();
        scheduler.tick(0.05);
        assert_eq!(scheduler.get_time(), clock);

        scheduler.play();
        assert_eq!(scheduler.synth().plays(), vec![60, 60]);
    }

    #[test]
    fn wait_mode_freezes_on_unhit_note() {
        let config = SongConfig {
            wait: true,
            ..Default::default()
        };
        let mut scheduler = scheduler(scale(), config);
        scheduler.play();

        run(&mut scheduler, 200, 0.05);
        assert!(scheduler.get_time() <= 1.0);
        assert_eq!(scheduler.current_index(), 0);
        assert!(scheduler.synth().plays().is_empty());

        let outcome = scheduler.key_down(60);
        assert_eq!(
            outcome,
            Some(KeyDownOutcome::Hit {
                index: 0,
                judgement: Judgement::Perfect,
                timing: HitTiming::Early,
            })
        );

        scheduler.tick(0.05);
        assert_eq!(scheduler.current_index(), 1);
        assert!(scheduler.get_time() > 1.0);
        assert_eq!(scheduler.synth().plays(), vec![60]);
    }

    #[test]
    fn loop_range_wraps_with_pre_roll() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.set_max_tick_seconds(1.0);
        scheduler.set_range(4.0, 8.0);
        scheduler.seek(7.9);
        scheduler.play();

        scheduler.tick(0.2);
        assert!((scheduler.get_time() - 3.5).abs() < 1e-9);
        assert_eq!(scheduler.current_index(), 3);
        assert!(!scheduler.synth().plays().contains(&69));
    }

    #[test]
    fn seek_rebuilds_active_notes() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.play();
        scheduler.seek(2.25);

        assert_eq!(scheduler.current_index(), 2);
        assert_eq!(scheduler.active_notes().len(), 1);
        assert_eq!(scheduler.active_notes()[0].index, 1);
        assert_eq!(scheduler.synth().plays(), vec![62]);

        scheduler.seek(100.0);
        assert_eq!(scheduler.get_time(), scheduler.get_duration());
        assert!(scheduler.active_notes().is_empty());
    }

    #[test]
    fn late_hits_and_misses() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.seek(1.95);
        scheduler.play();

        // 10ms after 62 was due
        run(&mut scheduler, 6, 0.01);
        assert!(matches!(
            scheduler.key_down(62),
            Some(KeyDownOutcome::Hit {
                index: 1,
                judgement: Judgement::Perfect,
                timing: HitTiming::Late,
            })
        ));

        // 210ms after 64 was due
        run(&mut scheduler, 12, 0.1);
        assert!(matches!(
            scheduler.key_down(64),
            Some(KeyDownOutcome::Hit {
                index: 2,
                judgement: Judgement::Good,
                timing: HitTiming::Late,
            })
        ));
        assert_eq!(scheduler.score().streak, 2);

        // 65 at 4.0s expires without input
        run(&mut scheduler, 15, 0.1);
        let score = scheduler.score();
        assert_eq!(score.perfect, 1);
        assert_eq!(score.good, 1);
        assert_eq!(score.missed, 1);
        assert_eq!(score.streak, 0);
    }

    #[test]
    fn extraneous_input_counts_as_error() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.play();
        scheduler.tick(0.05);

        assert_eq!(scheduler.key_down(90), Some(KeyDownOutcome::Extraneous));
        assert_eq!(scheduler.score().error, 1);
        assert_eq!(scheduler.score().combined, -25);
    }

    #[test]
    fn speed_scales_clock_and_bpm() {
        let mut base = scale();
        base.set_backing(Some(String::from("backing.ogg")));
        let mut scheduler = scheduler(base, SongConfig::default());

        scheduler.set_bpm_modifier(0.5);
        scheduler.set_bpm_modifier(-1.0);
        assert_eq!(scheduler.bpm_modifier(), 0.5);
        assert_eq!(scheduler.get_bpm(), 60.0);
        assert!(scheduler.synth().calls.contains(&SynthCall::Rate(0.5)));

        scheduler.play();
        scheduler.tick(0.1);
        assert!((scheduler.get_time() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn long_ticks_are_clamped() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.play();

        scheduler.tick(30.0);
        assert!((scheduler.get_time() - DEFAULT_MAX_TICK_SECONDS).abs() < 1e-9);
        scheduler.tick(f64::NAN);
        scheduler.tick(-1.0);
        assert!((scheduler.get_time() - DEFAULT_MAX_TICK_SECONDS).abs() < 1e-9);
    }

    #[test]
    fn end_of_song_pauses_and_restarts() {
        let mut scheduler = scheduler(song(&[(60, 0, 0.2, 0.2)]), SongConfig::default());
        scheduler.play();
        run(&mut scheduler, 10, 0.1);

        assert!(!scheduler.is_playing());
        assert_eq!(scheduler.get_time(), scheduler.get_duration());

        scheduler.play();
        assert!(scheduler.is_playing());
        assert_eq!(scheduler.get_time(), 0.0);
    }

    #[test]
    fn stop_resets_session() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.set_range(1.0, 3.0);
        scheduler.play();
        run(&mut scheduler, 12, 0.1);
        scheduler.key_down(90);

        scheduler.stop();
        assert_eq!(scheduler.state(), PlayerState::Paused);
        assert_eq!(scheduler.get_time(), 0.0);
        assert_eq!(scheduler.current_index(), 0);
        assert_eq!(scheduler.range(), None);
        assert_eq!(scheduler.score(), ScoreSnapshot::default());
    }

    #[test]
    fn skip_missed_notes_withholds_player_notes() {
        let notes = song(&[(48, 1, 1.0, 1.0), (60, 2, 1.0, 1.0)]);
        let config = SongConfig {
            left: Some(1),
            right: Some(2),
            hand: Hand::Right,
            skip_missed_notes: true,
            ..Default::default()
        };
        let mut scheduler = scheduler(notes, config);
        scheduler.play();

        run(&mut scheduler, 105, 0.01);
        assert_eq!(scheduler.synth().plays(), vec![48]);

        assert!(matches!(
            scheduler.key_down(60),
            Some(KeyDownOutcome::Hit {
                timing: HitTiming::Late,
                ..
            })
        ));
        assert_eq!(scheduler.synth().plays(), vec![48, 60]);
    }

    #[test]
    fn muted_tracks_and_sound_toggle() {
        let mut config = SongConfig::default();
        config.muted_tracks.insert(0);
        let mut scheduler = scheduler(scale(), config);
        assert!(scheduler.synth().calls.contains(&SynthCall::Volume(0, 0.0)));

        scheduler.set_track_sound(0, true);
        assert_eq!(scheduler.synth().calls.last(), Some(&SynthCall::Volume(0, 1.0)));
        assert!(scheduler.config().muted_tracks.is_empty());
    }

    #[test]
    fn metronome_clicks_while_playing() {
        let config = SongConfig {
            metronome: MetronomeConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut scheduler = scheduler(scale(), config);
        scheduler.play();

        run(&mut scheduler, 110, 0.01);
        assert_eq!(scheduler.synth().clicks(), vec![true, false, false]);
    }

    #[test]
    fn metronome_stays_quiet_while_waiting_with_jittery_ticks() {
        let config = SongConfig {
            wait: true,
            metronome: MetronomeConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        // two ticks ahead of the third beat
        let mut scheduler = scheduler(song(&[(60, 0, 958.0 / 960.0, 0.5)]), config);
        scheduler.play();

        for step in 0..2_000 {
            scheduler.tick(if step % 2 == 0 { 0.001 } else { 0.003 });
        }

        assert!((scheduler.get_time() - 958.0 / 960.0).abs() < 1e-9);
        assert_eq!(scheduler.synth().clicks(), vec![true, false, false]);
    }

    #[test]
    fn held_notes_add_points() {
        let mut scheduler = scheduler(scale(), SongConfig::default());
        scheduler.seek(0.99);
        scheduler.play();

        scheduler.handle_input(InputEvent::down(60, 90, 0.0));
        run(&mut scheduler, 25, 0.01);
        scheduler.handle_input(InputEvent::up(60, 0.25));

        let score = scheduler.score();
        assert_eq!(score.perfect, 1);
        assert_eq!(score.combined, 125);
    }
}
