use anyhow::{Result, anyhow};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TICK_HZ: u32 = 1_000;
pub const DEFAULT_MAX_TICK_SECONDS: f64 = 0.1;

#[derive(Parser, Debug)]
#[command(
    name = "SIGHT_READ",
    about = "Play a MIDI file as a piano practice session and score the performance!"
)]
pub struct Args {
    /// Path to the target MIDI file.
    pub midi: PathBuf,

    /// Optional YAML file with player settings. Flags given on the command line win.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Playback speed multiplier (1.0 plays at the written tempo).
    #[arg(short, long)]
    pub speed: Option<f64>,

    /// Halt the song until the active hand plays each due note.
    #[arg(short, long)]
    pub wait: bool,

    /// Loop a section of the song, given as `START:END` in seconds.
    #[arg(short, long)]
    pub range: Option<String>,

    /// Which hand the player practices: left|right|both.
    #[arg(long)]
    pub hand: Option<String>,

    /// Track id played by the left hand.
    #[arg(long)]
    pub left_track: Option<u32>,

    /// Track id played by the right hand.
    #[arg(long)]
    pub right_track: Option<u32>,

    /// Don't sound the active hand's notes unless they are played.
    #[arg(long)]
    pub skip_missed_notes: bool,

    /// Enables the metronome.
    #[arg(short, long)]
    pub metronome: bool,

    /// Metronome pulses per beat.
    #[arg(long)]
    pub metronome_speed: Option<f64>,

    /// Accent the first beat of each measure (true or false).
    #[arg(long, value_name = "BOOL")]
    pub emphasize_first_beat: Option<bool>,

    /// Playback loop frequency in Hz.
    #[arg(long)]
    pub tick_hz: Option<u32>,

    /// Feed a virtual performer that plays every note on time.
    #[arg(short, long)]
    pub autoplay: bool,

    /// Dry run (print first dry_run_max notes and measures, then exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum notes to print in dry run.
    #[arg(long, default_value_t = 80)]
    pub dry_run_max: usize,

    /// Re-encode the decoded song to this path.
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    #[default]
    Both,
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct MetronomeConfig {
    pub enabled: bool,
    /// Pulses per beat.
    pub speed_multiplier: f64,
    pub emphasize_first: bool,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            speed_multiplier: 1.0,
            emphasize_first: true,
        }
    }
}

/// Per-song practice settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SongConfig {
    pub hand: Hand,
    pub left: Option<u32>,
    pub right: Option<u32>,
    pub wait: bool,
    pub skip_missed_notes: bool,
    pub metronome: MetronomeConfig,
    pub muted_tracks: BTreeSet<u32>,
}

impl SongConfig {
    /// Whether the player is responsible for notes on `track`. With no hand tracks assigned every
    /// track is played by the user.
    pub fn is_active_track(&self, track: u32) -> bool {
        if self.left.is_none() && self.right.is_none() {
            return true;
        }

        match self.hand {
            Hand::Both => self.left == Some(track) || self.right == Some(track),
            Hand::Left => self.left == Some(track),
            Hand::Right => self.right == Some(track),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub speed: f64,
    pub tick_hz: u32,
    /// Longest real-time step a single tick may apply.
    pub max_tick_seconds: f64,
    pub range: Option<(f64, f64)>,
    pub song: SongConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            tick_hz: DEFAULT_TICK_HZ,
            max_tick_seconds: DEFAULT_MAX_TICK_SECONDS,
            range: None,
            song: SongConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;

        Self::from_yaml(&text)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.as_ref().display(), e))
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Applies command line flags on top of this configuration.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(speed) = args.speed {
            self.speed = speed;
        }
        if let Some(hz) = args.tick_hz {
            self.tick_hz = hz;
        }
        if let Some(range) = args.range.as_deref() {
            self.range = crate::util::parse_range(range);
        }
        if let Some(hand) = args.hand.as_deref() {
            self.song.hand = crate::util::parse_hand(hand);
        }
        if args.left_track.is_some() {
            self.song.left = args.left_track;
        }
        if args.right_track.is_some() {
            self.song.right = args.right_track;
        }
        if let Some(multiplier) = args.metronome_speed {
            self.song.metronome.speed_multiplier = multiplier;
        }

        self.song.wait |= args.wait;
        self.song.skip_missed_notes |= args.skip_missed_notes;
        self.song.metronome.enabled |= args.metronome;
        if let Some(emphasize) = args.emphasize_first_beat {
            self.song.metronome.emphasize_first = emphasize;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn yaml_config_with_defaults() {
        let config = PlayerConfig::from_yaml(
            "speed: 0.75\nrange: [4.0, 8.0]\nsong:\n  hand: left\n  left: 2\n  right: 1\n  wait: true\n  metronome:\n    enabled: true\n",
        )
        .unwrap();

        assert_eq!(config.speed, 0.75);
        assert_eq!(config.tick_hz, DEFAULT_TICK_HZ);
        assert_eq!(config.range, Some((4.0, 8.0)));
        assert_eq!(config.song.hand, Hand::Left);
        assert!(config.song.wait);
        assert!(config.song.metronome.enabled);
        assert_eq!(config.song.metronome.speed_multiplier, 1.0);
    }

    #[test]
    fn active_tracks_follow_hand() {
        let mut config = SongConfig::default();
        assert!(config.is_active_track(7));

        config.left = Some(2);
        config.right = Some(1);
        assert!(config.is_active_track(1));
        assert!(config.is_active_track(2));
        assert!(!config.is_active_track(3));

        config.hand = Hand::Right;
        assert!(config.is_active_track(1));
        assert!(!config.is_active_track(2));
    }

    #[test]
    fn args_override_config() {
        let args = Args::parse_from([
            "SIGHT_READ",
            "song.mid",
            "--speed",
            "0.5",
            "--range",
            "1:3",
            "--hand",
            "right",
            "--wait",
        ]);

        let mut config = PlayerConfig::default();
        config.apply_args(&args);

        assert_eq!(config.speed, 0.5);
        assert_eq!(config.range, Some((1.0, 3.0)));
        assert_eq!(config.song.hand, Hand::Right);
        assert!(config.song.wait);
        assert!(!config.song.metronome.enabled);
        assert!(config.song.metronome.emphasize_first);
    }

    #[test]
    fn accent_can_be_switched_off() {
        let mut config = PlayerConfig::default();
        config.apply_args(&Args::parse_from([
            "SIGHT_READ",
            "song.mid",
            "--metronome",
            "--emphasize-first-beat",
            "false",
        ]));
        assert!(config.song.metronome.enabled);
        assert!(!config.song.metronome.emphasize_first);

        config.apply_args(&Args::parse_from([
            "SIGHT_READ",
            "song.mid",
            "--emphasize-first-beat",
            "true",
        ]));
        assert!(config.song.metronome.emphasize_first);
    }
}
