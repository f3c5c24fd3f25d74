#![allow(non_snake_case)]

mod engine;
mod error;
mod midi_exporter;
mod midi_importer;
mod model;
mod player;
mod util;

pub use engine::Synth;
pub use engine::logging::*;
pub use engine::metronome::*;
pub use engine::scheduler::*;
pub use engine::scoring::*;
pub use error::*;
pub use midi_exporter::{encode, export_midi_file};
pub use midi_importer::{decode, import_midi_file};
pub use model::config::*;
pub use model::key::*;
pub use model::song::*;
pub use model::time_map::*;
pub use player::*;
pub use util::*;
