pub mod config;
pub mod key;
pub mod song;
pub mod time_map;
