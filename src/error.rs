//! Error types for the MIDI codec.
//!
//! Decoding is all-or-nothing: any `DecodeError` means the bytes are unusable and no partial
//! `Song` exists. Encoding clamps what it safely can (zero-length notes, out-of-range velocities)
//! and only fails on requests that cannot be represented in a Standard MIDI File.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("MIDI input is empty")]
    Empty,

    #[error("Bad MIDI header: {0}")]
    BadHeader(String),

    #[error("Truncated chunk at byte {offset}: needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown chunk id {id:?} at byte {offset}")]
    UnknownChunk { id: String, offset: usize },

    #[error("Unsupported MIDI timing: {0}")]
    Unsupported(String),

    #[error("Malformed MIDI data: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Ticks per quarter note must be within 1..=32767, got {0}")]
    InvalidPpq(u16),

    #[error("Note {index} cannot be encoded: {reason}")]
    InvalidNote { index: usize, reason: String },

    #[error("Invalid tempo {bpm} bpm at {time}s")]
    InvalidTempo { time: f64, bpm: f64 },

    #[error("Time signature {numerator}/{denominator} cannot be encoded")]
    InvalidTimeSignature { numerator: u8, denominator: u8 },

    #[error("Delta of {0} ticks overflows a MIDI variable-length quantity")]
    TickOverflow(u64),

    #[error("Failed to write MIDI bytes: {0}")]
    Write(#[from] std::io::Error),
}
