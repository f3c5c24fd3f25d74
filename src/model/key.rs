use crate::model::song::SongNote;

/// Key names with their circle-of-fifths position and mode.
const KEYS: &[(&str, i8, bool)] = &[
    ("Cb", -7, false),
    ("Gb", -6, false),
    ("Db", -5, false),
    ("Ab", -4, false),
    ("Eb", -3, false),
    ("Bb", -2, false),
    ("F", -1, false),
    ("C", 0, false),
    ("G", 1, false),
    ("D", 2, false),
    ("A", 3, false),
    ("E", 4, false),
    ("B", 5, false),
    ("F#", 6, false),
    ("C#", 7, false),
    ("Abm", -7, true),
    ("Ebm", -6, true),
    ("Bbm", -5, true),
    ("Fm", -4, true),
    ("Cm", -3, true),
    ("Gm", -2, true),
    ("Dm", -1, true),
    ("Am", 0, true),
    ("Em", 1, true),
    ("Bm", 2, true),
    ("F#m", 3, true),
    ("C#m", 4, true),
    ("G#m", 5, true),
    ("D#m", 6, true),
    ("A#m", 7, true),
];

const MAJOR_SCALE: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Inference candidates, ordered so that ties favour fewer accidentals.
const INFERENCE_ORDER: [i8; 13] = [0, 1, -1, 2, -2, 3, -3, 4, -4, 5, -5, 6, -6];

pub fn key_to_fifths(name: &str) -> Option<(i8, bool)> {
    KEYS.iter()
        .find(|(key, _, _)| *key == name)
        .map(|&(_, fifths, minor)| (fifths, minor))
}

pub fn key_from_fifths(fifths: i8, minor: bool) -> Option<&'static str> {
    KEYS.iter()
        .find(|&&(_, f, m)| f == fifths && m == minor)
        .map(|&(name, _, _)| name)
}

/// C major / A minor carry no accidentals, so files often declare them as a placeholder.
pub fn is_ambiguous(fifths: i8) -> bool {
    fifths == 0
}

/// Whether the pitch is a white key.
pub fn is_natural(midi_note: u8) -> bool {
    matches!(midi_note % 12, 0 | 2 | 4 | 5 | 7 | 9 | 11)
}

/// A declared key without accidentals only stands when every note is natural. Unknown names are
/// kept as given.
pub fn fits_notes(name: &str, notes: &[SongNote]) -> bool {
    key_to_fifths(name).is_none_or(|(fifths, _)| {
        !is_ambiguous(fifths) || notes.iter().all(|n| is_natural(n.midi_note))
    })
}

/// Picks the major key whose scale covers the most notes.
pub fn infer_key(notes: &[SongNote]) -> Option<&'static str> {
    if notes.is_empty() {
        return None;
    }

    let mut histogram = [0usize; 12];
    for note in notes {
        histogram[(note.midi_note % 12) as usize] += 1;
    }

    let mut best: Option<(i8, usize)> = None;
    for fifths in INFERENCE_ORDER {
        let tonic = (fifths as i32 * 7).rem_euclid(12) as u8;
        let covered: usize = MAJOR_SCALE
            .iter()
            .map(|step| histogram[((tonic + step) % 12) as usize])
            .sum();

        if best.is_none_or(|(_, count)| covered > count) {
            best = Some((fifths, covered));
        }
    }

    best.and_then(|(fifths, _)| key_from_fifths(fifths, false))
}
