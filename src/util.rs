use crate::Hand;
use log::info;

pub fn parse_hand(input: &str) -> Hand {
    match input.to_lowercase().as_str() {
        "b" | "both" => Hand::Both,
        "l" | "left" => Hand::Left,
        "r" | "right" => Hand::Right,
        other => {
            info!("Unknown hand '{}', defaulting to `both`..!", other);
            Hand::Both
        }
    }
}

/// Parses `START:END` (seconds) into an ordered range.
pub fn parse_range(input: &str) -> Option<(f64, f64)> {
    let Some((start, end)) = input.split_once(':') else {
        info!("Range '{}' is not START:END, ignoring it..!", input);
        return None;
    };

    let (Ok(start), Ok(end)) = (start.trim().parse::<f64>(), end.trim().parse::<f64>()) else {
        info!("Range '{}' has a non-numeric bound, ignoring it..!", input);
        return None;
    };

    if !start.is_finite() || !end.is_finite() {
        return None;
    }

    Some((start.min(end), start.max(end)))
}

/// Formats song seconds as `m:ss.mmm`.
pub fn format_time(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{}:{:02}.{:03}",
        millis / 60_000,
        (millis / 1000) % 60,
        millis % 1000
    )
}
