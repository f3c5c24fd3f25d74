use crate::model::song::SongMeasure;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_METER: (u8, u8) = (4, 4);

/// A tempo change expressed in the tick domain.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TempoChange {
    pub tick: u64,
    pub bpm: f64,
}

/// A time signature change expressed in the tick domain.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterChange {
    pub tick: u64,
    pub numerator: u8,
    pub denominator: u8,
}

impl MeterChange {
    pub fn ticks_per_measure(&self, ppq: u16) -> u64 {
        let ticks = self.numerator as f64 / self.denominator.max(1) as f64 * 4.0 * ppq as f64;
        (ticks.round() as u64).max(1)
    }

    pub fn ticks_per_beat(&self, ppq: u16) -> f64 {
        ppq as f64 * 4.0 / self.denominator.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoSegment {
    start_tick: u64,
    bpm: f64,
    seconds_at_start: f64,
}

/// Piecewise tempo map converting between ticks and seconds, plus the cached measure grid of the
/// song it was built for.
#[derive(Debug, Clone)]
pub struct TimeMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
    meters: Vec<MeterChange>,
    /// 1 when `meters` starts with the default filled in ahead of the first declared meter.
    filler_meters: usize,
    measure_ticks: Vec<u64>,
}

/// Sorts by tick and keeps the last event seen at any given tick.
fn last_per_tick<T: Copy>(events: &[T], tick_of: impl Fn(&T) -> u64) -> Vec<T> {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|e| tick_of(e));

    let mut out: Vec<T> = Vec::with_capacity(sorted.len());
    for ev in sorted {
        match out.last_mut() {
            Some(last) if tick_of(last) == tick_of(&ev) => *last = ev,
            _ => out.push(ev),
        }
    }
    out
}

impl TimeMap {
    pub fn new(ppq: u16, tempos: &[TempoChange]) -> Self {
        let ppq = ppq.max(1);
        let mut tempos: Vec<TempoChange> = last_per_tick(tempos, |t| t.tick)
            .into_iter()
            .filter(|t| t.bpm.is_finite() && t.bpm > 0.0)
            .collect();

        if tempos.first().is_none_or(|t| t.tick > 0) {
            tempos.insert(
                0,
                TempoChange {
                    tick: 0,
                    bpm: DEFAULT_BPM,
                },
            );
        }

        let mut segments: Vec<TempoSegment> = Vec::with_capacity(tempos.len());
        let mut seconds_accum = 0.0;
        for tempo in tempos {
            if let Some(prev) = segments.last() {
                seconds_accum += Self::span_seconds(tempo.tick - prev.start_tick, prev.bpm, ppq);
            }
            segments.push(TempoSegment {
                start_tick: tempo.tick,
                bpm: tempo.bpm,
                seconds_at_start: seconds_accum,
            });
        }

        Self {
            ppq,
            segments,
            meters: vec![MeterChange {
                tick: 0,
                numerator: DEFAULT_METER.0,
                denominator: DEFAULT_METER.1,
            }],
            filler_meters: 1,
            measure_ticks: Vec::new(),
        }
    }

    fn span_seconds(ticks: u64, bpm: f64, ppq: u16) -> f64 {
        ticks as f64 / ppq as f64 * 60.0 / bpm
    }

    pub fn ppq(&self) -> u16 {
        self.ppq
    }

    /// The normalized tempo list (sorted, one event per tick, always starting at tick 0).
    pub fn tempo_changes(&self) -> Vec<TempoChange> {
        self.segments
            .iter()
            .map(|s| TempoChange {
                tick: s.start_tick,
                bpm: s.bpm,
            })
            .collect()
    }

    /// Seconds at which each tempo segment starts, parallel to `tempo_changes`.
    pub fn tempo_seconds(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.seconds_at_start).collect()
    }

    pub fn meter_changes(&self) -> &[MeterChange] {
        &self.meters
    }

    /// The valid meters handed to `build_measures`, without the default filler at tick 0.
    pub fn declared_meters(&self) -> &[MeterChange] {
        &self.meters[self.filler_meters..]
    }

    pub fn ticks_to_seconds(&self, tick: f64) -> f64 {
        let idx = self
            .segments
            .partition_point(|s| s.start_tick as f64 <= tick)
            .saturating_sub(1);
        let seg = &self.segments[idx];

        seg.seconds_at_start + (tick - seg.start_tick as f64) / self.ppq as f64 * 60.0 / seg.bpm
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> f64 {
        let idx = self
            .segments
            .partition_point(|s| s.seconds_at_start <= seconds)
            .saturating_sub(1);
        let seg = &self.segments[idx];

        seg.start_tick as f64 + (seconds - seg.seconds_at_start) * seg.bpm / 60.0 * self.ppq as f64
    }

    pub fn bpm_at_tick(&self, tick: u64) -> f64 {
        let idx = self
            .segments
            .partition_point(|s| s.start_tick <= tick)
            .saturating_sub(1);
        self.segments[idx].bpm
    }

    pub fn meter_at_tick(&self, tick: u64) -> MeterChange {
        let idx = self
            .meters
            .partition_point(|m| m.tick <= tick)
            .saturating_sub(1);
        self.meters[idx]
    }

    /// Builds the measure grid covering `[0, end_tick)` from the given time signature list and
    /// caches the measure start ticks for `measure_for_tick`.
    ///
    /// Each time signature segment contributes `ceil(segment_ticks / ticks_per_measure)`
    /// measures. Measure boundaries are uniform in ticks and converted to seconds one by one, so
    /// tempo changes inside a segment stretch the measures in wall time.
    pub fn build_measures(&mut self, meters: &[MeterChange], end_tick: u64) -> Vec<SongMeasure> {
        let mut meters: Vec<MeterChange> = last_per_tick(meters, |m| m.tick)
            .into_iter()
            .filter(|m| m.numerator > 0 && m.denominator > 0)
            .collect();

        let filler = meters.first().is_none_or(|m| m.tick > 0);
        if filler {
            meters.insert(
                0,
                MeterChange {
                    tick: 0,
                    numerator: DEFAULT_METER.0,
                    denominator: DEFAULT_METER.1,
                },
            );
        }

        let mut measures: Vec<SongMeasure> = Vec::new();
        let mut measure_ticks: Vec<u64> = Vec::new();

        for (i, meter) in meters.iter().enumerate() {
            let next_start = meters.get(i + 1).map(|m| m.tick);
            let segment_end = next_start.unwrap_or(end_tick).min(end_tick);
            if segment_end <= meter.tick {
                continue;
            }

            let per_measure = meter.ticks_per_measure(self.ppq);
            let count = (segment_end - meter.tick).div_ceil(per_measure);

            for k in 0..count {
                let start = meter.tick + k * per_measure;
                let mut end = start + per_measure;
                if let Some(next) = next_start {
                    end = end.min(next);
                }

                let time = self.ticks_to_seconds(start as f64);
                measures.push(SongMeasure {
                    number: measures.len() as u32 + 1,
                    time,
                    duration: self.ticks_to_seconds(end as f64) - time,
                });
                measure_ticks.push(start);
            }
        }

        self.meters = meters;
        self.filler_meters = usize::from(filler);
        self.measure_ticks = measure_ticks;
        measures
    }

    /// Index of the measure whose range contains `tick`. The last measure extends to infinity.
    pub fn measure_for_tick(&self, tick: u64) -> usize {
        self.measure_ticks
            .partition_point(|&start| start <= tick)
            .saturating_sub(1)
    }

    pub fn measure_start_ticks(&self) -> &[u64] {
        &self.measure_ticks
    }
}
