use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_positive, ChoreoError, Result};

/// Onset, tempo and beat-grid tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Half-width of the local-average window around each frame, in seconds
    pub onset_window: f32,
    /// How far above the local average a peak must rise
    pub onset_threshold: f32,
    /// Absolute energy floor for an onset
    pub onset_floor: f32,
    /// Minimum spacing between onsets, in seconds
    pub refractory: f32,
    /// Plausible beat intervals (exclusive bounds), in seconds
    pub min_interval: f32,
    pub max_interval: f32,
    /// Histogram bucket width, in seconds
    pub histogram_bin: f32,
    pub fallback_bpm: f32,
    pub bpm_min: f32,
    pub bpm_max: f32,
    /// Confidence = modal count / (interval count * this)
    pub confidence_fraction: f32,
    /// Phase search step and onset/grid alignment tolerance, in seconds
    pub phase_step: f32,
    pub alignment_tolerance: f32,
    pub min_onsets: usize,
    pub min_intervals: usize,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            onset_window: 0.1,
            onset_threshold: 0.15,
            onset_floor: 0.1,
            refractory: 0.15,
            min_interval: 0.3, // 200 BPM
            max_interval: 1.0, // 60 BPM
            histogram_bin: 0.02,
            fallback_bpm: 120.0,
            bpm_min: 80.0,
            bpm_max: 160.0,
            confidence_fraction: 0.5,
            phase_step: 0.01,
            alignment_tolerance: 0.05,
            min_onsets: 4,
            min_intervals: 2,
        }
    }
}

impl BeatConfig {
    /// Values the tempo folding and phase search need to terminate
    pub fn validate(&self) -> Result<()> {
        ensure_positive("histogram_bin", self.histogram_bin)?;
        ensure_positive("phase_step", self.phase_step)?;
        ensure_positive("fallback_bpm", self.fallback_bpm)?;
        ensure_positive("bpm_min", self.bpm_min)?;
        // Octave folding needs a range at least one doubling wide
        if !self.bpm_max.is_finite() || self.bpm_max < 2.0 * self.bpm_min {
            return Err(ChoreoError::InvalidConfig(format!(
                "bpm range {}-{} must span at least one octave",
                self.bpm_min, self.bpm_max
            )));
        }
        Ok(())
    }
}

/// Tempo estimate plus an evenly spaced beat grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatInfo {
    pub bpm: f32,
    /// Beat timestamps in seconds, ascending, all within `[0, duration)`
    pub beats: Vec<f32>,
    /// 0.0 when the fallback tempo was used
    pub confidence: f32,
    pub beat_interval: f32,
}

impl BeatInfo {
    pub fn nearest_beat(&self, time: f32) -> Option<f32> {
        nearest_beat(time, &self.beats)
    }
}

/// Offline beat detector over a normalized bass-energy curve.
///
/// Heuristic: peak-picking onsets, an interval histogram for tempo, then a
/// brute-force phase search to lay the grid over the onsets.
pub struct BeatDetector {
    config: BeatConfig,
    /// Frames per second of the energy curve
    frame_rate: f32,
}

impl BeatDetector {
    /// `frame_rate` is the tick rate of the energy curve; a non-positive rate
    /// yields no onsets. The config is rejected if tempo search could not end.
    pub fn new(frame_rate: f32, config: BeatConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, frame_rate })
    }

    pub fn detect_beats(&self, bass_energy: &[f32], duration: f32) -> BeatInfo {
        let onsets = self.detect_onsets(bass_energy);
        let (bpm, confidence) = self.estimate_tempo(&onsets);

        let beat_interval = 60.0 / bpm;
        let beats = self.generate_beat_grid(&onsets, beat_interval, duration);

        debug!(
            "Beat detection: {} onsets, {:.0} BPM (confidence {:.2}), {} beats",
            onsets.len(),
            bpm,
            confidence,
            beats.len()
        );

        BeatInfo {
            bpm,
            beats,
            confidence,
            beat_interval,
        }
    }

    /// Onset times in seconds: local maxima standing clear of their surroundings
    pub fn detect_onsets(&self, energy: &[f32]) -> Vec<f32> {
        let mut onsets: Vec<f32> = Vec::new();
        if self.frame_rate <= 0.0 {
            return onsets;
        }

        let window = ((self.frame_rate * self.config.onset_window).floor() as usize).max(1);
        if energy.len() <= 2 * window {
            return onsets;
        }

        for i in window..energy.len() - window {
            let local_avg =
                energy[i - window..i + window].iter().sum::<f32>() / (window * 2) as f32;

            let current = energy[i];
            let is_peak = current > energy[i - 1] && current > energy[i + 1];
            let above_threshold = current > local_avg + self.config.onset_threshold;
            let above_floor = current > self.config.onset_floor;

            if is_peak && above_threshold && above_floor {
                let time = i as f32 / self.frame_rate;
                let clear_of_last = onsets
                    .last()
                    .map_or(true, |&last| time - last > self.config.refractory);
                if clear_of_last {
                    onsets.push(time);
                }
            }
        }

        onsets
    }

    /// Modal inter-onset interval, folded into the preferred BPM range.
    /// Returns `(bpm, confidence)`.
    pub fn estimate_tempo(&self, onsets: &[f32]) -> (f32, f32) {
        let fallback = (self.config.fallback_bpm, 0.0);
        if onsets.len() < self.config.min_onsets {
            return fallback;
        }

        let intervals: Vec<f32> = onsets
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|&iv| iv > self.config.min_interval && iv < self.config.max_interval)
            .collect();

        if intervals.len() < self.config.min_intervals {
            return fallback;
        }

        // Insertion-ordered buckets so ties resolve to the earliest interval seen
        let mut histogram: Vec<(i64, usize)> = Vec::new();
        for interval in &intervals {
            let bucket = (interval / self.config.histogram_bin).round() as i64;
            match histogram.iter_mut().find(|(b, _)| *b == bucket) {
                Some((_, count)) => *count += 1,
                None => histogram.push((bucket, 1)),
            }
        }

        let mut max_count = 0;
        let mut best_interval = 0.5;
        for &(bucket, count) in &histogram {
            if count > max_count {
                max_count = count;
                best_interval = bucket as f32 * self.config.histogram_bin;
            }
        }

        let mut bpm = 60.0 / best_interval;
        while bpm < self.config.bpm_min {
            bpm *= 2.0;
        }
        while bpm > self.config.bpm_max {
            bpm /= 2.0;
        }

        let confidence =
            (max_count as f32 / (intervals.len() as f32 * self.config.confidence_fraction)).min(1.0);

        (bpm.round(), confidence)
    }

    /// Evenly spaced beats from the offset that lines up with the most onsets
    pub fn generate_beat_grid(&self, onsets: &[f32], beat_interval: f32, duration: f32) -> Vec<f32> {
        if beat_interval.is_nan() || beat_interval <= 0.0 || duration.is_nan() || duration <= 0.0 {
            return Vec::new();
        }

        let mut best_offset = 0.0;
        let mut best_score = 0;
        let step = self.config.phase_step.max(1e-4);

        let mut k = 0;
        loop {
            let offset = k as f32 * step;
            if offset >= beat_interval {
                break;
            }

            let score = onsets
                .iter()
                .filter(|&&onset| {
                    let phase = (onset - offset).rem_euclid(beat_interval);
                    phase.min(beat_interval - phase) < self.config.alignment_tolerance
                })
                .count();

            if score > best_score {
                best_score = score;
                best_offset = offset;
            }
            k += 1;
        }

        let mut beats = Vec::new();
        let mut i = 0;
        loop {
            let t = best_offset + i as f32 * beat_interval;
            if t >= duration {
                break;
            }
            beats.push(t);
            i += 1;
        }

        beats
    }
}

/// Beat position within a 4/4 bar (1-4)
pub fn beat_number(time: f32, beat_interval: f32, offset: f32) -> u32 {
    let index = ((time - offset) / beat_interval).floor() as i64;
    (index.rem_euclid(4) + 1) as u32
}

pub fn is_on_beat(time: f32, beats: &[f32], tolerance: f32) -> bool {
    beats.iter().any(|&beat| (time - beat).abs() < tolerance)
}

pub fn nearest_beat(time: f32, beats: &[f32]) -> Option<f32> {
    beats
        .iter()
        .copied()
        .min_by(|a, b| (a - time).abs().total_cmp(&(b - time).abs()))
}
