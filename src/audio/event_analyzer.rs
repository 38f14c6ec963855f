use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{AudioEvent, EventKind, LaunchFlight};
use crate::error::{ensure_positive, ChoreoError, Result};

/// Thresholds, cooldowns and launch geometry for the RMS event classifier.
///
/// These are calibrated against raw time-domain RMS, not against the
/// normalized FFT bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// RMS frames per second
    pub frame_rate: f32,

    // Climax gate (leaky integrator)
    pub climax_rms: f32,
    pub climax_frames: u32,

    // Bass: lower threshold and shorter cooldown while in climax
    pub bass_threshold: f32,
    pub climax_bass_threshold: f32,
    pub bass_cooldown: f32,
    pub climax_bass_cooldown: f32,

    pub mid_threshold: f32,
    pub mid_cooldown: f32,

    // Piano: quiet but not silent, shares the mid timer
    pub quiet_floor: f32,
    pub quiet_ceiling: f32,
    pub piano_cooldown: f32,
    pub piano_energy_scale: f32,

    /// Explosion height as a fraction of screen height, `[min, max)`
    pub bass_target_ratio: [f32; 2],
    pub mid_target_ratio: [f32; 2],
    pub piano_target_ratio: [f32; 2],

    /// Shell physics used to back-time launches (pixels/frame^2, frames/s)
    pub gravity: f32,
    pub physics_frame_rate: f32,
    pub screen_height: f32,

    /// Seed for target-height jitter; fixed so analysis is repeatable
    pub seed: u64,
    pub progress_interval: usize,
    pub waveform_points: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            climax_rms: 0.3,
            climax_frames: 60,
            bass_threshold: 0.4,
            climax_bass_threshold: 0.3,
            bass_cooldown: 0.35,
            climax_bass_cooldown: 0.2,
            mid_threshold: 0.15,
            mid_cooldown: 0.15,
            quiet_floor: 0.05,
            quiet_ceiling: 0.15,
            piano_cooldown: 0.8,
            piano_energy_scale: 0.8,
            bass_target_ratio: [0.15, 0.3],
            mid_target_ratio: [0.4, 0.6],
            piano_target_ratio: [0.3, 0.7],
            gravity: 0.25,
            physics_frame_rate: 60.0,
            screen_height: 800.0,
            seed: 0x5EED,
            progress_interval: 100,
            waveform_points: 1000,
        }
    }
}

impl EventConfig {
    /// Rates and physics must be positive or flight times come out NaN
    pub fn validate(&self) -> Result<()> {
        ensure_positive("frame_rate", self.frame_rate)?;
        ensure_positive("gravity", self.gravity)?;
        ensure_positive("physics_frame_rate", self.physics_frame_rate)?;
        ensure_positive("screen_height", self.screen_height)
    }
}

/// Output of the event analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Sorted ascending by `launch_time`
    pub timeline: Vec<AudioEvent>,
    pub duration: f32,
    pub sample_rate: u32,
    /// Peak-amplitude overview of the track for display
    pub waveform: Vec<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimelineExport {
    duration: f32,
    sample_rate: u32,
    event_count: usize,
    events: Vec<ExportedEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    time: f32,
    energy: f32,
    is_climax: bool,
}

fn round_millis(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

impl AnalysisResult {
    /// Diagnostic dump of the timeline for debugging tools. Not meant to be read back.
    pub fn export_timeline_json(&self) -> Result<String> {
        let export = TimelineExport {
            duration: self.duration,
            sample_rate: self.sample_rate,
            event_count: self.timeline.len(),
            events: self
                .timeline
                .iter()
                .map(|e| ExportedEvent {
                    kind: e.kind,
                    time: round_millis(e.explode_time),
                    energy: round_millis(e.energy),
                    is_climax: e.is_climax,
                })
                .collect(),
        };

        Ok(serde_json::to_string_pretty(&export)?)
    }
}

/// Walks the raw waveform in short RMS frames and emits bass/mid/piano events.
pub struct EventAnalyzer {
    config: EventConfig,
}

impl EventAnalyzer {
    pub fn new(config: EventConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    /// Update the screen height used for target heights and flight times
    pub fn resize(&mut self, screen_height: f32) -> Result<()> {
        ensure_positive("screen_height", screen_height)?;
        self.config.screen_height = screen_height;
        Ok(())
    }

    pub fn analyze(&self, samples: &[f32], sample_rate: u32) -> Result<AnalysisResult> {
        self.analyze_with_progress(samples, sample_rate, |_| {})
    }

    pub fn analyze_with_progress<F>(
        &self,
        samples: &[f32],
        sample_rate: u32,
        mut on_progress: F,
    ) -> Result<AnalysisResult>
    where
        F: FnMut(f32),
    {
        let cfg = &self.config;
        let step = (sample_rate as f32 / cfg.frame_rate).floor() as usize;
        if sample_rate == 0 || step == 0 {
            return Err(ChoreoError::InvalidSampleRate(sample_rate));
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut timeline = Vec::new();

        let mut climax_energy: u32 = 0;
        let mut last_bass_time = 0.0f32;
        let mut last_mid_time = 0.0f32;

        let total_steps = samples.len().div_ceil(step);
        let progress_every = cfg.progress_interval.max(1);

        for (processed, start) in (0..samples.len()).step_by(step).enumerate() {
            let end = (start + step).min(samples.len());
            let sum: f32 = samples[start..end].iter().map(|s| s * s).sum();
            // Divides by the full step so a short final frame reads quieter
            let rms = (sum / step as f32).sqrt();
            let time = start as f32 / sample_rate as f32;

            if rms > cfg.climax_rms {
                climax_energy += 1;
            } else {
                climax_energy = climax_energy.saturating_sub(1);
            }
            let is_climax = climax_energy > cfg.climax_frames;

            let (bass_threshold, bass_cooldown) = if is_climax {
                (cfg.climax_bass_threshold, cfg.climax_bass_cooldown)
            } else {
                (cfg.bass_threshold, cfg.bass_cooldown)
            };
            let is_quiet = rms < cfg.quiet_ceiling && rms > cfg.quiet_floor;

            if rms > bass_threshold && time - last_bass_time > bass_cooldown {
                timeline.push(self.make_event(&mut rng, time, EventKind::Bass, is_climax, rms));
                last_bass_time = time;
            } else if rms > cfg.mid_threshold && time - last_mid_time > cfg.mid_cooldown {
                timeline.push(self.make_event(&mut rng, time, EventKind::Mid, is_climax, rms));
                last_mid_time = time;
            } else if is_quiet && time - last_mid_time > cfg.piano_cooldown {
                let energy = rms * cfg.piano_energy_scale;
                timeline.push(self.make_event(&mut rng, time, EventKind::Piano, false, energy));
                last_mid_time = time;
            }

            if (processed + 1) % progress_every == 0 {
                on_progress((processed + 1) as f32 / total_steps as f32);
            }
        }

        // Flight times differ per kind, so emission order is not launch order
        timeline.sort_by(|a, b| a.launch_time.total_cmp(&b.launch_time));

        debug!(
            "Event analysis: {} events from {} frames",
            timeline.len(),
            total_steps
        );

        Ok(AnalysisResult {
            timeline,
            duration: samples.len() as f32 / sample_rate as f32,
            sample_rate,
            waveform: peak_overview(samples, cfg.waveform_points),
        })
    }

    fn make_event(
        &self,
        rng: &mut StdRng,
        explode_time: f32,
        kind: EventKind,
        is_climax: bool,
        energy: f32,
    ) -> AudioEvent {
        let [low, high] = match kind {
            EventKind::Bass => self.config.bass_target_ratio,
            EventKind::Mid => self.config.mid_target_ratio,
            EventKind::Piano => self.config.piano_target_ratio,
        };
        let ratio = if high > low {
            rng.random_range(low..high)
        } else {
            low
        };

        let flight = LaunchFlight::to_height(
            self.config.screen_height,
            ratio,
            self.config.gravity,
            self.config.physics_frame_rate,
        );

        AudioEvent {
            launch_time: explode_time - flight.duration,
            explode_time,
            kind,
            is_climax,
            target_y: flight.target_y,
            energy: energy.clamp(0.0, 1.0),
        }
    }
}

/// Peak absolute amplitude over `points` equal slices of the buffer
fn peak_overview(samples: &[f32], points: usize) -> Vec<f32> {
    let slice = (samples.len() / points.max(1)).max(1);

    (0..points)
        .map(|i| {
            let start = (i * slice).min(samples.len());
            let end = (start + slice).min(samples.len());
            samples[start..end].iter().fold(0.0f32, |max, s| max.max(s.abs()))
        })
        .collect()
}
