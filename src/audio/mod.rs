pub mod beat_detector;
pub mod event_analyzer;
pub mod fft;
pub mod prescan;

pub use beat_detector::{BeatConfig, BeatDetector, BeatInfo};
pub use event_analyzer::{AnalysisResult, EventAnalyzer, EventConfig};
pub use fft::{BandRanges, FrequencyAnalyzer, FrequencyConfig, Radix2Fft};
pub use prescan::{AnalysisStatistics, FileInfo, PrescanProcessor, TrackAnalysis};

use serde::{Deserialize, Serialize};

/// Kind of transient picked out of the waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Bass,
    Mid,
    Piano,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Bass => "bass",
            EventKind::Mid => "mid",
            EventKind::Piano => "piano",
        }
    }
}

/// A detected transient, back-timed so its launch culminates at `explode_time`.
///
/// `launch_time <= explode_time` always holds; `launch_time` may be negative for
/// transients in the first second of the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub launch_time: f32,
    pub explode_time: f32,
    pub kind: EventKind,
    pub is_climax: bool,
    /// Explosion height in screen pixels, measured from the top
    pub target_y: f32,
    /// Normalized energy (0.0-1.0)
    pub energy: f32,
}

/// Per-tick band energies for a whole track, each band normalized to 0.0-1.0
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrequencyBands {
    /// 20-200 Hz: kick drums, bass lines
    pub bass: Vec<f32>,
    /// 200-2000 Hz: vocals, guitars
    pub mid: Vec<f32>,
    /// 2000-8000 Hz: cymbals, hi-hats
    pub high: Vec<f32>,
    /// Downsampled magnitude spectrum per tick, for visualization only
    #[serde(skip)]
    pub spectrogram: Vec<Vec<f32>>,
    pub spectrogram_bins: usize,
    pub sample_rate: u32,
    pub duration: f32,
    /// Analysis ticks per second
    pub frame_rate: f32,
}

impl FrequencyBands {
    pub fn frame_count(&self) -> usize {
        self.bass.len()
    }
}

/// Ballistic flight of a launch shell: how long it climbs to reach its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchFlight {
    /// Seconds from launch to apex
    pub duration: f32,
    pub target_y: f32,
}

impl LaunchFlight {
    /// Shell fired from the bottom edge with just enough speed to stop at
    /// `screen_height * target_ratio` under constant per-frame gravity.
    pub fn to_height(screen_height: f32, target_ratio: f32, gravity: f32, frame_rate: f32) -> Self {
        let target_y = screen_height * target_ratio;
        let distance = (screen_height - target_y).max(0.0);
        let v0 = (2.0 * gravity * distance).sqrt();
        let frames = (v0 / gravity).ceil();

        Self {
            duration: frames / frame_rate,
            target_y,
        }
    }
}
