//! Offline music analysis and rule-driven fireworks choreography.
//!
//! The `audio` stages turn a mono sample buffer into band energies, a beat
//! grid and a timeline of launch events; `choreography` replays that timeline
//! against the playback clock and decides what to launch.

pub mod audio;
pub mod choreography;
pub mod config;
pub mod error;

pub use audio::{
    AnalysisResult, AudioEvent, BeatDetector, BeatInfo, EventAnalyzer, EventKind, FrequencyAnalyzer,
    FrequencyBands, PrescanProcessor, TrackAnalysis,
};
pub use choreography::{
    Choreographer, LaunchCommand, LaunchConfig, LaunchParams, Launcher, MusicSection, PatternKind,
    PatternLibrary, RuleEngine, ScreenSize, SectionDetector, SectionKind,
};
pub use config::TuningConfig;
pub use error::{ChoreoError, Result};
