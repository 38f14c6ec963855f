use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{
    AnalysisResult, BeatConfig, BeatDetector, BeatInfo, EventAnalyzer, EventKind, FrequencyAnalyzer,
    FrequencyBands,
};
use crate::choreography::{MusicSection, SectionDetector, SectionKind, TrackData};
use crate::config::TuningConfig;
use crate::error::Result;

/// Everything the choreographer needs for one track, computed ahead of playback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAnalysis {
    /// File metadata
    pub file_info: FileInfo,

    /// Normalized band energies per analysis tick
    pub bands: FrequencyBands,

    pub beat_info: BeatInfo,

    /// Event timeline and waveform overview
    pub events: AnalysisResult,

    pub sections: Vec<MusicSection>,

    /// Summary for display and calibration
    pub statistics: AnalysisStatistics,
}

impl TrackAnalysis {
    pub fn duration(&self) -> f32 {
        self.file_info.duration_seconds
    }

    pub fn to_track_data(&self) -> TrackData {
        TrackData {
            events: self.events.timeline.clone(),
            beat_info: self.beat_info.clone(),
            sections: Some(self.sections.clone()),
            duration: self.file_info.duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub duration_seconds: f32,
    pub sample_rate: u32,
    /// Mono samples after downmixing
    pub total_samples: usize,
    pub channels: u16,
    /// Analysis ticks per second
    pub frame_rate: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStatistics {
    /// Mean normalized band energies
    pub mean_bass: f32,
    pub mean_mid: f32,
    pub mean_high: f32,
    /// Largest absolute sample value
    pub peak_volume: f32,

    /// Beat analysis stats
    pub total_beats: usize,
    pub bpm: f32,
    pub beat_confidence: f32,

    /// Event analysis stats
    pub event_counts: BTreeMap<EventKind, usize>,
    pub climax_events: usize,

    pub section_breakdown: BTreeMap<SectionKind, usize>,

    /// Content classification
    pub dominant_frequency_range: String,
    pub energy_profile: String, // "Low", "Medium", "High", "Dynamic"
}

impl Default for AnalysisStatistics {
    fn default() -> Self {
        Self {
            mean_bass: 0.0,
            mean_mid: 0.0,
            mean_high: 0.0,
            peak_volume: 0.0,
            total_beats: 0,
            bpm: 120.0,
            beat_confidence: 0.0,
            event_counts: BTreeMap::new(),
            climax_events: 0,
            section_breakdown: BTreeMap::new(),
            dominant_frequency_range: "Unknown".to_string(),
            energy_profile: "Unknown".to_string(),
        }
    }
}

/// Runs every analysis stage over a whole track.
pub struct PrescanProcessor {
    frequency: FrequencyAnalyzer,
    beats: BeatConfig,
    events: EventAnalyzer,
    sections: SectionDetector,
}

impl PrescanProcessor {
    /// Every stage's tuning is checked here, so a bad tuning file fails
    /// before any audio is touched.
    pub fn new(tuning: &TuningConfig) -> Result<Self> {
        tuning.beats.validate()?;
        Ok(Self {
            frequency: FrequencyAnalyzer::new(tuning.frequency.clone())?,
            beats: tuning.beats.clone(),
            events: EventAnalyzer::new(tuning.events.clone())?,
            sections: SectionDetector::new(tuning.sections)?,
        })
    }

    /// Target screen height for event launch geometry
    pub fn set_screen_height(&mut self, height: f32) -> Result<()> {
        self.events.resize(height)
    }

    /// Pre-scan a WAV file, downmixed to mono
    pub fn prescan_file<P: AsRef<Path>>(&self, file_path: P) -> Result<TrackAnalysis> {
        let path_str = file_path.as_ref().to_string_lossy().to_string();
        info!("Pre-scanning audio file: {}", path_str);

        let (samples, spec) = load_wav(&file_path)?;
        info!(
            "Loaded {} samples ({:.2}s, {} channel(s) at {}Hz) for pre-scanning",
            samples.len(),
            samples.len() as f32 / spec.sample_rate as f32,
            spec.channels,
            spec.sample_rate
        );

        let mut analysis = self.analyze_samples(&samples, spec.sample_rate, &path_str)?;
        analysis.file_info.channels = spec.channels;
        Ok(analysis)
    }

    /// Run all stages over a mono buffer
    pub fn analyze_samples(&self, samples: &[f32], sample_rate: u32, name: &str) -> Result<TrackAnalysis> {
        let duration_seconds = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f32 / sample_rate as f32
        };

        let bands = self.frequency.analyze_with_progress(samples, sample_rate, |progress| {
            debug!("Frequency analysis {:.0}%", progress * 100.0);
        })?;

        let detector = BeatDetector::new(bands.frame_rate, self.beats.clone())?;
        let beat_info = detector.detect_beats(&bands.bass, bands.duration);

        let events = self.events.analyze_with_progress(samples, sample_rate, |progress| {
            debug!("Event analysis {:.0}%", progress * 100.0);
        })?;

        let sections = self.sections.detect(&events.timeline, events.duration);

        let statistics = build_statistics(&bands, &beat_info, &events, &sections);

        info!(
            "Pre-scan complete: {} events, {} beats, {:.0} BPM (confidence {:.2}), {} sections",
            events.timeline.len(),
            beat_info.beats.len(),
            beat_info.bpm,
            beat_info.confidence,
            sections.len()
        );

        Ok(TrackAnalysis {
            file_info: FileInfo {
                filename: name.to_string(),
                duration_seconds,
                sample_rate,
                total_samples: samples.len(),
                channels: 1,
                frame_rate: bands.frame_rate,
            },
            bands,
            beat_info,
            events,
            sections,
            statistics,
        })
    }

    /// Save analysis to a JSON file
    pub fn save_analysis<P: AsRef<Path>>(analysis: &TrackAnalysis, output_path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(analysis)?;
        std::fs::write(output_path, json)?;
        Ok(())
    }

    /// Load analysis from a JSON file
    pub fn load_analysis<P: AsRef<Path>>(input_path: P) -> Result<TrackAnalysis> {
        let json = std::fs::read_to_string(input_path)?;
        let analysis: TrackAnalysis = serde_json::from_str(&json)?;
        Ok(analysis)
    }
}

fn load_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, hound::WavSpec)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    // Mix to mono
    let channels = spec.channels.max(1) as usize;
    let mono = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((mono, spec))
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn build_statistics(
    bands: &FrequencyBands,
    beat_info: &BeatInfo,
    events: &AnalysisResult,
    sections: &[MusicSection],
) -> AnalysisStatistics {
    let mut stats = AnalysisStatistics {
        mean_bass: mean(&bands.bass),
        mean_mid: mean(&bands.mid),
        mean_high: mean(&bands.high),
        peak_volume: events.waveform.iter().fold(0.0f32, |m, &v| m.max(v)),
        total_beats: beat_info.beats.len(),
        bpm: beat_info.bpm,
        beat_confidence: beat_info.confidence,
        ..AnalysisStatistics::default()
    };

    for event in &events.timeline {
        *stats.event_counts.entry(event.kind).or_insert(0) += 1;
        if event.is_climax {
            stats.climax_events += 1;
        }
    }
    for section in sections {
        *stats.section_breakdown.entry(section.kind).or_insert(0) += 1;
    }

    stats.dominant_frequency_range = if stats.mean_bass > stats.mean_mid && stats.mean_bass > stats.mean_high {
        "Bass-Heavy".to_string()
    } else if stats.mean_high > stats.mean_bass && stats.mean_high > stats.mean_mid {
        "Treble-Focused".to_string()
    } else {
        "Balanced".to_string()
    };

    // Loudness profile from the waveform overview
    let avg_volume = mean(&events.waveform);
    let volume_variance = mean(
        &events
            .waveform
            .iter()
            .map(|v| (v - avg_volume).powi(2))
            .collect::<Vec<_>>(),
    );
    stats.energy_profile = if volume_variance > 0.1 {
        "Dynamic".to_string()
    } else if avg_volume > 0.3 {
        "High".to_string()
    } else if avg_volume > 0.1 {
        "Medium".to_string()
    } else {
        "Low".to_string()
    };

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 44100;

    /// 60 Hz kick bursts every half second over a quiet bed
    fn kick_track(seconds: f32) -> Vec<f32> {
        let total = (SR as f32 * seconds) as usize;
        let period = SR as usize / 2;
        let burst = SR as usize / 20;
        (0..total)
            .map(|i| {
                let t = i as f32 / SR as f32;
                let bed = 0.1 * (2.0 * PI * 440.0 * t).sin();
                if i % period < burst {
                    0.9 * (2.0 * PI * 60.0 * t).sin()
                } else {
                    bed
                }
            })
            .collect()
    }

    fn processor() -> PrescanProcessor {
        PrescanProcessor::new(&TuningConfig::default()).unwrap()
    }

    #[test]
    fn test_analyze_samples_runs_every_stage() {
        let samples = kick_track(12.0);
        let analysis = processor().analyze_samples(&samples, SR, "kicks").unwrap();

        assert_eq!(analysis.file_info.sample_rate, SR);
        assert!((analysis.duration() - 12.0).abs() < 1e-3);
        assert_eq!(analysis.bands.bass.len(), analysis.bands.mid.len());
        assert!(!analysis.beat_info.beats.is_empty());
        assert!(analysis.events.timeline.iter().any(|e| e.kind == EventKind::Bass));

        let sections = &analysis.sections;
        assert_eq!(sections[0].start_time, 0.0);
        assert!((sections[sections.len() - 1].end_time - analysis.events.duration).abs() < 1e-6);

        let counted: usize = analysis.statistics.event_counts.values().sum();
        assert_eq!(counted, analysis.events.timeline.len());
        assert_eq!(analysis.statistics.total_beats, analysis.beat_info.beats.len());
        assert!(analysis.statistics.peak_volume > 0.8);
    }

    #[test]
    fn test_silence_gives_fallbacks() {
        let analysis = processor().analyze_samples(&vec![0.0; SR as usize * 3], SR, "silence").unwrap();

        assert!(analysis.events.timeline.is_empty());
        assert_eq!(analysis.beat_info.bpm, 120.0);
        assert_eq!(analysis.beat_info.confidence, 0.0);
        assert_eq!(analysis.sections.len(), 1);
        assert_eq!(analysis.sections[0].kind, SectionKind::Verse);
        assert_eq!(analysis.statistics.energy_profile, "Low");
    }

    #[test]
    fn test_prescan_stereo_wav_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("kicks.wav");
        let json_path = dir.path().join("kicks.json");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SR,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
        for sample in kick_track(4.0) {
            let value = (sample * i16::MAX as f32) as i16;
            writer.write_sample(value).unwrap();
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();

        let processor = processor();
        let analysis = processor.prescan_file(&wav_path).unwrap();
        assert_eq!(analysis.file_info.channels, 2);
        assert_eq!(analysis.file_info.total_samples, SR as usize * 4);
        assert!((analysis.duration() - 4.0).abs() < 1e-3);

        PrescanProcessor::save_analysis(&analysis, &json_path).unwrap();
        let loaded = PrescanProcessor::load_analysis(&json_path).unwrap();
        assert_eq!(loaded.events.timeline, analysis.events.timeline);
        assert_eq!(loaded.sections, analysis.sections);
        assert_eq!(loaded.beat_info, analysis.beat_info);
        // The spectrogram is display-only and not persisted
        assert!(loaded.bands.spectrogram.is_empty());

        let track = loaded.to_track_data();
        assert_eq!(track.events.len(), analysis.events.timeline.len());
        assert!(track.sections.is_some());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(processor().prescan_file("/nonexistent/track.wav").is_err());
    }

    #[test]
    fn test_invalid_tuning_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            r#"{ "beats": { "histogram_bin": 0.0 } }"#,
            r#"{ "beats": { "bpm_min": 100.0, "bpm_max": 90.0 } }"#,
            r#"{ "events": { "gravity": 0.0 } }"#,
            r#"{ "events": { "physics_frame_rate": 0.0 } }"#,
        ];

        for (i, json) in cases.iter().enumerate() {
            let path = dir.path().join(format!("tuning{i}.json"));
            std::fs::write(&path, json).unwrap();
            let tuning = TuningConfig::load(&path).unwrap();

            let result = PrescanProcessor::new(&tuning);
            assert!(
                matches!(result, Err(crate::error::ChoreoError::InvalidConfig(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn test_screen_height_must_be_positive() {
        let mut processor = processor();
        assert!(processor.set_screen_height(f32::NAN).is_err());
        assert!(processor.set_screen_height(1080.0).is_ok());
    }
}
