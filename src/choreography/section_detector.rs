use log::debug;
use serde::{Deserialize, Serialize};

use super::{MusicSection, SectionKind};
use crate::audio::AudioEvent;
use crate::error::{ensure_positive, Result};

/// Windowing and classification thresholds for structure detection
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    /// Seconds per analysis window
    pub window_size: f32,
    /// Shorter sections are folded into their predecessor
    pub min_section_duration: f32,
    /// Energy used when there is nothing to measure
    pub default_energy: f32,
    /// Window-to-window energy change that counts as rising/falling
    pub trend_threshold: f32,

    pub high_threshold_factor: f32,
    pub low_threshold_factor: f32,

    pub climax_count_threshold: usize,
    pub climax_energy_factor: f32,
    pub chorus_energy_factor: f32,
    pub chorus_event_count: usize,
    pub prechorus_energy_factor: f32,
    pub low_event_count: usize,

    /// Fractions of the track before/after which low windows read as intro/outro
    pub intro_position: f32,
    pub outro_position: f32,

    /// Seconds around a section start that count as "near a transition"
    pub transition_threshold: f32,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            window_size: 4.0,
            min_section_duration: 8.0,
            default_energy: 0.5,
            trend_threshold: 0.05,
            high_threshold_factor: 0.5,
            low_threshold_factor: 0.6,
            climax_count_threshold: 3,
            climax_energy_factor: 1.1,
            chorus_energy_factor: 0.85,
            chorus_event_count: 8,
            prechorus_energy_factor: 0.9,
            low_event_count: 3,
            intro_position: 0.15,
            outro_position: 0.85,
            transition_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone)]
struct Window {
    start_time: f32,
    end_time: f32,
    avg_energy: f32,
    event_count: usize,
    climax_count: usize,
    trend: Trend,
}

/// Splits a track into intro/verse/chorus/... spans from its event timeline.
pub struct SectionDetector {
    config: SectionConfig,
}

impl SectionDetector {
    pub fn new(config: SectionConfig) -> Result<Self> {
        ensure_positive("window_size", config.window_size)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SectionConfig {
        &self.config
    }

    /// Partition `[0, duration)` into contiguous sections.
    ///
    /// An empty timeline or a non-positive duration yields one verse section
    /// at the default energy.
    pub fn detect(&self, events: &[AudioEvent], duration: f32) -> Vec<MusicSection> {
        if events.is_empty() || duration.is_nan() || duration <= 0.0 {
            return vec![self.fallback_section(duration)];
        }

        let mut windows = self.build_windows(events, duration);
        self.assign_trends(&mut windows);
        let raw = self.classify(&windows, duration);
        let merged = merge_same_kind(raw);
        let sections = self.enforce_min_duration(merged, duration);

        debug!(
            "Detected {} sections: {}",
            sections.len(),
            sections
                .iter()
                .map(|s| format!("{}@{:.1}", s.kind.as_str(), s.start_time))
                .collect::<Vec<_>>()
                .join(", ")
        );

        sections
    }

    fn fallback_section(&self, duration: f32) -> MusicSection {
        MusicSection {
            kind: SectionKind::Verse,
            start_time: 0.0,
            end_time: duration,
            energy: self.config.default_energy,
            density: 0.0,
        }
    }

    fn build_windows(&self, events: &[AudioEvent], duration: f32) -> Vec<Window> {
        let size = self.config.window_size;
        let mut windows = Vec::with_capacity((duration / size).ceil() as usize);

        let mut index = 0usize;
        loop {
            let start_time = index as f32 * size;
            if start_time >= duration {
                break;
            }
            // The last window is clipped to the track
            let next_start = (index + 1) as f32 * size;
            let end_time = if next_start >= duration { duration } else { next_start };

            let mut energy_sum = 0.0;
            let mut event_count = 0;
            let mut climax_count = 0;
            for event in events
                .iter()
                .filter(|e| e.explode_time >= start_time && e.explode_time < end_time)
            {
                energy_sum += event.energy;
                event_count += 1;
                if event.is_climax {
                    climax_count += 1;
                }
            }

            windows.push(Window {
                start_time,
                end_time,
                avg_energy: if event_count > 0 {
                    energy_sum / event_count as f32
                } else {
                    0.0
                },
                event_count,
                climax_count,
                trend: Trend::Stable,
            });
            index += 1;
        }

        windows
    }

    fn assign_trends(&self, windows: &mut [Window]) {
        let threshold = self.config.trend_threshold;
        for i in 1..windows.len() {
            let diff = windows[i].avg_energy - windows[i - 1].avg_energy;
            windows[i].trend = if diff > threshold {
                Trend::Rising
            } else if diff < -threshold {
                Trend::Falling
            } else {
                Trend::Stable
            };
        }
    }

    fn classify(&self, windows: &[Window], duration: f32) -> Vec<MusicSection> {
        let cfg = &self.config;

        // Silent windows do not drag the average down
        let active: Vec<f32> = windows
            .iter()
            .map(|w| w.avg_energy)
            .filter(|&e| e > 0.0)
            .collect();
        let avg_energy = if active.is_empty() {
            cfg.default_energy
        } else {
            active.iter().sum::<f32>() / active.len() as f32
        };
        let max_energy = active.iter().fold(cfg.default_energy, |m, &e| m.max(e));

        let high_threshold = avg_energy + (max_energy - avg_energy) * cfg.high_threshold_factor;
        let low_threshold = avg_energy * cfg.low_threshold_factor;

        windows
            .iter()
            .map(|w| {
                let energy = w.avg_energy;
                let kind = if w.climax_count > cfg.climax_count_threshold
                    || energy > high_threshold * cfg.climax_energy_factor
                {
                    SectionKind::Climax
                } else if energy > high_threshold * cfg.chorus_energy_factor
                    && w.event_count > cfg.chorus_event_count
                {
                    SectionKind::Chorus
                } else if w.trend == Trend::Rising && energy > avg_energy * cfg.prechorus_energy_factor {
                    SectionKind::Prechorus
                } else if energy < low_threshold || w.event_count < cfg.low_event_count {
                    if w.start_time < duration * cfg.intro_position {
                        SectionKind::Intro
                    } else if w.end_time > duration * cfg.outro_position {
                        SectionKind::Outro
                    } else {
                        SectionKind::Bridge
                    }
                } else {
                    SectionKind::Verse
                };

                MusicSection {
                    kind,
                    start_time: w.start_time,
                    end_time: w.end_time,
                    energy,
                    density: w.event_count as f32 / cfg.window_size,
                }
            })
            .collect()
    }

    fn enforce_min_duration(&self, sections: Vec<MusicSection>, duration: f32) -> Vec<MusicSection> {
        let mut result: Vec<MusicSection> = Vec::with_capacity(sections.len());

        for section in sections {
            match result.last_mut() {
                Some(prev) if section.duration() < self.config.min_section_duration => {
                    absorb(prev, &section);
                }
                _ => result.push(section),
            }
        }

        if result.is_empty() {
            result.push(self.fallback_section(duration));
        }
        result
    }
}

/// Extend `into` over `next`, averaging energy and density pairwise
fn absorb(into: &mut MusicSection, next: &MusicSection) {
    into.end_time = next.end_time;
    into.energy = (into.energy + next.energy) / 2.0;
    into.density = (into.density + next.density) / 2.0;
}

fn merge_same_kind(sections: Vec<MusicSection>) -> Vec<MusicSection> {
    let mut merged: Vec<MusicSection> = Vec::with_capacity(sections.len());
    for section in sections {
        match merged.last_mut() {
            Some(current) if current.kind == section.kind => absorb(current, &section),
            _ => merged.push(section),
        }
    }
    merged
}

/// The section containing `time`, if any
pub fn section_at(sections: &[MusicSection], time: f32) -> Option<&MusicSection> {
    sections.iter().find(|s| s.contains(time))
}

/// Whether `time` lies within `threshold` seconds of any section start
pub fn is_near_transition(sections: &[MusicSection], time: f32, threshold: f32) -> bool {
    sections
        .iter()
        .any(|s| (time - s.start_time).abs() < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EventKind;
    use proptest::prelude::*;

    fn event(time: f32, energy: f32, is_climax: bool) -> AudioEvent {
        AudioEvent {
            launch_time: time - 1.0,
            explode_time: time,
            kind: EventKind::Bass,
            is_climax,
            target_y: 200.0,
            energy,
        }
    }

    /// `per_window` events spread across each 4s window with the given energies
    fn timeline(energies: &[f32], per_window: usize, climax_windows: &[usize]) -> Vec<AudioEvent> {
        let mut events = Vec::new();
        for (w, &energy) in energies.iter().enumerate() {
            for k in 0..per_window {
                let t = w as f32 * 4.0 + (k as f32 + 0.5) * 4.0 / per_window as f32;
                events.push(event(t, energy, climax_windows.contains(&w)));
            }
        }
        events
    }

    fn detector() -> SectionDetector {
        SectionDetector::new(SectionConfig::default()).unwrap()
    }

    fn assert_partition(sections: &[MusicSection], duration: f32) {
        assert!(!sections.is_empty());
        assert_eq!(sections[0].start_time, 0.0);
        assert_eq!(sections[sections.len() - 1].end_time, duration);
        for pair in sections.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
    }

    #[test]
    fn test_empty_timeline_is_one_verse() {
        let sections = detector().detect(&[], 30.0);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].kind, SectionKind::Verse);
        assert_eq!(sections[0].end_time, 30.0);
        assert_eq!(sections[0].energy, 0.5);
    }

    #[test]
    fn test_non_positive_duration_is_one_verse() {
        let sections = detector().detect(&[event(1.0, 0.5, false)], 0.0);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].kind, SectionKind::Verse);
    }

    #[test]
    fn test_zero_window_size_is_rejected() {
        let config = SectionConfig {
            window_size: 0.0,
            ..SectionConfig::default()
        };
        assert!(SectionDetector::new(config).is_err());
    }

    #[test]
    fn test_quiet_edges_become_intro_and_outro() {
        // 10 windows (40s): sparse ends, steady middle
        let events = timeline(&[0.0, 0.0, 0.4, 0.4, 0.4, 0.4, 0.4, 0.4, 0.0, 0.0], 5, &[]);

        let sections = detector().detect(&events, 40.0);
        assert_partition(&sections, 40.0);

        assert_eq!(sections.first().map(|s| s.kind), Some(SectionKind::Intro));
        assert_eq!(sections.last().map(|s| s.kind), Some(SectionKind::Outro));
        assert!(sections.iter().any(|s| s.kind == SectionKind::Verse));
    }

    #[test]
    fn test_climax_flags_mark_climax_section() {
        let energies = [0.4; 8];
        let events = timeline(&energies, 6, &[4, 5]);
        let sections = detector().detect(&events, 32.0);
        assert_partition(&sections, 32.0);

        let climax = section_at(&sections, 18.0).unwrap();
        assert_eq!(climax.kind, SectionKind::Climax);
        assert_eq!(climax.start_time, 16.0);
        assert_eq!(climax.end_time, 24.0);
    }

    #[test]
    fn test_short_sections_fold_into_predecessor() {
        // One climax window (4s) in the middle is below the 8s minimum
        let energies = [0.4; 6];
        let events = timeline(&energies, 6, &[2]);
        let sections = detector().detect(&events, 24.0);
        assert_partition(&sections, 24.0);

        assert!(sections.iter().all(|s| s.kind != SectionKind::Climax));
        for section in &sections[1..] {
            assert!(section.duration() >= 8.0);
        }
    }

    #[test]
    fn test_merge_averages_energy_pairwise() {
        let a = MusicSection {
            kind: SectionKind::Verse,
            start_time: 0.0,
            end_time: 4.0,
            energy: 0.2,
            density: 1.0,
        };
        let b = MusicSection {
            start_time: 4.0,
            end_time: 8.0,
            energy: 0.6,
            density: 3.0,
            ..a.clone()
        };
        let merged = merge_same_kind(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end_time, 8.0);
        assert!((merged[0].energy - 0.4).abs() < 1e-6);
        assert!((merged[0].density - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_section_at_and_transitions() {
        let sections = vec![
            MusicSection {
                kind: SectionKind::Intro,
                start_time: 0.0,
                end_time: 8.0,
                energy: 0.2,
                density: 1.0,
            },
            MusicSection {
                kind: SectionKind::Chorus,
                start_time: 8.0,
                end_time: 20.0,
                energy: 0.7,
                density: 3.0,
            },
        ];

        assert_eq!(section_at(&sections, 8.0).map(|s| s.kind), Some(SectionKind::Chorus));
        assert!(section_at(&sections, 20.0).is_none());
        assert!(is_near_transition(&sections, 8.3, 0.5));
        assert!(!is_near_transition(&sections, 9.0, 0.5));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_sections_partition_track(
            raw in prop::collection::vec((0.0f32..1.0, 0.0f32..1.0, any::<bool>()), 1..80),
            duration in 1.0f32..120.0,
        ) {
            let events: Vec<AudioEvent> = raw
                .iter()
                .map(|&(pos, energy, climax)| event(pos * duration, energy, climax))
                .collect();
            let sections = detector().detect(&events, duration);

            prop_assert!(!sections.is_empty());
            prop_assert_eq!(sections[0].start_time, 0.0);
            prop_assert_eq!(sections[sections.len() - 1].end_time, duration);
            for pair in sections.windows(2) {
                prop_assert_eq!(pair[0].end_time, pair[1].start_time);
            }
            for section in &sections[1..] {
                prop_assert!(section.duration() >= 8.0);
            }
        }
    }
}
