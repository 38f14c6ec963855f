use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::patterns::{Launcher, PatternExecutor, PatternLibrary};
use super::rule_engine::{MusicContext, RuleEngine, RuleTuning};
use super::section_detector::{is_near_transition, section_at, SectionConfig, SectionDetector};
use super::{LaunchCommand, LaunchParams, MusicSection, PatternKind, SectionKind};
use crate::audio::{AudioEvent, BeatInfo, EventKind};
use crate::config::TuningConfig;
use crate::error::Result;

/// Playback-side timing and energy-floor settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoreographerConfig {
    /// Events are handed to the rules this many seconds before they explode
    pub lookahead: f32,
    /// Seconds of history kept for rules that look back
    pub recent_event_window: f32,
    pub recent_event_cap: usize,

    // Energy floor for sparse stretches
    pub launch_tracking_window: f32,
    pub sparse_threshold: usize,
    pub sparse_boost_step: f32,
    pub energy_floor: f32,

    // Manual trigger defaults
    pub trigger_target_ratio: f32,
    pub trigger_energy: f32,
}

impl Default for ChoreographerConfig {
    fn default() -> Self {
        Self {
            lookahead: 0.5,
            recent_event_window: 2.0,
            recent_event_cap: 64,
            launch_tracking_window: 3.0,
            sparse_threshold: 3,
            sparse_boost_step: 0.15,
            energy_floor: 0.55,
            trigger_target_ratio: 0.25,
            trigger_energy: 0.6,
        }
    }
}

/// Analysis results for one track
#[derive(Debug, Clone)]
pub struct TrackData {
    pub events: Vec<AudioEvent>,
    pub beat_info: BeatInfo,
    /// Precomputed sections; detected from `events` when absent
    pub sections: Option<Vec<MusicSection>>,
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoreographyStats {
    pub total_events: usize,
    pub total_sections: usize,
    pub section_breakdown: BTreeMap<SectionKind, usize>,
    pub event_breakdown: BTreeMap<EventKind, usize>,
    pub bpm: f32,
    pub duration: f32,
}

/// Replays an analyzed track against the playback clock.
///
/// Events within the lookahead window are run through the rule engine and the
/// resulting commands wait in a pending list until their launch time comes up.
pub struct Choreographer {
    config: ChoreographerConfig,
    section_detector: SectionDetector,
    rule_engine: RuleEngine,
    patterns: Box<dyn PatternExecutor>,

    // Track state
    events: Vec<AudioEvent>,
    sections: Vec<MusicSection>,
    beat_info: Option<BeatInfo>,
    duration: f32,

    // Playback state
    event_index: usize,
    pending: Vec<LaunchCommand>,
    recent_events: Vec<AudioEvent>,
    recent_launches: Vec<f32>,
}

impl Choreographer {
    pub fn new(
        config: ChoreographerConfig,
        sections: SectionConfig,
        rules: &RuleTuning,
        patterns: Box<dyn PatternExecutor>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            section_detector: SectionDetector::new(sections)?,
            rule_engine: RuleEngine::new(rules),
            patterns,
            events: Vec::new(),
            sections: Vec::new(),
            beat_info: None,
            duration: 0.0,
            event_index: 0,
            pending: Vec::new(),
            recent_events: Vec::new(),
            recent_launches: Vec::new(),
        })
    }

    /// Built from a full tuning file with the headless pattern library
    pub fn from_tuning(tuning: &TuningConfig) -> Result<Self> {
        Self::new(
            tuning.choreographer,
            tuning.sections,
            &tuning.rules,
            Box::new(PatternLibrary::with_even_spread()),
        )
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rule_engine
    }

    pub fn rule_engine_mut(&mut self) -> &mut RuleEngine {
        &mut self.rule_engine
    }

    /// One-time setup for a track: sort events, find sections, clear playback state.
    pub fn prepare_track(&mut self, data: TrackData) {
        let mut events = data.events;
        events.sort_by(|a, b| a.explode_time.total_cmp(&b.explode_time));

        self.sections = match data.sections {
            Some(sections) if !sections.is_empty() => sections,
            _ => self.section_detector.detect(&events, data.duration),
        };
        self.events = events;
        self.duration = data.duration;
        self.beat_info = Some(data.beat_info);
        self.reset();

        info!(
            "Track prepared: {} events, {} sections, {:.1} BPM, {:.1}s",
            self.events.len(),
            self.sections.len(),
            self.beat_info.as_ref().map_or(0.0, |b| b.bpm),
            self.duration
        );
        for section in &self.sections {
            debug!(
                "  {:<9} {:>6.1}s - {:>6.1}s energy {:.2} density {:.2}",
                section.kind.as_str(),
                section.start_time,
                section.end_time,
                section.energy,
                section.density
            );
        }
    }

    /// Rewind playback. Pending commands and all rule cooldowns are discarded.
    pub fn reset(&mut self) {
        self.event_index = 0;
        self.pending.clear();
        self.recent_events.clear();
        self.recent_launches.clear();
        self.rule_engine.reset();
    }

    /// Advance to `current_time` (seconds). Call once per host tick.
    pub fn update(&mut self, current_time: f32, launcher: &mut dyn Launcher) {
        if self.events.is_empty() {
            return;
        }

        let horizon = current_time + self.config.lookahead;
        while self.event_index < self.events.len()
            && self.events[self.event_index].explode_time <= horizon
        {
            let event = self.events[self.event_index].clone();
            self.process_event(event, current_time, launcher);
            self.event_index += 1;
        }

        self.execute_due(current_time, launcher);

        let window = self.config.recent_event_window;
        self.recent_events
            .retain(|e| current_time - e.explode_time < window);
    }

    fn process_event(&mut self, event: AudioEvent, current_time: f32, launcher: &dyn Launcher) {
        self.recent_events.push(event);
        let cap = self.config.recent_event_cap.max(1);
        if self.recent_events.len() > cap {
            let excess = self.recent_events.len() - cap;
            self.recent_events.drain(..excess);
        }

        let Some(current_event) = self.recent_events.last() else {
            return;
        };
        let context = MusicContext {
            current_time,
            current_event,
            current_section: section_at(&self.sections, current_time),
            beat_info: self.beat_info.as_ref(),
            duration: self.duration,
            screen: launcher.screen_size(),
            recent_events: &self.recent_events,
        };

        let commands = self.rule_engine.evaluate(&context);
        self.pending.extend(commands);
    }

    fn execute_due(&mut self, current_time: f32, launcher: &mut dyn Launcher) {
        if self.pending.is_empty() {
            return;
        }

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|c| c.launch_time <= current_time);
        self.pending = waiting;

        for command in due {
            self.execute_command(command, launcher);
        }
    }

    fn execute_command(&mut self, command: LaunchCommand, launcher: &mut dyn Launcher) {
        let now = command.launch_time;
        let window = self.config.launch_tracking_window;
        self.recent_launches.retain(|&t| now - t < window);

        let params = self.apply_energy_floor(command.params, self.recent_launches.len());
        self.recent_launches.push(now);

        if let Err(e) = self.patterns.execute(command.pattern, launcher, &params) {
            warn!(
                "Failed to execute pattern {} at {:.2}s: {}",
                command.pattern.as_str(),
                now,
                e
            );
        }
    }

    /// Boost energy when few shells went up recently; the sparser, the bigger.
    fn apply_energy_floor(&self, mut params: LaunchParams, recent_count: usize) -> LaunchParams {
        let cfg = &self.config;
        if recent_count > cfg.sparse_threshold {
            return params;
        }

        params.energy = Some(match params.energy {
            Some(energy) => {
                let boost = 1.0 + (cfg.sparse_threshold - recent_count) as f32 * cfg.sparse_boost_step;
                (energy * boost).max(cfg.energy_floor).min(1.0)
            }
            None => cfg.energy_floor,
        });
        params
    }

    /// Fire a pattern right now, outside the rule engine.
    ///
    /// Fields left unset in `overrides` default to a quarter of the screen
    /// height and a moderate energy.
    pub fn trigger_pattern(
        &mut self,
        pattern: PatternKind,
        overrides: LaunchParams,
        launcher: &mut dyn Launcher,
    ) -> Result<()> {
        let screen = launcher.screen_size();
        let defaults = LaunchParams::at_height(
            screen.height * self.config.trigger_target_ratio,
            self.config.trigger_energy,
        );
        let params = overrides.with_defaults(&defaults);
        self.patterns.execute(pattern, launcher, &params)
    }

    pub fn current_section(&self, time: f32) -> Option<&MusicSection> {
        section_at(&self.sections, time)
    }

    pub fn sections(&self) -> &[MusicSection] {
        &self.sections
    }

    pub fn beat_info(&self) -> Option<&BeatInfo> {
        self.beat_info.as_ref()
    }

    pub fn is_near_transition(&self, time: f32) -> bool {
        is_near_transition(
            &self.sections,
            time,
            self.section_detector.config().transition_threshold,
        )
    }

    /// Commands decided but not yet launched
    pub fn pending_commands(&self) -> &[LaunchCommand] {
        &self.pending
    }

    pub fn stats(&self) -> ChoreographyStats {
        let mut section_breakdown = BTreeMap::new();
        for section in &self.sections {
            *section_breakdown.entry(section.kind).or_insert(0) += 1;
        }
        let mut event_breakdown = BTreeMap::new();
        for event in &self.events {
            *event_breakdown.entry(event.kind).or_insert(0) += 1;
        }

        ChoreographyStats {
            total_events: self.events.len(),
            total_sections: self.sections.len(),
            section_breakdown,
            event_breakdown,
            bpm: self.beat_info.as_ref().map_or(0.0, |b| b.bpm),
            duration: self.duration,
        }
    }
}
