use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    FireworkKind, LaunchCommand, LaunchParams, MusicSection, PatternKind, ScreenSize, SectionKind,
};
use crate::audio::beat_detector::{is_on_beat, nearest_beat};
use crate::audio::{AudioEvent, BeatInfo, EventKind};
use crate::error::{ChoreoError, Result};

/// Everything a rule may look at while deciding, rebuilt for every event.
#[derive(Debug, Clone, Copy)]
pub struct MusicContext<'a> {
    /// Playback position in seconds
    pub current_time: f32,
    pub current_event: &'a AudioEvent,
    pub current_section: Option<&'a MusicSection>,
    pub beat_info: Option<&'a BeatInfo>,
    /// Track length in seconds
    pub duration: f32,
    pub screen: ScreenSize,
    /// Oldest first; includes `current_event`
    pub recent_events: &'a [AudioEvent],
}

impl MusicContext<'_> {
    pub fn section_kind(&self) -> Option<SectionKind> {
        self.current_section.map(|s| s.kind)
    }

    pub fn remaining(&self) -> f32 {
        self.duration - self.current_time
    }
}

pub type RuleCondition = Box<dyn Fn(&MusicContext<'_>) -> bool + Send + Sync>;
pub type RuleAction = Box<dyn Fn(&MusicContext<'_>) -> Option<LaunchCommand> + Send + Sync>;

/// A prioritized, cooldown-gated decision: when `condition` holds, `action`
/// may produce one command.
pub struct ChoreographyRule {
    pub id: String,
    pub priority: i32,
    /// Seconds that must pass after firing before the rule may fire again
    pub cooldown: f32,
    /// Stop evaluating lower-priority rules once this one fires
    pub exclusive: bool,
    condition: RuleCondition,
    action: RuleAction,
    last_fired: Option<f32>,
}

impl ChoreographyRule {
    pub fn new<C, A>(
        id: impl Into<String>,
        priority: i32,
        cooldown: f32,
        exclusive: bool,
        condition: C,
        action: A,
    ) -> Self
    where
        C: Fn(&MusicContext<'_>) -> bool + Send + Sync + 'static,
        A: Fn(&MusicContext<'_>) -> Option<LaunchCommand> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            priority,
            cooldown,
            exclusive,
            condition: Box::new(condition),
            action: Box::new(action),
            last_fired: None,
        }
    }

    pub fn last_fired(&self) -> Option<f32> {
        self.last_fired
    }

    fn is_cooling_down(&self, now: f32) -> bool {
        self.last_fired.is_some_and(|last| now - last < self.cooldown)
    }
}

impl fmt::Debug for ChoreographyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoreographyRule")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("cooldown", &self.cooldown)
            .field("exclusive", &self.exclusive)
            .field("last_fired", &self.last_fired)
            .finish()
    }
}

// Per-rule tuning. Heights are fractions of screen height.

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FinaleTuning {
    pub cooldown: f32,
    pub remaining_seconds: f32,
    pub min_energy: f32,
    pub target_y: f32,
}

impl Default for FinaleTuning {
    fn default() -> Self {
        Self {
            cooldown: 2.0,
            remaining_seconds: 10.0,
            min_energy: 0.6,
            target_y: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimaxSalvoTuning {
    pub cooldown: f32,
    pub target_y: f32,
    pub count_base: f32,
    pub count_energy_scale: f32,
    pub interval_ms: f32,
}

impl Default for ClimaxSalvoTuning {
    fn default() -> Self {
        Self {
            cooldown: 4.0,
            target_y: 0.3,
            count_base: 8.0,
            count_energy_scale: 12.0,
            interval_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatDropTuning {
    pub cooldown: f32,
    /// How many trailing events make up the "quiet before the drop"
    pub recent_energy_window: usize,
    pub recent_energy_threshold: f32,
    pub near_beat_tolerance: f32,
    pub min_energy: f32,
    pub target_y: f32,
    pub count: u32,
}

impl Default for BeatDropTuning {
    fn default() -> Self {
        Self {
            cooldown: 8.0,
            recent_energy_window: 5,
            recent_energy_threshold: 0.3,
            near_beat_tolerance: 0.1,
            min_energy: 0.5,
            target_y: 0.25,
            count: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionTransitionTuning {
    pub cooldown: f32,
    pub near_start_window: f32,
    pub target_y: f32,
}

impl Default for SectionTransitionTuning {
    fn default() -> Self {
        Self {
            cooldown: 2.0,
            near_start_window: 0.5,
            target_y: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusSymmetricTuning {
    pub cooldown: f32,
    pub min_energy: f32,
    pub spread: f32,
}

impl Default for ChorusSymmetricTuning {
    fn default() -> Self {
        Self {
            cooldown: 1.0,
            min_energy: 0.4,
            spread: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PianoBeatSyncTuning {
    pub cooldown: f32,
    pub beat_tolerance: f32,
    pub min_energy: f32,
    pub energy_scale: f32,
    pub hue: f32,
}

impl Default for PianoBeatSyncTuning {
    fn default() -> Self {
        Self {
            cooldown: 0.5,
            beat_tolerance: 0.1,
            min_energy: 0.35,
            energy_scale: 1.5,
            hue: 45.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BassImpactTuning {
    pub cooldown: f32,
    pub min_energy: f32,
}

impl Default for BassImpactTuning {
    fn default() -> Self {
        Self {
            cooldown: 0.3,
            min_energy: 0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MidAccentTuning {
    pub cooldown: f32,
    pub min_energy: f32,
    pub energy_scale: f32,
}

impl Default for MidAccentTuning {
    fn default() -> Self {
        Self {
            cooldown: 0.4,
            min_energy: 0.15,
            energy_scale: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatPulseTuning {
    pub cooldown: f32,
    pub min_confidence: f32,
    pub beat_tolerance: f32,
    pub target_y: f32,
    pub count: u32,
}

impl Default for BeatPulseTuning {
    fn default() -> Self {
        Self {
            cooldown: 2.0,
            min_confidence: 0.5,
            beat_tolerance: 0.05,
            target_y: 0.25,
            count: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientScatterTuning {
    pub cooldown: f32,
    pub max_energy: f32,
    pub target_y: f32,
    pub count: u32,
    pub energy: f32,
}

impl Default for AmbientScatterTuning {
    fn default() -> Self {
        Self {
            cooldown: 3.0,
            max_energy: 0.2,
            target_y: 0.3,
            count: 3,
            energy: 0.4,
        }
    }
}

/// Tuning for the ten built-in rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTuning {
    pub finale: FinaleTuning,
    pub climax_salvo: ClimaxSalvoTuning,
    pub beat_drop: BeatDropTuning,
    pub section_transition: SectionTransitionTuning,
    pub chorus_symmetric: ChorusSymmetricTuning,
    pub piano_beat_sync: PianoBeatSyncTuning,
    pub bass_impact: BassImpactTuning,
    pub mid_accent: MidAccentTuning,
    pub beat_pulse: BeatPulseTuning,
    pub ambient_scatter: AmbientScatterTuning,
}

fn command(pattern: PatternKind, ctx: &MusicContext<'_>, params: LaunchParams) -> Option<LaunchCommand> {
    Some(LaunchCommand {
        pattern,
        launch_time: ctx.current_time,
        params,
    })
}

fn transition_pattern(kind: SectionKind) -> PatternKind {
    match kind {
        SectionKind::Intro | SectionKind::Outro => PatternKind::Scatter,
        SectionKind::Verse => PatternKind::Single,
        SectionKind::Prechorus => PatternKind::Rising,
        SectionKind::Chorus => PatternKind::Symmetric,
        SectionKind::Bridge => PatternKind::Cross,
        SectionKind::Climax => PatternKind::Salvo,
    }
}

/// The built-in rule set, highest priority first
pub fn default_rules(tuning: &RuleTuning) -> Vec<ChoreographyRule> {
    let finale = tuning.finale;
    let salvo = tuning.climax_salvo;
    let beat_drop = tuning.beat_drop;
    let transition = tuning.section_transition;
    let chorus = tuning.chorus_symmetric;
    let piano = tuning.piano_beat_sync;
    let bass = tuning.bass_impact;
    let mid = tuning.mid_accent;
    let pulse = tuning.beat_pulse;
    let ambient = tuning.ambient_scatter;

    vec![
        // Grand finale in the closing seconds
        ChoreographyRule::new(
            "finale",
            100,
            finale.cooldown,
            true,
            move |ctx| {
                ctx.remaining() < finale.remaining_seconds
                    && ctx.current_event.energy > finale.min_energy
            },
            move |ctx| {
                command(
                    PatternKind::Finale,
                    ctx,
                    LaunchParams::at_height(
                        ctx.screen.height * finale.target_y,
                        ctx.current_event.energy,
                    ),
                )
            },
        ),
        ChoreographyRule::new(
            "climax_salvo",
            90,
            salvo.cooldown,
            true,
            |ctx| {
                ctx.section_kind() == Some(SectionKind::Climax)
                    && ctx.current_event.is_climax
                    && ctx.current_event.kind == EventKind::Bass
            },
            move |ctx| {
                let energy = ctx.current_event.energy;
                command(
                    PatternKind::Salvo,
                    ctx,
                    LaunchParams {
                        count: Some((salvo.count_base + energy * salvo.count_energy_scale).floor() as u32),
                        interval_ms: Some(salvo.interval_ms),
                        ..LaunchParams::at_height(ctx.screen.height * salvo.target_y, energy)
                    },
                )
            },
        ),
        // First strong hit on a beat after a quiet stretch
        ChoreographyRule::new(
            "beat_drop",
            85,
            beat_drop.cooldown,
            true,
            move |ctx| {
                let window = beat_drop.recent_energy_window.max(1);
                let Some(beat_info) = ctx.beat_info else {
                    return false;
                };
                if ctx.recent_events.len() < window
                    || !is_on_beat(ctx.current_time, &beat_info.beats, beat_drop.near_beat_tolerance)
                {
                    return false;
                }

                let tail = &ctx.recent_events[ctx.recent_events.len() - window..];
                let recent_energy = tail.iter().map(|e| e.energy).sum::<f32>() / window as f32;
                recent_energy < beat_drop.recent_energy_threshold
                    && ctx.current_event.energy > beat_drop.min_energy
            },
            move |ctx| {
                command(
                    PatternKind::Cluster,
                    ctx,
                    LaunchParams {
                        count: Some(beat_drop.count),
                        x: Some(ctx.screen.width / 2.0),
                        ..LaunchParams::at_height(
                            ctx.screen.height * beat_drop.target_y,
                            ctx.current_event.energy,
                        )
                    },
                )
            },
        ),
        ChoreographyRule::new(
            "section_transition",
            80,
            transition.cooldown,
            false,
            move |ctx| {
                ctx.current_section
                    .is_some_and(|s| ctx.current_time - s.start_time < transition.near_start_window)
            },
            move |ctx| {
                let section = ctx.current_section?;
                command(
                    transition_pattern(section.kind),
                    ctx,
                    LaunchParams::at_height(
                        ctx.screen.height * transition.target_y,
                        ctx.current_event.energy,
                    ),
                )
            },
        ),
        ChoreographyRule::new(
            "chorus_symmetric",
            70,
            chorus.cooldown,
            false,
            move |ctx| {
                ctx.section_kind() == Some(SectionKind::Chorus)
                    && ctx.current_event.kind == EventKind::Bass
                    && ctx.current_event.energy > chorus.min_energy
            },
            move |ctx| {
                command(
                    PatternKind::Symmetric,
                    ctx,
                    LaunchParams {
                        count: Some(2),
                        spread: Some(chorus.spread),
                        ..LaunchParams::at_height(ctx.current_event.target_y, ctx.current_event.energy)
                    },
                )
            },
        ),
        // Piano notes that land on the grid get a warm single shell
        ChoreographyRule::new(
            "piano_beat_sync",
            60,
            piano.cooldown,
            false,
            move |ctx| {
                if ctx.current_event.kind != EventKind::Piano {
                    return false;
                }
                let explode = ctx.current_event.explode_time;
                ctx.beat_info
                    .and_then(|info| nearest_beat(explode, &info.beats))
                    .is_some_and(|beat| (beat - explode).abs() < piano.beat_tolerance)
            },
            move |ctx| {
                let energy = piano
                    .min_energy
                    .max(ctx.current_event.energy * piano.energy_scale);
                command(
                    PatternKind::Single,
                    ctx,
                    LaunchParams {
                        firework: Some(FireworkKind::Piano),
                        hue: Some(piano.hue),
                        ..LaunchParams::at_height(ctx.current_event.target_y, energy)
                    },
                )
            },
        ),
        ChoreographyRule::new(
            "bass_impact",
            50,
            bass.cooldown,
            false,
            move |ctx| {
                ctx.current_event.kind == EventKind::Bass && ctx.current_event.energy > bass.min_energy
            },
            |ctx| {
                let firework = if ctx.current_event.is_climax {
                    FireworkKind::Willow
                } else {
                    FireworkKind::Kiku
                };
                command(
                    PatternKind::Single,
                    ctx,
                    LaunchParams {
                        firework: Some(firework),
                        ..LaunchParams::at_height(ctx.current_event.target_y, ctx.current_event.energy)
                    },
                )
            },
        ),
        ChoreographyRule::new(
            "mid_accent",
            40,
            mid.cooldown,
            false,
            move |ctx| ctx.current_event.kind == EventKind::Mid && ctx.current_event.energy > mid.min_energy,
            move |ctx| {
                command(
                    PatternKind::Single,
                    ctx,
                    LaunchParams {
                        firework: Some(FireworkKind::Botan),
                        ..LaunchParams::at_height(
                            ctx.current_event.target_y,
                            ctx.current_event.energy * mid.energy_scale,
                        )
                    },
                )
            },
        ),
        // Steady pulse on the grid through verses when the tempo is trustworthy
        ChoreographyRule::new(
            "beat_pulse",
            30,
            pulse.cooldown,
            false,
            move |ctx| {
                let Some(beat_info) = ctx.beat_info else {
                    return false;
                };
                beat_info.confidence >= pulse.min_confidence
                    && matches!(
                        ctx.section_kind(),
                        Some(SectionKind::Verse) | Some(SectionKind::Prechorus)
                    )
                    && ctx.current_event.kind == EventKind::Mid
                    && is_on_beat(ctx.current_time, &beat_info.beats, pulse.beat_tolerance)
            },
            move |ctx| {
                let beat_info = ctx.beat_info?;
                command(
                    PatternKind::Pulse,
                    ctx,
                    LaunchParams {
                        count: Some(pulse.count),
                        interval_ms: Some(beat_info.beat_interval * 1000.0),
                        ..LaunchParams::at_height(
                            ctx.screen.height * pulse.target_y,
                            ctx.current_event.energy,
                        )
                    },
                )
            },
        ),
        // Background fill for quiet piano passages
        ChoreographyRule::new(
            "ambient_scatter",
            20,
            ambient.cooldown,
            false,
            move |ctx| {
                ctx.current_event.kind == EventKind::Piano
                    && ctx.section_kind() != Some(SectionKind::Climax)
                    && ctx.current_event.energy < ambient.max_energy
            },
            move |ctx| {
                command(
                    PatternKind::Scatter,
                    ctx,
                    LaunchParams {
                        count: Some(ambient.count),
                        ..LaunchParams::at_height(ctx.screen.height * ambient.target_y, ambient.energy)
                    },
                )
            },
        ),
    ]
}

/// Evaluates rules in descending priority and collects their commands.
///
/// Rule evaluation is a pure function of the context plus each rule's own
/// cooldown memory.
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: Vec<ChoreographyRule>,
}

impl RuleEngine {
    /// Engine loaded with the built-in rules
    pub fn new(tuning: &RuleTuning) -> Self {
        let mut rules = default_rules(tuning);
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        Self { rules }
    }

    /// Engine with no rules registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a rule. Ties in priority keep registration order.
    pub fn add_rule(&mut self, rule: ChoreographyRule) -> Result<()> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(ChoreoError::DuplicateRule(rule.id));
        }
        self.rules.push(rule);
        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        Ok(())
    }

    pub fn evaluate(&mut self, ctx: &MusicContext<'_>) -> Vec<LaunchCommand> {
        let mut commands = Vec::new();

        for rule in &mut self.rules {
            if rule.is_cooling_down(ctx.current_time) || !(rule.condition)(ctx) {
                continue;
            }

            if let Some(command) = (rule.action)(ctx) {
                debug!(
                    "Rule {} fired at {:.2}s -> {}",
                    rule.id,
                    ctx.current_time,
                    command.pattern.as_str()
                );
                commands.push(command);
                rule.last_fired = Some(ctx.current_time);

                if rule.exclusive {
                    break;
                }
            }
        }

        commands
    }

    /// Forget every rule's cooldown memory
    pub fn reset(&mut self) {
        for rule in &mut self.rules {
            rule.last_fired = None;
        }
    }

    pub fn rule(&self, id: &str) -> Option<&ChoreographyRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Returns false when no rule has this id
    pub fn set_rule_cooldown(&mut self, id: &str, cooldown: f32) -> bool {
        match self.rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.cooldown = cooldown;
                true
            }
            None => false,
        }
    }

    /// Rule ids in evaluation order
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: ScreenSize = ScreenSize {
        width: 1200.0,
        height: 800.0,
    };

    fn event(kind: EventKind, time: f32, energy: f32, is_climax: bool) -> AudioEvent {
        AudioEvent {
            launch_time: time - 1.0,
            explode_time: time,
            kind,
            is_climax,
            target_y: 180.0,
            energy,
        }
    }

    fn section(kind: SectionKind, start: f32, end: f32) -> MusicSection {
        MusicSection {
            kind,
            start_time: start,
            end_time: end,
            energy: 0.5,
            density: 2.0,
        }
    }

    fn grid(interval: f32, duration: f32, confidence: f32) -> BeatInfo {
        let count = (duration / interval) as usize;
        BeatInfo {
            bpm: 60.0 / interval,
            beats: (0..count).map(|i| i as f32 * interval).collect(),
            confidence,
            beat_interval: interval,
        }
    }

    fn context<'a>(
        time: f32,
        event: &'a AudioEvent,
        section: Option<&'a MusicSection>,
        beats: Option<&'a BeatInfo>,
        recent: &'a [AudioEvent],
    ) -> MusicContext<'a> {
        MusicContext {
            current_time: time,
            current_event: event,
            current_section: section,
            beat_info: beats,
            duration: 100.0,
            screen: SCREEN,
            recent_events: recent,
        }
    }

    #[test]
    fn test_rules_are_sorted_by_priority() {
        let engine = RuleEngine::new(&RuleTuning::default());
        assert_eq!(
            engine.rule_ids(),
            vec![
                "finale",
                "climax_salvo",
                "beat_drop",
                "section_transition",
                "chorus_symmetric",
                "piano_beat_sync",
                "bass_impact",
                "mid_accent",
                "beat_pulse",
                "ambient_scatter",
            ]
        );
    }

    #[test]
    fn test_finale_fires_alone_near_the_end() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let bass = event(EventKind::Bass, 91.0, 0.7, true);
        let climax = section(SectionKind::Climax, 88.0, 100.0);
        let recent = [bass.clone()];

        let commands = engine.evaluate(&context(91.0, &bass, Some(&climax), None, &recent));

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].pattern, PatternKind::Finale);
        assert_eq!(commands[0].params.target_y, Some(800.0 * 0.2));
        assert_eq!(commands[0].params.energy, Some(0.7));
        assert_eq!(commands[0].launch_time, 91.0);
    }

    #[test]
    fn test_exclusive_rule_blocks_lower_priorities() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        // Matches climax_salvo (exclusive) and bass_impact
        let bass = event(EventKind::Bass, 40.0, 0.5, true);
        let climax = section(SectionKind::Climax, 32.0, 48.0);
        let recent = [bass.clone()];

        let commands = engine.evaluate(&context(40.0, &bass, Some(&climax), None, &recent));

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].pattern, PatternKind::Salvo);
        assert_eq!(commands[0].params.count, Some(14));
        assert_eq!(commands[0].params.interval_ms, Some(50.0));
        assert_eq!(commands[0].params.target_y, Some(800.0 * 0.3));
    }

    #[test]
    fn test_non_exclusive_rules_stack() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let bass = event(EventKind::Bass, 16.2, 0.6, false);
        let chorus = section(SectionKind::Chorus, 16.0, 32.0);
        let recent = [bass.clone()];

        let commands = engine.evaluate(&context(16.2, &bass, Some(&chorus), None, &recent));
        let patterns: Vec<PatternKind> = commands.iter().map(|c| c.pattern).collect();

        // section_transition, chorus_symmetric, bass_impact
        assert_eq!(
            patterns,
            vec![PatternKind::Symmetric, PatternKind::Symmetric, PatternKind::Single]
        );
        assert_eq!(commands[1].params.count, Some(2));
        assert_eq!(commands[1].params.spread, Some(0.5));
        assert_eq!(commands[2].params.firework, Some(FireworkKind::Kiku));
    }

    #[test]
    fn test_cooldown_suppresses_refire() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let verse = section(SectionKind::Verse, 0.0, 40.0);

        let first = event(EventKind::Bass, 10.0, 0.5, false);
        let recent = [first.clone()];
        let commands = engine.evaluate(&context(10.0, &first, Some(&verse), None, &recent));
        assert_eq!(commands.len(), 1);
        assert_eq!(engine.rule("bass_impact").and_then(|r| r.last_fired()), Some(10.0));

        // Inside the 0.3s cooldown
        let second = event(EventKind::Bass, 10.2, 0.5, false);
        let recent = [second.clone()];
        assert!(engine
            .evaluate(&context(10.2, &second, Some(&verse), None, &recent))
            .is_empty());

        let third = event(EventKind::Bass, 10.31, 0.5, false);
        let recent = [third.clone()];
        assert_eq!(
            engine
                .evaluate(&context(10.31, &third, Some(&verse), None, &recent))
                .len(),
            1
        );
    }

    #[test]
    fn test_bass_impact_uses_willow_in_climax() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let bass = event(EventKind::Bass, 20.0, 0.5, true);
        let verse = section(SectionKind::Verse, 0.0, 40.0);
        let recent = [bass.clone()];

        let commands = engine.evaluate(&context(20.0, &bass, Some(&verse), None, &recent));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].params.firework, Some(FireworkKind::Willow));
        assert_eq!(commands[0].params.target_y, Some(180.0));
    }

    #[test]
    fn test_beat_drop_after_quiet_run() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let beats = grid(0.5, 100.0, 0.8);
        let verse = section(SectionKind::Verse, 0.0, 40.0);

        let mut recent: Vec<AudioEvent> = (0..4)
            .map(|i| event(EventKind::Piano, 18.0 + i as f32 * 0.4, 0.1, false))
            .collect();
        let drop = event(EventKind::Bass, 20.0, 0.8, false);
        recent.push(drop.clone());

        // Mean of last five = (0.4 + 0.8) / 5 = 0.24
        let commands = engine.evaluate(&context(20.0, &drop, Some(&verse), Some(&beats), &recent));

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].pattern, PatternKind::Cluster);
        assert_eq!(commands[0].params.x, Some(600.0));
        assert_eq!(commands[0].params.count, Some(5));
    }

    #[test]
    fn test_piano_beat_sync_and_ambient_scatter() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let beats = grid(0.5, 100.0, 0.8);
        let bridge = section(SectionKind::Bridge, 40.0, 60.0);
        let piano = event(EventKind::Piano, 50.05, 0.1, false);
        let recent = [piano.clone()];

        let commands = engine.evaluate(&context(50.0, &piano, Some(&bridge), Some(&beats), &recent));
        assert_eq!(commands.len(), 2);

        assert_eq!(commands[0].pattern, PatternKind::Single);
        assert_eq!(commands[0].params.firework, Some(FireworkKind::Piano));
        assert_eq!(commands[0].params.hue, Some(45.0));
        assert_eq!(commands[0].params.energy, Some(0.35));

        assert_eq!(commands[1].pattern, PatternKind::Scatter);
        assert_eq!(commands[1].params.count, Some(3));
        assert_eq!(commands[1].params.energy, Some(0.4));
    }

    #[test]
    fn test_beat_pulse_needs_confident_grid() {
        let verse = section(SectionKind::Verse, 0.0, 40.0);
        let mid = event(EventKind::Mid, 10.0, 0.1, false);
        let recent = [mid.clone()];

        let confident = grid(0.5, 100.0, 0.8);
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let commands = engine.evaluate(&context(10.0, &mid, Some(&verse), Some(&confident), &recent));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].pattern, PatternKind::Pulse);
        assert_eq!(commands[0].params.interval_ms, Some(500.0));
        assert_eq!(commands[0].params.count, Some(4));

        let shaky = grid(0.5, 100.0, 0.2);
        let mut engine = RuleEngine::new(&RuleTuning::default());
        assert!(engine
            .evaluate(&context(10.0, &mid, Some(&verse), Some(&shaky), &recent))
            .is_empty());
    }

    #[test]
    fn test_reset_replays_identically() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let beats = grid(0.5, 100.0, 0.8);
        let verse = section(SectionKind::Verse, 0.0, 90.0);
        let events: Vec<AudioEvent> = (0..40)
            .map(|i| {
                let kind = [EventKind::Bass, EventKind::Mid, EventKind::Piano][i % 3];
                event(kind, i as f32 * 0.25, 0.1 + (i % 7) as f32 * 0.1, i % 5 == 0)
            })
            .collect();

        let run = |engine: &mut RuleEngine| {
            let mut out = Vec::new();
            for (i, e) in events.iter().enumerate() {
                let recent = &events[..=i];
                out.extend(engine.evaluate(&context(e.explode_time, e, Some(&verse), Some(&beats), recent)));
            }
            out
        };

        let first = run(&mut engine);
        engine.reset();
        let second = run(&mut engine);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_add_rule_rejects_duplicates_and_resorts() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        let custom = ChoreographyRule::new("custom", 95, 0.0, false, |_| true, |_| None);
        engine.add_rule(custom).unwrap();
        assert_eq!(engine.rule_ids()[1], "custom");

        let dup = ChoreographyRule::new("finale", 1, 0.0, false, |_| true, |_| None);
        assert!(matches!(engine.add_rule(dup), Err(ChoreoError::DuplicateRule(id)) if id == "finale"));
        assert_eq!(engine.len(), 11);
    }

    #[test]
    fn test_rule_without_command_keeps_cooldown_open() {
        let mut engine = RuleEngine::empty();
        engine
            .add_rule(ChoreographyRule::new("silent", 10, 5.0, true, |_| true, |_| None))
            .unwrap();
        let e = event(EventKind::Mid, 1.0, 0.5, false);
        let recent = [e.clone()];

        assert!(engine.evaluate(&context(1.0, &e, None, None, &recent)).is_empty());
        assert_eq!(engine.rule("silent").and_then(|r| r.last_fired()), None);
    }

    #[test]
    fn test_set_rule_cooldown() {
        let mut engine = RuleEngine::new(&RuleTuning::default());
        assert!(engine.set_rule_cooldown("bass_impact", 1.5));
        assert_eq!(engine.rule("bass_impact").map(|r| r.cooldown), Some(1.5));
        assert!(!engine.set_rule_cooldown("missing", 1.0));
    }
}
