pub mod choreographer;
pub mod patterns;
pub mod rule_engine;
pub mod section_detector;

pub use choreographer::{ChoreographyStats, Choreographer, ChoreographerConfig, TrackData};
pub use patterns::{EvenSpreadPattern, Launcher, Pattern, PatternExecutor, PatternLibrary};
pub use rule_engine::{ChoreographyRule, MusicContext, RuleEngine, RuleTuning};
pub use section_detector::{is_near_transition, section_at, SectionConfig, SectionDetector};

use serde::{Deserialize, Serialize};

/// Structural role of a stretch of the track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Intro,
    Verse,
    Prechorus,
    Chorus,
    Bridge,
    Climax,
    Outro,
}

impl SectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Intro => "intro",
            SectionKind::Verse => "verse",
            SectionKind::Prechorus => "prechorus",
            SectionKind::Chorus => "chorus",
            SectionKind::Bridge => "bridge",
            SectionKind::Climax => "climax",
            SectionKind::Outro => "outro",
        }
    }
}

/// A contiguous span of the track, `[start_time, end_time)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicSection {
    #[serde(rename = "type")]
    pub kind: SectionKind,
    pub start_time: f32,
    pub end_time: f32,
    /// Mean event energy
    pub energy: f32,
    /// Events per second
    pub density: f32,
}

impl MusicSection {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }

    pub fn contains(&self, time: f32) -> bool {
        time >= self.start_time && time < self.end_time
    }
}

/// The ten display patterns a command can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Single,
    Salvo,
    Cascade,
    Symmetric,
    Rising,
    Pulse,
    Cluster,
    Cross,
    Scatter,
    Finale,
}

impl PatternKind {
    pub const ALL: [PatternKind; 10] = [
        PatternKind::Single,
        PatternKind::Salvo,
        PatternKind::Cascade,
        PatternKind::Symmetric,
        PatternKind::Rising,
        PatternKind::Pulse,
        PatternKind::Cluster,
        PatternKind::Cross,
        PatternKind::Scatter,
        PatternKind::Finale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Single => "single",
            PatternKind::Salvo => "salvo",
            PatternKind::Cascade => "cascade",
            PatternKind::Symmetric => "symmetric",
            PatternKind::Rising => "rising",
            PatternKind::Pulse => "pulse",
            PatternKind::Cluster => "cluster",
            PatternKind::Cross => "cross",
            PatternKind::Scatter => "scatter",
            PatternKind::Finale => "finale",
        }
    }
}

/// Shell type, which decides how the burst looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FireworkKind {
    Kiku,
    Willow,
    Botan,
    Piano,
}

impl FireworkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FireworkKind::Kiku => "kiku",
            FireworkKind::Willow => "willow",
            FireworkKind::Botan => "botan",
            FireworkKind::Piano => "piano",
        }
    }
}

/// Order in which a multi-shell pattern walks across its span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Left edge to right edge
    Left,
    /// Right edge to left edge
    Right,
    /// Left to right over the middle three quarters of the span
    Center,
    /// From the middle, alternating sides, ending at the edges
    Outward,
}

/// Relative parameters a rule attaches to a command.
///
/// Everything is optional; patterns fill gaps with their own defaults. Heights
/// and positions are absolute pixels, `spread` is a fraction of screen width.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub target_y: Option<f32>,
    pub energy: Option<f32>,
    pub count: Option<u32>,
    pub x: Option<f32>,
    pub hue: Option<f32>,
    pub firework: Option<FireworkKind>,
    pub direction: Option<Direction>,
    pub spread: Option<f32>,
    pub interval_ms: Option<f32>,
    /// Force every shell to burst in place (`true`) or to fly (`false`)
    pub instant: Option<bool>,
}

impl LaunchParams {
    pub fn at_height(target_y: f32, energy: f32) -> Self {
        Self {
            target_y: Some(target_y),
            energy: Some(energy),
            ..Self::default()
        }
    }

    /// Keep every field set here, take the rest from `defaults`
    pub fn with_defaults(self, defaults: &LaunchParams) -> Self {
        Self {
            target_y: self.target_y.or(defaults.target_y),
            energy: self.energy.or(defaults.energy),
            count: self.count.or(defaults.count),
            x: self.x.or(defaults.x),
            hue: self.hue.or(defaults.hue),
            firework: self.firework.or(defaults.firework),
            direction: self.direction.or(defaults.direction),
            spread: self.spread.or(defaults.spread),
            interval_ms: self.interval_ms.or(defaults.interval_ms),
            instant: self.instant.or(defaults.instant),
        }
    }
}

/// A pattern to run at `launch_time` seconds into the track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub pattern: PatternKind,
    pub launch_time: f32,
    pub params: LaunchParams,
}

/// One concrete shell handed to the launcher, in absolute screen coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaunchConfig {
    pub firework: FireworkKind,
    pub x: f32,
    pub target_y: f32,
    pub energy: f32,
    /// Degrees, 0.0-360.0
    pub hue: f32,
    /// Burst immediately instead of flying up first
    pub instant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: f32,
    pub height: f32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 800.0,
        }
    }
}
