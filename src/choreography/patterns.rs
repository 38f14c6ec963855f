use std::collections::HashMap;

use super::{Direction, FireworkKind, LaunchConfig, LaunchParams, PatternKind, ScreenSize};
use crate::error::{ChoreoError, Result};

/// The display side: fires shells and reports the drawable area.
///
/// Positions passed to `launch` are absolute pixels with `y` measured from the
/// top, matching `ScreenSize`.
pub trait Launcher {
    fn launch(&mut self, config: LaunchConfig);
    fn screen_size(&self) -> ScreenSize;
}

/// Turns one command's parameters into concrete launches.
pub trait Pattern: Send + Sync {
    fn execute(&self, launcher: &mut dyn Launcher, params: &LaunchParams) -> Result<()>;
}

/// Runs a pattern by kind. The choreographer only talks to this seam.
pub trait PatternExecutor {
    fn execute(
        &mut self,
        pattern: PatternKind,
        launcher: &mut dyn Launcher,
        params: &LaunchParams,
    ) -> Result<()>;
}

/// Registry of patterns keyed by kind
#[derive(Default)]
pub struct PatternLibrary {
    patterns: HashMap<PatternKind, Box<dyn Pattern>>,
}

impl PatternLibrary {
    /// Empty library; every kind is unknown until registered
    pub fn new() -> Self {
        Self::default()
    }

    /// All ten kinds backed by `EvenSpreadPattern`
    pub fn with_even_spread() -> Self {
        let mut library = Self::new();
        for kind in PatternKind::ALL {
            library.register(kind, Box::new(EvenSpreadPattern::for_kind(kind)));
        }
        library
    }

    /// Returns the pattern previously registered for `kind`, if any
    pub fn register(&mut self, kind: PatternKind, pattern: Box<dyn Pattern>) -> Option<Box<dyn Pattern>> {
        self.patterns.insert(kind, pattern)
    }

    pub fn has(&self, kind: PatternKind) -> bool {
        self.patterns.contains_key(&kind)
    }

    pub fn get(&self, kind: PatternKind) -> Result<&dyn Pattern> {
        self.patterns
            .get(&kind)
            .map(|p| p.as_ref())
            .ok_or(ChoreoError::UnknownPattern(kind))
    }
}

impl PatternExecutor for PatternLibrary {
    fn execute(
        &mut self,
        pattern: PatternKind,
        launcher: &mut dyn Launcher,
        params: &LaunchParams,
    ) -> Result<()> {
        self.get(pattern)?.execute(launcher, params)
    }
}

/// Headless geometry: `count` shells spaced evenly across `spread` of the
/// screen width around `x` (screen centre by default), all launched at once
/// in `direction` order.
#[derive(Debug, Clone, Copy)]
pub struct EvenSpreadPattern {
    pub kind: PatternKind,
    pub count: u32,
    pub spread: f32,
    pub firework: FireworkKind,
    /// Degrees added to the hue for each successive shell
    pub hue_step: f32,
    pub direction: Direction,
    /// Every n-th shell bursts in place; 0 never
    pub instant_every: u32,
}

impl EvenSpreadPattern {
    pub fn for_kind(kind: PatternKind) -> Self {
        let (count, spread, firework, hue_step) = match kind {
            PatternKind::Single => (1, 0.0, FireworkKind::Botan, 0.0),
            PatternKind::Salvo => (15, 0.6, FireworkKind::Willow, 0.0),
            PatternKind::Cascade => (8, 0.8, FireworkKind::Kiku, 15.0),
            PatternKind::Symmetric => (2, 0.3, FireworkKind::Kiku, 0.0),
            PatternKind::Rising => (5, 0.6, FireworkKind::Botan, 20.0),
            PatternKind::Pulse => (4, 0.4, FireworkKind::Kiku, 0.0),
            PatternKind::Cluster => (4, 0.15, FireworkKind::Kiku, 10.0),
            PatternKind::Cross => (6, 0.7, FireworkKind::Kiku, 40.0),
            PatternKind::Scatter => (5, 0.8, FireworkKind::Botan, 0.0),
            PatternKind::Finale => (12, 0.9, FireworkKind::Willow, 30.0),
        };
        let direction = match kind {
            PatternKind::Rising => Direction::Outward,
            _ => Direction::Left,
        };
        let instant_every = match kind {
            PatternKind::Salvo => 10,
            PatternKind::Finale => 3,
            _ => 0,
        };

        Self {
            kind,
            count,
            spread,
            firework,
            hue_step,
            direction,
            instant_every,
        }
    }

    fn is_instant(&self, index: u32, forced: Option<bool>) -> bool {
        forced.unwrap_or(self.instant_every > 0 && (index + 1) % self.instant_every == 0)
    }
}

/// Horizontal offset of shell `index` from the pattern centre
fn spread_offset(direction: Direction, index: u32, count: u32, half: f32) -> f32 {
    if count <= 1 {
        return 0.0;
    }
    let progress = index as f32 / (count - 1) as f32;
    match direction {
        Direction::Left => -half + 2.0 * half * progress,
        Direction::Right => half - 2.0 * half * progress,
        Direction::Center => (progress - 0.5) * 2.0 * half * 0.75,
        Direction::Outward => {
            if index % 2 == 0 {
                -half * progress
            } else {
                half * progress
            }
        }
    }
}

impl Pattern for EvenSpreadPattern {
    fn execute(&self, launcher: &mut dyn Launcher, params: &LaunchParams) -> Result<()> {
        let screen = launcher.screen_size();
        let target_y = params.target_y.unwrap_or(screen.height * 0.25);
        let energy = params.energy.unwrap_or(0.5);
        if !target_y.is_finite() || !energy.is_finite() {
            return Err(ChoreoError::PatternFailed {
                pattern: self.kind,
                reason: format!("non-finite launch parameters (y {target_y}, energy {energy})"),
            });
        }

        let count = params.count.unwrap_or(self.count).max(1);
        let spread = params.spread.unwrap_or(self.spread).clamp(0.0, 1.0);
        let center = params.x.unwrap_or(screen.width / 2.0);
        let hue = params.hue.unwrap_or(0.0);
        let firework = params.firework.unwrap_or(self.firework);
        let direction = params.direction.unwrap_or(self.direction);

        let half = screen.width * spread / 2.0;
        for i in 0..count {
            let offset = spread_offset(direction, i, count, half);

            launcher.launch(LaunchConfig {
                firework,
                x: (center + offset).clamp(0.0, screen.width),
                target_y,
                energy: energy.clamp(0.0, 1.0),
                hue: (hue + i as f32 * self.hue_step).rem_euclid(360.0),
                instant: self.is_instant(i, params.instant),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLauncher {
        launches: Vec<LaunchConfig>,
    }

    impl Launcher for RecordingLauncher {
        fn launch(&mut self, config: LaunchConfig) {
            self.launches.push(config);
        }

        fn screen_size(&self) -> ScreenSize {
            ScreenSize {
                width: 1000.0,
                height: 800.0,
            }
        }
    }

    #[test]
    fn test_unknown_pattern_is_an_error() {
        let mut library = PatternLibrary::new();
        let mut launcher = RecordingLauncher::default();
        let result = library.execute(PatternKind::Cross, &mut launcher, &LaunchParams::default());
        assert!(matches!(result, Err(ChoreoError::UnknownPattern(PatternKind::Cross))));
        assert!(launcher.launches.is_empty());
    }

    #[test]
    fn test_even_spread_registers_every_kind() {
        let library = PatternLibrary::with_even_spread();
        assert!(PatternKind::ALL.iter().all(|&k| library.has(k)));
    }

    #[test]
    fn test_symmetric_pair_is_mirrored() {
        let mut library = PatternLibrary::with_even_spread();
        let mut launcher = RecordingLauncher::default();
        let params = LaunchParams {
            count: Some(2),
            spread: Some(0.5),
            ..LaunchParams::at_height(180.0, 0.6)
        };

        library
            .execute(PatternKind::Symmetric, &mut launcher, &params)
            .unwrap();

        assert_eq!(launcher.launches.len(), 2);
        assert_eq!(launcher.launches[0].x, 250.0);
        assert_eq!(launcher.launches[1].x, 750.0);
        assert!(launcher.launches.iter().all(|l| l.target_y == 180.0));
        assert!(launcher.launches.iter().all(|l| l.firework == FireworkKind::Kiku));
    }

    #[test]
    fn test_single_uses_explicit_position_and_type() {
        let mut library = PatternLibrary::with_even_spread();
        let mut launcher = RecordingLauncher::default();
        let params = LaunchParams {
            x: Some(120.0),
            firework: Some(FireworkKind::Piano),
            hue: Some(45.0),
            ..LaunchParams::at_height(300.0, 0.4)
        };

        library.execute(PatternKind::Single, &mut launcher, &params).unwrap();

        assert_eq!(
            launcher.launches,
            vec![LaunchConfig {
                firework: FireworkKind::Piano,
                x: 120.0,
                target_y: 300.0,
                energy: 0.4,
                hue: 45.0,
                instant: false,
            }]
        );
    }

    #[test]
    fn test_non_finite_params_fail() {
        let mut library = PatternLibrary::with_even_spread();
        let mut launcher = RecordingLauncher::default();
        let params = LaunchParams::at_height(f32::NAN, 0.5);

        let result = library.execute(PatternKind::Pulse, &mut launcher, &params);
        assert!(matches!(
            result,
            Err(ChoreoError::PatternFailed { pattern: PatternKind::Pulse, .. })
        ));
    }

    #[test]
    fn test_direction_orders_shells() {
        let mut library = PatternLibrary::with_even_spread();
        let xs = |library: &mut PatternLibrary, direction: Option<Direction>| {
            let mut launcher = RecordingLauncher::default();
            let params = LaunchParams {
                count: Some(5),
                spread: Some(0.8),
                direction,
                ..LaunchParams::at_height(200.0, 0.5)
            };
            library
                .execute(PatternKind::Cascade, &mut launcher, &params)
                .unwrap();
            launcher.launches.iter().map(|l| l.x).collect::<Vec<_>>()
        };

        // Cascade walks left to right unless told otherwise
        assert_eq!(xs(&mut library, None), vec![100.0, 300.0, 500.0, 700.0, 900.0]);
        assert_eq!(
            xs(&mut library, Some(Direction::Right)),
            vec![900.0, 700.0, 500.0, 300.0, 100.0]
        );
        assert_eq!(
            xs(&mut library, Some(Direction::Center)),
            vec![200.0, 350.0, 500.0, 650.0, 800.0]
        );
        assert_eq!(
            xs(&mut library, Some(Direction::Outward)),
            vec![500.0, 600.0, 300.0, 800.0, 100.0]
        );
    }

    #[test]
    fn test_rising_fans_out_from_the_middle() {
        let mut library = PatternLibrary::with_even_spread();
        let mut launcher = RecordingLauncher::default();
        library
            .execute(PatternKind::Rising, &mut launcher, &LaunchParams::at_height(200.0, 0.5))
            .unwrap();

        assert_eq!(launcher.launches.len(), 5);
        assert_eq!(launcher.launches[0].x, 500.0);
        assert!(launcher.launches[1].x > 500.0);
        assert!(launcher.launches[2].x < 500.0);
    }

    #[test]
    fn test_finale_bursts_every_third_shell_in_place() {
        let mut library = PatternLibrary::with_even_spread();
        let mut launcher = RecordingLauncher::default();
        library
            .execute(PatternKind::Finale, &mut launcher, &LaunchParams::at_height(160.0, 0.8))
            .unwrap();

        let instant: Vec<usize> = launcher
            .launches
            .iter()
            .enumerate()
            .filter(|(_, l)| l.instant)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(instant, vec![2, 5, 8, 11]);
    }

    #[test]
    fn test_instant_override_applies_to_every_shell() {
        let mut library = PatternLibrary::with_even_spread();

        let mut launcher = RecordingLauncher::default();
        let forced = LaunchParams {
            instant: Some(true),
            ..LaunchParams::at_height(200.0, 0.5)
        };
        library.execute(PatternKind::Pulse, &mut launcher, &forced).unwrap();
        assert_eq!(launcher.launches.len(), 4);
        assert!(launcher.launches.iter().all(|l| l.instant));

        let mut launcher = RecordingLauncher::default();
        let suppressed = LaunchParams {
            instant: Some(false),
            ..LaunchParams::at_height(200.0, 0.5)
        };
        library.execute(PatternKind::Finale, &mut launcher, &suppressed).unwrap();
        assert!(launcher.launches.iter().all(|l| !l.instant));
    }

    #[test]
    fn test_register_replaces_pattern() {
        let mut library = PatternLibrary::with_even_spread();
        let replaced = library.register(
            PatternKind::Finale,
            Box::new(EvenSpreadPattern::for_kind(PatternKind::Single)),
        );
        assert!(replaced.is_some());
    }
}
