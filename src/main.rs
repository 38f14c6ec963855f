use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};

use arrvee_pyro::audio::{PrescanProcessor, TrackAnalysis};
use arrvee_pyro::choreography::{Choreographer, LaunchConfig, Launcher, ScreenSize};
use arrvee_pyro::TuningConfig;

#[derive(Parser)]
#[command(name = "arrvee-pyro")]
#[command(about = "Simulate a music-synchronized fireworks show without a display")]
struct Args {
    /// WAV file, or an analysis JSON written by prescan-tool
    #[arg()]
    input: String,

    /// Tuning file (JSON); missing keys use defaults
    #[arg(long)]
    config: Option<String>,

    /// Simulated host ticks per second
    #[arg(long, default_value = "60")]
    tick_rate: f32,

    #[arg(long, default_value = "1200")]
    width: f32,

    #[arg(long, default_value = "800")]
    height: f32,
}

/// Stands in for the renderer: logs every shell and keeps a tally
struct LoggingLauncher {
    screen: ScreenSize,
    clock: f32,
    launches: usize,
    by_kind: BTreeMap<&'static str, usize>,
}

impl LoggingLauncher {
    fn new(screen: ScreenSize) -> Self {
        Self {
            screen,
            clock: 0.0,
            launches: 0,
            by_kind: BTreeMap::new(),
        }
    }
}

impl Launcher for LoggingLauncher {
    fn launch(&mut self, config: LaunchConfig) {
        self.launches += 1;
        *self.by_kind.entry(config.firework.as_str()).or_insert(0) += 1;
        debug!(
            "[{:>7.2}s] {:<6} x {:>6.1} y {:>6.1} energy {:.2} hue {:>5.1}{}",
            self.clock,
            config.firework.as_str(),
            config.x,
            config.target_y,
            config.energy,
            config.hue,
            if config.instant { " (instant)" } else { "" }
        );
    }

    fn screen_size(&self) -> ScreenSize {
        self.screen
    }
}

fn load_track(input: &str, tuning: &TuningConfig, screen_height: f32) -> Result<TrackAnalysis> {
    let is_json = Path::new(input)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        info!("Loading analysis from {}", input);
        return PrescanProcessor::load_analysis(input).with_context(|| format!("loading {input}"));
    }

    let mut processor = PrescanProcessor::new(tuning)?;
    processor.set_screen_height(screen_height)?;
    processor
        .prescan_file(input)
        .with_context(|| format!("analyzing {input}"))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting Arrvee Pyro show simulation");

    if args.tick_rate.is_nan() || args.tick_rate <= 0.0 {
        bail!("tick rate must be positive, got {}", args.tick_rate);
    }

    let tuning = match &args.config {
        Some(path) => TuningConfig::load(path).with_context(|| format!("loading tuning from {path}"))?,
        None => TuningConfig::default(),
    };

    let analysis = load_track(&args.input, &tuning, args.height)?;
    let duration = analysis.duration();

    let mut choreographer = Choreographer::from_tuning(&tuning)?;
    choreographer.prepare_track(analysis.to_track_data());

    let mut launcher = LoggingLauncher::new(ScreenSize {
        width: args.width,
        height: args.height,
    });

    // Virtual clock; run past the end so the last lookahead window drains
    let end = duration + tuning.choreographer.lookahead;
    let step = 1.0 / args.tick_rate;
    let mut tick: u64 = 0;
    loop {
        let now = tick as f32 * step;
        if now > end {
            break;
        }
        launcher.clock = now;
        choreographer.update(now, &mut launcher);
        tick += 1;
    }

    let stats = choreographer.stats();
    info!("=== SHOW SUMMARY ===");
    info!("Duration: {:.1}s over {} ticks", stats.duration, tick);
    info!("Tempo: {:.0} BPM", stats.bpm);
    info!("Events: {} {:?}", stats.total_events, stats.event_breakdown);
    info!("Sections: {} {:?}", stats.total_sections, stats.section_breakdown);
    info!("Shells launched: {}", launcher.launches);
    for (kind, count) in &launcher.by_kind {
        info!("  {:<6} {}", kind, count);
    }

    Ok(())
}
