use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use arrvee_pyro::audio::PrescanProcessor;
use arrvee_pyro::TuningConfig;

#[derive(Parser)]
#[command(name = "prescan-tool")]
#[command(about = "Analyze a WAV file ahead of a fireworks show")]
struct Args {
    /// WAV file to analyze
    #[arg()]
    input_file: String,

    /// Output file for the full analysis (JSON)
    #[arg(short, long, default_value = "analysis.json")]
    output: String,

    /// Also write the diagnostic event timeline dump here
    #[arg(long)]
    timeline: Option<String>,

    /// Tuning file (JSON); missing keys use defaults
    #[arg(long)]
    config: Option<String>,

    /// Screen height used to compute launch heights and flight times
    #[arg(long)]
    screen_height: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Arrvee Pyro Pre-scan Tool");
    info!("Input file: {}", args.input_file);
    info!("Output file: {}", args.output);

    let tuning = match &args.config {
        Some(path) => TuningConfig::load(path).with_context(|| format!("loading tuning from {path}"))?,
        None => TuningConfig::default(),
    };

    let mut processor = PrescanProcessor::new(&tuning)?;
    if let Some(height) = args.screen_height {
        processor.set_screen_height(height)?;
    }

    info!("Starting pre-scan analysis...");
    let analysis = processor
        .prescan_file(&args.input_file)
        .with_context(|| format!("analyzing {}", args.input_file))?;
    let stats = &analysis.statistics;

    // Display statistics
    info!("=== PRE-SCAN RESULTS ===");
    info!("Duration: {:.2} seconds", analysis.file_info.duration_seconds);
    info!("Sample rate: {}Hz, {} channel(s)", analysis.file_info.sample_rate, analysis.file_info.channels);
    info!("Analysis frames: {} at {:.0} fps", analysis.bands.frame_count(), analysis.file_info.frame_rate);
    info!("Tempo: {:.0} BPM (confidence {:.2}), {} beats", stats.bpm, stats.beat_confidence, stats.total_beats);
    info!("Dominant frequency range: {}", stats.dominant_frequency_range);
    info!("Energy profile: {}", stats.energy_profile);
    info!("Peak volume: {:.3}", stats.peak_volume);

    info!("=== EVENTS ===");
    for (kind, count) in &stats.event_counts {
        info!("{:<6} {}", kind.as_str(), count);
    }
    info!("Climax events: {}", stats.climax_events);

    info!("=== SECTIONS ===");
    for section in &analysis.sections {
        info!(
            "{:<9} {:>7.1}s - {:>7.1}s  energy {:.2}  density {:.2}/s",
            section.kind.as_str(),
            section.start_time,
            section.end_time,
            section.energy,
            section.density
        );
    }

    info!("Saving analysis to: {}", args.output);
    PrescanProcessor::save_analysis(&analysis, &args.output)?;
    let file_size = std::fs::metadata(&args.output)?.len();
    info!("Analysis saved successfully ({:.1} KB)", file_size as f64 / 1024.0);

    if let Some(path) = &args.timeline {
        let dump = analysis.events.export_timeline_json()?;
        std::fs::write(path, dump).with_context(|| format!("writing timeline to {path}"))?;
        info!("Timeline written to {}", path);
    }

    Ok(())
}
