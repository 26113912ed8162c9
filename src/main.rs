// src/main.rs
// Headless runner: acquires, filters and logs band powers on a fixed tick.
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use clap::Parser;
use neurostream::{AcquisitionConfig, AcquisitionController};
#[derive(Parser, Debug)]
#[command(name = "neurostream", about = "Stream, filter and summarise a biosignal device")]
struct Cli {
    /// JSON configuration snapshot; missing keys use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial port to read from; the synthetic generator is used without one
    #[arg(short, long)]
    port: Option<String>,
    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 10.0)]
    seconds: f64,
    /// Channels summed for band power (defaults to all)
    #[arg(long, value_delimiter = ',')]
    channels: Vec<usize>,
    /// Report band power relative to total power
    #[arg(long)]
    relative: bool,
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Negative run times count as zero; infinite or overflowing ones are rejected.
fn deadline_after(seconds: f64) -> Result<Instant> {
    let run_for = Duration::try_from_secs_f64(seconds.max(0.0))
        .with_context(|| format!("--seconds {seconds} is not a usable duration"))?;
    Instant::now()
        .checked_add(run_for)
        .with_context(|| format!("--seconds {seconds} is too far in the future"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(log_level).init();

    let mut config = match &cli.config {
        Some(path) => AcquisitionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };
    if cli.port.is_some() {
        config.device.port = cli.port.clone();
    }
    let channels: Vec<usize> = if cli.channels.is_empty() {
        (0..config.channels).collect()
    } else {
        cli.channels.clone()
    };
    let tick = config.update_interval();
    let deadline = deadline_after(cli.seconds)?;

    let mut controller =
        AcquisitionController::new(config).context("invalid acquisition configuration")?;
    controller.start().context("failed to start acquisition")?;
    if let Some(e) = controller.take_error() {
        log::warn!("device unavailable ({e}); showing synthetic data");
    }

    let mut last_report = Instant::now();
    while Instant::now() < deadline {
        thread::sleep(tick);
        if !controller.is_ready() {
            if let Some(e) = controller.take_error() {
                log::error!("acquisition failed: {e}");
            }
            break;
        }
        if last_report.elapsed() < Duration::from_secs(1) {
            continue;
        }
        last_report = Instant::now();
        // Not enough data yet: skip this tick.
        let Some(powers) = controller.latest_band_powers(&channels, cli.relative) else {
            continue;
        };
        let summary: Vec<String> = powers
            .iter()
            .map(|(band, power)| format!("{}={power:.3}", band.name))
            .collect();
        let spectrum = controller.latest_spectrum();
        let peak = spectrum
            .magnitudes
            .outer_iter()
            .flat_map(|row| row.iter().copied().enumerate().collect::<Vec<_>>())
            .fold(None, |best: Option<(usize, f64)>, (k, m)| match best {
                Some((_, top)) if top >= m => best,
                _ => Some((k, m)),
            })
            .map(|(k, _)| spectrum.frequencies_hz[k]);
        log::info!(
            "{} samples | {} | spectral peak {}",
            controller.store().size(),
            summary.join(" "),
            peak.map_or_else(|| "-".to_string(), |f| format!("{f:.1} Hz"))
        );
    }

    controller.stop().context("failed to stop acquisition")?;
    Ok(())
}
