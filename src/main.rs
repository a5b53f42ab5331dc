mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

use cli::Cli;
use stemgroove::authenticity::{self, Verdict};
use stemgroove::config::{self, Config};
use stemgroove::{analyze_performance_with_progress, PerformanceRequest};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Explicit --config path, or auto-detect stemgroove.toml / global config
    let mut cfg = match cli.config.clone().or_else(config::find_config) {
        Some(path) => {
            let cfg = config::load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => Config::default(),
    };
    if cli.decode_timeout.is_some() {
        cfg.decode.timeout_s = cli.decode_timeout;
    }

    if cli.stems.is_empty() {
        anyhow::bail!("At least one --stem LABEL=PATH is required");
    }

    log::info!("stemgroove - drum stem performance analysis");
    for (label, path) in &cli.stems {
        log::info!("Stem {}: {}", label, path.display());
    }
    if let Some(bass) = &cli.bass {
        log::info!("Bass: {}", bass.display());
    }

    let request = PerformanceRequest {
        tempo_bpm: cli.tempo,
        key: cli.key.clone(),
        style: cli.style.clone(),
        stems: cli.stems.clone(),
        bass: cli.bass.clone(),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.jobs)
        .build()
        .context("Failed to build worker pool")?;

    let pb = ProgressBar::new(request.stems.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} stems {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let report = pool
        .install(|| {
            analyze_performance_with_progress(&request, &cfg, &|label: &str| {
                pb.set_message(label.to_string());
                pb.inc(1);
            })
        })
        .context("Performance analysis failed")?;
    pb.finish_with_message("analysis complete");

    let check = authenticity::validate(&report);
    match check.verdict {
        Verdict::Authentic => log::info!("Authenticity: {:?}", check.verdict),
        _ => {
            log::warn!("Authenticity: {:?}", check.verdict);
            for finding in &check.findings {
                log::warn!("  {}", finding);
            }
        }
    }

    let json = if cli.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("Failed to serialize report")?;

    match &cli.output {
        Some(path) => {
            std::fs::write(path, json.as_bytes())
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            log::info!("Report written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", json).context("Failed to write report to stdout")?;
        }
    }

    log::info!(
        "Done: {} stems analysed, {} skipped, {:.1} BPM ({:?})",
        report.stems.len(),
        report.failures.len(),
        report.tempo.bpm,
        report.tempo.method
    );
    Ok(())
}
