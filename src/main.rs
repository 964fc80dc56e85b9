use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_courier::bot::{self, LocalDelivery};
use media_courier::extractors::runtime;
use media_courier::extractors::ytdlp::YtDlpExtractor;
use media_courier::extractors::{validate_url, ExtractorHints, MediaExtractor, MediaMode};
use media_courier::pipeline::{mark_forced, select, Job, JobId, JobPipeline, JobStatus, SelectionCriteria};
use media_courier::transcode::FfmpegTranscoder;
use media_courier::utils::{check_dependencies, format_duration, format_file_size};
use media_courier::{Cli, Commands, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = Arc::new(Config::load(cli.config.as_deref())?);

    match cli.command {
        Commands::Run => bot::serve(config).await?,
        Commands::Fetch { url, audio, output } => {
            let mode = if audio { MediaMode::Audio } else { MediaMode::Video };
            fetch(config, &url, mode, &output).await?;
        }
        Commands::Formats { url, audio } => {
            let mode = if audio { MediaMode::Audio } else { MediaMode::Video };
            formats(&config, &url, mode).await?;
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Configuration is read from config.yaml and COURIER_* variables.");
                println!("Run `courier config --show` to see the effective values.");
            }
        }
        Commands::Check => check(&config).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "media_courier=debug" } else { "media_courier=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn local_extractor(config: &Config) -> (YtDlpExtractor, ExtractorHints) {
    let tools = runtime::prepare(config).await;
    let hints = ExtractorHints::from_config(config, tools.js_runtime);
    let mut extractor = YtDlpExtractor::new(tools.yt_dlp, config.probe_timeout(), config.extract_timeout());
    if config.tools.ffmpeg != "ffmpeg" {
        extractor = extractor.with_ffmpeg_location(&config.tools.ffmpeg);
    }
    (extractor, hints)
}

async fn fetch(config: Arc<Config>, url: &str, mode: MediaMode, output: &Path) -> Result<()> {
    let url = validate_url(url)?;
    let (extractor, hints) = local_extractor(&config).await;
    let transcoder = FfmpegTranscoder::new(
        &config.tools.ffmpeg,
        &config.tools.ffprobe,
        config.transcode_timeout(),
        config.probe_timeout(),
    );
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.set_message(format!("Fetching {mode}..."));
    progress.enable_steady_tick(Duration::from_millis(120));
    let delivery = Arc::new(LocalDelivery::new(output).with_status_line(progress.clone()));

    let pipeline = JobPipeline::new(
        config.clone(),
        Arc::new(extractor),
        Arc::new(transcoder),
        delivery.clone(),
        hints,
    );
    let job = Job::new(JobId { requester: 0, seq: 1 }, url, mode, config.media.default_resolution);

    let report = pipeline.run(job).await;
    progress.finish_and_clear();

    match report.status {
        JobStatus::Done => {
            for path in delivery.delivered() {
                println!(
                    "{} Saved {} ({})",
                    style("✓").green(),
                    path.display(),
                    format_file_size(report.delivered_size.unwrap_or(0))
                );
            }
            Ok(())
        }
        status => anyhow::bail!(
            "Job ended as {}: {}",
            status,
            report.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

async fn formats(config: &Config, url: &str, mode: MediaMode) -> Result<()> {
    let url = validate_url(url)?;
    let (extractor, hints) = local_extractor(config).await;

    let listing = extractor
        .list_formats(url.as_str(), &hints)
        .await
        .context("Failed to list formats")?;
    let mut candidates = listing.candidates;
    mark_forced(&mut candidates, config, mode);

    if let Some(title) = &listing.title {
        match listing.duration {
            Some(duration) => println!("{} ({})", style(title).bold(), format_duration(duration)),
            None => println!("{}", style(title).bold()),
        }
    }
    println!(
        "{:<12} {:<6} {:>8} {:>10} {:>10} {:>10}  {}",
        "ID", "EXT", "HEIGHT", "KBPS", "AUDIO KBPS", "SIZE", "STREAMS"
    );
    for candidate in &candidates {
        let streams = match (candidate.has_video, candidate.has_audio) {
            (true, true) => "video+audio",
            (true, false) => "video",
            (false, true) => "audio",
            (false, false) => "-",
        };
        println!(
            "{:<12} {:<6} {:>8} {:>10} {:>10} {:>10}  {}",
            candidate.format_id,
            candidate.container,
            candidate.height.map(|h| format!("{h}p")).unwrap_or_default(),
            candidate.bitrate_kbps.map(|k| format!("{k:.0}")).unwrap_or_default(),
            candidate.audio_bitrate().map(|k| format!("{k:.0}")).unwrap_or_default(),
            candidate.size_estimate.map(format_file_size).unwrap_or_default(),
            streams
        );
    }

    let criteria = SelectionCriteria::initial(mode, config.media.default_resolution, &[]);
    match select(&candidates, &criteria) {
        Some(pick) => println!("\n{} {} ({})", style("Would pick:").green(), pick.format_id, pick.label()),
        None => println!("\n{}", style(format!("No format suitable for {mode}")).yellow()),
    }
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    let missing = check_dependencies(config).await;
    if missing.is_empty() {
        println!("{} yt-dlp, ffmpeg and ffprobe are available", style("✓").green());
    } else {
        println!("{}", style("Missing tools:").yellow());
        for tool in &missing {
            println!("   • {}", tool);
        }
    }

    match runtime::resolve_js_runtime(config).await {
        Some(js) => println!("{} JS runtime: {}", style("✓").green(), js),
        None => println!("{} No JS runtime; some YouTube formats may be missing", style("!").yellow()),
    }

    if missing.iter().any(|tool| tool.starts_with(&config.tools.yt_dlp)) {
        anyhow::bail!("yt-dlp is required");
    }
    Ok(())
}
