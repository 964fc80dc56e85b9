use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use super::{
    DownloadProgress, ExtractorHints, FormatCandidate, MediaExtractor, MediaListing, MediaMode, ProgressSender,
};
use crate::utils::{run_streaming, run_with_timeout, ProcessError};
use crate::JobError;

/// Markers in yt-dlp output that point at a temporary condition
const TRANSIENT_MARKERS: &[&str] = &[
    "http error 429",
    "too many requests",
    "http error 500",
    "http error 502",
    "http error 503",
    "http error 504",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "temporary failure in name resolution",
    "network is unreachable",
    "incompleteread",
    "unable to download webpage",
];

/// Tag that marks our progress lines among yt-dlp's output
const PROGRESS_TAG: &str = "courier-progress:";

/// Markers that mean the source wants a logged-in or age-verified session
const CREDENTIAL_MARKERS: &[&str] = &[
    "sign in to confirm",
    "login required",
    "login_required",
    "private video",
    "members-only",
    "use --cookies",
    "confirm your age",
    "age-restricted",
    "age restricted",
    "inappropriate for some users",
];

/// Extraction tool backed by the yt-dlp binary
pub struct YtDlpExtractor {
    yt_dlp_path: String,
    ffmpeg_location: Option<String>,
    probe_timeout: Duration,
    fetch_timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: impl Into<String>, probe_timeout: Duration, fetch_timeout: Duration) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            ffmpeg_location: None,
            probe_timeout,
            fetch_timeout,
        }
    }

    /// Point yt-dlp at a specific ffmpeg binary for merging formats
    pub fn with_ffmpeg_location(mut self, location: impl Into<String>) -> Self {
        self.ffmpeg_location = Some(location.into());
        self
    }

    fn command(&self, hints: &ExtractorHints) -> Command {
        let mut command = Command::new(&self.yt_dlp_path);
        command.args(["--no-playlist", "--no-warnings"]);
        command.args(hint_args(hints));
        if let Some(location) = &self.ffmpeg_location {
            command.arg("--ffmpeg-location").arg(location);
        }
        command
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn list_formats(&self, url: &str, hints: &ExtractorHints) -> Result<MediaListing, JobError> {
        tracing::debug!(url, "Listing formats with yt-dlp");

        let mut command = self.command(hints);
        command.arg("--no-progress").arg("--dump-single-json").arg(url);

        let output = run_with_timeout(command, &self.yt_dlp_path, self.probe_timeout)
            .await
            .map_err(classify_failure)?;

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| JobError::extraction(format!("unreadable yt-dlp output: {e}")))?;

        parse_listing(&info)
    }

    async fn fetch(
        &self,
        url: &str,
        candidate: &FormatCandidate,
        mode: MediaMode,
        dest_dir: &Path,
        hints: &ExtractorHints,
        progress: &ProgressSender,
    ) -> Result<PathBuf, JobError> {
        tracing::debug!(url, format = %candidate.format_id, %mode, "Downloading with yt-dlp");

        let template = dest_dir.join("%(id)s.%(format_id)s.%(ext)s");
        let mut command = self.command(hints);
        command
            .arg("--format")
            .arg(format_selector(candidate, mode))
            .arg("--restrict-filenames")
            .arg("--no-mtime")
            .arg("--no-simulate")
            .args(["--print", "after_move:filepath"])
            .args(["--progress", "--newline", "--progress-template", progress_template().as_str()])
            .arg("--output")
            .arg(template)
            .arg(url);

        let stdout = run_streaming(command, &self.yt_dlp_path, self.fetch_timeout, |line| {
            match parse_progress_line(line) {
                Some(update) => {
                    // The receiver may already be gone
                    let _ = progress.send(update);
                    true
                }
                None => false,
            }
        })
        .await
        .map_err(classify_failure)?;

        let reported = stdout
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
            .filter(|path| path.is_file());

        match reported {
            Some(path) => Ok(path),
            None => find_downloaded_file(dest_dir)
                .await?
                .ok_or_else(|| JobError::extraction("download finished but no file was produced")),
        }
    }
}

fn progress_template() -> String {
    format!(
        "download:{PROGRESS_TAG}%(progress.downloaded_bytes)s:%(progress.total_bytes)s:\
         %(progress.total_bytes_estimate)s:%(progress.speed)s:%(progress.eta)s"
    )
}

/// Parse one line printed through our progress template; missing values come through as `NA`
pub fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    let fields: Vec<&str> = line.trim().strip_prefix(PROGRESS_TAG)?.split(':').collect();
    if fields.len() != 5 {
        return None;
    }
    let number = |raw: &str| {
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
    };

    Some(DownloadProgress {
        downloaded_bytes: number(fields[0]).map(|v| v as u64),
        total_bytes: number(fields[1]).or_else(|| number(fields[2])).map(|v| v as u64),
        speed_bytes_per_sec: number(fields[3]),
        eta_secs: number(fields[4]).map(|v| v as u64),
    })
}

/// Translate credential/runtime hints into yt-dlp flags
pub fn hint_args(hints: &ExtractorHints) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(cookie_file) = &hints.cookie_file {
        args.push("--cookies".into());
        args.push(cookie_file.as_os_str().to_owned());
    }
    if let Some(browser) = &hints.browser_cookies {
        args.push("--cookies-from-browser".into());
        args.push(browser.into());
    }
    if let Some(runtime) = &hints.js_runtime {
        args.push("--js-runtimes".into());
        args.push(runtime.into());
    }
    args
}

/// yt-dlp format selector for a chosen candidate
pub fn format_selector(candidate: &FormatCandidate, mode: MediaMode) -> String {
    match mode {
        MediaMode::Video if candidate.has_video && !candidate.has_audio => {
            format!("{id}+bestaudio/{id}", id = candidate.format_id)
        }
        _ => candidate.format_id.clone(),
    }
}

/// Parse `--dump-single-json` output into a listing
pub fn parse_listing(info: &Value) -> Result<MediaListing, JobError> {
    if info.get("_type").and_then(Value::as_str) == Some("playlist") {
        return Err(JobError::extraction("playlists are not supported"));
    }
    if info.get("is_live").and_then(Value::as_bool) == Some(true) {
        return Err(JobError::extraction("this is a live stream"));
    }

    Ok(MediaListing {
        title: info.get("title").and_then(Value::as_str).map(str::to_string),
        duration: info.get("duration").and_then(Value::as_f64),
        candidates: parse_formats(info),
    })
}

/// Turn the `formats` array into candidates, skipping storyboards and other non-media entries
pub fn parse_formats(info: &Value) -> Vec<FormatCandidate> {
    let formats = match info.get("formats").and_then(Value::as_array) {
        Some(formats) => formats,
        None => return Vec::new(),
    };

    formats
        .iter()
        .filter_map(|format| {
            let format_id = format.get("format_id")?.as_str()?.to_string();
            let container = format
                .get("ext")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            let codec_present = |key: &str| {
                format
                    .get(key)
                    .and_then(Value::as_str)
                    .map(|codec| codec != "none")
                    .unwrap_or(false)
            };
            let has_video = codec_present("vcodec");
            let has_audio = codec_present("acodec");
            if !has_video && !has_audio {
                return None;
            }

            let height = format
                .get("height")
                .and_then(Value::as_u64)
                .map(|h| h as u32)
                .filter(|_| has_video);
            let audio_kbps = format
                .get("abr")
                .and_then(Value::as_f64)
                .filter(|abr| has_audio && *abr > 0.0);
            let bitrate_kbps = if has_video {
                format.get("tbr").and_then(Value::as_f64)
            } else {
                audio_kbps.or_else(|| format.get("tbr").and_then(Value::as_f64))
            };
            let size_estimate = format
                .get("filesize")
                .and_then(Value::as_u64)
                .or_else(|| format.get("filesize_approx").and_then(Value::as_u64));

            Some(FormatCandidate {
                format_id,
                container,
                height,
                bitrate_kbps,
                audio_kbps,
                has_video,
                has_audio,
                size_estimate,
                satisfies_forced: false,
            })
        })
        .collect()
}

/// Map a failed yt-dlp run onto the job error taxonomy
pub fn classify_failure(error: ProcessError) -> JobError {
    match error {
        ProcessError::Spawn { program, source } => {
            JobError::extraction(format!("{program} could not be started: {source}"))
        }
        ProcessError::TimedOut { program, timeout } => {
            JobError::Network(format!("{program} timed out after {}s", timeout.as_secs()))
        }
        ProcessError::Failed { stderr, .. } => classify_stderr(&stderr),
    }
}

/// Classify yt-dlp stderr by well known markers
pub fn classify_stderr(stderr: &str) -> JobError {
    let lower = stderr.to_lowercase();
    let message = last_error_line(stderr);

    if CREDENTIAL_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return JobError::Extraction {
            message,
            needs_credentials: true,
        };
    }
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return JobError::Network(message);
    }
    JobError::extraction(message)
}

fn last_error_line(stderr: &str) -> String {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.to_lowercase().starts_with("error"))
        .unwrap_or_else(|| stderr.trim());

    let line = line
        .strip_prefix("ERROR: ")
        .or_else(|| line.strip_prefix("ERROR:"))
        .unwrap_or(line);

    if line.is_empty() {
        "yt-dlp failed without an error message".to_string()
    } else {
        line.to_string()
    }
}

/// Newest finished file in `dir`, ignoring partial downloads
async fn find_downloaded_file(dir: &Path) -> Result<Option<PathBuf>, JobError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = path.to_string_lossy();
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".temp.") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if newest.as_ref().map(|(time, _)| modified > *time).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
