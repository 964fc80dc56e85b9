use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::utils::{run_with_timeout, unique_sibling, ProcessError};
use crate::JobError;

/// Output the transcoding tool is asked to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeTarget {
    /// Re-mux or re-encode video into a container
    Container(String),
    /// Extract and encode the audio track only
    Audio(String),
}

impl TranscodeTarget {
    /// File extension of the produced artifact
    pub fn extension(&self) -> &str {
        match self {
            TranscodeTarget::Container(container) => container,
            TranscodeTarget::Audio(format) => format,
        }
    }
}

impl fmt::Display for TranscodeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeTarget::Container(container) => write!(f, "{container} container"),
            TranscodeTarget::Audio(format) => write!(f, "{format} audio"),
        }
    }
}

/// Capability interface over the external transcoding tool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `source` into a new file next to it and return that file's path.
    /// The source file is left untouched.
    async fn convert(&self, source: &Path, target: &TranscodeTarget) -> Result<PathBuf, JobError>;

    /// Width and height of the first video stream, when it can be determined
    async fn probe_dimensions(&self, path: &Path) -> Option<(u32, u32)>;
}

/// ffmpeg/ffprobe backed transcoder
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
    convert_timeout: Duration,
    probe_timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
        convert_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            convert_timeout,
            probe_timeout,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(&self, source: &Path, target: &TranscodeTarget) -> Result<PathBuf, JobError> {
        let destination = unique_sibling(source, target.extension());
        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            %target,
            "Converting with ffmpeg"
        );

        let mut command = Command::new(&self.ffmpeg_path);
        command.args(ffmpeg_args(source, &destination, target));

        match run_with_timeout(command, &self.ffmpeg_path, self.convert_timeout).await {
            Ok(_) => Ok(destination),
            Err(error) => {
                // A half-written output must not be mistaken for a result
                if let Err(remove_error) = tokio::fs::remove_file(&destination).await {
                    if remove_error.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(%remove_error, "Failed to remove partial conversion output");
                    }
                }
                Err(conversion_error(error))
            }
        }
    }

    async fn probe_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=width,height",
                "-of", "json",
            ])
            .arg(path);

        match run_with_timeout(command, &self.ffprobe_path, self.probe_timeout).await {
            Ok(output) => {
                let info: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
                parse_dimensions(&info)
            }
            Err(error) => {
                tracing::debug!(%error, "ffprobe could not read video dimensions");
                None
            }
        }
    }
}

fn conversion_error(error: ProcessError) -> JobError {
    match error {
        ProcessError::Failed { stderr, .. } => {
            let last_line = stderr.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or("");
            JobError::Conversion(format!("ffmpeg failed: {}", last_line.trim()))
        }
        other => JobError::Conversion(other.to_string()),
    }
}

/// Build the ffmpeg argument list for a conversion
pub fn ffmpeg_args(source: &Path, destination: &Path, target: &TranscodeTarget) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(source.as_os_str().to_owned());
    args.push("-map_metadata".into());
    args.push("0".into());

    let codec_args: &[&str] = match target {
        TranscodeTarget::Container(container) => match container.as_str() {
            "mp4" | "m4v" | "mov" => &[
                "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-movflags", "+faststart",
            ],
            "webm" => &["-c:v", "libvpx-vp9", "-b:v", "0", "-crf", "32", "-row-mt", "1", "-c:a", "libopus"],
            _ => &["-c", "copy"],
        },
        TranscodeTarget::Audio(format) => match format.as_str() {
            "mp3" => &["-vn", "-c:a", "libmp3lame", "-q:a", "2"],
            "m4a" | "aac" => &["-vn", "-c:a", "aac", "-b:a", "192k"],
            "opus" => &["-vn", "-c:a", "libopus", "-b:a", "128k"],
            "ogg" => &["-vn", "-c:a", "libvorbis", "-q:a", "5"],
            "flac" => &["-vn", "-c:a", "flac"],
            "wav" => &["-vn", "-c:a", "pcm_s16le"],
            _ => &["-vn"],
        },
    };
    args.extend(codec_args.iter().map(OsString::from));
    args.push(destination.as_os_str().to_owned());
    args
}

/// Pull width/height out of ffprobe's JSON output
pub fn parse_dimensions(info: &serde_json::Value) -> Option<(u32, u32)> {
    let stream = info["streams"].as_array()?.first()?;
    let width = stream["width"].as_u64()? as u32;
    let height = stream["height"].as_u64()? as u32;
    (width > 0 && height > 0).then_some((width, height))
}
