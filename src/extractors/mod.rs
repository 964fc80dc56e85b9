use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::mpsc;
use url::Url;

pub mod cookies;
pub mod runtime;
pub mod ytdlp;

use crate::config::Config;
use crate::{JobError, ValidationError};

/// What the requester wants back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaMode {
    Video,
    Audio,
}

impl MediaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaMode::Video => "video",
            MediaMode::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaMode {
    type Err = ValidationError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_lowercase().as_str() {
            "video" | "download" | "v" => Ok(MediaMode::Video),
            "audio" | "a" => Ok(MediaMode::Audio),
            other => Err(ValidationError::UnsupportedMode(other.to_string())),
        }
    }
}

/// One source format reported by the extraction tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatCandidate {
    /// Opaque id understood by the extraction tool
    pub format_id: String,

    /// File extension of the format (mp4, webm, m4a...)
    pub container: String,

    /// Video height in pixels, if the format carries video
    pub height: Option<u32>,

    /// Total bitrate in kbit/s
    pub bitrate_kbps: Option<f64>,

    /// Bitrate of the audio track alone, when the tool reports it
    pub audio_kbps: Option<f64>,

    pub has_video: bool,

    pub has_audio: bool,

    /// Declared or approximate size. Advisory only.
    pub size_estimate: Option<u64>,

    /// Already in the forced output format, no conversion needed
    pub satisfies_forced: bool,
}

impl FormatCandidate {
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    pub fn is_muxed(&self) -> bool {
        self.has_audio && self.has_video
    }

    /// Audio quality used to rank candidates for audio requests.
    /// Audio-only formats fall back to their total bitrate.
    pub fn audio_bitrate(&self) -> Option<f64> {
        if !self.has_audio {
            return None;
        }
        self.audio_kbps
            .or_else(|| self.bitrate_kbps.filter(|_| self.is_audio_only()))
    }

    /// Human readable quality label used in captions and logs
    pub fn label(&self) -> String {
        match (self.height, self.bitrate_kbps) {
            (Some(height), _) if self.has_video => format!("{}p {}", height, self.container),
            (_, Some(kbps)) => format!("{:.0} kbps {}", kbps, self.container),
            _ => format!("{} ({})", self.format_id, self.container),
        }
    }
}

/// Metadata plus the available formats for one URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaListing {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub candidates: Vec<FormatCandidate>,
}

/// One progress sample reported while a download runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadProgress {
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_secs: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        match (self.downloaded_bytes, self.total_bytes) {
            (Some(done), Some(total)) if total > 0 => Some((done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)),
            _ => None,
        }
    }
}

/// Where an extractor publishes [`DownloadProgress`] samples
pub type ProgressSender = mpsc::UnboundedSender<DownloadProgress>;

/// Credential and runtime hints forwarded to the extraction tool untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractorHints {
    pub cookie_file: Option<PathBuf>,
    pub browser_cookies: Option<String>,
    pub js_runtime: Option<String>,
}

impl ExtractorHints {
    /// Hints from configuration plus a JS runtime resolved at start-up
    pub fn from_config(config: &Config, js_runtime: Option<String>) -> Self {
        if let Some(path) = &config.extractor.cookie_file {
            cookies::check_cookie_file(path);
        }
        let browser_cookies = config
            .extractor
            .browser_cookies
            .as_deref()
            .and_then(cookies::parse_browser_option)
            .map(|option| option.to_string());

        Self {
            cookie_file: config.extractor.cookie_file.clone(),
            browser_cookies,
            js_runtime: js_runtime.or_else(|| config.extractor.js_runtime.clone()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.cookie_file.is_some() || self.browser_cookies.is_some()
    }
}

/// Capability interface over the external extraction tool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Enumerate the formats available for `url`
    async fn list_formats(&self, url: &str, hints: &ExtractorHints) -> Result<MediaListing, JobError>;

    /// Download `candidate` into `dest_dir` and return the materialized file.
    /// Progress samples go to `progress` while the download runs.
    async fn fetch(
        &self,
        url: &str,
        candidate: &FormatCandidate,
        mode: MediaMode,
        dest_dir: &Path,
        hints: &ExtractorHints,
        progress: &ProgressSender,
    ) -> Result<PathBuf, JobError>;
}

/// Validate that `url` is a plausible media link and normalize it
pub fn validate_url(url: &str) -> Result<Url, ValidationError> {
    let parsed = Url::parse(url.trim())
        .map_err(|_| ValidationError::MalformedUrl(url.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::MalformedUrl(url.to_string()));
    }

    // A media platform lives on a named host with at least one dot
    let plausible_host = parsed
        .host_str()
        .map(|host| host.contains('.') && !host.starts_with('.') && !host.ends_with('.'))
        .unwrap_or(false);
    if !plausible_host {
        return Err(ValidationError::MalformedUrl(url.to_string()));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(height: Option<u32>, kbps: Option<f64>, video: bool, audio: bool) -> FormatCandidate {
        FormatCandidate {
            format_id: "x".into(),
            container: "mp4".into(),
            height,
            bitrate_kbps: kbps,
            audio_kbps: None,
            has_video: video,
            has_audio: audio,
            size_estimate: None,
            satisfies_forced: false,
        }
    }

    #[test]
    fn mode_tokens_are_parsed() {
        assert_eq!("video".parse::<MediaMode>().unwrap(), MediaMode::Video);
        assert_eq!(" Audio ".parse::<MediaMode>().unwrap(), MediaMode::Audio);
        assert_eq!(
            "gif".parse::<MediaMode>().unwrap_err(),
            ValidationError::UnsupportedMode("gif".into())
        );
    }

    #[test]
    fn labels_describe_quality() {
        assert_eq!(candidate(Some(720), Some(1500.0), true, true).label(), "720p mp4");
        assert_eq!(candidate(None, Some(129.6), false, true).label(), "130 kbps mp4");
        assert!(candidate(None, None, false, true).is_audio_only());
        assert!(candidate(Some(360), None, true, true).is_muxed());
    }

    #[test]
    fn audio_bitrate_ignores_the_video_share_of_muxed_formats() {
        let mut muxed = candidate(Some(720), Some(2500.0), true, true);
        assert_eq!(muxed.audio_bitrate(), None);
        muxed.audio_kbps = Some(128.0);
        assert_eq!(muxed.audio_bitrate(), Some(128.0));

        assert_eq!(candidate(None, Some(160.0), false, true).audio_bitrate(), Some(160.0));
        assert_eq!(candidate(Some(1080), Some(4000.0), true, false).audio_bitrate(), None);
    }

    #[test]
    fn progress_percent_needs_a_known_total() {
        let mut progress = DownloadProgress {
            downloaded_bytes: Some(25),
            total_bytes: Some(100),
            ..Default::default()
        };
        assert_eq!(progress.percent(), Some(25.0));
        progress.total_bytes = None;
        assert_eq!(progress.percent(), None);
    }

    #[test]
    fn urls_are_validated() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_url("http://vimeo.com/1").is_ok());
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url("https://localhost/video").is_err());
        assert!(validate_url("not a url").is_err());
    }
}
