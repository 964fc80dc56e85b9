//! Texts sent back to the requester.

use crate::extractors::{DownloadProgress, FormatCandidate};
use crate::pipeline::{Admission, JobId};
use crate::utils::{format_duration, format_file_size};
use crate::{JobError, ValidationError};

const CAPTION_TITLE_LIMIT: usize = 200;

const LIVE_PHRASES: &[&str] = &["live event", "is live", "live stream", "livestream"];

const AGE_PHRASES: &[&str] = &[
    "age-restricted",
    "age restricted",
    "confirm your age",
    "age verification",
    "inappropriate for some users",
];

const GEO_PHRASES: &[&str] = &[
    "not available in your country",
    "not available in your region",
    "geo restrict",
    "geo-restrict",
    "geo-blocked",
    "from your location",
];

fn mentions_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| text.contains(phrase))
}

/// One user-facing explanation per failed job
pub fn failure_text(error: &JobError, has_credentials: bool) -> String {
    match error {
        JobError::Validation(reason) => validation_text(reason),
        JobError::Extraction {
            message,
            needs_credentials,
        } => extraction_text(message, *needs_credentials, has_credentials),
        JobError::Network(_) => "Network problems while fetching the media. Please try again a bit later.".to_string(),
        JobError::Conversion(_) => "The media was downloaded but could not be converted.".to_string(),
        JobError::SizeLimitExceeded { size, limit, .. } => format!(
            "The file is too large to send ({}, limit {}) even at the lowest available quality.",
            format_file_size(*size),
            format_file_size(*limit)
        ),
        JobError::Delivery(_) => "The file is ready but could not be uploaded. Please try again later.".to_string(),
        JobError::Storage(_) => "Something went wrong on the server side. Please try again later.".to_string(),
    }
}

pub fn validation_text(reason: &ValidationError) -> String {
    match reason {
        ValidationError::RequesterNotAllowed(_) => "Sorry, this bot is private.".to_string(),
        ValidationError::MissingUrl => "Send a link after the command, e.g. /audio https://...".to_string(),
        ValidationError::MalformedUrl(_) => {
            "That does not look like a valid link. Check the URL and try again.".to_string()
        }
        ValidationError::UnsupportedMode(mode) => format!("Unknown mode '{mode}'. Use video or audio."),
    }
}

fn extraction_text(message: &str, needs_credentials: bool, has_credentials: bool) -> String {
    let normalized = message.to_lowercase();

    if normalized.contains("playlist") {
        return "Playlists are not supported. Send a link to a single video.".to_string();
    }
    if mentions_any(&normalized, LIVE_PHRASES) {
        return "This is a live stream. Try again after the broadcast ends.".to_string();
    }
    if mentions_any(&normalized, AGE_PHRASES) {
        return "This video is age restricted and needs a signed-in account.".to_string();
    }
    if mentions_any(&normalized, GEO_PHRASES) {
        return "This video is not available in the server's region.".to_string();
    }
    if needs_credentials {
        return if has_credentials {
            "This video requires sign-in and the configured cookies were not accepted. They may have expired.".to_string()
        } else {
            "This video requires sign-in. The bot operator can configure cookies to allow it.".to_string()
        };
    }
    if normalized.contains("unsupported url") || normalized.contains("no downloadable formats") {
        return "This link is not supported or has no downloadable media.".to_string();
    }
    "Could not process the link. Check that the media is available and try again.".to_string()
}

/// Reply to a request the scheduler accepted or refused
pub fn admission_text(admission: Admission) -> String {
    match admission {
        Admission::Started => "Working on it...".to_string(),
        Admission::Queued { position } => format!("Queued at position {position}."),
        Admission::Duplicate { existing } => {
            format!("This link is already being processed (job {}).", existing.seq)
        }
    }
}

pub fn downgrade_text(size: u64, limit: u64) -> String {
    format!(
        "The file is {} which is over the {} limit. Trying a lower quality...",
        format_file_size(size),
        format_file_size(limit)
    )
}

pub fn started_text(job: JobId, title: Option<&str>, candidate: &FormatCandidate) -> String {
    match title {
        Some(title) => format!("Downloading \"{}\" ({}), job {}", truncate(title, 80), candidate.label(), job.seq),
        None => format!("Downloading {}, job {}", candidate.label(), job.seq),
    }
}

/// Status line while a download is running, e.g. `42% of 12.0 MB at 1.5 MB/s, 8s left`
pub fn progress_text(header: &str, progress: &DownloadProgress) -> String {
    let mut parts = Vec::new();
    match (progress.percent(), progress.total_bytes, progress.downloaded_bytes) {
        (Some(percent), Some(total), _) => parts.push(format!("{percent:.0}% of {}", format_file_size(total))),
        (_, _, Some(done)) => parts.push(format!("{} so far", format_file_size(done))),
        _ => {}
    }
    if let Some(speed) = progress.speed_bytes_per_sec.filter(|speed| *speed >= 1.0) {
        parts.push(format!("at {}/s", format_file_size(speed as u64)));
    }
    if let Some(eta) = progress.eta_secs {
        parts.push(format!("{} left", format_duration(eta as f64)));
    }

    if parts.is_empty() {
        header.to_string()
    } else {
        format!("{header}\n{}", parts.join(", "))
    }
}

pub fn converting_text() -> &'static str {
    "Converting..."
}

pub fn uploading_text() -> &'static str {
    "Uploading..."
}

/// Caption attached to the delivered file
pub fn caption(title: Option<&str>, candidate: &FormatCandidate) -> String {
    match title {
        Some(title) => format!("{}\n{}", truncate(title, CAPTION_TITLE_LIMIT), candidate.label()),
        None => candidate.label(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
