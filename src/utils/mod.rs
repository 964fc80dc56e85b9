use std::path::{Path, PathBuf};

use crate::config::Config;

pub mod process;

pub use process::{command_available, run_streaming, run_with_timeout, ProcessError};

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
                _ => '_',
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// A fresh path next to `path` with the given extension, e.g. for conversion output
pub fn unique_sibling(path: &Path, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
    path.with_file_name(format!("{}.{}.{}", stem, suffix, extension))
}

/// Lowercased file extension, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Check if the current environment has the external tools the pipeline needs
pub async fn check_dependencies(config: &Config) -> Vec<String> {
    let (yt_dlp, ffmpeg, ffprobe) = futures_util::join!(
        command_available(&config.tools.yt_dlp, "--version"),
        command_available(&config.tools.ffmpeg, "-version"),
        command_available(&config.tools.ffprobe, "-version"),
    );

    let mut missing = Vec::new();
    if !yt_dlp {
        missing.push(format!("{} - required to list and download media", config.tools.yt_dlp));
    }
    if !ffmpeg {
        missing.push(format!("{} - required for merging and format conversion", config.tools.ffmpeg));
    }
    if !ffprobe {
        missing.push(format!("{} - recommended for video dimensions", config.tools.ffprobe));
    }
    missing
}
