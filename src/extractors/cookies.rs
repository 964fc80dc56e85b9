//! Sanity checks for the cookie material handed to yt-dlp.
//!
//! The files are never rewritten here; a stale file is still passed through, but
//! the operator gets a warning explaining why restricted videos may fail.

use std::fmt;
use std::path::Path;

/// Domains whose cookies matter for the supported platforms
pub const DEFAULT_COOKIE_DOMAINS: &[&str] = &["youtube.com", "google.com", "googlevideo.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieFileStatus {
    Missing,
    Unreadable,
    NoRelevantEntries,
    Expired,
    Fresh,
}

/// Browsers yt-dlp can read cookies from
pub const SUPPORTED_BROWSERS: &[&str] = &[
    "brave", "chrome", "chromium", "edge", "firefox", "opera", "safari", "vivaldi", "whale",
];

/// A `browser[+keyring][:profile]` cookie source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookies {
    /// Browser name, lowercased, possibly with a `+keyring` suffix
    pub browser: String,
    pub profile: Option<String>,
}

impl BrowserCookies {
    pub fn is_supported(&self) -> bool {
        let name = self.browser.split('+').next().unwrap_or_default();
        SUPPORTED_BROWSERS.contains(&name)
    }
}

impl fmt::Display for BrowserCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.profile {
            Some(profile) => write!(f, "{}:{}", self.browser, profile),
            None => f.write_str(&self.browser),
        }
    }
}

/// Split a `browser[:profile]` option
pub fn parse_browser_option(value: &str) -> Option<BrowserCookies> {
    let raw = value.trim();
    let (browser, profile) = match raw.split_once(':') {
        Some((browser, profile)) => (browser, Some(profile.trim().to_string()).filter(|p| !p.is_empty())),
        None => (raw, None),
    };

    let browser = browser.trim().to_lowercase();
    if browser.is_empty() {
        return None;
    }
    Some(BrowserCookies { browser, profile })
}

fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches("#HttpOnly_")
        .trim_start_matches('.')
        .to_lowercase()
}

fn domain_matches(domain: &str, suffixes: &[&str]) -> bool {
    let normalized = normalize_domain(domain);
    suffixes.iter().any(|suffix| {
        let suffix = suffix.trim_start_matches('.').to_lowercase();
        normalized == suffix || normalized.ends_with(&format!(".{suffix}"))
    })
}

/// Inspect a Netscape cookie file for unexpired entries on `domains`
pub fn cookie_file_status(content: &str, domains: &[&str], now_ts: i64) -> CookieFileStatus {
    let mut has_relevant = false;

    for line in content.lines() {
        let line = line.trim();
        // `#HttpOnly_` lines are real entries, other `#` lines are comments
        if line.is_empty() || (line.starts_with('#') && !line.starts_with("#HttpOnly_")) {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            continue;
        }
        if !domains.is_empty() && !domain_matches(fields[0], domains) {
            continue;
        }
        has_relevant = true;
        match fields[4].trim().parse::<i64>() {
            Ok(0) => return CookieFileStatus::Fresh,
            Ok(expiry) if expiry > now_ts => return CookieFileStatus::Fresh,
            _ => {}
        }
    }

    if has_relevant {
        CookieFileStatus::Expired
    } else {
        CookieFileStatus::NoRelevantEntries
    }
}

/// Check the configured cookie file and log anything suspicious
pub fn check_cookie_file(path: &Path) -> CookieFileStatus {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Cookie file does not exist; continuing without a valid session");
        return CookieFileStatus::Missing;
    }

    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            tracing::warn!(%error, "Failed to read cookie file");
            return CookieFileStatus::Unreadable;
        }
    };

    let status = cookie_file_status(&content, DEFAULT_COOKIE_DOMAINS, chrono::Utc::now().timestamp());
    match status {
        CookieFileStatus::Fresh => {
            tracing::debug!(path = %path.display(), "Cookie file looks valid");
        }
        CookieFileStatus::Expired => {
            tracing::warn!(path = %path.display(), "All relevant cookies have expired; restricted videos may fail");
        }
        _ => {
            tracing::warn!(path = %path.display(), "Cookie file has no entries for supported platforms");
        }
    }
    status
}
