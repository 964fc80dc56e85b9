use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extractors::cookies;

/// Prefix for every environment override
pub const ENV_PREFIX: &str = "COURIER_";

/// Audio formats ffmpeg can be asked to produce. `best` disables forcing.
pub const AUDIO_FORMATS: &[&str] = &["best", "mp3", "m4a", "aac", "opus", "ogg", "flac", "wav"];

/// Largest upload ceiling accepted, the local Bot API server limit
pub const MAX_UPLOAD_MB_LIMIT: u64 = 2000;

/// Containers the output can be forced into
pub const OUTPUT_CONTAINERS: &[&str] = &["mp4", "mkv", "webm", "mov", "m4v"];

/// Process-wide settings. Built once at start-up and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bot credentials and chat access
    pub telegram: TelegramConfig,

    /// Where artifacts live and how big they may get
    pub storage: StorageConfig,

    /// Output format preferences
    pub media: MediaConfig,

    /// Opaque hints forwarded to yt-dlp
    pub extractor: ExtractorConfig,

    /// Concurrency, retry and timeout tuning
    pub limits: LimitsConfig,

    /// External tool locations
    pub tools: ToolsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token
    pub bot_token: String,

    /// Chats allowed to submit jobs. Empty allows everyone.
    pub allowed_chat_ids: BTreeSet<i64>,

    /// Bot API base URL
    pub api_base: String,

    /// Long-poll timeout for getUpdates
    pub poll_timeout_secs: u64,

    /// Timeout for a single upload attempt
    pub upload_timeout_secs: u64,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("allowed_chat_ids", &self.allowed_chat_ids)
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for per-job workspaces
    pub download_dir: PathBuf,

    /// Remove job workspaces once the job is finished
    pub cleanup_after_send: bool,

    /// Upload ceiling in megabytes
    pub max_upload_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Preferred maximum video height. `None` means the best available.
    pub default_resolution: Option<u32>,

    /// Convert audio-only downloads into `preferred_audio_format`
    pub force_audio_format: bool,

    pub preferred_audio_format: String,

    /// Convert video downloads into `preferred_output_format`
    pub force_output_format: bool,

    pub preferred_output_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Netscape cookie file passed via --cookies
    pub cookie_file: Option<PathBuf>,

    /// Browser selector passed via --cookies-from-browser, `browser[:profile]`
    pub browser_cookies: Option<String>,

    /// JS runtime passed via --js-runtimes
    pub js_runtime: Option<String>,

    /// Look up deno and fetch a missing yt-dlp at start-up
    pub auto_setup_runtime: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Jobs processed at the same time across all chats
    pub workers: usize,

    /// Fetches per job before giving up on the size ceiling
    pub max_downgrade_attempts: u32,

    /// Attempts for transient download and upload failures
    pub retry_attempts: u32,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// Timeout for a yt-dlp invocation
    pub extract_timeout_secs: u64,

    /// Timeout for format listing and ffprobe
    pub probe_timeout_secs: u64,

    /// Timeout for an ffmpeg conversion
    pub transcode_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            storage: StorageConfig::default(),
            media: MediaConfig::default(),
            extractor: ExtractorConfig::default(),
            limits: LimitsConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_chat_ids: BTreeSet::new(),
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            upload_timeout_secs: 300,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::download_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            download_dir: base.join("media-courier"),
            cleanup_after_send: true,
            max_upload_mb: 49,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            default_resolution: Some(720),
            force_audio_format: false,
            preferred_audio_format: "best".to_string(),
            force_output_format: false,
            preferred_output_format: "mp4".to_string(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            cookie_file: None,
            browser_cookies: None,
            js_runtime: None,
            auto_setup_runtime: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_downgrade_attempts: 3,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            extract_timeout_secs: 600,
            probe_timeout_secs: 60,
            transcode_timeout_secs: 900,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl Config {
    /// Load configuration: optional YAML file, then environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        config.prepare_download_dir()?;
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path)
            .context("Failed to read config file")?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Get configuration file path
    fn config_path() -> Option<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir().map(|dir| dir.join("media-courier").join("config.yaml"))
    }

    /// Apply `COURIER_*` overrides. `lookup` abstracts the environment for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(token) = var("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(raw) = var("ALLOWED_CHAT_IDS") {
            self.telegram.allowed_chat_ids = parse_chat_ids(&raw);
        }
        if let Some(dir) = var("DOWNLOAD_DIR") {
            self.storage.download_dir = PathBuf::from(dir);
        }
        if let Some(raw) = var("MAX_UPLOAD_MB") {
            self.storage.max_upload_mb = parse_number(&raw, "MAX_UPLOAD_MB")?;
        }
        if let Some(raw) = var("CLEANUP_AFTER_SEND") {
            self.storage.cleanup_after_send = parse_bool(&raw, "CLEANUP_AFTER_SEND")?;
        }
        if let Some(raw) = var("DEFAULT_RESOLUTION") {
            self.media.default_resolution = parse_resolution(&raw)?;
        }
        if let Some(raw) = var("FORCE_AUDIO_FORMAT") {
            self.media.force_audio_format = parse_bool(&raw, "FORCE_AUDIO_FORMAT")?;
        }
        if let Some(format) = var("PREFERRED_AUDIO_FORMAT") {
            self.media.preferred_audio_format = format.to_lowercase();
        }
        if let Some(raw) = var("FORCE_OUTPUT_FORMAT") {
            self.media.force_output_format = parse_bool(&raw, "FORCE_OUTPUT_FORMAT")?;
        }
        if let Some(format) = var("PREFERRED_OUTPUT_FORMAT") {
            self.media.preferred_output_format = format.to_lowercase();
        }
        if let Some(path) = var("COOKIE_FILE") {
            self.extractor.cookie_file = Some(PathBuf::from(path));
        }
        if let Some(browser) = var("COOKIES_FROM_BROWSER") {
            self.extractor.browser_cookies = Some(browser);
        }
        if let Some(runtime) = var("JS_RUNTIME") {
            self.extractor.js_runtime = Some(runtime);
        }
        if let Some(raw) = var("AUTO_SETUP_RUNTIME") {
            self.extractor.auto_setup_runtime = parse_bool(&raw, "AUTO_SETUP_RUNTIME")?;
        }
        if let Some(raw) = var("WORKERS") {
            self.limits.workers = parse_number(&raw, "WORKERS")?;
        }
        if let Some(raw) = var("MAX_DOWNGRADE_ATTEMPTS") {
            self.limits.max_downgrade_attempts = parse_number(&raw, "MAX_DOWNGRADE_ATTEMPTS")?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_upload_mb == 0 {
            anyhow::bail!("Upload ceiling must be at least 1 MB");
        }
        if self.storage.max_upload_mb > MAX_UPLOAD_MB_LIMIT {
            anyhow::bail!(
                "Upload ceiling of {} MB is out of range, the maximum is {} MB",
                self.storage.max_upload_mb,
                MAX_UPLOAD_MB_LIMIT
            );
        }
        if self.limits.workers == 0 {
            anyhow::bail!("At least one worker is required");
        }
        if self.limits.max_downgrade_attempts == 0 || self.limits.retry_attempts == 0 {
            anyhow::bail!("Attempt limits must be at least 1");
        }
        if !AUDIO_FORMATS.contains(&self.media.preferred_audio_format.as_str()) {
            anyhow::bail!(
                "Unsupported audio format '{}', expected one of {}",
                self.media.preferred_audio_format,
                AUDIO_FORMATS.join(", ")
            );
        }
        if !OUTPUT_CONTAINERS.contains(&self.media.preferred_output_format.as_str()) {
            anyhow::bail!(
                "Unsupported output container '{}', expected one of {}",
                self.media.preferred_output_format,
                OUTPUT_CONTAINERS.join(", ")
            );
        }
        if let Some(raw) = &self.extractor.browser_cookies {
            match cookies::parse_browser_option(raw) {
                Some(option) if option.is_supported() => {}
                _ => anyhow::bail!(
                    "Unsupported cookie browser '{}', expected browser[:profile] with one of {}",
                    raw,
                    cookies::SUPPORTED_BROWSERS.join(", ")
                ),
            }
        }
        Ok(())
    }

    /// The bot token, required only when talking to Telegram
    pub fn require_bot_token(&self) -> Result<&str> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!("{ENV_PREFIX}BOT_TOKEN is not set");
        }
        Ok(&self.telegram.bot_token)
    }

    fn prepare_download_dir(&mut self) -> Result<()> {
        fs_err::create_dir_all(&self.storage.download_dir)
            .context("Failed to create download directory")?;
        self.storage.download_dir = fs_err::canonicalize(&self.storage.download_dir)?;
        Ok(())
    }

    /// Upload ceiling in bytes
    pub fn max_upload_bytes(&self) -> u64 {
        self.storage.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.telegram.allowed_chat_ids.is_empty()
            || self.telegram.allowed_chat_ids.contains(&chat_id)
    }

    /// Audio format every audio-only artifact must end up in, if forced
    pub fn forced_audio_format(&self) -> Option<&str> {
        let format = self.media.preferred_audio_format.as_str();
        (self.media.force_audio_format && format != "best").then_some(format)
    }

    /// Container every video artifact must end up in, if forced
    pub fn forced_container(&self) -> Option<&str> {
        self.media
            .force_output_format
            .then_some(self.media.preferred_output_format.as_str())
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.extract_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.probe_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.transcode_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.upload_timeout_secs)
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Bot Token: {}", redact(&self.telegram.bot_token));
        if self.telegram.allowed_chat_ids.is_empty() {
            println!("  Allowed Chats: everyone");
        } else {
            let ids: Vec<String> = self
                .telegram
                .allowed_chat_ids
                .iter()
                .map(|id| id.to_string())
                .collect();
            println!("  Allowed Chats: {}", ids.join(", "));
        }
        println!("  Download Dir: {}", self.storage.download_dir.display());
        println!("  Upload Limit: {} MB", self.storage.max_upload_mb);
        println!("  Cleanup After Send: {}", self.storage.cleanup_after_send);
        match self.media.default_resolution {
            Some(height) => println!("  Default Resolution: {}p", height),
            None => println!("  Default Resolution: best"),
        }
        println!("  Forced Audio Format: {}", self.forced_audio_format().unwrap_or("off"));
        println!("  Forced Container: {}", self.forced_container().unwrap_or("off"));
        if let Some(cookies) = &self.extractor.cookie_file {
            println!("  Cookie File: {}", cookies.display());
        }
        if let Some(browser) = &self.extractor.browser_cookies {
            println!("  Browser Cookies: {}", browser);
        }
        println!("  Workers: {}", self.limits.workers);
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

fn parse_bool(raw: &str, name: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{ENV_PREFIX}{name}: expected a boolean, got '{other}'"),
    }
}

fn parse_number<T>(raw: &str, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("{ENV_PREFIX}{name}: expected a number, got '{raw}'"))
}

fn parse_resolution(raw: &str) -> Result<Option<u32>> {
    let value = raw.trim_end_matches(['p', 'P']);
    if value.eq_ignore_ascii_case("best") {
        return Ok(None);
    }
    parse_number(value, "DEFAULT_RESOLUTION").map(Some)
}

/// Parse a comma separated chat id list, skipping entries that are not integers
pub fn parse_chat_ids(raw: &str) -> BTreeSet<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match part.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = part, "Ignoring invalid chat id in allowlist");
                None
            }
        })
        .collect()
}
