use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;

use crate::config::Config;
use crate::utils::command_available;

const YTDLP_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";
const YTDLP_CHECKSUMS: &str = "SHA2-256SUMS";
const DENO_RELEASE_BASE: &str = "https://github.com/denoland/deno/releases/latest/download";

/// Tool locations resolved once at start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTools {
    /// Program used to invoke yt-dlp
    pub yt_dlp: String,

    /// Value for `--js-runtimes`, if any
    pub js_runtime: Option<String>,
}

/// Directory holding binaries this application downloaded itself
pub fn managed_bin_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("media-courier").join("bin"))
}

fn executable_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn release_asset_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else if cfg!(target_arch = "aarch64") {
        "yt-dlp_linux_aarch64"
    } else {
        "yt-dlp_linux"
    }
}

/// Release archive for this platform, `None` where deno publishes no build
fn deno_asset_name() -> Option<&'static str> {
    if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        Some("deno-x86_64-unknown-linux-gnu.zip")
    } else if cfg!(all(target_os = "linux", target_arch = "aarch64")) {
        Some("deno-aarch64-unknown-linux-gnu.zip")
    } else if cfg!(all(target_os = "macos", target_arch = "x86_64")) {
        Some("deno-x86_64-apple-darwin.zip")
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        Some("deno-aarch64-apple-darwin.zip")
    } else if cfg!(all(target_os = "windows", target_arch = "x86_64")) {
        Some("deno-x86_64-pc-windows-msvc.zip")
    } else {
        None
    }
}

/// Resolve yt-dlp and the JS runtime, provisioning yt-dlp when allowed
pub async fn prepare(config: &Config) -> RuntimeTools {
    RuntimeTools {
        yt_dlp: resolve_yt_dlp(config).await,
        js_runtime: resolve_js_runtime(config).await,
    }
}

async fn resolve_yt_dlp(config: &Config) -> String {
    let configured = config.tools.yt_dlp.clone();
    if command_available(&configured, "--version").await {
        return configured;
    }

    let Some(managed) = managed_bin_dir().map(|dir| dir.join(executable_name("yt-dlp"))) else {
        return configured;
    };
    if managed.exists() {
        tracing::info!(path = %managed.display(), "Using managed yt-dlp");
        return managed.to_string_lossy().into_owned();
    }

    if !config.extractor.auto_setup_runtime {
        tracing::warn!(program = %configured, "yt-dlp not found and auto setup is disabled");
        return configured;
    }

    tracing::info!("yt-dlp not found, downloading the latest release");
    match download_yt_dlp(&managed).await {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "Failed to provision yt-dlp");
            configured
        }
    }
}

/// Pick the `--js-runtimes` value: explicit hint, then a managed or PATH deno,
/// then a freshly downloaded deno
pub async fn resolve_js_runtime(config: &Config) -> Option<String> {
    if let Some(hint) = &config.extractor.js_runtime {
        return Some(hint.clone());
    }
    if !config.extractor.auto_setup_runtime {
        return None;
    }

    let managed = managed_bin_dir().map(|dir| dir.join(executable_name("deno")));
    if let Some(managed) = managed.as_ref().filter(|path| path.exists()) {
        return Some(format!("deno:{}", managed.display()));
    }
    if command_available("deno", "--version").await {
        return Some("deno".to_string());
    }

    if let Some(managed) = managed {
        tracing::info!("deno not found, downloading the latest release");
        match download_deno(&managed).await {
            Ok(path) => return Some(format!("deno:{}", path.display())),
            Err(error) => tracing::error!(error = %format!("{error:#}"), "Failed to provision deno"),
        }
    }

    tracing::warn!("No JS runtime found; some YouTube formats may be unavailable. Install deno or set COURIER_JS_RUNTIME");
    None
}

/// Download the yt-dlp release binary to `target`, verifying its published checksum
pub async fn download_yt_dlp(target: &Path) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let asset = release_asset_name();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;

    let response = client
        .get(format!("{YTDLP_RELEASE_BASE}/{asset}"))
        .send()
        .await
        .context("Failed to request yt-dlp release")?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download yt-dlp: HTTP {}", response.status());
    }
    let bytes = response.bytes().await?;

    let sums = client
        .get(format!("{YTDLP_RELEASE_BASE}/{YTDLP_CHECKSUMS}"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to download yt-dlp checksums")?;

    let expected = expected_checksum(&sums, asset)
        .with_context(|| format!("No checksum published for {asset}"))?;
    let actual = sha256_hex(&bytes);
    if !actual.eq_ignore_ascii_case(&expected) {
        anyhow::bail!("Checksum mismatch for {asset}: expected {expected}, got {actual}");
    }

    tokio::fs::write(target, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(target, perms).await?;
    }

    tracing::info!(path = %target.display(), "yt-dlp downloaded and verified");
    Ok(target.to_path_buf())
}

/// Download the deno release archive, verify it and unpack the binary to `target`
pub async fn download_deno(target: &Path) -> Result<PathBuf> {
    let asset = deno_asset_name().context("No deno build is published for this platform")?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?;

    let archive = client
        .get(format!("{DENO_RELEASE_BASE}/{asset}"))
        .send()
        .await
        .context("Failed to request deno release")?
        .error_for_status()
        .context("Failed to download deno")?
        .bytes()
        .await?;

    let checksum_file = client
        .get(format!("{DENO_RELEASE_BASE}/{asset}.sha256sum"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to download deno checksum")?;

    let expected = parse_deno_checksum(&checksum_file)
        .with_context(|| format!("No checksum found for {asset}"))?;
    let actual = sha256_hex(&archive);
    if !actual.eq_ignore_ascii_case(&expected) {
        anyhow::bail!("Checksum mismatch for {asset}: expected {expected}, got {actual}");
    }

    let entry = executable_name("deno");
    let destination = target.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extract_zip_entry(&archive, &entry, &destination))
        .await
        .context("deno extraction task panicked")?;
    if let Err(error) = extracted {
        let _ = tokio::fs::remove_file(target).await;
        return Err(error);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(target, perms).await?;
    }

    tracing::info!(path = %target.display(), "deno downloaded and verified");
    Ok(target.to_path_buf())
}

/// Write the archive member `entry` to `target`
pub fn extract_zip_entry(archive: &[u8], entry: &str, target: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(archive)).context("failed to decode zip archive")?;
    let mut member = archive
        .by_name(entry)
        .with_context(|| format!("archive has no entry named {entry}"))?;

    let mut contents = Vec::with_capacity(usize::try_from(member.size()).unwrap_or_default());
    member
        .read_to_end(&mut contents)
        .with_context(|| format!("failed to read {entry} from archive"))?;
    fs_err::write(target, contents)?;
    Ok(())
}

/// Hash from a `.sha256sum` file, either `sha256sum` output or PowerShell's `Hash : ...` listing
pub fn parse_deno_checksum(text: &str) -> Option<String> {
    text.split(|c: char| c.is_whitespace() || c == ':')
        .find(|token| token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_lowercase)
}

/// Find the hash for `filename` in a `sha256sum`-style listing
pub fn expected_checksum(sums: &str, filename: &str) -> Option<String> {
    sums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == filename).then(|| hash.to_string())
    })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
