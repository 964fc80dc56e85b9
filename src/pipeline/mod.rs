use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

pub mod progress;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod workspace;

pub use progress::ProgressReporter;
pub use resolver::{mark_forced, select, SelectionCriteria};
pub use retry::RetryPolicy;
pub use scheduler::{Admission, JobRunner, JobScheduler, SchedulerState};
pub use workspace::JobWorkspace;

use crate::bot::{messages, FileKind, Messenger, OutgoingFile};
use crate::config::Config;
use crate::extractors::{ExtractorHints, FormatCandidate, MediaExtractor, MediaListing, MediaMode};
use crate::transcode::{TranscodeTarget, Transcoder};
use crate::utils::{extension_of, format_file_size};
use crate::JobError;

/// Containers Telegram plays inline as video
pub const TELEGRAM_VIDEO_EXTS: &[&str] = &["mp4", "m4v", "mov"];

/// Requester id plus a process-wide monotonic sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    pub requester: i64,
    pub seq: u64,
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.requester, self.seq)
    }
}

/// Why a job ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Extraction,
    Network,
    Conversion,
    Delivery,
    Storage,
}

impl FailureKind {
    fn of(error: &JobError) -> Self {
        match error {
            JobError::Validation(_) => FailureKind::Validation,
            JobError::Extraction { .. } => FailureKind::Extraction,
            JobError::Network(_) => FailureKind::Network,
            JobError::Conversion(_) => FailureKind::Conversion,
            JobError::Delivery(_) => FailureKind::Delivery,
            JobError::Storage(_) => FailureKind::Storage,
            // Oversized artifacts end in `Rejected`, never here
            JobError::SizeLimitExceeded { .. } => FailureKind::Delivery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Resolving,
    Downloaded,
    Transcoded,
    SizeChecked,
    Delivering,
    Done,
    Failed(FailureKind),
    /// The artifact could not be brought under the upload ceiling
    Rejected,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed(_) | JobStatus::Rejected)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Queued, Resolving)
            | (Resolving, Downloaded)
            | (Downloaded, Transcoded)
            | (Downloaded, SizeChecked)
            | (Transcoded, SizeChecked)
            | (SizeChecked, Delivering)
            | (SizeChecked, Resolving)
            | (SizeChecked, Rejected)
            | (Delivering, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Failed(kind) => write!(f, "failed ({kind:?})"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// One unit of work: fetch a URL in a mode and hand the result to the requester
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub mode: MediaMode,

    /// Maximum video height. `None` means the best available.
    pub resolution: Option<u32>,

    pub status: JobStatus,

    /// Format ids fetched so far, in order
    pub attempted: Vec<String>,

    /// Current artifact inside the job workspace
    pub artifact: Option<PathBuf>,

    pub attempts: u32,
    pub created_at: DateTime<Utc>,

    /// Editable status message in the requester's chat
    pub status_message: Option<i64>,
}

impl Job {
    pub fn new(id: JobId, url: impl Into<String>, mode: MediaMode, resolution: Option<u32>) -> Self {
        Self {
            id,
            url: url.into(),
            mode,
            resolution,
            status: JobStatus::Queued,
            attempted: Vec::new(),
            artifact: None,
            attempts: 0,
            created_at: Utc::now(),
            status_message: None,
        }
    }

    pub fn requester(&self) -> i64 {
        self.id.requester
    }

    fn advance(&mut self, next: JobStatus) {
        if !self.status.can_advance_to(next) {
            tracing::warn!(from = %self.status, to = %next, "Unexpected job state transition");
        }
        tracing::debug!(from = %self.status, to = %next, "Job state change");
        self.status = next;
    }
}

/// What a finished job left behind
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: JobId,
    pub status: JobStatus,
    pub attempts: u32,

    /// Size of the delivered file, for `Done` jobs
    pub delivered_size: Option<u64>,

    /// Error description for failed and rejected jobs
    pub error: Option<String>,
}

struct Fetched {
    candidate: FormatCandidate,
    path: PathBuf,
    size: u64,
}

/// Runs one job through resolve, fetch, convert, size check and delivery
pub struct JobPipeline {
    config: Arc<Config>,
    extractor: Arc<dyn MediaExtractor>,
    transcoder: Arc<dyn Transcoder>,
    messenger: Arc<dyn Messenger>,
    hints: ExtractorHints,
    retry: RetryPolicy,
}

impl JobPipeline {
    pub fn new(
        config: Arc<Config>,
        extractor: Arc<dyn MediaExtractor>,
        transcoder: Arc<dyn Transcoder>,
        messenger: Arc<dyn Messenger>,
        hints: ExtractorHints,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            config,
            extractor,
            transcoder,
            messenger,
            hints,
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Drive `job` to a terminal state. Errors never escape; they become the report.
    pub async fn run(&self, job: Job) -> JobReport {
        let span = tracing::info_span!("job", job = %job.id, mode = %job.mode);
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, mut job: Job) -> JobReport {
        tracing::info!(url = %job.url, resolution = ?job.resolution, "Job started");

        let outcome = match JobWorkspace::create(
            &self.config.storage.download_dir,
            &job.id,
            self.config.storage.cleanup_after_send,
        ) {
            Ok(mut workspace) => {
                let outcome = self.execute(&mut job, &workspace).await;
                workspace.finish();
                outcome
            }
            Err(error) => Err(error),
        };
        job.artifact = None;

        let chat = job.requester();
        match outcome {
            Ok(size) => {
                job.advance(JobStatus::Done);
                tracing::info!(size, attempts = job.attempts, "Job done");
                JobReport {
                    id: job.id,
                    status: job.status,
                    attempts: job.attempts,
                    delivered_size: Some(size),
                    error: None,
                }
            }
            Err(error) => {
                let terminal = match &error {
                    JobError::SizeLimitExceeded { .. } => JobStatus::Rejected,
                    other => JobStatus::Failed(FailureKind::of(other)),
                };
                job.advance(terminal);
                tracing::error!(kind = error.kind(), %error, attempts = job.attempts, "Job failed");

                let text = messages::failure_text(&error, self.hints.has_credentials());
                if let Err(notify_error) = self.messenger.send_text(chat, &text).await {
                    tracing::warn!(error = %notify_error, "Failed to notify requester");
                }

                JobReport {
                    id: job.id,
                    status: job.status,
                    attempts: job.attempts,
                    delivered_size: None,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    async fn execute(&self, job: &mut Job, workspace: &JobWorkspace) -> Result<u64, JobError> {
        job.advance(JobStatus::Resolving);
        let listing = self
            .retry
            .run_transient("list formats", |_| self.extractor.list_formats(&job.url, &self.hints))
            .await?;

        let MediaListing {
            title,
            duration,
            mut candidates,
        } = listing;
        if candidates.is_empty() {
            return Err(JobError::extraction("no downloadable formats found"));
        }
        mark_forced(&mut candidates, &self.config, job.mode);
        tracing::debug!(count = candidates.len(), "Formats listed");

        let fetched = self
            .fetch_within_ceiling(job, &candidates, title.as_deref(), workspace)
            .await?;

        job.advance(JobStatus::Delivering);
        let file = self
            .outgoing_file(job.mode, &fetched, title.as_deref(), duration)
            .await;
        self.update_status(job, messages::uploading_text()).await;
        self.deliver(job.requester(), &file).await?;
        Ok(fetched.size)
    }

    /// Resolve, fetch, convert and measure until an artifact fits the ceiling
    async fn fetch_within_ceiling(
        &self,
        job: &mut Job,
        candidates: &[FormatCandidate],
        title: Option<&str>,
        workspace: &JobWorkspace,
    ) -> Result<Fetched, JobError> {
        let limit = self.config.max_upload_bytes();
        let max_attempts = self.config.limits.max_downgrade_attempts.max(1);
        let mut ceiling = SelectionCriteria::initial(job.mode, job.resolution, &[]);
        let mut oversized: Option<u64> = None;

        loop {
            let criteria = ceiling.excluding(&job.attempted);
            let candidate = match (select(candidates, &criteria), oversized) {
                (Some(candidate), _) => candidate.clone(),
                (None, Some(size)) => {
                    tracing::warn!(size, limit, "No smaller format left to try");
                    return Err(JobError::SizeLimitExceeded {
                        size,
                        limit,
                        attempts: job.attempts,
                    });
                }
                (None, None) => {
                    return Err(JobError::extraction(format!(
                        "no format suitable for {} mode",
                        job.mode
                    )));
                }
            };

            if job.status == JobStatus::SizeChecked {
                job.advance(JobStatus::Resolving);
            }
            job.attempts += 1;
            job.attempted.push(candidate.format_id.clone());
            tracing::info!(
                format = %candidate.format_id,
                quality = %candidate.label(),
                attempt = job.attempts,
                "Fetching format"
            );
            let header = messages::started_text(job.id, title, &candidate);
            if job.attempts == 1 {
                job.status_message = self.open_status(job.requester(), &header).await;
            }

            let downloaded = self.download(job, &candidate, workspace, &header).await?;
            job.artifact = Some(downloaded.clone());
            job.advance(JobStatus::Downloaded);

            let path = self.transcode_stage(job, &candidate, downloaded, workspace).await?;

            let size = tokio::fs::metadata(&path).await?.len();
            job.advance(JobStatus::SizeChecked);
            if size <= limit {
                tracing::info!(size = %format_file_size(size), "Artifact within upload limit");
                return Ok(Fetched {
                    candidate,
                    path,
                    size,
                });
            }

            tracing::warn!(size, limit, format = %candidate.format_id, "Artifact exceeds upload limit");
            workspace.discard(&path);
            job.artifact = None;

            if job.attempts >= max_attempts {
                return Err(JobError::SizeLimitExceeded {
                    size,
                    limit,
                    attempts: job.attempts,
                });
            }

            oversized = Some(size);
            ceiling.below(&candidate);
            self.notify(job.requester(), &messages::downgrade_text(size, limit)).await;
        }
    }

    /// Fetch one candidate while relaying its progress into the status message
    async fn download(
        &self,
        job: &Job,
        candidate: &FormatCandidate,
        workspace: &JobWorkspace,
        header: &str,
    ) -> Result<PathBuf, JobError> {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(self.messenger.as_ref(), job.requester(), job.status_message);

        let fetch = async {
            // Dropped with this block, which ends the reporter
            let progress_tx = progress_tx;
            self.retry
                .run_transient("download", |_| {
                    self.extractor.fetch(
                        &job.url,
                        candidate,
                        job.mode,
                        workspace.path(),
                        &self.hints,
                        &progress_tx,
                    )
                })
                .await
        };

        let (downloaded, ()) = tokio::join!(fetch, reporter.follow(header, progress_rx));
        downloaded
    }

    /// Convert the artifact when the configured output requires it
    async fn transcode_stage(
        &self,
        job: &mut Job,
        candidate: &FormatCandidate,
        artifact: PathBuf,
        workspace: &JobWorkspace,
    ) -> Result<PathBuf, JobError> {
        let Some(target) = transcode_target(&self.config, job.mode, candidate, &artifact) else {
            return Ok(artifact);
        };

        tracing::info!(%target, "Converting artifact");
        self.update_status(job, messages::converting_text()).await;
        let converted = self.transcoder.convert(&artifact, &target).await?;

        if let Err(error) = verify_converted(&converted, &target).await {
            workspace.discard(&converted);
            return Err(error);
        }

        workspace.discard(&artifact);
        job.artifact = Some(converted.clone());
        job.advance(JobStatus::Transcoded);
        Ok(converted)
    }

    async fn outgoing_file(
        &self,
        mode: MediaMode,
        fetched: &Fetched,
        title: Option<&str>,
        duration: Option<f64>,
    ) -> OutgoingFile {
        let kind = file_kind(mode, &fetched.path);
        let dimensions = match kind {
            FileKind::Video => self.transcoder.probe_dimensions(&fetched.path).await,
            _ => None,
        };

        OutgoingFile {
            path: fetched.path.clone(),
            kind,
            caption: Some(messages::caption(title, &fetched.candidate)),
            dimensions,
            duration: duration
                .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
                .map(|seconds| seconds.round().min(u32::MAX as f64) as u32),
        }
    }

    async fn deliver(&self, chat: i64, file: &OutgoingFile) -> Result<(), JobError> {
        let attempts = self.retry.max_attempts;
        self.retry
            .run_transient("deliver", |_| self.messenger.send_file(chat, file))
            .await
            .map_err(|error| match error {
                JobError::Network(message) => {
                    JobError::Delivery(format!("gave up after {attempts} attempt(s): {message}"))
                }
                other => other,
            })
    }

    async fn notify(&self, chat: i64, text: &str) {
        if let Err(error) = self.messenger.send_text(chat, text).await {
            tracing::debug!(%error, "Progress message not delivered");
        }
    }

    async fn open_status(&self, chat: i64, text: &str) -> Option<i64> {
        match self.messenger.send_status(chat, text).await {
            Ok(message_id) => message_id,
            Err(error) => {
                tracing::debug!(%error, "Status message not delivered");
                None
            }
        }
    }

    async fn update_status(&self, job: &Job, text: &str) {
        let Some(message_id) = job.status_message else {
            return;
        };
        if let Err(error) = self.messenger.edit_text(job.requester(), message_id, text).await {
            tracing::debug!(%error, "Status edit not delivered");
        }
    }
}

#[async_trait]
impl JobRunner for JobPipeline {
    async fn run(&self, job: Job) -> JobReport {
        JobPipeline::run(self, job).await
    }
}

/// Decide whether an artifact needs converting, and into what
pub fn transcode_target(
    config: &Config,
    mode: MediaMode,
    candidate: &FormatCandidate,
    artifact: &Path,
) -> Option<TranscodeTarget> {
    let extension = extension_of(artifact).unwrap_or_default();
    match mode {
        MediaMode::Audio => match config.forced_audio_format() {
            Some(format) if extension != format => Some(TranscodeTarget::Audio(format.to_string())),
            Some(_) => None,
            // A muxed download still carries video; keep the audio track only
            None if candidate.has_video => Some(TranscodeTarget::Audio("m4a".to_string())),
            None => None,
        },
        MediaMode::Video => match config.forced_container() {
            Some(container) if extension != container => Some(TranscodeTarget::Container(container.to_string())),
            Some(_) => None,
            // Merged downloads can land in mkv or webm, which Telegram only takes as documents
            None if !TELEGRAM_VIDEO_EXTS.contains(&extension.as_str()) => {
                Some(TranscodeTarget::Container("mp4".to_string()))
            }
            None => None,
        },
    }
}

async fn verify_converted(path: &Path, target: &TranscodeTarget) -> Result<(), JobError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| JobError::Conversion(format!("{} was not produced", path.display())))?;

    if metadata.len() == 0 {
        return Err(JobError::Conversion("converted file is empty".to_string()));
    }
    if extension_of(path).as_deref() != Some(target.extension()) {
        return Err(JobError::Conversion(format!(
            "converted file is not {}",
            target.extension()
        )));
    }
    Ok(())
}

/// How the artifact is presented to the chat
pub fn file_kind(mode: MediaMode, path: &Path) -> FileKind {
    if mode == MediaMode::Audio {
        return FileKind::Audio;
    }
    match extension_of(path) {
        Some(extension) if TELEGRAM_VIDEO_EXTS.contains(&extension.as_str()) => FileKind::Video,
        _ => FileKind::Document,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::MockMessenger;
    use crate::extractors::MockMediaExtractor;
    use crate::transcode::MockTranscoder;
    use std::time::Duration;

    fn candidate(id: &str, height: Option<u32>, video: bool, audio: bool, container: &str) -> FormatCandidate {
        FormatCandidate {
            format_id: id.into(),
            container: container.into(),
            height,
            bitrate_kbps: Some(128.0),
            audio_kbps: None,
            has_video: video,
            has_audio: audio,
            size_estimate: None,
            satisfies_forced: false,
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.download_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn state_machine_allows_only_forward_moves() {
        use JobStatus::*;
        assert!(Queued.can_advance_to(Resolving));
        assert!(Downloaded.can_advance_to(SizeChecked));
        assert!(SizeChecked.can_advance_to(Resolving));
        assert!(SizeChecked.can_advance_to(Rejected));
        assert!(Transcoded.can_advance_to(Failed(FailureKind::Conversion)));
        assert!(!Delivering.can_advance_to(Rejected));
        assert!(!Done.can_advance_to(Failed(FailureKind::Network)));
        assert!(!Queued.can_advance_to(Delivering));
        assert!(Rejected.is_terminal() && Done.is_terminal());
    }

    #[test]
    fn job_ids_render_requester_and_sequence() {
        let id = JobId { requester: -100, seq: 4 };
        assert_eq!(id.to_string(), "-100:4");
    }

    #[test]
    fn transcode_is_skipped_when_output_already_matches() {
        let mut config = Config::default();
        let muxed = candidate("18", Some(360), true, true, "mp4");
        let audio = candidate("140", None, false, true, "m4a");

        assert_eq!(transcode_target(&config, MediaMode::Video, &muxed, Path::new("a.mp4")), None);
        assert_eq!(transcode_target(&config, MediaMode::Video, &muxed, Path::new("a.mov")), None);
        assert_eq!(transcode_target(&config, MediaMode::Audio, &audio, Path::new("a.m4a")), None);
        assert_eq!(
            transcode_target(&config, MediaMode::Audio, &muxed, Path::new("a.mp4")),
            Some(TranscodeTarget::Audio("m4a".into()))
        );

        config.media.force_output_format = true;
        assert_eq!(transcode_target(&config, MediaMode::Video, &muxed, Path::new("a.mp4")), None);
        config.media.preferred_output_format = "mkv".into();
        assert_eq!(
            transcode_target(&config, MediaMode::Video, &muxed, Path::new("a.mp4")),
            Some(TranscodeTarget::Container("mkv".into()))
        );

        config.media.force_audio_format = true;
        config.media.preferred_audio_format = "mp3".into();
        assert_eq!(
            transcode_target(&config, MediaMode::Audio, &audio, Path::new("a.m4a")),
            Some(TranscodeTarget::Audio("mp3".into()))
        );
    }

    #[test]
    fn video_outside_telegram_containers_is_remuxed_to_mp4() {
        let mut config = Config::default();
        let merged = candidate("137", Some(1080), true, false, "mp4");

        for artifact in ["a.mkv", "a.webm", "a.MKV"] {
            assert_eq!(
                transcode_target(&config, MediaMode::Video, &merged, Path::new(artifact)),
                Some(TranscodeTarget::Container("mp4".into())),
                "{artifact}"
            );
        }

        // An explicitly forced container wins over the inline-playable default
        config.media.force_output_format = true;
        config.media.preferred_output_format = "mkv".into();
        assert_eq!(transcode_target(&config, MediaMode::Video, &merged, Path::new("a.mkv")), None);
    }

    #[test]
    fn delivery_kind_follows_mode_and_container() {
        assert_eq!(file_kind(MediaMode::Audio, Path::new("a.mp4")), FileKind::Audio);
        assert_eq!(file_kind(MediaMode::Video, Path::new("a.MP4")), FileKind::Video);
        assert_eq!(file_kind(MediaMode::Video, Path::new("a.mov")), FileKind::Video);
        assert_eq!(file_kind(MediaMode::Video, Path::new("a.webm")), FileKind::Document);
    }

    #[tokio::test]
    async fn empty_listing_fails_with_extraction_error() {
        let root = tempfile::tempdir().unwrap();
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_list_formats()
            .times(1)
            .returning(|_, _| Ok(MediaListing::default()));
        extractor.expect_fetch().never();

        let mut messenger = MockMessenger::new();
        messenger
            .expect_send_text()
            .times(1)
            .returning(|_, _| Ok(()));
        messenger.expect_send_file().never();

        let pipeline = JobPipeline::new(
            Arc::new(config_in(root.path())),
            Arc::new(extractor),
            Arc::new(MockTranscoder::new()),
            Arc::new(messenger),
            ExtractorHints::default(),
        )
        .with_retry_policy(quick_retry());

        let job = Job::new(JobId { requester: 1, seq: 1 }, "https://example.com/v", MediaMode::Video, Some(720));
        let report = pipeline.run(job).await;

        assert_eq!(report.status, JobStatus::Failed(FailureKind::Extraction));
        assert_eq!(fs_err::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_conversion_keeps_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_in(root.path());
        config.media.force_output_format = true;
        config.media.preferred_output_format = "mkv".into();

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_list_formats().returning(|_, _| {
            Ok(MediaListing {
                title: Some("clip".into()),
                duration: None,
                candidates: vec![candidate("18", Some(360), true, true, "mp4")],
            })
        });
        extractor.expect_fetch().times(1).returning(|_, _, _, dir, _, _| {
            let path = dir.join("clip.18.mp4");
            std::fs::write(&path, b"video").unwrap();
            Ok(path)
        });

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_convert()
            .times(1)
            .returning(|_, _| Err(JobError::Conversion("ffmpeg exited with 1".into())));

        // A status message that becomes "Converting...", then the failure explanation
        let mut messenger = MockMessenger::new();
        messenger.expect_send_status().times(1).returning(|_, _| Ok(Some(10)));
        messenger
            .expect_edit_text()
            .withf(|_, id, text| *id == 10 && text == "Converting...")
            .times(1)
            .returning(|_, _, _| Ok(()));
        messenger
            .expect_send_text()
            .withf(|_, text| text.contains("could not be converted"))
            .times(1)
            .returning(|_, _| Ok(()));
        messenger.expect_send_file().never();

        let pipeline = JobPipeline::new(
            Arc::new(config),
            Arc::new(extractor),
            Arc::new(transcoder),
            Arc::new(messenger),
            ExtractorHints::default(),
        )
        .with_retry_policy(quick_retry());

        let job = Job::new(JobId { requester: 2, seq: 9 }, "https://example.com/v", MediaMode::Video, None);
        let report = pipeline.run(job).await;

        assert_eq!(report.status, JobStatus::Failed(FailureKind::Conversion));
        assert_eq!(fs_err::read_dir(root.path()).unwrap().count(), 0);
    }
}
