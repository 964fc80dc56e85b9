use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

use media_courier::bot::{FileKind, Messenger, OutgoingFile};
use media_courier::extractors::{
    DownloadProgress, ExtractorHints, FormatCandidate, MediaExtractor, MediaListing, MediaMode, ProgressSender,
};
use media_courier::pipeline::{FailureKind, Job, JobId, JobPipeline, JobStatus, RetryPolicy};
use media_courier::transcode::{TranscodeTarget, Transcoder};
use media_courier::{Config, JobError};

const MB: u64 = 1024 * 1024;

/// Writes sparse files of a configured size per format id
struct FakeExtractor {
    listing: MediaListing,
    sizes: HashMap<String, u64>,
    transient_failures: AtomicU32,
    fetched: Mutex<Vec<String>>,
}

impl FakeExtractor {
    fn new(candidates: Vec<(FormatCandidate, u64)>) -> Self {
        let sizes = candidates
            .iter()
            .map(|(candidate, size)| (candidate.format_id.clone(), *size))
            .collect();
        Self {
            listing: MediaListing {
                title: Some("Test clip".into()),
                duration: Some(42.0),
                candidates: candidates.into_iter().map(|(candidate, _)| candidate).collect(),
            },
            sizes,
            transient_failures: AtomicU32::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(self, times: u32) -> Self {
        self.transient_failures.store(times, Ordering::SeqCst);
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn list_formats(&self, _url: &str, _hints: &ExtractorHints) -> Result<MediaListing, JobError> {
        Ok(self.listing.clone())
    }

    async fn fetch(
        &self,
        _url: &str,
        candidate: &FormatCandidate,
        _mode: MediaMode,
        dest_dir: &Path,
        _hints: &ExtractorHints,
        progress: &ProgressSender,
    ) -> Result<PathBuf, JobError> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(JobError::Network("HTTP Error 503".into()));
        }

        self.fetched.lock().unwrap().push(candidate.format_id.clone());
        let path = dest_dir.join(format!("clip.{}.{}", candidate.format_id, candidate.container));
        let size = self.sizes[&candidate.format_id];
        let _ = progress.send(DownloadProgress {
            downloaded_bytes: Some(size / 2),
            total_bytes: Some(size),
            ..Default::default()
        });
        let file = std::fs::File::create(&path)?;
        file.set_len(size)?;
        Ok(path)
    }
}

struct FakeTranscoder {
    fail: bool,
    conversions: Mutex<Vec<TranscodeTarget>>,
}

impl FakeTranscoder {
    fn new() -> Self {
        Self {
            fail: false,
            conversions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn convert(&self, source: &Path, target: &TranscodeTarget) -> Result<PathBuf, JobError> {
        self.conversions.lock().unwrap().push(target.clone());
        if self.fail {
            return Err(JobError::Conversion("encoder not found".into()));
        }
        // Remuxing keeps the size of the source
        let destination = source.with_extension(format!("converted.{}", target.extension()));
        let file = std::fs::File::create(&destination)?;
        file.set_len(std::fs::metadata(source)?.len())?;
        Ok(destination)
    }

    async fn probe_dimensions(&self, _path: &Path) -> Option<(u32, u32)> {
        Some((640, 360))
    }
}

#[derive(Debug, Clone)]
struct Delivered {
    file: OutgoingFile,
    existed: bool,
    size: u64,
}

#[derive(Default)]
struct RecordingMessenger {
    texts: Mutex<Vec<(i64, String)>>,
    statuses: Mutex<Vec<String>>,
    edits: Mutex<Vec<(i64, String)>>,
    files: Mutex<Vec<Delivered>>,
    upload_failures: AtomicU32,
}

impl RecordingMessenger {
    fn failing_uploads(times: u32) -> Self {
        let messenger = Self::default();
        messenger.upload_failures.store(times, Ordering::SeqCst);
        messenger
    }

    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
    }

    fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
    }

    fn files(&self) -> Vec<Delivered> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), JobError> {
        self.texts.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_status(&self, _chat_id: i64, text: &str) -> Result<Option<i64>, JobError> {
        self.statuses.lock().unwrap().push(text.to_string());
        Ok(Some(1))
    }

    async fn edit_text(&self, _chat_id: i64, message_id: i64, text: &str) -> Result<(), JobError> {
        self.edits.lock().unwrap().push((message_id, text.to_string()));
        Ok(())
    }

    async fn send_file(&self, _chat_id: i64, file: &OutgoingFile) -> Result<(), JobError> {
        if self
            .upload_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(JobError::Network("502 Bad Gateway".into()));
        }
        let metadata = std::fs::metadata(&file.path);
        self.files.lock().unwrap().push(Delivered {
            file: file.clone(),
            existed: metadata.is_ok(),
            size: metadata.map(|m| m.len()).unwrap_or(0),
        });
        Ok(())
    }
}

fn video(id: &str, height: u32) -> FormatCandidate {
    FormatCandidate {
        format_id: id.into(),
        container: "mp4".into(),
        height: Some(height),
        bitrate_kbps: Some(height as f64 * 3.0),
        audio_kbps: Some(128.0),
        has_video: true,
        has_audio: true,
        size_estimate: None,
        satisfies_forced: false,
    }
}

fn audio(id: &str, kbps: f64, container: &str) -> FormatCandidate {
    FormatCandidate {
        format_id: id.into(),
        container: container.into(),
        height: None,
        bitrate_kbps: Some(kbps),
        audio_kbps: Some(kbps),
        has_video: false,
        has_audio: true,
        size_estimate: None,
        satisfies_forced: false,
    }
}

struct Harness {
    root: tempfile::TempDir,
    extractor: Arc<FakeExtractor>,
    transcoder: Arc<FakeTranscoder>,
    messenger: Arc<RecordingMessenger>,
    pipeline: JobPipeline,
}

fn harness(
    configure: impl FnOnce(&mut Config),
    extractor: FakeExtractor,
    transcoder: FakeTranscoder,
    messenger: RecordingMessenger,
) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.download_dir = root.path().to_path_buf();
    configure(&mut config);

    let extractor = Arc::new(extractor);
    let transcoder = Arc::new(transcoder);
    let messenger = Arc::new(messenger);
    let pipeline = JobPipeline::new(
        Arc::new(config),
        extractor.clone(),
        transcoder.clone(),
        messenger.clone(),
        ExtractorHints::default(),
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    });

    Harness {
        root,
        extractor,
        transcoder,
        messenger,
        pipeline,
    }
}

fn job(mode: MediaMode, resolution: Option<u32>) -> Job {
    Job::new(JobId { requester: 77, seq: 1 }, "https://www.youtube.com/watch?v=abc", mode, resolution)
}

fn workspace_entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

#[tokio::test]
async fn requested_720_with_only_360_and_1080_delivers_360() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("1080", 1080), 30 * MB), (video("360", 360), 5 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(h.extractor.fetched(), vec!["360"]);
    let files = h.messenger.files();
    assert_eq!(files.len(), 1);
    assert!(files[0].existed);
    assert_eq!(files[0].size, 5 * MB);
    assert_eq!(files[0].file.kind, FileKind::Video);
    assert_eq!(files[0].file.dimensions, Some((640, 360)));
    assert_eq!(files[0].file.duration, Some(42));
    assert!(files[0].file.caption.as_deref().unwrap().starts_with("Test clip"));
    assert!(h.transcoder.conversions.lock().unwrap().is_empty());
    assert_eq!(workspace_entries(h.root.path()), 0);
}

#[tokio::test]
async fn oversized_artifacts_are_rejected_without_delivery() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("720", 720), 80 * MB), (video("480", 480), 60 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Rejected);
    assert_eq!(h.extractor.fetched(), vec!["720", "480"]);
    assert!(h.messenger.files().is_empty());
    let texts = h.messenger.texts();
    assert!(texts.iter().any(|text| text.contains("lower quality")));
    assert!(texts.last().unwrap().contains("too large"));
    assert_eq!(workspace_entries(h.root.path()), 0);
}

#[tokio::test]
async fn downgrade_stops_when_nothing_smaller_exists() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("360", 360), 80 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Rejected);
    assert_eq!(report.attempts, 1);
    assert!(h.messenger.files().is_empty());
}

#[tokio::test]
async fn downgrade_delivers_the_first_artifact_that_fits() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![
            (video("1080", 1080), 120 * MB),
            (video("720", 720), 70 * MB),
            (video("480", 480), 30 * MB),
        ]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, None)).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(report.attempts, 3);
    assert_eq!(h.extractor.fetched(), vec!["1080", "720", "480"]);
    let files = h.messenger.files();
    assert_eq!(files.len(), 1);
    assert!(files[0].size <= 49 * MB);
}

#[tokio::test]
async fn downgrade_attempts_are_bounded() {
    let h = harness(
        |config| config.limits.max_downgrade_attempts = 2,
        FakeExtractor::new(vec![
            (video("1080", 1080), 120 * MB),
            (video("720", 720), 70 * MB),
            (video("480", 480), 30 * MB),
        ]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, None)).await;

    assert_eq!(report.status, JobStatus::Rejected);
    assert_eq!(h.extractor.fetched(), vec!["1080", "720"]);
}

#[tokio::test]
async fn forced_audio_format_is_applied_to_audio_requests() {
    let h = harness(
        |config| {
            config.media.force_audio_format = true;
            config.media.preferred_audio_format = "mp3".into();
        },
        FakeExtractor::new(vec![
            (audio("251", 160.0, "webm"), 3 * MB),
            (audio("140", 129.0, "m4a"), 3 * MB),
            (video("18", 360), 10 * MB),
        ]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Audio, None)).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(h.extractor.fetched(), vec!["251"]);
    assert_eq!(
        *h.transcoder.conversions.lock().unwrap(),
        vec![TranscodeTarget::Audio("mp3".into())]
    );
    let files = h.messenger.files();
    assert_eq!(files[0].file.kind, FileKind::Audio);
    assert_eq!(files[0].file.path.extension().unwrap(), "mp3");
    assert!(files[0].existed);
}

#[tokio::test]
async fn forced_container_failure_is_a_conversion_error() {
    let mut transcoder = FakeTranscoder::new();
    transcoder.fail = true;
    let h = harness(
        |config| {
            config.media.force_output_format = true;
            config.media.preferred_output_format = "mkv".into();
        },
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]),
        transcoder,
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Failed(FailureKind::Conversion));
    assert!(h.messenger.files().is_empty());
    assert!(h.messenger.texts().last().unwrap().contains("could not be converted"));
    assert_eq!(workspace_entries(h.root.path()), 0);
}

#[tokio::test]
async fn transient_download_failures_are_retried() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]).failing_first(2),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(h.extractor.fetched(), vec!["22"]);
}

#[tokio::test]
async fn exhausted_download_retries_fail_with_network_error() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]).failing_first(5),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Failed(FailureKind::Network));
    assert!(h.extractor.fetched().is_empty());
}

#[tokio::test]
async fn exhausted_upload_retries_fail_with_delivery_error() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::failing_uploads(10),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Failed(FailureKind::Delivery));
    assert!(report.error.unwrap().contains("gave up after 3"));
    assert_eq!(workspace_entries(h.root.path()), 0);
}

#[tokio::test]
async fn upload_recovers_after_a_transient_failure() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::failing_uploads(1),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;
    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(h.messenger.files().len(), 1);
}

#[tokio::test]
async fn workspace_is_kept_when_cleanup_is_disabled() {
    let h = harness(
        |config| config.storage.cleanup_after_send = false,
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;
    assert_eq!(report.status, JobStatus::Done);

    let kept: Vec<PathBuf> = assert_ok!(std::fs::read_dir(h.root.path()))
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(kept.len(), 1);
    assert!(kept[0].join("clip.22.mp4").exists());
}

#[tokio::test]
async fn forced_container_is_delivered_and_original_removed() {
    let h = harness(
        |config| {
            config.media.force_output_format = true;
            config.media.preferred_output_format = "mkv".into();
            config.storage.cleanup_after_send = false;
        },
        FakeExtractor::new(vec![(video("22", 720), 5 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(
        *h.transcoder.conversions.lock().unwrap(),
        vec![TranscodeTarget::Container("mkv".into())]
    );
    let files = h.messenger.files();
    assert_eq!(files.len(), 1);
    assert!(files[0].existed);
    assert_eq!(files[0].file.path.extension().unwrap(), "mkv");
    assert_eq!(files[0].file.kind, FileKind::Document);

    let workspace = assert_ok!(std::fs::read_dir(h.root.path()))
        .next()
        .unwrap()
        .unwrap()
        .path();
    let left: Vec<String> = assert_ok!(std::fs::read_dir(&workspace))
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(left, vec!["clip.22.converted.mkv"]);
}

#[tokio::test]
async fn oversized_audio_steps_down_in_bitrate() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![
            (audio("251", 160.0, "webm"), 80 * MB),
            (audio("140", 129.0, "m4a"), 3 * MB),
            (audio("249", 50.0, "webm"), MB),
        ]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Audio, None)).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(report.attempts, 2);
    assert_eq!(h.extractor.fetched(), vec!["251", "140"]);
    let files = h.messenger.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file.kind, FileKind::Audio);
    assert_eq!(files[0].size, 3 * MB);
    assert!(h.messenger.texts().iter().any(|text| text.contains("lower quality")));
}

#[tokio::test]
async fn webm_video_is_remuxed_to_mp4_before_the_size_check() {
    let webm = |id: &str, height: u32| FormatCandidate {
        container: "webm".into(),
        ..video(id, height)
    };
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(webm("303", 1080), 80 * MB), (webm("244", 480), 10 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, None)).await;

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(h.extractor.fetched(), vec!["303", "244"]);
    assert_eq!(
        *h.transcoder.conversions.lock().unwrap(),
        vec![
            TranscodeTarget::Container("mp4".into()),
            TranscodeTarget::Container("mp4".into())
        ]
    );
    let files = h.messenger.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file.kind, FileKind::Video);
    assert_eq!(files[0].file.path.extension().unwrap(), "mp4");
    assert_eq!(files[0].size, 10 * MB);
    assert_eq!(workspace_entries(h.root.path()), 0);
}

#[tokio::test]
async fn status_message_tracks_download_and_upload() {
    let h = harness(
        |_| {},
        FakeExtractor::new(vec![(video("22", 720), 4 * MB)]),
        FakeTranscoder::new(),
        RecordingMessenger::default(),
    );

    let report = h.pipeline.run(job(MediaMode::Video, Some(720))).await;
    assert_eq!(report.status, JobStatus::Done);

    let statuses = h.messenger.statuses.lock().unwrap().clone();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].starts_with("Downloading \"Test clip\""));

    let edits = h.messenger.edits();
    assert_eq!(edits.len(), 2, "{edits:?}");
    assert!(edits[0].contains("50% of 4.0 MB"));
    assert_eq!(edits[1], "Uploading...");
    assert!(h.messenger.edits.lock().unwrap().iter().all(|(id, _)| *id == 1));
}
