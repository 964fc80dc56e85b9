use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod commands;
pub mod local;
pub mod messages;
pub mod telegram;

pub use commands::{parse_command, Command};
pub use local::LocalDelivery;
pub use telegram::TelegramClient;

use crate::config::Config;
use crate::extractors::runtime;
use crate::extractors::ytdlp::YtDlpExtractor;
use crate::extractors::{validate_url, ExtractorHints, MediaMode};
use crate::pipeline::{Admission, Job, JobId, JobPipeline, JobScheduler};
use crate::transcode::FfmpegTranscoder;
use crate::{JobError, ValidationError};

/// How a file is presented in the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Audio,
    Document,
}

/// A finished artifact ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingFile {
    pub path: PathBuf,
    pub kind: FileKind,
    pub caption: Option<String>,

    /// Width and height for streamable video uploads
    pub dimensions: Option<(u32, u32)>,

    /// Playback length in whole seconds, when the source reported it
    pub duration: Option<u32>,
}

/// Capability interface over the messaging platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), JobError>;

    /// Send a status line that can later be replaced with [`Messenger::edit_text`].
    /// Returns the message id when the platform supports editing.
    async fn send_status(&self, chat_id: i64, text: &str) -> Result<Option<i64>, JobError>;

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), JobError>;

    async fn send_file(&self, chat_id: i64, file: &OutgoingFile) -> Result<(), JobError>;
}

/// A text message received from a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub text: String,
}

/// Request fields before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub requester: i64,
    pub user_id: Option<i64>,
    pub url: Option<String>,
    pub mode: String,
}

/// Validates requests and turns them into queued jobs
pub struct RequestGate {
    config: Arc<Config>,
    next_seq: AtomicU64,
}

impl RequestGate {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn admit(&self, request: RawRequest) -> Result<Job, ValidationError> {
        let allowed = self.config.is_chat_allowed(request.requester)
            || request
                .user_id
                .map(|user| self.config.telegram.allowed_chat_ids.contains(&user))
                .unwrap_or(false);
        if !allowed {
            return Err(ValidationError::RequesterNotAllowed(request.requester));
        }

        let mode: MediaMode = request.mode.parse()?;
        let raw_url = request.url.ok_or(ValidationError::MissingUrl)?;
        let url = validate_url(&raw_url)?;

        let id = JobId {
            requester: request.requester,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        Ok(Job::new(id, url, mode, self.config.media.default_resolution))
    }
}

/// What the dispatcher did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Help,
    Ignored,
    Rejected(ValidationError),
    Submitted(JobId, Admission),
}

/// Routes chat messages through the gate into the scheduler
pub struct Dispatcher {
    gate: RequestGate,
    scheduler: JobScheduler,
    messenger: Arc<dyn Messenger>,
}

impl Dispatcher {
    pub fn new(gate: RequestGate, scheduler: JobScheduler, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            gate,
            scheduler,
            messenger,
        }
    }

    pub async fn handle(&self, message: IncomingMessage) -> DispatchOutcome {
        let (mode, url) = match parse_command(&message.text) {
            Command::Help => {
                self.reply(message.chat_id, commands::HELP_TEXT).await;
                return DispatchOutcome::Help;
            }
            Command::Ignore => return DispatchOutcome::Ignored,
            Command::Fetch { mode, url } => (mode, url),
        };

        let request = RawRequest {
            requester: message.chat_id,
            user_id: message.user_id,
            url,
            mode: mode.to_string(),
        };

        let job = match self.gate.admit(request) {
            Ok(job) => job,
            Err(reason) => {
                tracing::info!(chat = message.chat_id, %reason, "Request rejected");
                self.reply(message.chat_id, &messages::validation_text(&reason)).await;
                return DispatchOutcome::Rejected(reason);
            }
        };

        let id = job.id;
        let admission = self.scheduler.submit(job).await;
        self.reply(message.chat_id, &messages::admission_text(admission)).await;
        DispatchOutcome::Submitted(id, admission)
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(error) = self.messenger.send_text(chat_id, text).await {
            tracing::warn!(chat = chat_id, %error, "Failed to send reply");
        }
    }
}

/// Wire up the tools, the pipeline and the Telegram client, then serve until Ctrl-C
pub async fn serve(config: Arc<Config>) -> Result<()> {
    config.require_bot_token()?;

    let missing = crate::utils::check_dependencies(&config).await;
    for tool in &missing {
        tracing::warn!(tool = %tool, "Missing dependency");
    }

    let tools = runtime::prepare(&config).await;
    let hints = ExtractorHints::from_config(&config, tools.js_runtime.clone());

    let mut extractor = YtDlpExtractor::new(&tools.yt_dlp, config.probe_timeout(), config.extract_timeout());
    if config.tools.ffmpeg != "ffmpeg" {
        extractor = extractor.with_ffmpeg_location(&config.tools.ffmpeg);
    }
    let transcoder = FfmpegTranscoder::new(
        &config.tools.ffmpeg,
        &config.tools.ffprobe,
        config.transcode_timeout(),
        config.probe_timeout(),
    );

    let telegram = Arc::new(TelegramClient::new(&config)?);
    let pipeline = JobPipeline::new(
        config.clone(),
        Arc::new(extractor),
        Arc::new(transcoder),
        telegram.clone(),
        hints,
    );
    let scheduler = JobScheduler::new(Arc::new(pipeline), config.limits.workers);
    let dispatcher = Dispatcher::new(RequestGate::new(config.clone()), scheduler, telegram.clone());

    telegram.skip_pending_updates().await;

    let (tx, mut rx) = mpsc::channel(64);
    let poller = telegram.clone();
    tokio::spawn(async move {
        if let Err(error) = poller.run_poll_loop(tx).await {
            tracing::error!(%error, "Telegram poll loop exited");
        }
    });

    tracing::info!(
        workers = config.limits.workers,
        download_dir = %config.storage.download_dir.display(),
        "Bot is running"
    );

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    dispatcher.handle(message).await;
                }
                None => anyhow::bail!("Telegram update stream closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
