//! Media Courier - a Telegram bot that turns media links into uploaded files
//!
//! A request flows through a validation gate, a per-requester scheduler and a job
//! pipeline that resolves a source format with yt-dlp, optionally converts it with
//! ffmpeg, enforces the upload ceiling and finally hands the file back to the chat.

pub mod bot;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod pipeline;
pub mod transcode;
pub mod utils;

pub use bot::{Dispatcher, Messenger, RequestGate};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use extractors::{FormatCandidate, MediaExtractor, MediaMode};
pub use pipeline::{Job, JobPipeline, JobScheduler, JobStatus};
pub use transcode::Transcoder;

/// Result type used by the application layer
pub type Result<T> = anyhow::Result<T>;

/// Reasons a request is refused before any work is scheduled
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("chat {0} is not allowed to use this bot")]
    RequesterNotAllowed(i64),

    #[error("no link found in the request")]
    MissingUrl,

    #[error("not a supported media link: {0}")]
    MalformedUrl(String),

    #[error("unknown delivery mode: {0}")]
    UnsupportedMode(String),
}

/// Error taxonomy for a single job. Every variant maps onto one terminal status.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("extraction failed: {message}")]
    Extraction {
        message: String,
        /// The source asked for a logged-in session or verified age
        needs_credentials: bool,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("file is {size} bytes, over the {limit} byte limit after {attempts} attempt(s)")]
    SizeLimitExceeded { size: u64, limit: u64, attempts: u32 },

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl JobError {
    pub fn extraction(message: impl Into<String>) -> Self {
        JobError::Extraction {
            message: message.into(),
            needs_credentials: false,
        }
    }

    /// Whether a retry of the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Network(_))
    }

    /// Short machine-friendly label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validation",
            JobError::Extraction { .. } => "extraction",
            JobError::Network(_) => "network",
            JobError::Conversion(_) => "conversion",
            JobError::SizeLimitExceeded { .. } => "size",
            JobError::Delivery(_) => "delivery",
            JobError::Storage(_) => "storage",
        }
    }
}
