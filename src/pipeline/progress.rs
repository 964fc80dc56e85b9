//! Download progress relayed into an editable status message.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::bot::{messages, Messenger};
use crate::extractors::DownloadProgress;

/// Minimum time between two edits of the status message
pub const DEFAULT_EDIT_INTERVAL: Duration = Duration::from_secs(2);

/// Turns a stream of [`DownloadProgress`] samples into throttled status edits
pub struct ProgressReporter<'a> {
    messenger: &'a dyn Messenger,
    chat_id: i64,
    message_id: Option<i64>,
    interval: Duration,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(messenger: &'a dyn Messenger, chat_id: i64, message_id: Option<i64>) -> Self {
        Self {
            messenger,
            chat_id,
            message_id,
            interval: DEFAULT_EDIT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Consume samples until every sender is gone.
    ///
    /// Without a status message the samples are drained and dropped.
    pub async fn follow(&self, header: &str, mut rx: mpsc::UnboundedReceiver<DownloadProgress>) {
        let Some(message_id) = self.message_id else {
            while rx.recv().await.is_some() {}
            return;
        };

        let mut last_edit: Option<Instant> = None;
        let mut last_text = String::new();

        while let Some(progress) = rx.recv().await {
            if last_edit.is_some_and(|at| at.elapsed() < self.interval) {
                continue;
            }
            let text = messages::progress_text(header, &progress);
            if text == last_text {
                continue;
            }

            last_edit = Some(Instant::now());
            match self.messenger.edit_text(self.chat_id, message_id, &text).await {
                Ok(()) => last_text = text,
                Err(error) => tracing::debug!(%error, "Progress edit not delivered"),
            }
        }
    }
}
