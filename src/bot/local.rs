use async_trait::async_trait;
use console::style;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Messenger, OutgoingFile};
use crate::utils::sanitize_filename;
use crate::JobError;

/// Messenger that copies delivered files into a local directory.
/// Used by the `fetch` command to run a job without a chat.
pub struct LocalDelivery {
    output_dir: PathBuf,
    delivered: Mutex<Vec<PathBuf>>,
    status_line: Option<ProgressBar>,
}

impl LocalDelivery {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            delivered: Mutex::new(Vec::new()),
            status_line: None,
        }
    }

    /// Show status updates as the message of a terminal spinner
    pub fn with_status_line(mut self, bar: ProgressBar) -> Self {
        self.status_line = Some(bar);
        self
    }

    /// Files copied so far
    pub fn delivered(&self) -> Vec<PathBuf> {
        self.delivered
            .lock()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    fn destination(&self, file: &OutgoingFile) -> PathBuf {
        let title = file
            .caption
            .as_deref()
            .and_then(|caption| caption.lines().next())
            .map(sanitize_filename)
            .filter(|name| !name.is_empty());
        let extension = file
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bin".to_string());

        match title {
            Some(title) => self.output_dir.join(format!("{title}.{extension}")),
            None => self
                .output_dir
                .join(file.path.file_name().unwrap_or_else(|| Path::new("media").as_os_str())),
        }
    }
}

#[async_trait]
impl Messenger for LocalDelivery {
    async fn send_text(&self, _chat_id: i64, text: &str) -> Result<(), JobError> {
        let line = format!("{} {}", style("›").cyan(), text);
        match &self.status_line {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
        Ok(())
    }

    async fn send_status(&self, chat_id: i64, text: &str) -> Result<Option<i64>, JobError> {
        match &self.status_line {
            Some(bar) => {
                bar.set_message(text.to_string());
                Ok(Some(0))
            }
            None => {
                self.send_text(chat_id, text).await?;
                Ok(None)
            }
        }
    }

    async fn edit_text(&self, _chat_id: i64, _message_id: i64, text: &str) -> Result<(), JobError> {
        if let Some(bar) = &self.status_line {
            bar.set_message(text.to_string());
        }
        Ok(())
    }

    async fn send_file(&self, _chat_id: i64, file: &OutgoingFile) -> Result<(), JobError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let destination = self.destination(file);
        tokio::fs::copy(&file.path, &destination).await?;
        tracing::info!(path = %destination.display(), "Saved artifact");

        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(destination);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::FileKind;

    #[tokio::test]
    async fn files_are_copied_under_their_title() {
        let source_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("abc.22.mp4");
        fs_err::write(&source, b"video").unwrap();

        let delivery = LocalDelivery::new(output_dir.path().join("out"));
        let file = OutgoingFile {
            path: source.clone(),
            kind: FileKind::Video,
            caption: Some("My Clip\n720p mp4".into()),
            dimensions: None,
            duration: Some(61),
        };
        delivery.send_file(0, &file).await.unwrap();

        let delivered = delivery.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(fs_err::read(&delivered[0]).unwrap(), b"video");
        assert_eq!(delivered[0].extension().unwrap(), "mp4");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn status_updates_go_to_the_spinner() {
        let bar = ProgressBar::hidden();
        let delivery = LocalDelivery::new("unused").with_status_line(bar.clone());

        let id = delivery.send_status(0, "Downloading...").await.unwrap();
        assert_eq!(id, Some(0));
        delivery.edit_text(0, 0, "Downloading... 40%").await.unwrap();
        assert_eq!(bar.message(), "Downloading... 40%");

        let plain = LocalDelivery::new("unused");
        assert_eq!(plain.send_status(0, "Downloading...").await.unwrap(), None);
    }
}
