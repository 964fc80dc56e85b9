use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{FileKind, IncomingMessage, Messenger, OutgoingFile};
use crate::config::Config;
use crate::JobError;

const ALLOWED_UPDATES: &str = r#"["message"]"#;
const NON_TRANSIENT_DELAY: Duration = Duration::from_secs(10);
const RETRY_BASE_MS: u64 = 250;
const RETRY_MAX_MS: u64 = 30_000;

/// Telegram Bot API client: long-polls updates and implements [`Messenger`]
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    poll_timeout_secs: u64,
    upload_timeout: Duration,
}

impl TelegramClient {
    pub fn new(config: &Config) -> Result<Self> {
        let bot_token = config.require_bot_token()?.to_string();
        let http = reqwest::Client::builder()
            // Long polls must outlive the server-side poll timeout
            .timeout(Duration::from_secs(config.telegram.poll_timeout_secs + 30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api_base: config.telegram.api_base.trim_end_matches('/').to_string(),
            bot_token,
            poll_timeout_secs: config.telegram.poll_timeout_secs,
            upload_timeout: config.upload_timeout(),
        })
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/bot{}/{}", self.api_base, self.bot_token, method))?)
    }

    /// Drop updates that piled up while the bot was offline
    pub async fn skip_pending_updates(&self) {
        if let Err(error) = self.try_skip_pending_updates().await {
            tracing::warn!(error = %format!("{error:#}"), "Could not skip pending updates");
        }
    }

    async fn try_skip_pending_updates(&self) -> Result<()> {
        let parsed: GetUpdatesResponse = self
            .http
            .get(self.api_url("getUpdates")?)
            .query(&[("offset", "-1"), ("timeout", "0")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(last) = parsed.result.iter().map(|update| update.update_id).max() {
            // Confirming an offset marks every earlier update as handled
            self.http
                .get(self.api_url("getUpdates")?)
                .query(&[("offset", (last + 1).to_string()), ("timeout", "0".to_string())])
                .send()
                .await?
                .error_for_status()?;
            tracing::info!(last_update = last, "Skipped pending updates");
        }
        Ok(())
    }

    /// Long-poll `getUpdates` and forward text messages into `tx` until the receiver closes
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run_poll_loop(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<()> {
        let mut offset: i64 = 0;
        let mut consecutive_failures: u32 = 0;
        let poll_timeout = self.poll_timeout_secs.to_string();

        loop {
            let url = self.api_url("getUpdates")?;
            let offset_param = offset.to_string();
            let response = match self
                .http
                .get(url)
                .query(&[
                    ("timeout", poll_timeout.as_str()),
                    ("offset", offset_param.as_str()),
                    ("allowed_updates", ALLOWED_UPDATES),
                ])
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(%error, ?delay, "getUpdates request failed; retrying with backoff");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|error| format!("<failed to read error body: {error}>"));
                if is_transient_status(status) {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(%status, %body, ?delay, "getUpdates transient failure; retrying with backoff");
                    tokio::time::sleep(delay).await;
                } else {
                    consecutive_failures = 0;
                    tracing::error!(%status, %body, "getUpdates failed; keeping poll loop alive");
                    tokio::time::sleep(NON_TRANSIENT_DELAY).await;
                }
                continue;
            }

            let parsed: GetUpdatesResponse = match response.json().await {
                Ok(parsed) => parsed,
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(%error, ?delay, "getUpdates payload parse failed; retrying with backoff");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            consecutive_failures = 0;

            let mut updates = parsed.result;
            updates.sort_by_key(|update| update.update_id);
            for update in updates {
                if update.update_id < offset {
                    continue;
                }
                // Advance first so a bad update is never replayed
                offset = update.update_id.saturating_add(1);

                if let Some(message) = incoming_message(&update) {
                    tx.send(message)
                        .await
                        .map_err(|e| anyhow::anyhow!("inbound queue closed: {e}"))?;
                }
            }
        }
    }

    async fn upload(&self, chat_id: i64, file: &OutgoingFile, kind: FileKind) -> Result<(), JobError> {
        let (method, field) = match kind {
            FileKind::Video => ("sendVideo", "video"),
            FileKind::Audio => ("sendAudio", "audio"),
            FileKind::Document => ("sendDocument", "document"),
        };

        let bytes = tokio::fs::read(&file.path).await?;
        let file_name = file
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, Part::bytes(bytes).file_name(file_name));
        if let Some(caption) = &file.caption {
            form = form.text("caption", caption.clone());
        }
        if let Some(duration) = file.duration.filter(|_| kind != FileKind::Document) {
            form = form.text("duration", duration.to_string());
        }
        if kind == FileKind::Video {
            form = form.text("supports_streaming", "true");
            if let Some((width, height)) = file.dimensions {
                form = form
                    .text("width", width.to_string())
                    .text("height", height.to_string());
            }
        }

        let url = self.api_url(method).map_err(|e| JobError::Delivery(e.to_string()))?;
        tracing::debug!(method, path = %file.path.display(), "Uploading file");
        let response = self
            .http
            .post(url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        check_response(response).await
    }

    async fn post_json(&self, method: &str, body: &serde_json::Value) -> Result<reqwest::Response, JobError> {
        let url = self.api_url(method).map_err(|e| JobError::Delivery(e.to_string()))?;
        self.http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(request_error)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<reqwest::Response, JobError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        self.post_json("sendMessage", &body).await
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), JobError> {
        let response = self.send_message(chat_id, text).await?;
        check_response(response).await
    }

    async fn send_status(&self, chat_id: i64, text: &str) -> Result<Option<i64>, JobError> {
        let response = self.send_message(chat_id, text).await?;
        if !response.status().is_success() {
            check_response(response).await?;
            return Ok(None);
        }
        let body = response.text().await.map_err(request_error)?;
        Ok(sent_message_id(&body))
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), JobError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let response = self.post_json("editMessageText", &body).await?;
        match check_response(response).await {
            Err(JobError::Delivery(reason)) if reason.contains("message is not modified") => Ok(()),
            other => other,
        }
    }

    async fn send_file(&self, chat_id: i64, file: &OutgoingFile) -> Result<(), JobError> {
        match self.upload(chat_id, file, file.kind).await {
            // Telegram refuses some containers as video; a document upload still works
            Err(JobError::Delivery(reason)) if file.kind == FileKind::Video => {
                tracing::warn!(%reason, "Video upload refused; sending as document");
                self.upload(chat_id, file, FileKind::Document).await
            }
            other => other,
        }
    }
}

fn request_error(error: reqwest::Error) -> JobError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        JobError::Network(error.to_string())
    } else {
        JobError::Delivery(error.to_string())
    }
}

async fn check_response(response: reqwest::Response) -> Result<(), JobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|error| format!("<failed to read error body: {error}>"));
    Err(classify_status(status, &body))
}

/// Map a failed Bot API response onto the error taxonomy
pub fn classify_status(status: StatusCode, body: &str) -> JobError {
    let description = serde_json::from_str::<ApiError>(body)
        .ok()
        .and_then(|error| error.description)
        .unwrap_or_else(|| body.chars().take(200).collect());
    let message = format!("{status}: {description}");

    if is_transient_status(status) {
        JobError::Network(message)
    } else {
        JobError::Delivery(message)
    }
}

fn transient_retry_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis((RETRY_BASE_MS * multiplier).min(RETRY_MAX_MS))
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Id of the message a successful `sendMessage` created
fn sent_message_id(body: &str) -> Option<i64> {
    serde_json::from_str::<SentMessageResponse>(body)
        .ok()
        .and_then(|response| response.result)
        .map(|message| message.message_id)
}

fn incoming_message(update: &Update) -> Option<IncomingMessage> {
    let message = update.message.as_ref()?;
    let chat = message.chat.as_ref()?;
    let text = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())?;

    Some(IncomingMessage {
        chat_id: chat.id,
        user_id: message.from.as_ref().map(|user| user.id),
        text: text.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    chat: Option<TelegramChat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SentMessageResponse {
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    description: Option<String>,
}
