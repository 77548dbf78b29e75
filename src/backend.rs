//! HTTP client for the conversation backend.
//!
//! Two endpoints drive a voice turn: `/transcribe_audio` accepts the
//! recorded upload and returns the transcript, `/process_message` takes the
//! transcript and returns the reply text plus a URL for its spoken audio.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::decode::{decode_audio, DecodedAudio};

/// Boxed future used by [`ChatBackend`] so the trait stays dyn-compatible.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failures from the backend round trips, separated so the pipeline can
/// choose the right user-facing notice.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("reply audio unusable: {0}")]
    Media(String),
}

impl BackendError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Transcript for one uploaded recording.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub session_id: Option<String>,
}

/// The assistant's reply to one message.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub audio_url: Option<String>,
    pub session_id: Option<String>,
}

/// Encoded recording ready for upload.
#[derive(Debug, Clone)]
pub struct UploadAudio {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: &'static str,
}

/// Seam over the backend so the pipeline can be tested against scripted
/// responses.
pub trait ChatBackend: Send + Sync {
    fn transcribe(
        &self,
        audio: UploadAudio,
        session_id: Option<String>,
    ) -> BoxFuture<'_, Result<Transcription, BackendError>>;

    fn process(
        &self,
        message: String,
        session_id: Option<String>,
    ) -> BoxFuture<'_, Result<ChatReply, BackendError>>;

    /// Download the reply audio behind `url` and decode it to PCM.
    fn fetch_reply_audio(&self, url: String) -> BoxFuture<'_, Result<DecodedAudio, BackendError>>;
}

// ── Wire formats ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    generate_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ── HTTP implementation ─────────────────────────────────────────────

/// Backend client bound to one base URL.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Absolute URLs pass through; anything else is joined to the base.
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

/// Take a decoder hint from the final path segment of a download URL.
fn extension_hint(url: &str) -> Option<String> {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    let (_, ext) = trimmed.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 4 || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

impl ChatBackend for HttpBackend {
    fn transcribe(
        &self,
        audio: UploadAudio,
        session_id: Option<String>,
    ) -> BoxFuture<'_, Result<Transcription, BackendError>> {
        Box::pin(async move {
            debug!(
                bytes = audio.bytes.len(),
                file = %audio.file_name,
                "uploading recording"
            );

            let part = multipart::Part::bytes(audio.bytes)
                .file_name(audio.file_name)
                .mime_str(audio.mime_type)
                .map_err(BackendError::from_reqwest)?;
            let mut form = multipart::Form::new().part("audio", part);
            if let Some(sid) = session_id {
                form = form.text("session_id", sid);
            }

            let resp = self
                .client
                .post(self.endpoint("transcribe_audio"))
                .multipart(form)
                .send()
                .await
                .map_err(BackendError::from_reqwest)?;

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(BackendError::Status { status, body });
            }

            let parsed: TranscribeResponse = resp
                .json()
                .await
                .map_err(|e| BackendError::Malformed(e.to_string()))?;
            if !parsed.success {
                return Err(BackendError::Rejected(
                    parsed.error.unwrap_or_else(|| "transcription failed".into()),
                ));
            }
            let text = parsed.text.unwrap_or_default();
            if text.trim().is_empty() {
                return Err(BackendError::Rejected("empty transcript".into()));
            }

            Ok(Transcription {
                text,
                session_id: parsed.session_id,
            })
        })
    }

    fn process(
        &self,
        message: String,
        session_id: Option<String>,
    ) -> BoxFuture<'_, Result<ChatReply, BackendError>> {
        Box::pin(async move {
            debug!(chars = message.len(), "sending message to backend");

            let request = ProcessRequest {
                message: &message,
                session_id: session_id.as_deref(),
                generate_audio: true,
            };
            let resp = self
                .client
                .post(self.endpoint("process_message"))
                .json(&request)
                .send()
                .await
                .map_err(BackendError::from_reqwest)?;

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(BackendError::Status { status, body });
            }

            let parsed: ProcessResponse = resp
                .json()
                .await
                .map_err(|e| BackendError::Malformed(e.to_string()))?;
            if let Some(err) = parsed.error {
                return Err(BackendError::Rejected(err));
            }
            let text = parsed
                .text
                .ok_or_else(|| BackendError::Malformed("response missing text".into()))?;

            Ok(ChatReply {
                text,
                audio_url: parsed.audio_url,
                session_id: parsed.session_id,
            })
        })
    }

    fn fetch_reply_audio(&self, url: String) -> BoxFuture<'_, Result<DecodedAudio, BackendError>> {
        Box::pin(async move {
            let full = self.resolve_url(&url);
            debug!(url = %full, "downloading reply audio");

            let resp = self
                .client
                .get(&full)
                .send()
                .await
                .map_err(BackendError::from_reqwest)?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(BackendError::Status { status, body });
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(BackendError::from_reqwest)?
                .to_vec();

            let ext = extension_hint(&full);
            // Symphonia decoding is CPU-bound; keep it off the runtime.
            tokio::task::spawn_blocking(move || decode_audio(bytes, ext.as_deref()))
                .await
                .map_err(|e| BackendError::Media(e.to_string()))?
                .map_err(|e| BackendError::Media(e.to_string()))
        })
    }
}
