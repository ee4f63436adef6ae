use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::AudioClip;
use crate::config::BackendConfig;
use crate::error::VoxchatError;
use crate::message::InputType;

pub const CHAT_PATH: &str = "/api/chat";
pub const HISTORY_PATH: &str = "/api/history";
pub const UPLOAD_PATH: &str = "/api/upload";
pub const UPLOAD_STATUS_PATH: &str = "/api/upload/status";
pub const TRANSCRIBE_PATH: &str = "/api/speech/transcribe";
pub const SYNTHESIZE_PATH: &str = "/api/speech/synthesize";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReply {
    pub rows_count: u64,
    pub data_preview: DataPreview,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataPreview {
    pub columns: Vec<String>,
    /// Whatever else the backend chose to include.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub success: bool,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
}

/// A local file on its way to `/api/upload`.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub async fn from_path(path: &Path) -> Result<Self, VoxchatError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| VoxchatError::Backend(format!("not a file: {}", path.display())))?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { file_name, bytes })
    }

    fn mime(&self) -> &'static str {
        if self.file_name.to_ascii_lowercase().ends_with(".csv") {
            "text/csv"
        } else {
            "application/octet-stream"
        }
    }
}

/// The remote assistant: chat, file ingestion and speech.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn send_message(&self, request: ChatRequest) -> Result<ChatReply, VoxchatError>;

    async fn history(&self, session_id: &str) -> Result<serde_json::Value, VoxchatError>;

    async fn upload_file(&self, file: UploadFile) -> Result<UploadReply, VoxchatError>;

    async fn upload_status(&self) -> Result<serde_json::Value, VoxchatError>;

    async fn transcribe(&self, clip: AudioClip) -> Result<Transcription, VoxchatError>;

    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, VoxchatError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, VoxchatError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }

        let client = builder
            .build()
            .map_err(|e| VoxchatError::Backend(format!("failed to build HTTP client: {}", e)))?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        info!("Backend client targeting {}", base_url);

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn history_url(&self, session_id: &str) -> Result<reqwest::Url, VoxchatError> {
        let mut url = reqwest::Url::parse(&self.url(HISTORY_PATH))
            .map_err(|e| VoxchatError::Backend(format!("invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| VoxchatError::Backend("base URL cannot carry a path".to_string()))?
            .push(session_id);
        Ok(url)
    }
}

fn request_failed(endpoint: &str, e: reqwest::Error) -> VoxchatError {
    VoxchatError::Backend(format!("{} request failed: {}", endpoint, e))
}

fn decode_failed(endpoint: &str, e: reqwest::Error) -> VoxchatError {
    VoxchatError::Backend(format!("failed to parse {} response: {}", endpoint, e))
}

async fn ensure_success(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, VoxchatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("{} error body: {}", endpoint, body);
    Err(VoxchatError::Backend(format!(
        "{} returned status {}",
        endpoint, status
    )))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send_message(&self, request: ChatRequest) -> Result<ChatReply, VoxchatError> {
        debug!(
            "POST {} (session: {:?}, input: {:?})",
            CHAT_PATH, request.session_id, request.input_type
        );

        let response = self
            .client
            .post(self.url(CHAT_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_failed(CHAT_PATH, e))?;

        let response = ensure_success(CHAT_PATH, response).await?;
        response
            .json::<ChatReply>()
            .await
            .map_err(|e| decode_failed(CHAT_PATH, e))
    }

    async fn history(&self, session_id: &str) -> Result<serde_json::Value, VoxchatError> {
        let url = self.history_url(session_id)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_failed(HISTORY_PATH, e))?;

        let response = ensure_success(HISTORY_PATH, response).await?;
        response
            .json()
            .await
            .map_err(|e| decode_failed(HISTORY_PATH, e))
    }

    async fn upload_file(&self, file: UploadFile) -> Result<UploadReply, VoxchatError> {
        info!("Uploading {} ({} bytes)", file.file_name, file.bytes.len());

        let mime = file.mime();
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(mime)
            .map_err(|e| request_failed(UPLOAD_PATH, e))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(UPLOAD_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_failed(UPLOAD_PATH, e))?;

        let response = ensure_success(UPLOAD_PATH, response).await?;
        response
            .json::<UploadReply>()
            .await
            .map_err(|e| decode_failed(UPLOAD_PATH, e))
    }

    async fn upload_status(&self) -> Result<serde_json::Value, VoxchatError> {
        let response = self
            .client
            .get(self.url(UPLOAD_STATUS_PATH))
            .send()
            .await
            .map_err(|e| request_failed(UPLOAD_STATUS_PATH, e))?;

        let response = ensure_success(UPLOAD_STATUS_PATH, response).await?;
        response
            .json()
            .await
            .map_err(|e| decode_failed(UPLOAD_STATUS_PATH, e))
    }

    async fn transcribe(&self, clip: AudioClip) -> Result<Transcription, VoxchatError> {
        info!("Sending {} bytes of audio for transcription", clip.bytes.len());

        let part = Part::bytes(clip.bytes)
            .file_name(clip.file_name)
            .mime_str(clip.mime)
            .map_err(|e| request_failed(TRANSCRIBE_PATH, e))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(TRANSCRIBE_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_failed(TRANSCRIBE_PATH, e))?;

        let response = ensure_success(TRANSCRIBE_PATH, response).await?;
        response
            .json::<Transcription>()
            .await
            .map_err(|e| decode_failed(TRANSCRIBE_PATH, e))
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, VoxchatError> {
        debug!("Synthesizing {} chars ({})", text.len(), language);

        let response = self
            .client
            .post(self.url(SYNTHESIZE_PATH))
            .json(&SynthesizeRequest { text, language })
            .send()
            .await
            .map_err(|e| request_failed(SYNTHESIZE_PATH, e))?;

        let response = ensure_success(SYNTHESIZE_PATH, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| decode_failed(SYNTHESIZE_PATH, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted backend. Each call pops the next queued outcome; an empty
    /// queue behaves like an unreachable backend.
    #[derive(Default)]
    pub struct MockBackend {
        pub chat_requests: Mutex<Vec<ChatRequest>>,
        pub uploads: Mutex<Vec<String>>,
        pub clips: Mutex<Vec<AudioClip>>,
        pub synth_requests: Mutex<Vec<(String, String)>>,
        chat_replies: Mutex<VecDeque<Result<ChatReply, String>>>,
        upload_replies: Mutex<VecDeque<Result<UploadReply, String>>>,
        transcriptions: Mutex<VecDeque<Result<Transcription, String>>>,
        audio: Mutex<VecDeque<Result<Vec<u8>, String>>>,
    }

    fn pop<T>(queue: &Mutex<VecDeque<Result<T, String>>>) -> Result<T, VoxchatError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("connection refused".to_string()))
            .map_err(VoxchatError::Backend)
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn chat_ok(self, response: &str, session_id: Option<&str>) -> Self {
            self.chat_replies.lock().unwrap().push_back(Ok(ChatReply {
                response: response.to_string(),
                session_id: session_id.map(str::to_string),
            }));
            self
        }

        pub fn chat_err(self) -> Self {
            self.chat_replies
                .lock()
                .unwrap()
                .push_back(Err("status 500".to_string()));
            self
        }

        pub fn upload_ok(self, rows_count: u64, columns: &[&str]) -> Self {
            self.upload_replies.lock().unwrap().push_back(Ok(UploadReply {
                rows_count,
                data_preview: DataPreview {
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    extra: serde_json::Map::new(),
                },
            }));
            self
        }

        pub fn transcription_ok(self, text: &str) -> Self {
            self.transcriptions.lock().unwrap().push_back(Ok(Transcription {
                text: text.to_string(),
                success: true,
            }));
            self
        }

        pub fn audio_ok(self, bytes: &[u8]) -> Self {
            self.audio.lock().unwrap().push_back(Ok(bytes.to_vec()));
            self
        }

        pub fn sent_sessions(&self) -> Vec<Option<String>> {
            self.chat_requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.session_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn send_message(&self, request: ChatRequest) -> Result<ChatReply, VoxchatError> {
            self.chat_requests.lock().unwrap().push(request);
            pop(&self.chat_replies)
        }

        async fn history(&self, session_id: &str) -> Result<serde_json::Value, VoxchatError> {
            Ok(serde_json::json!({ "session_id": session_id, "messages": [] }))
        }

        async fn upload_file(&self, file: UploadFile) -> Result<UploadReply, VoxchatError> {
            self.uploads.lock().unwrap().push(file.file_name);
            pop(&self.upload_replies)
        }

        async fn upload_status(&self) -> Result<serde_json::Value, VoxchatError> {
            Ok(serde_json::json!({ "uploaded": !self.uploads.lock().unwrap().is_empty() }))
        }

        async fn transcribe(&self, clip: AudioClip) -> Result<Transcription, VoxchatError> {
            self.clips.lock().unwrap().push(clip);
            pop(&self.transcriptions)
        }

        async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, VoxchatError> {
            self.synth_requests
                .lock()
                .unwrap()
                .push((text.to_string(), language.to_string()));
            pop(&self.audio)
        }
    }
}
