//! Gemini REST backend implementation.
//!
//! Talks to the generative-language API directly:
//! - resumable media upload with PROCESSING-state polling
//! - `:countTokens` for file and text token counts
//! - `cachedContents` create/delete for explicit context caching
//! - `:generateContent` with `functionCall`/`functionResponse` parts,
//!   `thinkingConfig` reasoning depth, and optional `cachedContent`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use docshelf_core::backend::{CacheHandle, CountRequest, TurnRequest, TurnResponse, Usage};
use docshelf_core::error::BackendError;
use docshelf_core::message::{Message, MessageToolCall, Role};
use docshelf_core::{Backend, RemoteFile};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";

/// How long to wait between upload-state polls.
const UPLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Give up polling an upload after this many checks.
const UPLOAD_POLL_LIMIT: u32 = 120;

/// Gemini generative-language API backend.
pub struct GeminiBackend {
    name: String,
    base_url: String,
    api_key: String,
    /// Model used for `:countTokens` requests (counting is served by
    /// any model; this keeps counts consistent with generation).
    count_model: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Create a new Gemini backend.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // generation with high reasoning depth is slow
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "gemini".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            count_model: "gemini-3-flash-preview".into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a specific model for token counting.
    pub fn with_count_model(mut self, model: impl Into<String>) -> Self {
        self.count_model = model.into();
        self
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{API_VERSION}/{path}?key={}",
            self.base_url, self.api_key
        )
    }

    fn map_status(status: u16, retry_after: Option<u64>, body: String) -> BackendError {
        match status {
            429 => BackendError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            401 | 403 => BackendError::AuthenticationFailed("Invalid Gemini API key".into()),
            _ => BackendError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    /// Map a non-200 response, honoring the `Retry-After` header so the
    /// ingest backoff can follow the server's hint.
    async fn error_from(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Self::map_status(status, retry_after, body)
    }

    fn map_transport(e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }

    /// Part for a remote file reference.
    fn file_part(file: &RemoteFile) -> serde_json::Value {
        serde_json::json!({
            "fileData": { "fileUri": file.uri, "mimeType": file.mime_type }
        })
    }

    /// Convert transcript messages to API `contents`. Tool results
    /// become `functionResponse` parts; the function name is looked up
    /// from the assistant message that issued the call.
    fn to_api_contents(messages: &[Message], inline_files: &[RemoteFile]) -> Vec<serde_json::Value> {
        let mut contents = Vec::new();

        if !inline_files.is_empty() {
            let mut parts: Vec<serde_json::Value> = inline_files.iter().map(Self::file_part).collect();
            parts.push(serde_json::json!({ "text": "Here are the attached files." }));
            contents.push(serde_json::json!({ "role": "user", "parts": parts }));
            contents.push(serde_json::json!({
                "role": "model",
                "parts": [{ "text": "I have received the files and will reference them in my answers." }]
            }));
        }

        let mut call_names: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for msg in messages {
            match msg.role {
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{ "text": msg.content }]
                })),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(serde_json::json!({ "text": msg.content }));
                    }
                    for tc in &msg.tool_calls {
                        call_names.insert(tc.id.clone(), tc.name.clone());
                        parts.push(serde_json::json!({
                            "functionCall": { "name": tc.name, "args": tc.arguments }
                        }));
                    }
                    if !parts.is_empty() {
                        contents.push(serde_json::json!({ "role": "model", "parts": parts }));
                    }
                }
                Role::Tool => {
                    let name = msg
                        .tool_call_id
                        .as_ref()
                        .and_then(|id| call_names.get(id))
                        .cloned()
                        .unwrap_or_else(|| "unknown".into());
                    let response: serde_json::Value = serde_json::from_str(&msg.content)
                        .unwrap_or_else(|_| serde_json::json!({ "output": msg.content }));
                    contents.push(serde_json::json!({
                        "role": "user",
                        "parts": [{ "functionResponse": { "name": name, "response": response } }]
                    }));
                }
            }
        }

        contents
    }

    /// Poll an uploaded file until it leaves PROCESSING.
    async fn wait_until_active(&self, file: GeminiFile) -> std::result::Result<GeminiFile, BackendError> {
        let mut file = file;
        let mut polls = 0u32;
        while file.state.as_deref() == Some("PROCESSING") {
            polls += 1;
            if polls > UPLOAD_POLL_LIMIT {
                return Err(BackendError::UploadFailed(format!(
                    "{} still processing after {UPLOAD_POLL_LIMIT} polls",
                    file.name
                )));
            }
            tokio::time::sleep(UPLOAD_POLL_INTERVAL).await;

            let response = self
                .client
                .get(self.url(&file.name))
                .send()
                .await
                .map_err(Self::map_transport)?;
            if response.status().as_u16() != 200 {
                return Err(Self::error_from(response).await);
            }
            file = response
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        }

        if file.state.as_deref() == Some("FAILED") {
            return Err(BackendError::UploadFailed(format!(
                "backend failed to process {}",
                file.name
            )));
        }
        Ok(file)
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> std::result::Result<RemoteFile, BackendError> {
        debug!(backend = "gemini", display_name, mime_type, size = bytes.len(), "Starting upload");

        // Resumable protocol, phase 1: reserve an upload URL.
        let start_url = format!(
            "{}/upload/{API_VERSION}/files?key={}",
            self.base_url, self.api_key
        );
        let response = self
            .client
            .post(&start_url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(Self::map_transport)?;

        if response.status().as_u16() != 200 {
            return Err(Self::error_from(response).await);
        }
        let upload_url = response
            .headers()
            .get("X-Goog-Upload-URL")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                BackendError::UploadFailed("missing X-Goog-Upload-URL header".into())
            })?
            .to_string();

        // Phase 2: send the bytes and finalize.
        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("Content-Type", mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if response.status().as_u16() != 200 {
            return Err(Self::error_from(response).await);
        }
        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let file = self.wait_until_active(uploaded.file).await?;
        let uri = file
            .uri
            .ok_or_else(|| BackendError::MalformedResponse("uploaded file has no uri".into()))?;
        let mime = file.mime_type.unwrap_or_else(|| mime_type.to_string());

        debug!(backend = "gemini", uri = %uri, "Upload complete");
        Ok(RemoteFile { uri, mime_type: mime })
    }

    async fn count_tokens(&self, request: CountRequest) -> std::result::Result<u64, BackendError> {
        let mut parts: Vec<serde_json::Value> =
            request.files.iter().map(Self::file_part).collect();
        for text in &request.texts {
            parts.push(serde_json::json!({ "text": text }));
        }
        if parts.is_empty() {
            return Ok(0);
        }

        let url = self.url(&format!("models/{}:countTokens", self.count_model));
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts }]
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport)?;
        let status = response.status().as_u16();
        if status != 200 {
            let err = Self::error_from(response).await;
            warn!(status, error = %err, "countTokens failed");
            return Err(err);
        }

        let counted: CountTokensResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        Ok(counted.total_tokens)
    }

    async fn create_cache(
        &self,
        model: &str,
        files: &[RemoteFile],
        ttl: Duration,
    ) -> std::result::Result<CacheHandle, BackendError> {
        let parts: Vec<serde_json::Value> = files.iter().map(Self::file_part).collect();
        let body = serde_json::json!({
            "model": format!("models/{model}"),
            "contents": [{ "role": "user", "parts": parts }],
            "ttl": format!("{}s", ttl.as_secs()),
        });

        debug!(backend = "gemini", model, files = files.len(), "Creating context cache");

        let response = self
            .client
            .post(self.url("cachedContents"))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport)?;
        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "cachedContents create failed");
            return Err(BackendError::CacheCreateFailed(format!(
                "status {status}: {body}"
            )));
        }

        let created: CachedContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        Ok(CacheHandle(created.name))
    }

    async fn delete_cache(&self, handle: &CacheHandle) -> std::result::Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(&handle.0))
            .send()
            .await
            .map_err(Self::map_transport)?;
        let status = response.status().as_u16();
        // 404 means it already expired server-side; that is fine.
        if status != 200 && status != 404 {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    async fn generate(&self, request: TurnRequest) -> std::result::Result<TurnResponse, BackendError> {
        let url = self.url(&format!("models/{}:generateContent", request.model));
        let contents = Self::to_api_contents(&request.messages, &request.inline_files);

        let mut body = serde_json::json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
            "generationConfig": {
                "thinkingConfig": { "thinkingLevel": request.reasoning_depth.as_str() }
            },
        });

        if let Some(ref handle) = request.cached_content {
            body["cachedContent"] = serde_json::json!(handle.0);
        }

        if !request.tools.is_empty() {
            let declarations: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
        }

        debug!(
            backend = "gemini",
            model = %request.model,
            cached = request.cached_content.is_some(),
            depth = request.reasoning_depth.as_str(),
            "Sending generate request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport)?;
        let status = response.status().as_u16();
        if status != 200 {
            let err = Self::error_from(response).await;
            warn!(status, error = %err, "generateContent failed");
            return Err(err);
        }

        let api_resp: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        to_turn_response(api_resp, &request.model)
    }
}

fn to_turn_response(
    resp: GenerateResponse,
    requested_model: &str,
) -> std::result::Result<TurnResponse, BackendError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::MalformedResponse("response has no candidates".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&t);
        }
        if let Some(fc) = part.function_call {
            // The API carries no call id; mint one so results can be
            // correlated locally.
            tool_calls.push(MessageToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4()),
                name: fc.name,
                arguments: fc.args,
            });
        }
    }

    let usage = resp.usage_metadata.map(|u| Usage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
    });

    Ok(TurnResponse {
        text,
        tool_calls,
        usage,
        model: resp.model_version.unwrap_or_else(|| requested_model.to_string()),
    })
}

// --- Gemini API types ---

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFile {
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CachedContentResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}
