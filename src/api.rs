//! Client for the conversation/message REST backend.
//!
//! The backend stores conversations and their messages; the chat client only
//! needs plain request/response calls against it:
//!
//! | Call | Route |
//! |------|-------|
//! | [`list_conversations`](ConversationApi::list_conversations) | `GET /conversations` |
//! | [`create_conversation`](ConversationApi::create_conversation) | `POST /conversations` |
//! | [`rename_conversation`](ConversationApi::rename_conversation) | `PATCH /conversations/:id` |
//! | [`delete_conversation`](ConversationApi::delete_conversation) | `DELETE /conversations/:id` |
//! | [`list_messages`](ConversationApi::list_messages) | `GET /conversations/:id/messages` |
//! | [`send_message`](ConversationApi::send_message) | `POST /conversations/:id/messages` |
//! | [`upload_attachments`](ConversationApi::upload_attachments) | `POST /uploads` (multipart) |
//!
//! Non-2xx answers become [`Error::Upstream`]; `204` and empty bodies are
//! valid and read as "no content".

use crate::retry::{RequestExecutor, RetryConfig};
use crate::types::MessageRole;
use crate::{Error, Result};
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
}

/// An uploaded file as the backend describes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Attachment record as it arrives on the wire; `uid` may be missing
#[derive(Debug, Deserialize)]
struct RawAttachment {
    uid: Option<String>,
    name: Option<String>,
    size: Option<u64>,
    #[serde(rename = "type")]
    mime_type: Option<String>,
    url: Option<String>,
}

impl RawAttachment {
    fn sanitize(self) -> Option<Attachment> {
        let uid = self.uid.filter(|uid| !uid.is_empty())?;
        Some(Attachment {
            uid,
            name: self.name.unwrap_or_default(),
            size: self.size,
            mime_type: self.mime_type,
            url: self.url,
        })
    }
}

fn sanitize_attachments(raw: Vec<RawAttachment>) -> Vec<Attachment> {
    raw.into_iter().filter_map(RawAttachment::sanitize).collect()
}

/// A stored chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    pub created_at: String,
}

/// Body of `POST /conversations/:id/messages`
#[derive(Debug, Clone, Serialize)]
pub struct SendMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub role: MessageRole,
}

impl SendMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
            role: MessageRole::User,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
            role: MessageRole::Assistant,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// A file to upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub uid: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            mime_type: None,
            data: data.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    attachments: Vec<RawAttachment>,
}

/// Typed client for the conversation REST backend
#[derive(Debug, Clone)]
pub struct ConversationApi {
    base_url: String,
    http_client: reqwest::Client,
    upload_executor: RequestExecutor,
}

impl ConversationApi {
    /// Create a client rooted at `base_url` (for example `http://localhost:5173/api`)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, http_client))
    }

    /// Create a client sharing an existing `reqwest::Client`
    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let upload_policy = RetryConfig::default()
            .with_max_retries(1)
            .with_attempt_timeout(Duration::from_secs(20));
        Self {
            base_url,
            upload_executor: RequestExecutor::new(http_client.clone(), upload_policy),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a JSON request and decode the (possibly empty) JSON answer.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Option<T>> {
        let mut request = self
            .http_client
            .request(method.clone(), self.url(path))
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        log::debug!("{} {}", method, path);
        let response = request.send().await?;
        read_json(response).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self
            .request(Method::GET, "/conversations", None)
            .await?
            .unwrap_or_default())
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        self.request(Method::POST, "/conversations", Some(json!({ "title": title })))
            .await?
            .ok_or_else(|| Error::other("create conversation: empty response body"))
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        self.request(
            Method::PATCH,
            &format!("/conversations/{id}"),
            Some(json!({ "title": title })),
        )
        .await?
        .ok_or_else(|| Error::other("rename conversation: empty response body"))
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.request::<serde_json::Value>(Method::DELETE, &format!("/conversations/{id}"), None)
            .await?;
        Ok(())
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .request(
                Method::GET,
                &format!("/conversations/{conversation_id}/messages"),
                None,
            )
            .await?
            .unwrap_or_default())
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        message: &SendMessage,
    ) -> Result<ChatMessage> {
        self.request(
            Method::POST,
            &format!("/conversations/{conversation_id}/messages"),
            Some(serde_json::to_value(message)?),
        )
        .await?
        .ok_or_else(|| Error::other("send message: empty response body"))
    }

    /// Upload files as multipart `files` parts plus a `meta` JSON part.
    ///
    /// Uses a 20 second attempt limit and one retry. Returned attachments
    /// without a `uid` are dropped.
    pub async fn upload_attachments(&self, files: &[UploadFile]) -> Result<Vec<Attachment>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let meta: Vec<serde_json::Value> = files
            .iter()
            .map(|f| {
                json!({
                    "uid": f.uid,
                    "name": f.name,
                    "size": f.data.len(),
                    "type": f.mime_type,
                })
            })
            .collect();
        let meta = serde_json::to_string(&meta)?;
        let url = self.url("/uploads");

        let response = self
            .upload_executor
            .execute(&CancellationToken::new(), |client| {
                client.post(&url).multipart(build_upload_form(files, &meta))
            })
            .await?;

        let uploaded: Option<UploadResponse> = read_json(response).await?;
        Ok(uploaded
            .map(|u| sanitize_attachments(u.attachments))
            .unwrap_or_default())
    }
}

fn build_upload_form(files: &[UploadFile], meta: &str) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new();
    for file in files {
        let part = || reqwest::multipart::Part::bytes(file.data.to_vec()).file_name(file.name.clone());
        let part = match &file.mime_type {
            // An unparsable MIME type is left off rather than failing the upload.
            Some(mime) => part().mime_str(mime).unwrap_or_else(|_| part()),
            None => part(),
        };
        form = form.part("files", part);
    }
    form.text("meta", meta.to_string())
}

/// Decode a JSON response body, treating `204` and empty bodies as `None`.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|e| {
            log::warn!("Failed to read error response body: {}", e);
            String::new()
        });
        let body = if body.is_empty() {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            body
        };
        return Err(Error::upstream(status.as_u16(), body));
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(None);
    }

    let raw = response.text().await?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}
