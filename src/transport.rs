//! Requests the controllers issue and the HTTP transport that carries them.
//!
//! Controllers only ever build [`ApiRequest`] values; the [`Transport`] trait
//! is the seam where the real `reqwest` client or a test double plugs in.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::error::ConfigError;
use crate::models::{ModelConfig, NoteId, PdfId};
use crate::ClientConfig;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Upload(UploadForm),
}

/// Multipart body for `/upload`: a display name plus the file bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadForm {
    pub display_name: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
}

impl ApiRequest {
    fn get(path: String) -> Self {
        Self {
            method: Method::Get,
            path,
            body: RequestBody::Empty,
        }
    }

    fn post(path: String, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            path,
            body,
        }
    }

    pub fn create_note(title: &str, content_delta: &str, content_html: &str) -> Self {
        Self::post(
            "/create_note".to_string(),
            RequestBody::Json(json!({
                "title": title,
                "content_delta": content_delta,
                "content_html": content_html,
            })),
        )
    }

    pub fn update_note(id: &NoteId, title: &str, content_delta: &str, content_html: &str) -> Self {
        Self::post(
            format!("/update_note/{}", id.path_segment()),
            RequestBody::Json(json!({
                "title": title,
                "content_delta": content_delta,
                "content_html": content_html,
            })),
        )
    }

    /// The server-rendered note listing page.
    pub fn list_notes() -> Self {
        Self::get("/notes".to_string())
    }

    pub fn fetch_note(id: &NoteId) -> Self {
        Self::get(format!("/note/{}", id.path_segment()))
    }

    pub fn delete_note(id: &NoteId) -> Self {
        Self::post(format!("/delete_note/{}", id.path_segment()), RequestBody::Empty)
    }

    pub fn select_pdf(id: &PdfId) -> Self {
        Self::get(format!("/select_pdf/{}", id.path_segment()))
    }

    /// The hosted backend never carries an address or credential; the local
    /// backend always carries its address.
    pub fn ask(question: &str, config: &ModelConfig) -> Self {
        let mut body = json!({
            "question": question,
            "model_type": config.backend().as_str(),
            "model_name": config.model_name(),
        });
        if let (Some(api_base), Value::Object(map)) = (config.api_base(), &mut body) {
            map.insert("api_base".to_string(), Value::String(api_base.to_string()));
        }
        Self::post("/ask".to_string(), RequestBody::Json(body))
    }

    pub fn upload_pdf(form: UploadForm) -> Self {
        Self::post("/upload".to_string(), RequestBody::Upload(form))
    }

    pub fn delete_pdf(id: &PdfId) -> Self {
        Self::post(format!("/delete_pdf/{}", id.path_segment()), RequestBody::Empty)
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            RequestBody::Json(v) => Some(v),
            _ => None,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A completed exchange, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Path that finally answered, once redirects were followed.
    pub final_path: Option<String>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, TransportError>;
}

// ============================================================================
// HTTP Transport
// ============================================================================

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.session_cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| ConfigError::InvalidCookie {
                reason: e.to_string(),
            })?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url()?,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::new(format!("Invalid request path {}: {}", path, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Upload(form) => {
                let part = reqwest::multipart::Part::bytes(form.bytes)
                    .file_name(form.file_name)
                    .mime_str("application/pdf")
                    .map_err(|e| TransportError::new(e.to_string()))?;
                let multipart = reqwest::multipart::Form::new()
                    .text("filename", form.display_name)
                    .part("file", part);
                builder.multipart(multipart)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        let status = response.status();
        let final_path = Some(response.url().path().to_string());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        Ok(RawResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            content_type,
            body: body.to_vec(),
            final_path,
        })
    }
}
