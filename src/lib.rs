//! Document desk client library.
//!
//! Client-side controllers for a note and PDF question-answering server:
//!
//! - `normalize`: reduces every exchange to a payload or one typed failure
//! - `notify`: transient toasts with automatic and manual dismissal
//! - `page`: flash alerts and the note listing read from rendered pages
//! - `editor`: the note editor (create, load, save, two-step delete)
//! - `pdf_qa`: PDF selection, questions, upload and deletion
//! - `sequence`: latest-wins ordering for overlapping requests
//! - `transport`: request descriptions and the HTTP client that sends them

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

pub mod delta;
pub mod editor;
pub mod error;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod page;
pub mod pdf_qa;
pub mod sequence;
pub mod transport;
pub mod view;

#[cfg(test)]
mod test_support;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_OLLAMA_API_BASE: &str = "http://localhost:11434";
pub const DEFAULT_NOTE_TITLE: &str = "Untitled Note";
pub const LOADED_NOTE_FALLBACK_TITLE: &str = "Untitled";

/// How long a notification stays visible.
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(5);

/// Answers from a local model can take a while.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for the server the controllers talk to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Raw `Cookie` header value carrying an authenticated session.
    pub session_cookie: Option<String>,
    /// Prefilled address of the local model endpoint.
    pub ollama_api_base: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: REQUEST_TIMEOUT.as_secs(),
            session_cookie: None,
            ollama_api_base: DEFAULT_OLLAMA_API_BASE.to_string(),
        }
    }
}

impl ClientConfig {
    /// Reads `DOCDESK_BASE_URL`, `DOCDESK_TIMEOUT_SECS`,
    /// `DOCDESK_SESSION_COOKIE` and `DOCDESK_OLLAMA_API_BASE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or blank variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(base_url) = get("DOCDESK_BASE_URL") {
            config.base_url = base_url;
            config.base_url()?;
        }
        if let Some(raw) = get("DOCDESK_TIMEOUT_SECS") {
            config.timeout_secs = raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidTimeout { value: raw })?;
        }
        config.session_cookie = get("DOCDESK_SESSION_COOKIE");
        if let Some(api_base) = get("DOCDESK_OLLAMA_API_BASE") {
            config.ollama_api_base = api_base;
        }
        Ok(config)
    }

    /// The base URL with a trailing slash, so request paths join beneath it.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl {
            value: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                value: self.base_url.clone(),
                reason: "expected an http or https URL".to_string(),
            });
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Re-export commonly used types
pub use delta::{Delta, EditorContent};
pub use editor::{EditorSnapshot, NoteEditor, NoteEditorController};
pub use error::{Failure, ValidationError};
pub use models::{Answer, ModelBackend, ModelConfig, NoteId, NoteListEntry, PdfId, PdfSelection};
pub use normalize::{normalize, normalize_envelope, normalize_page, Outcome};
pub use notify::{Flash, NotificationCenter, Notifier, Severity, ToastEvent};
pub use page::Page;
pub use pdf_qa::{ModelForm, PdfQa, PdfQaController, QaSnapshot};
pub use sequence::{Sequencer, Settled};
pub use transport::{ApiRequest, HttpTransport, Transport};
pub use view::{ViewBus, ViewEvent};
