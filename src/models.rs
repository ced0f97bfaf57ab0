//! Data models for the document desk client.
//!
//! This module contains the client-side view of notes, PDF selections and
//! question-answering exchanges, plus the JSON envelopes the server answers
//! with.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::delta::EditorContent;
use crate::error::{Failure, UNKNOWN_ERROR};
use crate::normalize::Envelope;

// ============================================================================
// Identifiers
// ============================================================================

/// Declares a server-issued opaque identifier. The server currently emits
/// integers, but nothing on the client depends on that.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Percent-encoded form for use as a path segment.
            pub fn path_segment(&self) -> String {
                urlencoding::encode(&self.0).into_owned()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Raw {
                    Text(String),
                    Int(i64),
                    Uint(u64),
                }
                Ok(match Raw::deserialize(deserializer)? {
                    Raw::Text(s) => Self(s),
                    Raw::Int(n) => Self(n.to_string()),
                    Raw::Uint(n) => Self(n.to_string()),
                })
            }
        }
    };
}

opaque_id!(
    /// Identifier of a persisted note.
    NoteId
);

opaque_id!(
    /// Identifier of an uploaded PDF.
    PdfId
);

// ============================================================================
// Notes
// ============================================================================

/// The note currently shown in the editor. `id` stays `None` until the
/// create request is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: Option<NoteId>,
    pub title: String,
    pub content: EditorContent,
}

/// Display-only projection of a note in the list view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteListEntry {
    pub id: NoteId,
    pub title: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
}

impl NoteListEntry {
    pub fn new(id: NoteId, title: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            last_modified,
            is_active: false,
        }
    }

    /// Last-modified time in the viewer's local zone.
    pub fn display_date(&self) -> String {
        self.last_modified
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}

// ============================================================================
// PDF Selection
// ============================================================================

/// Shown when the server confirms a selection without a filename.
pub const SELECTED_PDF_FALLBACK_NAME: &str = "Selected PDF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfSelection {
    pub id: PdfId,
    pub filename: String,
}

// ============================================================================
// Model Configuration
// ============================================================================

/// Wire discriminant for where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// Managed remote service; credentials live on the server.
    Groq,
    /// User-run endpoint at a user-supplied address.
    Ollama,
}

impl ModelBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelBackend::Groq => "groq",
            ModelBackend::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" | "hosted" => Ok(ModelBackend::Groq),
            "ollama" | "local" => Ok(ModelBackend::Ollama),
            other => Err(format!("unknown model backend: {}", other)),
        }
    }
}

/// Snapshot of the backend choice taken when a question is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelConfig {
    Hosted { model_name: String },
    Local { model_name: String, api_base: String },
}

impl ModelConfig {
    pub fn backend(&self) -> ModelBackend {
        match self {
            ModelConfig::Hosted { .. } => ModelBackend::Groq,
            ModelConfig::Local { .. } => ModelBackend::Ollama,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            ModelConfig::Hosted { model_name } | ModelConfig::Local { model_name, .. } => {
                model_name
            }
        }
    }

    /// Only the local variant has an address.
    pub fn api_base(&self) -> Option<&str> {
        match self {
            ModelConfig::Hosted { .. } => None,
            ModelConfig::Local { api_base, .. } => Some(api_base),
        }
    }
}

impl std::fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelConfig::Hosted { model_name } => write!(f, "groq / {}", model_name),
            ModelConfig::Local {
                model_name,
                api_base,
            } => write!(f, "ollama / {} @ {}", model_name, api_base),
        }
    }
}

// ============================================================================
// Question Answering
// ============================================================================

/// Displayed in place of a missing or empty answer.
pub const EMPTY_ANSWER_MESSAGE: &str = "Received empty or invalid response from the server.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    Empty,
}

impl Answer {
    pub fn from_response(answer: Option<String>) -> Self {
        match answer {
            Some(text) if !text.is_empty() => Answer::Text(text),
            _ => Answer::Empty,
        }
    }

    /// Lines as displayed; an empty answer shows the explicit placeholder.
    pub fn lines(&self) -> Vec<&str> {
        match self {
            Answer::Text(text) => text.split('\n').collect(),
            Answer::Empty => vec![EMPTY_ANSWER_MESSAGE],
        }
    }

    /// Escaped HTML with `<br>` line breaks.
    pub fn to_html(&self) -> String {
        self.lines()
            .iter()
            .map(|line| crate::delta::html_escape(line))
            .collect::<Vec<_>>()
            .join("<br>")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Pending,
    Answered(Answer),
    Failed(Failure),
}

/// One question/answer round trip. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaExchange {
    pub question: String,
    pub config: ModelConfig,
    pub state: ExchangeState,
}

impl QaExchange {
    /// The answer, if one is currently displayed.
    pub fn answer(&self) -> Option<&Answer> {
        match &self.state {
            ExchangeState::Answered(answer) => Some(answer),
            _ => None,
        }
    }
}

// ============================================================================
// Response Envelopes
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNoteResponse {
    #[serde(default)]
    pub success: bool,
    pub note_id: Option<NoteId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteResponse {
    pub title: Option<String>,
    pub content_delta: Option<String>,
    pub content_html: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectPdfResponse {
    #[serde(default)]
    pub success: bool,
    pub filename: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskResponse {
    pub answer: Option<String>,
    pub error: Option<String>,
}

fn unless_success(success: bool, error: &Option<String>) -> Option<String> {
    if success {
        None
    } else {
        Some(error.clone().unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
    }
}

impl Envelope for CreateNoteResponse {
    fn rejection(&self) -> Option<String> {
        unless_success(self.success, &self.error)
    }
}

impl Envelope for AckResponse {
    fn rejection(&self) -> Option<String> {
        unless_success(self.success, &self.error)
    }
}

impl Envelope for SelectPdfResponse {
    fn rejection(&self) -> Option<String> {
        unless_success(self.success, &self.error)
    }
}

impl Envelope for NoteResponse {
    fn rejection(&self) -> Option<String> {
        self.error.clone()
    }
}

impl Envelope for AskResponse {
    fn rejection(&self) -> Option<String> {
        self.error.clone()
    }
}
