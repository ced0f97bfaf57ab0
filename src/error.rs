//! Failure taxonomy shared by both controllers.
//!
//! Every request a controller issues settles into either a parsed payload or
//! one [`Failure`]. Failures are never fatal: the controllers surface them
//! through the notification channel and keep their previous state.

use thiserror::Error;

/// Substituted when a structured error body carries no usable message.
pub const GENERIC_REJECTION: &str = "An error occurred";

/// Substituted when an envelope reports `success: false` without a reason.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Used when a page lands on the login form without saying why.
pub const LOGIN_REQUIRED: &str = "Please log in to continue";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Non-successful status with a JSON error body (or a successful status
    /// whose envelope reports failure).
    #[error("{message}")]
    ServerRejected { message: String },

    /// Non-successful status with a body that is not JSON, e.g. an HTML
    /// error page. The body is never parsed.
    #[error("Server error: {status} {status_text}")]
    ServerRejectedOpaque { status: u16, status_text: String },

    /// Successful status, but the body is not the expected JSON.
    #[error("Received non-JSON response from server")]
    MalformedResponse,

    /// The request never completed.
    #[error("{message}")]
    TransportFailure { message: String },

    /// Caught client-side before any request was issued.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl Failure {
    pub fn rejected(message: impl Into<String>) -> Self {
        Failure::ServerRejected {
            message: message.into(),
        }
    }

    /// Text shown to the user, prefixed with the action that failed
    /// (e.g. "Error saving note: Note not found").
    pub fn user_message(&self, action: &str) -> String {
        match self {
            // Validation messages are already phrased for the user.
            Failure::Validation(v) => v.to_string(),
            other => format!("{}: {}", action, other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a question")]
    EmptyQuestion,

    #[error("Please select a PDF file only.")]
    NotPdf { filename: String },

    #[error("No file chosen")]
    NoFileChosen,

    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid base URL {value:?}: {reason}")]
    InvalidBaseUrl { value: String, reason: String },

    #[error("Invalid timeout {value:?}: expected whole seconds")]
    InvalidTimeout { value: String },

    #[error("Invalid session cookie: {reason}")]
    InvalidCookie { reason: String },

    #[error("Cannot build HTTP client: {reason}")]
    HttpClient { reason: String },
}
