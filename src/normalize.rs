//! Response normalization.
//!
//! Every exchange is reduced to `Ok(payload)` or one [`Failure`]. The checks
//! run in a fixed order: status, then declared content type, then parse. A
//! body is only parsed as JSON when the server declared it as JSON, so an
//! HTML error page is never fed to the JSON parser.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Failure, GENERIC_REJECTION, LOGIN_REQUIRED};
use crate::notify::Severity;
use crate::page::Page;
use crate::transport::{RawResponse, TransportError};

pub type Outcome<T> = Result<T, Failure>;

/// A JSON payload that can report failure inside a successful response
/// (`success: false` or an `error` field).
pub trait Envelope {
    fn rejection(&self) -> Option<String>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

fn declares_json(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// Reduces an exchange to a parsed payload or a typed failure.
pub fn normalize<T: DeserializeOwned>(exchange: Result<RawResponse, TransportError>) -> Outcome<T> {
    let response = exchange.map_err(|e| Failure::TransportFailure { message: e.message })?;
    if !response.is_success() {
        return Err(rejection(response));
    }

    if !declares_json(response.content_type.as_deref()) {
        warn!(
            status = response.status,
            content_type = ?response.content_type,
            "successful response is not JSON"
        );
        return Err(Failure::MalformedResponse);
    }

    serde_json::from_slice(&response.body).map_err(|e| {
        warn!(error = %e, "successful response body does not match the expected shape");
        Failure::MalformedResponse
    })
}

/// A non-successful response: the JSON error message when the body is
/// declared as JSON, otherwise just the status.
fn rejection(response: RawResponse) -> Failure {
    if !declares_json(response.content_type.as_deref()) {
        return Failure::ServerRejectedOpaque {
            status: response.status,
            status_text: response.status_text,
        };
    }
    let message = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| GENERIC_REJECTION.to_string());
    debug!(status = response.status, %message, "server rejected request");
    Failure::ServerRejected { message }
}

/// Like [`normalize`], then turns an in-band failure report into
/// [`Failure::ServerRejected`].
pub fn normalize_envelope<T: DeserializeOwned + Envelope>(
    exchange: Result<RawResponse, TransportError>,
) -> Outcome<T> {
    let payload: T = normalize(exchange)?;
    match payload.rejection() {
        Some(message) => Err(Failure::ServerRejected { message }),
        None => Ok(payload),
    }
}

/// For endpoints that answer with a rendered page, usually after a redirect.
/// A successful status is not enough: landing on the login form, or on a
/// page whose flash alerts report an error, is a rejection carrying the
/// server's own message.
pub fn normalize_page(exchange: Result<RawResponse, TransportError>) -> Outcome<Page> {
    let response = exchange.map_err(|e| Failure::TransportFailure { message: e.message })?;
    if !response.is_success() {
        return Err(rejection(response));
    }

    let page = Page::new(
        response.final_path.unwrap_or_default(),
        String::from_utf8_lossy(&response.body),
    );
    let error_flash = page
        .flashes()
        .into_iter()
        .find(|flash| flash.severity() == Severity::Error)
        .map(|flash| flash.message);

    if page.is_login() {
        let message = error_flash.unwrap_or_else(|| LOGIN_REQUIRED.to_string());
        warn!(%message, "redirected to the login form");
        return Err(Failure::ServerRejected { message });
    }
    if let Some(message) = error_flash {
        debug!(path = %page.path, %message, "page reports an error");
        return Err(Failure::ServerRejected { message });
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AckResponse, CreateNoteResponse};
    use serde_json::{json, Value};

    fn response(status: u16, text: &str, content_type: Option<&str>, body: &str) -> RawResponse {
        RawResponse {
            status,
            status_text: text.to_string(),
            content_type: content_type.map(|s| s.to_string()),
            body: body.as_bytes().to_vec(),
            final_path: None,
        }
    }

    fn landed(path: &str, body: &str) -> RawResponse {
        RawResponse {
            final_path: Some(path.to_string()),
            ..response(200, "OK", Some("text/html; charset=utf-8"), body)
        }
    }

    #[test]
    fn test_success_parses_payload() {
        let out: Outcome<Value> = normalize(Ok(response(
            200,
            "OK",
            Some("application/json; charset=utf-8"),
            r#"{"answer":"42"}"#,
        )));
        assert_eq!(out, Ok(json!({"answer": "42"})));
    }

    #[test]
    fn test_json_error_body_extracts_message() {
        let out: Outcome<Value> = normalize(Ok(response(
            400,
            "Bad Request",
            Some("application/json"),
            r#"{"error":"No PDF selected"}"#,
        )));
        assert_eq!(out, Err(Failure::rejected("No PDF selected")));
    }

    #[test]
    fn test_json_error_without_message_uses_fallback() {
        let out: Outcome<Value> = normalize(Ok(response(
            500,
            "Internal Server Error",
            Some("application/json"),
            r#"{"success":false}"#,
        )));
        assert_eq!(out, Err(Failure::rejected(GENERIC_REJECTION)));
    }

    #[test]
    fn test_html_error_page_is_opaque() {
        // The body would parse as JSON if we tried; the content type says not to.
        let out: Outcome<Value> = normalize(Ok(response(
            502,
            "Bad Gateway",
            Some("text/html"),
            r#"{"error":"should not be read"}"#,
        )));
        assert_eq!(
            out,
            Err(Failure::ServerRejectedOpaque {
                status: 502,
                status_text: "Bad Gateway".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_content_type_on_error_is_opaque() {
        let out: Outcome<Value> = normalize(Ok(response(404, "Not Found", None, "<h1>404</h1>")));
        assert!(matches!(out, Err(Failure::ServerRejectedOpaque { status: 404, .. })));
    }

    #[test]
    fn test_success_with_html_is_malformed() {
        let out: Outcome<Value> = normalize(Ok(response(200, "OK", Some("text/html"), "<html></html>")));
        assert_eq!(out, Err(Failure::MalformedResponse));
    }

    #[test]
    fn test_success_with_broken_json_is_malformed() {
        let out: Outcome<Value> = normalize(Ok(response(200, "OK", Some("application/json"), "{")));
        assert_eq!(out, Err(Failure::MalformedResponse));
    }

    #[test]
    fn test_transport_failure_passes_message() {
        let out: Outcome<Value> = normalize(Err(TransportError::new("connection refused")));
        assert_eq!(
            out,
            Err(Failure::TransportFailure {
                message: "connection refused".to_string()
            })
        );
    }

    #[test]
    fn test_envelope_success_false_is_rejected() {
        let out: Outcome<AckResponse> = normalize_envelope(Ok(response(
            200,
            "OK",
            Some("application/json"),
            r#"{"success":false,"error":"disk full"}"#,
        )));
        assert_eq!(out.unwrap_err(), Failure::rejected("disk full"));

        let ok: Outcome<CreateNoteResponse> = normalize_envelope(Ok(response(
            200,
            "OK",
            Some("application/json"),
            r#"{"success":true,"note_id":5}"#,
        )));
        assert_eq!(ok.unwrap().note_id.unwrap().as_str(), "5");
    }

    #[test]
    fn test_page_success_keeps_markup() {
        let page = normalize_page(Ok(landed(
            "/dashboard",
            r#"<div class="alert alert-success">File uploaded successfully</div>"#,
        )))
        .unwrap();
        assert_eq!(page.path, "/dashboard");
        assert_eq!(page.flashes().len(), 1);

        assert!(matches!(
            normalize_page(Ok(response(413, "Payload Too Large", Some("text/html"), ""))),
            Err(Failure::ServerRejectedOpaque { status: 413, .. })
        ));
    }

    #[test]
    fn test_page_on_login_form_is_rejected() {
        let out = normalize_page(Ok(landed(
            "/login",
            r#"<div class="alert alert-danger">Please login to upload files</div><form></form>"#,
        )));
        assert_eq!(out, Err(Failure::rejected("Please login to upload files")));

        let bare = normalize_page(Ok(landed("/login", "<form></form>")));
        assert_eq!(bare, Err(Failure::rejected(LOGIN_REQUIRED)));
    }

    #[test]
    fn test_page_error_flash_is_rejected() {
        let out = normalize_page(Ok(landed(
            "/dashboard",
            r#"<div class="alert alert-error alert-dismissible">Only PDF files are allowed</div>"#,
        )));
        assert_eq!(out, Err(Failure::rejected("Only PDF files are allowed")));
    }
}
