//! Test doubles shared by the controller tests: a scripted transport, a
//! recording notifier, and an in-process fake of the server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use url::Url;

use crate::notify::{Notice, Notifier, Severity};
use crate::transport::{ApiRequest, RawResponse, Transport, TransportError};

// ============================================================================
// Scripted Transport
// ============================================================================

pub fn json_response(status: u16, body: Value) -> RawResponse {
    RawResponse {
        status,
        status_text: status_text(status).to_string(),
        content_type: Some("application/json".to_string()),
        body: body.to_string().into_bytes(),
        final_path: None,
    }
}

pub fn html_response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status,
        status_text: status_text(status).to_string(),
        content_type: Some("text/html; charset=utf-8".to_string()),
        body: body.as_bytes().to_vec(),
        final_path: None,
    }
}

/// A rendered page the client landed on after following redirects.
pub fn page_response(path: &str, body: &str) -> RawResponse {
    RawResponse {
        final_path: Some(path.to_string()),
        ..html_response(200, body)
    }
}

fn status_text(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: RawResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_json(&self, body: Value) {
        self.push(json_response(200, body));
    }

    pub fn push_failure(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(TransportError::new(message)));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new(format!("unscripted request to {}", request.path))))
    }
}

// ============================================================================
// Recording Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Notice> {
        self.notices.lock().unwrap().last().cloned()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.severity == Severity::Error)
            .map(|n| n.message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        self.notices.lock().unwrap().push(Notice {
            message: message.to_string(),
            severity,
        });
    }
}

// ============================================================================
// Fake Server
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNote {
    /// `YYYY-MM-DD HH:MM:SS` in UTC, as the database stamps it.
    pub last_edited: String,
    pub title: String,
    pub content_delta: String,
    pub content_html: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub display_name: String,
    pub file_name: String,
    pub size: usize,
}

/// In-memory stand-in for the note and PDF server. Ids handed out by
/// `create_note` come from `preset_ids` first. Flash messages queue up until
/// the next rendered page, as in a session.
#[derive(Default)]
pub struct FakeState {
    next_id: AtomicU64,
    pub logged_out: AtomicBool,
    pub flashes: Mutex<Vec<(String, String)>>,
    pub preset_ids: Mutex<VecDeque<String>>,
    pub notes: Mutex<HashMap<String, StoredNote>>,
    pub pdfs: Mutex<HashMap<String, String>>,
    pub uploads: Mutex<Vec<StoredUpload>>,
    pub selected_pdf: Mutex<Option<String>>,
    pub ask_bodies: Mutex<Vec<Value>>,
    pub answer: Mutex<Option<String>>,
}

impl FakeState {
    fn flash(&self, category: &str, message: &str) {
        self.flashes
            .lock()
            .unwrap()
            .push((category.to_string(), message.to_string()));
    }

    /// Renders and clears the queued flash messages.
    fn take_flashes(&self) -> String {
        self.flashes
            .lock()
            .unwrap()
            .drain(..)
            .map(|(category, message)| {
                let class = if category == "error" { "danger" } else { category.as_str() };
                format!(
                    r#"<div class="alert alert-{} alert-dismissible fade show" role="alert">{}<button type="button" class="btn-close" data-bs-dismiss="alert"></button></div>"#,
                    class, message
                )
            })
            .collect()
    }

    /// Flashes `message` and sends the client to the login form when there
    /// is no session.
    fn require_login(&self, message: &str) -> Option<Response> {
        if self.logged_out.load(Ordering::Relaxed) {
            self.flash("error", message);
            return Some(Redirect::to("/login").into_response());
        }
        None
    }

    /// Stores a note directly, as if created in an earlier session.
    pub fn insert_note(&self, id: &str, title: &str, last_edited: &str) {
        self.notes.lock().unwrap().insert(
            id.to_string(),
            StoredNote {
                last_edited: last_edited.to_string(),
                title: title.to_string(),
                content_delta: String::new(),
                content_html: String::new(),
            },
        );
    }

    fn issue_id(&self) -> String {
        match self.preset_ids.lock().unwrap().pop_front() {
            Some(id) => id,
            None => format!("n{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
        }
    }
}

pub struct FakeServer {
    pub base_url: Url,
    pub state: Arc<FakeState>,
}

impl FakeServer {
    pub async fn spawn() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/create_note", post(create_note))
            .route("/update_note/{id}", post(update_note))
            .route("/note/{id}", get(fetch_note))
            .route("/delete_note/{id}", post(delete_note))
            .route("/select_pdf/{id}", get(select_pdf))
            .route("/ask", post(ask))
            .route("/upload", post(upload))
            .route("/delete_pdf/{id}", post(delete_pdf))
            .route("/dashboard", get(dashboard))
            .route("/notes", get(notes_page))
            .route("/login", get(login_page))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: Url::parse(&format!("http://{}/", addr)).unwrap(),
            state,
        }
    }
}

type Shared = State<Arc<FakeState>>;

fn field(body: &Value, name: &str) -> String {
    body.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn stored(body: &Value) -> StoredNote {
    StoredNote {
        last_edited: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        title: field(body, "title"),
        content_delta: field(body, "content_delta"),
        content_html: field(body, "content_html"),
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

async fn create_note(State(state): Shared, Json(body): Json<Value>) -> Response {
    let id = state.issue_id();
    state.notes.lock().unwrap().insert(id.clone(), stored(&body));
    Json(json!({ "success": true, "note_id": id })).into_response()
}

async fn update_note(State(state): Shared, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let mut notes = state.notes.lock().unwrap();
    match notes.get_mut(&id) {
        Some(note) => {
            *note = stored(&body);
            Json(json!({ "success": true })).into_response()
        }
        None => not_found("Note not found or access denied"),
    }
}

async fn fetch_note(State(state): Shared, Path(id): Path<String>) -> Response {
    if id == "boom" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<html><body><h1>Internal Server Error</h1></body></html>"),
        )
            .into_response();
    }
    match state.notes.lock().unwrap().get(&id) {
        Some(note) => Json(json!({
            "title": note.title,
            "content_delta": note.content_delta,
            "content_html": note.content_html,
        }))
        .into_response(),
        None => not_found("Note not found or access denied"),
    }
}

async fn delete_note(State(state): Shared, Path(id): Path<String>) -> Response {
    match state.notes.lock().unwrap().remove(&id) {
        Some(_) => Json(json!({ "success": true })).into_response(),
        None => not_found("Note not found or access denied"),
    }
}

async fn select_pdf(State(state): Shared, Path(id): Path<String>) -> Response {
    let filename = state.pdfs.lock().unwrap().get(&id).cloned();
    match filename {
        Some(filename) => {
            *state.selected_pdf.lock().unwrap() = Some(id);
            Json(json!({ "success": true, "filename": filename })).into_response()
        }
        None => not_found("File not found or access denied"),
    }
}

async fn ask(State(state): Shared, Json(body): Json<Value>) -> Response {
    state.ask_bodies.lock().unwrap().push(body);
    if state.selected_pdf.lock().unwrap().is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No PDF selected" })),
        )
            .into_response();
    }
    let answer = state.answer.lock().unwrap().clone();
    Json(json!({ "answer": answer })).into_response()
}

async fn upload(State(state): Shared, mut multipart: Multipart) -> Response {
    if let Some(redirect) = state.require_login("Please login to upload files") {
        return redirect;
    }
    let mut display_name = String::new();
    let mut file_name = String::new();
    let mut size = 0;

    while let Ok(Some(part)) = multipart.next_field().await {
        let name = part.name().map(str::to_string);
        match name.as_deref() {
            Some("filename") => display_name = part.text().await.unwrap_or_default(),
            Some("file") => {
                file_name = part.file_name().unwrap_or_default().to_string();
                size = part.bytes().await.map(|b| b.len()).unwrap_or(0);
            }
            _ => {}
        }
    }

    if size == 0 {
        return (StatusCode::BAD_REQUEST, Html("<p>No file part</p>")).into_response();
    }
    if !file_name.to_lowercase().ends_with(".pdf") {
        state.flash("error", "Only PDF files are allowed");
        return Redirect::to("/dashboard").into_response();
    }
    let id = state.issue_id();
    state.pdfs.lock().unwrap().insert(id, file_name.clone());
    state.uploads.lock().unwrap().push(StoredUpload {
        display_name,
        file_name,
        size,
    });
    state.flash("success", "File uploaded successfully");
    Redirect::to("/dashboard").into_response()
}

async fn delete_pdf(State(state): Shared, Path(id): Path<String>) -> Response {
    if let Some(redirect) = state.require_login("Please login to delete files") {
        return redirect;
    }
    if state.pdfs.lock().unwrap().remove(&id).is_none() {
        return (StatusCode::NOT_FOUND, Html("<p>Not Found</p>")).into_response();
    }
    let mut selected = state.selected_pdf.lock().unwrap();
    if selected.as_deref() == Some(id.as_str()) {
        *selected = None;
    }
    drop(selected);
    state.flash("success", "File deleted successfully");
    Redirect::to("/dashboard").into_response()
}

async fn dashboard(State(state): Shared) -> Response {
    if let Some(redirect) = state.require_login("Please login to access the dashboard") {
        return redirect;
    }
    Html(format!("<html><body>{}<h1>Dashboard</h1></body></html>", state.take_flashes()))
        .into_response()
}

/// Newest first, in the list markup the editor page uses.
async fn notes_page(State(state): Shared) -> Response {
    if let Some(redirect) = state.require_login("Please login to view notes") {
        return redirect;
    }
    let mut notes: Vec<(String, StoredNote)> = state
        .notes
        .lock()
        .unwrap()
        .iter()
        .map(|(id, note)| (id.clone(), note.clone()))
        .collect();
    notes.sort_by(|a, b| b.1.last_edited.cmp(&a.1.last_edited));

    let items: String = notes
        .iter()
        .map(|(id, note)| {
            format!(
                r##"<a href="#" class="list-group-item list-group-item-action note-item" data-id="{id}"><div><h6 class="mb-1">{title}</h6><small class="text-muted">{date}</small></div><button class="btn btn-sm btn-outline-danger delete-note-btn" data-id="{id}"><i class="fas fa-trash"></i></button></a>"##,
                id = id,
                title = crate::delta::html_escape(&note.title),
                date = note.last_edited,
            )
        })
        .collect();
    Html(format!(
        r#"<html><body>{}<div class="list-group" id="notesList">{}</div></body></html>"#,
        state.take_flashes(),
        items
    ))
    .into_response()
}

async fn login_page(State(state): Shared) -> Html<String> {
    Html(format!(
        "<html><body>{}<form method=\"post\"></form></body></html>",
        state.take_flashes()
    ))
}
