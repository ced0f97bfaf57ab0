//! State-change events and their text rendering.
//!
//! Controllers publish a [`ViewEvent`] after every transition; a front end
//! subscribes and redraws. Nothing in the controllers depends on how (or
//! whether) the events are rendered.

use tokio::sync::broadcast;

use crate::editor::EditorSnapshot;
use crate::models::{ExchangeState, NoteId};
use crate::notify::Toast;
use crate::pdf_qa::{Panel, QaSnapshot};

#[derive(Debug, Clone)]
pub enum ViewEvent {
    Notes(EditorSnapshot),
    /// A delete was requested and waits for `confirm_delete` / `cancel_delete`.
    ConfirmDelete { id: NoteId, title: Option<String> },
    Qa(QaSnapshot),
    /// Blocking alert, e.g. a rejected file choice.
    Alert(String),
}

#[derive(Clone)]
pub struct ViewBus {
    tx: broadcast::Sender<ViewEvent>,
}

impl ViewBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.tx.subscribe()
    }

    /// Having no subscribers is fine.
    pub fn publish(&self, event: ViewEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ViewBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Text Rendering
// ============================================================================

pub fn render_notes(snapshot: &EditorSnapshot) -> String {
    let mut out = String::from("Notes\n");
    if snapshot.list.is_empty() {
        out.push_str("  (no notes yet)\n");
    }
    for entry in &snapshot.list {
        out.push_str(&format!(
            "  {} [{}] {}  {}\n",
            if entry.is_active { ">" } else { " " },
            entry.id,
            entry.title,
            entry.display_date(),
        ));
    }

    let identity = match &snapshot.current_note_id {
        Some(id) => id.to_string(),
        None => "unsaved".to_string(),
    };
    out.push_str(&format!("Editing: {} ({})", snapshot.title, identity));
    if snapshot.pending {
        out.push_str(" ...");
    }
    out.push('\n');
    if !snapshot.content.is_structured() {
        out.push_str("  (showing saved markup)\n");
    }
    for line in snapshot.content.plain_text().lines() {
        out.push_str(&format!("  | {}\n", line));
    }
    out
}

pub fn render_qa(snapshot: &QaSnapshot) -> String {
    let mut out = String::new();
    match (&snapshot.panel, &snapshot.selection) {
        (Panel::AskQuestions, Some(selection)) => {
            out.push_str(&format!("PDF: {} [{}]\n", selection.filename, selection.id));
        }
        _ => out.push_str("No PDF chosen for question answering.\n"),
    }
    out.push_str(&format!("Model: {}\n", snapshot.model));

    if snapshot.pending {
        out.push_str("Thinking...\n");
    } else if let Some(exchange) = &snapshot.exchange {
        if let ExchangeState::Answered(answer) = &exchange.state {
            out.push_str(&format!("Q: {}\n", exchange.question));
            for line in answer.lines() {
                out.push_str(&format!("A: {}\n", line));
            }
        }
    }
    out
}

pub fn render_toast(toast: &Toast) -> String {
    format!("[{}] {}", toast.severity.label().to_uppercase(), toast.message)
}

pub fn render_confirm(id: &NoteId, title: Option<&str>) -> String {
    match title {
        Some(title) => format!("Delete note \"{}\" [{}]? (yes/no)", title, id),
        None => format!("Delete note [{}]? (yes/no)", id),
    }
}
