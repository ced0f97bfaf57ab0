//! Note editor controller.
//!
//! [`NoteEditor`] is the synchronous state machine: which note is open, what
//! the editor holds, and the list view. Each protocol step is split into a
//! `begin_*` half that mutates local state and produces the request, and a
//! `finish_*` half that applies the normalized outcome. Nothing is mutated
//! optimistically, so a failed request needs no rollback.
//!
//! [`NoteEditorController`] drives those halves over a [`Transport`] and
//! forwards notices and view updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::delta::{Delta, DeltaError, EditorContent};
use crate::error::Failure;
use crate::models::{AckResponse, CreateNoteResponse, Note, NoteId, NoteListEntry, NoteResponse};
use crate::normalize::{normalize_envelope, normalize_page, Outcome};
use crate::notify::{Notice, Notifier, Severity};
use crate::sequence::{Completion, FollowUp, Issued, Sequencer, Settled, Ticket};
use crate::transport::{ApiRequest, Transport};
use crate::view::{ViewBus, ViewEvent};
use crate::{DEFAULT_NOTE_TITLE, LOADED_NOTE_FALLBACK_TITLE};

#[cfg(test)]
#[path = "editor_test.rs"]
mod editor_test;

// ============================================================================
// Protocol Types
// ============================================================================

/// Request kinds for sequencing. Create and load share `Open`: both decide
/// which note is open, so only the most recent of them may apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoteAction {
    Open,
    Save(NoteId),
    Delete(NoteId),
}

#[derive(Debug)]
pub struct CreateTicket {
    ticket: Ticket<NoteAction>,
    title: String,
}

#[derive(Debug)]
pub struct SaveTicket {
    ticket: Ticket<NoteAction>,
    id: NoteId,
    title: String,
}

#[derive(Debug)]
pub struct LoadTicket {
    ticket: Ticket<NoteAction>,
    id: NoteId,
}

#[derive(Debug)]
pub struct DeleteTicket {
    ticket: Ticket<NoteAction>,
    id: NoteId,
}

/// What a front end needs to draw the editor.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorSnapshot {
    pub current_note_id: Option<NoteId>,
    pub title: String,
    pub content: EditorContent,
    pub list: Vec<NoteListEntry>,
    pub awaiting_confirmation: Option<NoteId>,
    pub pending: bool,
}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug)]
pub struct NoteEditor {
    note: Note,
    list: Vec<NoteListEntry>,
    awaiting_confirmation: Option<NoteId>,
    sequencer: Sequencer<NoteAction>,
}

fn fresh_note() -> Note {
    Note {
        id: None,
        title: DEFAULT_NOTE_TITLE.to_string(),
        content: EditorContent::default(),
    }
}

impl NoteEditor {
    /// Starts from the server-rendered listing. No entry is active until a
    /// note is opened.
    pub fn new(list: Vec<NoteListEntry>) -> Self {
        let list = list
            .into_iter()
            .map(|mut entry| {
                entry.is_active = false;
                entry
            })
            .collect();
        Self {
            note: fresh_note(),
            list,
            awaiting_confirmation: None,
            sequencer: Sequencer::new(),
        }
    }

    pub fn current_note_id(&self) -> Option<&NoteId> {
        self.note.id.as_ref()
    }

    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn list(&self) -> &[NoteListEntry] {
        &self.list
    }

    /// Replaces the list with a fresh server listing. The open note stays
    /// marked if it is listed.
    pub fn seed_list(&mut self, list: Vec<NoteListEntry>) {
        self.list = list;
        match self.note.id.clone() {
            Some(id) => self.mark_active(&id),
            None => {
                for entry in &mut self.list {
                    entry.is_active = false;
                }
            }
        }
    }

    /// An empty list with nothing open must not be shown as-is.
    pub fn needs_initial_note(&self) -> bool {
        self.list.is_empty() && self.note.id.is_none()
    }

    pub fn set_title(&mut self, title: &str) {
        self.note.title = title.to_string();
    }

    pub fn set_content(&mut self, delta: Delta) {
        self.note.content = EditorContent::Structured(delta);
    }

    pub fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            current_note_id: self.note.id.clone(),
            title: self.note.title.clone(),
            content: self.note.content.clone(),
            list: self.list.clone(),
            awaiting_confirmation: self.awaiting_confirmation.clone(),
            pending: self.sequencer.any_pending(),
        }
    }

    fn mark_active(&mut self, id: &NoteId) {
        for entry in &mut self.list {
            entry.is_active = &entry.id == id;
        }
    }

    // ---- create ----

    /// Starts a fresh note and persists it.
    pub fn begin_create(&mut self) -> Issued<CreateTicket> {
        self.note = fresh_note();
        self.begin_create_current()
    }

    /// Persists the open, never-saved note as it stands.
    pub fn begin_create_current(&mut self) -> Issued<CreateTicket> {
        let request = ApiRequest::create_note(
            &self.note.title,
            &self.note.content.to_delta().to_json(),
            &self.note.content.to_html(),
        );
        let ticket = self.sequencer.issue(NoteAction::Open);
        debug!(seq = ticket.seq(), "issuing create_note");
        Issued {
            ticket: CreateTicket {
                ticket,
                title: self.note.title.clone(),
            },
            request,
        }
    }

    pub fn finish_create(
        &mut self,
        ticket: CreateTicket,
        outcome: Outcome<CreateNoteResponse>,
        now: DateTime<Utc>,
    ) -> Completion {
        let CreateTicket { ticket, title } = ticket;
        let seq = ticket.seq();
        if !self.sequencer.settle(ticket) {
            debug!(seq, "discarding stale create_note result");
            return Completion::discarded();
        }

        let id = match outcome.and_then(|r| r.note_id.ok_or(Failure::MalformedResponse)) {
            Ok(id) => id,
            Err(failure) => {
                warn!(seq, error = %failure, "create_note failed");
                return Completion::rejected(failure, "Error creating note");
            }
        };

        for entry in &mut self.list {
            entry.is_active = false;
        }
        let mut entry = NoteListEntry::new(id.clone(), title, now);
        entry.is_active = true;
        self.list.insert(0, entry);
        info!(note_id = %id, "note created");
        self.note.id = Some(id);

        Completion::applied(Some(Notice::success("New note created")))
    }

    // ---- save ----

    /// `None` when nothing has been persisted yet; the caller creates instead.
    pub fn begin_save(&mut self) -> Option<Issued<SaveTicket>> {
        let id = self.note.id.clone()?;
        let request = ApiRequest::update_note(
            &id,
            &self.note.title,
            &self.note.content.to_delta().to_json(),
            &self.note.content.to_html(),
        );
        let ticket = self.sequencer.issue(NoteAction::Save(id.clone()));
        debug!(note_id = %id, seq = ticket.seq(), "issuing update_note");
        Some(Issued {
            ticket: SaveTicket {
                ticket,
                id,
                title: self.note.title.clone(),
            },
            request,
        })
    }

    pub fn finish_save(&mut self, ticket: SaveTicket, outcome: Outcome<AckResponse>) -> Completion {
        let SaveTicket { ticket, id, title } = ticket;
        let seq = ticket.seq();
        if !self.sequencer.settle(ticket) {
            debug!(note_id = %id, seq, "discarding stale update_note result");
            return Completion::discarded();
        }

        match outcome {
            Ok(_) => {
                // The title the server confirmed, not whatever is typed now.
                if let Some(entry) = self.list.iter_mut().find(|e| e.id == id) {
                    entry.title = title;
                }
                info!(note_id = %id, "note saved");
                Completion::applied(Some(Notice::success("Note saved successfully")))
            }
            Err(failure) => {
                warn!(note_id = %id, error = %failure, "update_note failed");
                Completion::rejected(failure, "Error saving note")
            }
        }
    }

    // ---- load ----

    pub fn begin_load(&mut self, id: NoteId) -> Issued<LoadTicket> {
        let request = ApiRequest::fetch_note(&id);
        let ticket = self.sequencer.issue(NoteAction::Open);
        debug!(note_id = %id, seq = ticket.seq(), "issuing fetch note");
        Issued {
            ticket: LoadTicket { ticket, id },
            request,
        }
    }

    pub fn finish_load(&mut self, ticket: LoadTicket, outcome: Outcome<NoteResponse>) -> Completion {
        let LoadTicket { ticket, id } = ticket;
        let seq = ticket.seq();
        if !self.sequencer.settle(ticket) {
            debug!(note_id = %id, seq, "discarding stale fetch result");
            return Completion::discarded();
        }

        let response = match outcome {
            Ok(response) => response,
            Err(failure) => {
                warn!(note_id = %id, error = %failure, "fetch note failed");
                return Completion::rejected(failure, "Error loading note");
            }
        };

        let title = response
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| LOADED_NOTE_FALLBACK_TITLE.to_string());
        let content = stored_content(
            &id,
            response.content_delta.as_deref(),
            response.content_html.as_deref(),
        );

        self.mark_active(&id);
        self.note = Note {
            id: Some(id),
            title,
            content,
        };
        Completion::applied(None)
    }

    // ---- delete ----

    /// First step of a delete: remember what awaits confirmation. Returns the
    /// listed title, if any, for the prompt.
    pub fn request_delete(&mut self, id: NoteId) -> Option<String> {
        let title = self
            .list
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.title.clone());
        self.awaiting_confirmation = Some(id);
        title
    }

    pub fn cancel_delete(&mut self, id: &NoteId) -> bool {
        if self.awaiting_confirmation.as_ref() == Some(id) {
            self.awaiting_confirmation = None;
            true
        } else {
            false
        }
    }

    /// Second step. `None` unless `id` is the note awaiting confirmation.
    pub fn begin_delete(&mut self, id: &NoteId) -> Option<Issued<DeleteTicket>> {
        if self.awaiting_confirmation.as_ref() != Some(id) {
            return None;
        }
        self.awaiting_confirmation = None;
        let ticket = self.sequencer.issue(NoteAction::Delete(id.clone()));
        debug!(note_id = %id, seq = ticket.seq(), "issuing delete_note");
        Some(Issued {
            ticket: DeleteTicket {
                ticket,
                id: id.clone(),
            },
            request: ApiRequest::delete_note(id),
        })
    }

    pub fn finish_delete(&mut self, ticket: DeleteTicket, outcome: Outcome<AckResponse>) -> Completion {
        let DeleteTicket { ticket, id } = ticket;
        if !self.sequencer.settle(ticket) {
            debug!(note_id = %id, "discarding stale delete_note result");
            return Completion::discarded();
        }

        match outcome {
            Ok(_) => {
                self.list.retain(|e| e.id != id);
                info!(note_id = %id, "note deleted");
                let completion =
                    Completion::applied(Some(Notice::success("Note deleted successfully")));
                if self.note.id.as_ref() == Some(&id) {
                    completion.then(FollowUp::CreateNote)
                } else {
                    completion
                }
            }
            Err(failure) => {
                warn!(note_id = %id, error = %failure, "delete_note failed");
                Completion::rejected(failure, "Error deleting note")
            }
        }
    }
}

/// Editor content from a fetched note: the delta when it parses, otherwise
/// the rendered markup.
fn stored_content(id: &NoteId, delta: Option<&str>, html: Option<&str>) -> EditorContent {
    match delta.ok_or(DeltaError::Missing).and_then(Delta::parse) {
        Ok(delta) => EditorContent::Structured(delta),
        Err(e) => {
            warn!(note_id = %id, error = %e, "stored delta unusable, showing rendered markup");
            EditorContent::from_markup(html.unwrap_or(""))
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Clone)]
pub struct NoteEditorController {
    state: Arc<Mutex<NoteEditor>>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    view: ViewBus,
}

impl NoteEditorController {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        view: ViewBus,
        list: Vec<NoteListEntry>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(NoteEditor::new(list))),
            transport,
            notifier,
            view,
        }
    }

    /// Reads the server-rendered note listing, adopts its flash messages,
    /// then starts. When the listing cannot be read nothing is created: an
    /// unreadable list says nothing about whether the user has notes.
    pub async fn open(&self) -> Outcome<Option<Settled>> {
        let page = match normalize_page(self.transport.send(ApiRequest::list_notes()).await) {
            Ok(page) => page,
            Err(failure) => {
                warn!(error = %failure, "note listing unavailable");
                self.notifier.notify(
                    &failure.user_message("Error loading notes"),
                    Severity::Error,
                );
                self.publish().await;
                return Err(failure);
            }
        };

        self.notifier.adopt_flashes(&page.flashes());
        let list = page.note_listing();
        info!(notes = list.len(), "note listing loaded");
        self.state.lock().await.seed_list(list);
        Ok(self.start().await)
    }

    /// Shows the editor; with nothing to show, starts a new note.
    pub async fn start(&self) -> Option<Settled> {
        let needs_note = self.state.lock().await.needs_initial_note();
        if needs_note {
            Some(self.create_new().await)
        } else {
            self.publish().await;
            None
        }
    }

    pub async fn snapshot(&self) -> EditorSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn set_title(&self, title: &str) {
        self.state.lock().await.set_title(title);
        self.publish().await;
    }

    pub async fn set_content(&self, delta: Delta) {
        self.state.lock().await.set_content(delta);
        self.publish().await;
    }

    pub async fn create_new(&self) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_create();
            self.view.publish(ViewEvent::Notes(state.snapshot()));
            issued
        };
        self.send_create(issued).await
    }

    /// Saves the open note, or creates it if nothing is persisted yet.
    pub async fn save(&self) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = match state.begin_save() {
                Some(issued) => Ok(issued),
                None => Err(state.begin_create_current()),
            };
            self.view.publish(ViewEvent::Notes(state.snapshot()));
            issued
        };
        let issued = match issued {
            Ok(issued) => issued,
            Err(create) => return self.send_create(create).await,
        };
        let outcome = normalize_envelope(self.transport.send(issued.request).await);
        let ticket = issued.ticket;
        self.apply(|s| s.finish_save(ticket, outcome)).await.settled
    }

    pub async fn load(&self, id: NoteId) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_load(id);
            self.view.publish(ViewEvent::Notes(state.snapshot()));
            issued
        };
        let outcome = normalize_envelope(self.transport.send(issued.request).await);
        let ticket = issued.ticket;
        self.apply(|s| s.finish_load(ticket, outcome)).await.settled
    }

    pub async fn request_delete(&self, id: NoteId) {
        let title = self.state.lock().await.request_delete(id.clone());
        self.view.publish(ViewEvent::ConfirmDelete { id, title });
    }

    pub async fn cancel_delete(&self, id: &NoteId) -> bool {
        let cancelled = self.state.lock().await.cancel_delete(id);
        if cancelled {
            self.publish().await;
        }
        cancelled
    }

    /// Completes a requested delete. Without a matching request nothing is
    /// sent and the call reports `Discarded`.
    pub async fn confirm_delete(&self, id: &NoteId) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_delete(id);
            if issued.is_some() {
                self.view.publish(ViewEvent::Notes(state.snapshot()));
            }
            issued
        };
        let Some(issued) = issued else {
            debug!(note_id = %id, "delete confirmed without a pending request");
            return Settled::Discarded;
        };
        let outcome = normalize_envelope(self.transport.send(issued.request).await);
        let ticket = issued.ticket;
        let completion = self.apply(|s| s.finish_delete(ticket, outcome)).await;
        if completion.follow_up == Some(FollowUp::CreateNote) {
            self.create_new().await;
        }
        completion.settled
    }

    async fn send_create(&self, issued: Issued<CreateTicket>) -> Settled {
        let outcome = normalize_envelope(self.transport.send(issued.request).await);
        let ticket = issued.ticket;
        self.apply(|s| s.finish_create(ticket, outcome, Utc::now()))
            .await
            .settled
    }

    async fn apply(&self, finish: impl FnOnce(&mut NoteEditor) -> Completion) -> Completion {
        let (completion, snapshot) = {
            let mut state = self.state.lock().await;
            let completion = finish(&mut *state);
            (completion, state.snapshot())
        };
        if let Some(notice) = &completion.notice {
            self.notifier.notify(&notice.message, notice.severity);
        }
        self.view.publish(ViewEvent::Notes(snapshot));
        completion
    }

    async fn publish(&self) {
        let snapshot = self.state.lock().await.snapshot();
        self.view.publish(ViewEvent::Notes(snapshot));
    }
}
