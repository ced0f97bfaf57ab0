//! PDF question-answering controller.
//!
//! [`PdfQa`] owns the selected PDF, the current exchange, the model form and
//! the file chooser. Like the note editor it splits every request into a
//! `begin_*` half and a `finish_*` half; [`PdfQaController`] drives them over
//! a [`Transport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Failure, ValidationError};
use crate::models::{
    Answer, AskResponse, ExchangeState, ModelBackend, ModelConfig, PdfId, PdfSelection,
    QaExchange, SelectPdfResponse, SELECTED_PDF_FALLBACK_NAME,
};
use crate::normalize::{normalize_envelope, normalize_page, Outcome};
use crate::notify::{Notice, Notifier};
use crate::sequence::{Completion, Issued, Sequencer, Settled, Ticket};
use crate::transport::{ApiRequest, Transport, UploadForm};
use crate::view::{ViewBus, ViewEvent};
use crate::DEFAULT_OLLAMA_API_BASE;

#[cfg(test)]
#[path = "pdf_qa_test.rs"]
mod pdf_qa_test;

/// Model names the hosted backend is known to serve.
pub const HOSTED_MODELS: &[&str] = &[
    "llama3-8b-8192",
    "llama3-70b-8192",
    "mixtral-8x7b-32768",
    "gemma-7b-it",
];

pub const DEFAULT_LOCAL_MODEL: &str = "llama3";

// ============================================================================
// Model Form
// ============================================================================

/// The toggle-backed model form. Values typed into the hidden variant are
/// kept so switching back and forth loses nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelForm {
    pub backend: ModelBackend,
    pub hosted_model: String,
    pub local_model: String,
    pub local_api_base: String,
}

impl ModelForm {
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            backend: ModelBackend::Groq,
            hosted_model: HOSTED_MODELS[0].to_string(),
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            local_api_base: api_base.into(),
        }
    }

    /// Sets the model name of whichever variant is active.
    pub fn set_model_name(&mut self, name: &str) {
        match self.backend {
            ModelBackend::Groq => self.hosted_model = name.to_string(),
            ModelBackend::Ollama => self.local_model = name.to_string(),
        }
    }

    /// The configuration in effect at submit time.
    pub fn snapshot(&self) -> ModelConfig {
        match self.backend {
            ModelBackend::Groq => ModelConfig::Hosted {
                model_name: self.hosted_model.trim().to_string(),
            },
            ModelBackend::Ollama => ModelConfig::Local {
                model_name: self.local_model.trim().to_string(),
                api_base: self.local_api_base.trim().to_string(),
            },
        }
    }
}

impl Default for ModelForm {
    fn default() -> Self {
        Self::with_api_base(DEFAULT_OLLAMA_API_BASE)
    }
}

// ============================================================================
// File Chooser
// ============================================================================

/// Advisory check on the chosen file's name; the server decides for real.
pub fn validate_pdf_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.to_ascii_lowercase().ends_with(".pdf") {
        Ok(())
    } else {
        Err(ValidationError::NotPdf {
            filename: filename.to_string(),
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInput {
    chosen: Option<PathBuf>,
}

impl FileInput {
    /// A rejected choice clears the input.
    pub fn choose(&mut self, path: PathBuf) -> Result<(), ValidationError> {
        match validate_pdf_filename(&file_name_of(&path)) {
            Ok(()) => {
                self.chosen = Some(path);
                Ok(())
            }
            Err(e) => {
                self.chosen = None;
                Err(e)
            }
        }
    }

    pub fn chosen(&self) -> Option<&Path> {
        self.chosen.as_deref()
    }

    pub fn clear(&mut self) {
        self.chosen = None;
    }
}

// ============================================================================
// Protocol Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QaAction {
    Select,
    Ask,
    Upload,
    DeletePdf(PdfId),
}

#[derive(Debug)]
pub struct SelectTicket {
    ticket: Ticket<QaAction>,
    id: PdfId,
}

#[derive(Debug)]
pub struct AskTicket(Ticket<QaAction>);

#[derive(Debug)]
pub struct UploadTicket {
    ticket: Ticket<QaAction>,
    file_name: String,
}

#[derive(Debug)]
pub struct DeletePdfTicket {
    ticket: Ticket<QaAction>,
    id: PdfId,
}

/// Which of the two panels is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    NoPdfChosen,
    AskQuestions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaSnapshot {
    pub selection: Option<PdfSelection>,
    pub panel: Panel,
    pub exchange: Option<QaExchange>,
    /// A question is in flight.
    pub pending: bool,
    /// Any request is in flight (select, question, upload or delete).
    pub busy: bool,
    pub model: ModelConfig,
    pub form: ModelForm,
    pub chosen_file: Option<PathBuf>,
}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug)]
pub struct PdfQa {
    selection: Option<PdfSelection>,
    exchange: Option<QaExchange>,
    form: ModelForm,
    file_input: FileInput,
    sequencer: Sequencer<QaAction>,
}

impl PdfQa {
    pub fn new(form: ModelForm) -> Self {
        Self {
            selection: None,
            exchange: None,
            form,
            file_input: FileInput::default(),
            sequencer: Sequencer::new(),
        }
    }

    pub fn selection(&self) -> Option<&PdfSelection> {
        self.selection.as_ref()
    }

    pub fn exchange(&self) -> Option<&QaExchange> {
        self.exchange.as_ref()
    }

    pub fn panel(&self) -> Panel {
        if self.selection.is_some() {
            Panel::AskQuestions
        } else {
            Panel::NoPdfChosen
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sequencer.is_pending(&QaAction::Ask)
    }

    pub fn form(&self) -> &ModelForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut ModelForm {
        &mut self.form
    }

    pub fn file_input(&self) -> &FileInput {
        &self.file_input
    }

    pub fn choose_file(&mut self, path: PathBuf) -> Result<(), ValidationError> {
        self.file_input.choose(path)
    }

    pub fn snapshot(&self) -> QaSnapshot {
        QaSnapshot {
            selection: self.selection.clone(),
            panel: self.panel(),
            exchange: self.exchange.clone(),
            pending: self.is_pending(),
            busy: self.sequencer.any_pending(),
            model: self.form.snapshot(),
            form: self.form.clone(),
            chosen_file: self.file_input.chosen.clone(),
        }
    }

    // ---- select ----

    pub fn begin_select(&mut self, id: PdfId) -> Issued<SelectTicket> {
        let ticket = self.sequencer.issue(QaAction::Select);
        debug!(pdf_id = %id, seq = ticket.seq(), "issuing select_pdf");
        Issued {
            request: ApiRequest::select_pdf(&id),
            ticket: SelectTicket { ticket, id },
        }
    }

    pub fn finish_select(
        &mut self,
        ticket: SelectTicket,
        outcome: Outcome<SelectPdfResponse>,
    ) -> Completion {
        let SelectTicket { ticket, id } = ticket;
        if !self.sequencer.settle(ticket) {
            debug!(pdf_id = %id, "discarding stale select_pdf result");
            return Completion::discarded();
        }

        match outcome {
            Ok(response) => {
                let filename = response
                    .filename
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| SELECTED_PDF_FALLBACK_NAME.to_string());
                info!(pdf_id = %id, %filename, "pdf selected");
                self.selection = Some(PdfSelection { id, filename });
                Completion::applied(Some(Notice::success("PDF selected for question-answering")))
            }
            Err(failure) => {
                warn!(pdf_id = %id, error = %failure, "select_pdf failed");
                Completion::rejected(failure, "Error selecting PDF")
            }
        }
    }

    // ---- ask ----

    /// Rejects a blank question before anything is sent. Otherwise hides the
    /// previous answer and marks the exchange pending.
    pub fn begin_ask(
        &mut self,
        question: &str,
        config: ModelConfig,
    ) -> Result<Issued<AskTicket>, Failure> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyQuestion.into());
        }

        let request = ApiRequest::ask(question, &config);
        let ticket = self.sequencer.issue(QaAction::Ask);
        debug!(seq = ticket.seq(), backend = %config.backend(), "issuing ask");
        self.exchange = Some(QaExchange {
            question: question.to_string(),
            config,
            state: ExchangeState::Pending,
        });
        Ok(Issued {
            ticket: AskTicket(ticket),
            request,
        })
    }

    pub fn finish_ask(&mut self, ticket: AskTicket, outcome: Outcome<AskResponse>) -> Completion {
        let seq = ticket.0.seq();
        if !self.sequencer.settle(ticket.0) {
            debug!(seq, "discarding stale ask result");
            return Completion::discarded();
        }

        let (state, completion) = match outcome {
            Ok(response) => {
                let answer = Answer::from_response(response.answer);
                if answer == Answer::Empty {
                    warn!(seq, "ask returned no answer");
                }
                (ExchangeState::Answered(answer), Completion::applied(None))
            }
            Err(failure) => {
                warn!(seq, error = %failure, "ask failed");
                (
                    ExchangeState::Failed(failure.clone()),
                    Completion::rejected(failure, "Error"),
                )
            }
        };
        if let Some(exchange) = &mut self.exchange {
            exchange.state = state;
        }
        completion
    }

    // ---- upload ----

    pub fn begin_upload(
        &mut self,
        display_name: &str,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Issued<UploadTicket> {
        let display_name = match display_name.trim() {
            "" => file_name.clone(),
            name => name.to_string(),
        };
        let ticket = self.sequencer.issue(QaAction::Upload);
        debug!(%file_name, size = bytes.len(), seq = ticket.seq(), "issuing upload");
        Issued {
            request: ApiRequest::upload_pdf(UploadForm {
                display_name,
                file_name: file_name.clone(),
                bytes,
            }),
            ticket: UploadTicket { ticket, file_name },
        }
    }

    pub fn finish_upload(&mut self, ticket: UploadTicket, outcome: Outcome<()>) -> Completion {
        let UploadTicket { ticket, file_name } = ticket;
        if !self.sequencer.settle(ticket) {
            debug!(%file_name, "discarding stale upload result");
            return Completion::discarded();
        }

        match outcome {
            Ok(()) => {
                info!(%file_name, "pdf uploaded");
                self.file_input.clear();
                Completion::applied(Some(Notice::success("File uploaded successfully")))
            }
            Err(failure) => {
                warn!(%file_name, error = %failure, "upload failed");
                Completion::rejected(failure, "Error uploading file")
            }
        }
    }

    // ---- delete ----

    pub fn begin_delete_pdf(&mut self, id: PdfId) -> Issued<DeletePdfTicket> {
        let ticket = self.sequencer.issue(QaAction::DeletePdf(id.clone()));
        debug!(pdf_id = %id, seq = ticket.seq(), "issuing delete_pdf");
        Issued {
            request: ApiRequest::delete_pdf(&id),
            ticket: DeletePdfTicket { ticket, id },
        }
    }

    pub fn finish_delete_pdf(&mut self, ticket: DeletePdfTicket, outcome: Outcome<()>) -> Completion {
        let DeletePdfTicket { ticket, id } = ticket;
        if !self.sequencer.settle(ticket) {
            debug!(pdf_id = %id, "discarding stale delete_pdf result");
            return Completion::discarded();
        }

        match outcome {
            Ok(()) => {
                info!(pdf_id = %id, "pdf deleted");
                if self.selection.as_ref().map(|s| &s.id) == Some(&id) {
                    self.selection = None;
                    self.exchange = None;
                }
                Completion::applied(Some(Notice::success("File deleted successfully")))
            }
            Err(failure) => {
                warn!(pdf_id = %id, error = %failure, "delete_pdf failed");
                Completion::rejected(failure, "Error deleting file")
            }
        }
    }
}

impl Default for PdfQa {
    fn default() -> Self {
        Self::new(ModelForm::default())
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Clone)]
pub struct PdfQaController {
    state: Arc<Mutex<PdfQa>>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    view: ViewBus,
}

impl PdfQaController {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        view: ViewBus,
        form: ModelForm,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PdfQa::new(form))),
            transport,
            notifier,
            view,
        }
    }

    pub async fn snapshot(&self) -> QaSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn update_form(&self, edit: impl FnOnce(&mut ModelForm)) {
        edit(self.state.lock().await.form_mut());
        self.publish().await;
    }

    pub async fn select_pdf(&self, id: PdfId) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_select(id);
            self.view.publish(ViewEvent::Qa(state.snapshot()));
            issued
        };
        let outcome = normalize_envelope(self.transport.send(issued.request).await);
        let ticket = issued.ticket;
        self.apply(|s| s.finish_select(ticket, outcome)).await.settled
    }

    /// Asks with an explicit configuration.
    pub async fn ask(&self, question: &str, config: ModelConfig) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_ask(question, config);
            if issued.is_ok() {
                self.view.publish(ViewEvent::Qa(state.snapshot()));
            }
            issued
        };
        let issued = match issued {
            Ok(issued) => issued,
            Err(failure) => return self.reject(failure),
        };
        let outcome = normalize_envelope(self.transport.send(issued.request).await);
        let ticket = issued.ticket;
        self.apply(|s| s.finish_ask(ticket, outcome)).await.settled
    }

    /// Asks with whatever the model form holds right now.
    pub async fn submit_question(&self, question: &str) -> Settled {
        let config = self.state.lock().await.form().snapshot();
        self.ask(question, config).await
    }

    /// A rejected choice clears the input and raises a blocking alert.
    pub async fn choose_file(&self, path: PathBuf) -> Result<(), ValidationError> {
        let chosen = self.state.lock().await.choose_file(path);
        if let Err(e) = &chosen {
            warn!(error = %e, "file choice rejected");
            self.view.publish(ViewEvent::Alert(e.to_string()));
        }
        self.publish().await;
        chosen
    }

    /// Uploads the chosen file under `display_name` (the file name when blank).
    pub async fn upload(&self, display_name: &str) -> Settled {
        let chosen = self.state.lock().await.file_input().chosen().map(Path::to_path_buf);
        let Some(path) = chosen else {
            return self.reject(ValidationError::NoFileChosen.into());
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self.reject(
                    ValidationError::Unreadable {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    }
                    .into(),
                )
            }
        };

        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_upload(display_name, file_name_of(&path), bytes);
            self.view.publish(ViewEvent::Qa(state.snapshot()));
            issued
        };
        let outcome = normalize_page(self.transport.send(issued.request).await).map(|_| ());
        let ticket = issued.ticket;
        self.apply(|s| s.finish_upload(ticket, outcome)).await.settled
    }

    /// Chooses `path` and uploads it. A non-PDF name never reaches the server.
    pub async fn upload_pdf(&self, display_name: &str, path: PathBuf) -> Settled {
        if let Err(e) = self.choose_file(path).await {
            return Settled::Rejected(e.into());
        }
        self.upload(display_name).await
    }

    pub async fn delete_pdf(&self, id: PdfId) -> Settled {
        let issued = {
            let mut state = self.state.lock().await;
            let issued = state.begin_delete_pdf(id);
            self.view.publish(ViewEvent::Qa(state.snapshot()));
            issued
        };
        let outcome = normalize_page(self.transport.send(issued.request).await).map(|_| ());
        let ticket = issued.ticket;
        self.apply(|s| s.finish_delete_pdf(ticket, outcome)).await.settled
    }

    /// Notifies a failure raised before any request went out.
    fn reject(&self, failure: Failure) -> Settled {
        let completion = Completion::rejected(failure, "Error");
        if let Some(notice) = &completion.notice {
            self.notifier.notify(&notice.message, notice.severity);
        }
        completion.settled
    }

    async fn apply(&self, finish: impl FnOnce(&mut PdfQa) -> Completion) -> Completion {
        let (completion, snapshot) = {
            let mut state = self.state.lock().await;
            let completion = finish(&mut *state);
            (completion, state.snapshot())
        };
        if let Some(notice) = &completion.notice {
            self.notifier.notify(&notice.message, notice.severity);
        }
        self.view.publish(ViewEvent::Qa(snapshot));
        completion
    }

    async fn publish(&self) {
        let snapshot = self.state.lock().await.snapshot();
        self.view.publish(ViewEvent::Qa(snapshot));
    }
}
