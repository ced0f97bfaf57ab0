//! Document desk - a terminal front end for the note and PDF Q&A controllers.
//!
//! Commands are read line by line from stdin. State changes and notifications
//! arrive over broadcast channels and are printed as they happen.
//!
//! Configuration comes from the environment (`DOCDESK_BASE_URL`,
//! `DOCDESK_TIMEOUT_SECS`, `DOCDESK_SESSION_COOKIE`,
//! `DOCDESK_OLLAMA_API_BASE`); `DOCDESK_LOG` sets the log filter.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use docdesk::notify::{NotificationCenter, ToastEvent};
use docdesk::pdf_qa::{ModelForm, PdfQaController};
use docdesk::view::{render_confirm, render_notes, render_qa, render_toast, ViewBus, ViewEvent};
use docdesk::{ClientConfig, Delta, HttpTransport, ModelBackend, NoteEditorController, NoteId, PdfId, Transport};

const HELP: &str = "\
Notes:
  new                  start a new note
  title <text>         set the title of the open note
  write <text>         replace the note body (use \\n for line breaks)
  save                 save the open note
  open <id>            load a note
  delete <id>          delete a note (asks for confirmation)
  notes                show the note list and editor
PDF questions:
  select <id>          choose the PDF to ask about
  model <groq|ollama> [name]
  api-base <url>       address of the local model endpoint
  ask <question>       ask about the selected PDF
  choose <path>        choose a PDF file to upload
  upload [name]        upload the chosen file
  delete-pdf <id>      delete an uploaded PDF
  qa                   show the question panel
Other:
  toasts               list visible notifications
  dismiss <n>          dismiss a notification
  help, quit";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DOCDESK_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env().context("Invalid configuration")?;
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(&config).context("Failed to build HTTP client")?);
    tracing::info!(base_url = %config.base_url, "starting");

    let notifications = NotificationCenter::new();
    let view = ViewBus::new();
    spawn_renderers(&view, &notifications);

    let editor = NoteEditorController::new(
        transport.clone(),
        Arc::new(notifications.clone()),
        view.clone(),
        Vec::new(),
    );
    let qa = PdfQaController::new(
        transport,
        Arc::new(notifications.clone()),
        view.clone(),
        ModelForm::with_api_base(config.ollama_api_base.clone()),
    );

    println!("Connected to {}. Type `help` for commands.", config.base_url);
    // A failed listing is already notified; the session stays usable.
    let _ = editor.open().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_delete: Option<NoteId> = None;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        if let Some(id) = awaiting_delete.take() {
            match command {
                "yes" | "y" => {
                    editor.confirm_delete(&id).await;
                }
                _ => {
                    editor.cancel_delete(&id).await;
                    println!("Delete cancelled.");
                }
            }
            continue;
        }

        match command {
            "" => {}
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,

            "new" => {
                editor.create_new().await;
            }
            "title" => editor.set_title(rest).await,
            "write" => {
                editor
                    .set_content(Delta::from_text(&rest.replace("\\n", "\n")))
                    .await
            }
            "save" => {
                editor.save().await;
            }
            "open" if !rest.is_empty() => {
                editor.load(NoteId::new(rest)).await;
            }
            "delete" if !rest.is_empty() => {
                let id = NoteId::new(rest);
                editor.request_delete(id.clone()).await;
                awaiting_delete = Some(id);
            }
            "notes" => println!("{}", render_notes(&editor.snapshot().await)),

            "select" if !rest.is_empty() => {
                qa.select_pdf(PdfId::new(rest)).await;
            }
            "model" => {
                let (backend, name) = rest.split_once(' ').unwrap_or((rest, ""));
                match backend.parse::<ModelBackend>() {
                    Ok(backend) => {
                        let name = name.trim().to_string();
                        qa.update_form(|form| {
                            form.backend = backend;
                            if !name.is_empty() {
                                form.set_model_name(&name);
                            }
                        })
                        .await;
                        println!("Model: {}", qa.snapshot().await.model);
                    }
                    Err(e) => println!("{}", e),
                }
            }
            "api-base" if !rest.is_empty() => {
                let api_base = rest.to_string();
                qa.update_form(|form| form.local_api_base = api_base).await;
            }
            "ask" => {
                qa.submit_question(rest).await;
            }
            "choose" if !rest.is_empty() => {
                // Rejections are reported as an alert.
                let _ = qa.choose_file(PathBuf::from(rest)).await;
            }
            "upload" => {
                qa.upload(rest).await;
            }
            "delete-pdf" if !rest.is_empty() => {
                qa.delete_pdf(PdfId::new(rest)).await;
            }
            "qa" => println!("{}", render_qa(&qa.snapshot().await)),

            "toasts" => {
                for toast in notifications.active() {
                    println!("{:>3} {}", toast.id, render_toast(&toast));
                }
            }
            "dismiss" => match rest.parse::<u64>() {
                Ok(id) => {
                    notifications.dismiss(id);
                }
                Err(_) => println!("usage: dismiss <n>"),
            },

            other => println!("Unknown or incomplete command: {} (try `help`)", other),
        }
    }

    Ok(())
}

/// Prints state changes and notifications as they are published.
fn spawn_renderers(view: &ViewBus, notifications: &NotificationCenter) {
    let mut view_rx = view.subscribe();
    tokio::spawn(async move {
        loop {
            match view_rx.recv().await {
                Ok(ViewEvent::Notes(snapshot)) if !snapshot.pending => {
                    println!("{}", render_notes(&snapshot))
                }
                Ok(ViewEvent::Notes(_)) => {}
                Ok(ViewEvent::ConfirmDelete { id, title }) => {
                    println!("{}", render_confirm(&id, title.as_deref()))
                }
                Ok(ViewEvent::Qa(snapshot)) if snapshot.pending || !snapshot.busy => {
                    println!("{}", render_qa(&snapshot))
                }
                Ok(ViewEvent::Qa(_)) => {}
                Ok(ViewEvent::Alert(message)) => println!("!! {}", message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "view renderer fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut toast_rx = notifications.subscribe();
    tokio::spawn(async move {
        loop {
            match toast_rx.recv().await {
                Ok(ToastEvent::Shown(toast)) => println!("{}", render_toast(&toast)),
                Ok(ToastEvent::Dismissed { .. }) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}
