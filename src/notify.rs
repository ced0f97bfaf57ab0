//! Transient user notifications.
//!
//! [`Notifier`] is the single-method service the controllers talk to. The
//! default implementation, [`NotificationCenter`], keeps the visible toasts,
//! dismisses each one after a fixed interval, and lets the user dismiss them
//! early. Notifying never fails and is never awaited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::NOTIFICATION_TTL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Error,
    Info,
}

impl Severity {
    /// Maps a server flash category; unknown categories are informational.
    pub fn from_category(category: &str) -> Self {
        match category {
            "success" => Severity::Success,
            "error" | "danger" => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Error => "error",
            Severity::Info => "info",
        }
    }
}

/// A message a controller wants shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }
}

/// A flash message rendered into a server page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub category: String,
    pub message: String,
}

impl Flash {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::from_category(&self.category)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);

    /// Surfaces server-rendered flash messages through the same channel.
    fn adopt_flashes(&self, flashes: &[Flash]) {
        for flash in flashes {
            self.notify(&flash.message, flash.severity());
        }
    }
}

// ============================================================================
// Notification Center
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    Expired,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastEvent {
    Shown(Toast),
    Dismissed { id: u64, reason: DismissReason },
}

struct ActiveToast {
    toast: Toast,
    deadline: Instant,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    ttl: Duration,
    next_id: AtomicU64,
    toasts: Mutex<Vec<ActiveToast>>,
    events: broadcast::Sender<ToastEvent>,
}

impl Inner {
    fn toasts(&self) -> MutexGuard<'_, Vec<ActiveToast>> {
        self.toasts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes a toast if it is still visible. Returns whether it was.
    fn dismiss(&self, id: u64, reason: DismissReason) -> bool {
        let removed = {
            let mut toasts = self.toasts();
            toasts
                .iter()
                .position(|t| t.toast.id == id)
                .map(|index| toasts.remove(index))
        };
        match removed {
            Some(active) => {
                if reason == DismissReason::Manual {
                    if let Some(timer) = active.timer {
                        timer.abort();
                    }
                }
                let _ = self.events.send(ToastEvent::Dismissed { id, reason });
                true
            }
            None => false,
        }
    }
}

/// Session-wide notification surface. Cheap to clone.
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<Inner>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_ttl(NOTIFICATION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                ttl,
                next_id: AtomicU64::new(1),
                toasts: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.inner.events.subscribe()
    }

    /// Shows a toast and returns its id.
    pub fn show(&self, message: &str, severity: Severity) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let toast = Toast {
            id,
            message: message.to_string(),
            severity,
            raised_at: Utc::now(),
        };

        // Without a runtime there is no timer; the deadline still hides the
        // toast from `active()`.
        let timer = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let ttl = self.inner.ttl;
            handle.spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Some(inner) = weak.upgrade() {
                    inner.dismiss(id, DismissReason::Expired);
                }
            })
        });

        self.inner.toasts().push(ActiveToast {
            toast: toast.clone(),
            deadline: Instant::now() + self.inner.ttl,
            timer,
        });
        let _ = self.inner.events.send(ToastEvent::Shown(toast));
        id
    }

    /// Manual dismissal. Dismissing an id that is already gone is a no-op.
    pub fn dismiss(&self, id: u64) -> bool {
        self.inner.dismiss(id, DismissReason::Manual)
    }

    /// Toasts still visible, oldest first. Removal is left to the timers, so
    /// every expiry still reaches subscribers as `Dismissed`.
    pub fn active(&self) -> Vec<Toast> {
        let now = Instant::now();
        self.inner
            .toasts()
            .iter()
            .filter(|t| t.deadline > now)
            .map(|t| t.toast.clone())
            .collect()
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for NotificationCenter {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::warn!(%message, "notification"),
            Severity::Success | Severity::Info => tracing::info!(%message, "notification"),
        }
        self.show(message, severity);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for active in self.toasts.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            if let Some(timer) = active.timer {
                timer.abort();
            }
        }
    }
}
