//! Request sequencing and settlement.
//!
//! Each issued request gets a ticket carrying a monotonically increasing
//! sequence number. When a request settles, only the latest ticket issued for
//! its kind is applied; earlier completions are discarded. This keeps a slow,
//! older response from overwriting a newer one without any cancellation.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::Failure;
use crate::notify::Notice;
use crate::transport::ApiRequest;

/// Proof that a request of `kind` was issued. Not `Clone`: each ticket
/// settles exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Ticket<K> {
    kind: K,
    seq: u64,
}

impl<K> Ticket<K> {
    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug)]
pub struct Sequencer<K> {
    next: u64,
    latest: HashMap<K, u64>,
    outstanding: HashMap<K, usize>,
}

impl<K: Clone + Eq + Hash> Sequencer<K> {
    pub fn new() -> Self {
        Self {
            next: 0,
            latest: HashMap::new(),
            outstanding: HashMap::new(),
        }
    }

    pub fn issue(&mut self, kind: K) -> Ticket<K> {
        self.next += 1;
        self.latest.insert(kind.clone(), self.next);
        *self.outstanding.entry(kind.clone()).or_insert(0) += 1;
        Ticket {
            kind,
            seq: self.next,
        }
    }

    /// Marks the ticket's request as finished and reports whether it is
    /// still the latest of its kind.
    pub fn settle(&mut self, ticket: Ticket<K>) -> bool {
        let current = self.latest.get(&ticket.kind) == Some(&ticket.seq);
        let drained = match self.outstanding.get_mut(&ticket.kind) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        };
        if drained {
            self.outstanding.remove(&ticket.kind);
            self.latest.remove(&ticket.kind);
        }
        current
    }

    pub fn is_pending(&self, kind: &K) -> bool {
        self.outstanding.contains_key(kind)
    }

    pub fn any_pending(&self) -> bool {
        !self.outstanding.is_empty()
    }
}

impl<K: Clone + Eq + Hash> Default for Sequencer<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// How an issued request ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Applied,
    Rejected(Failure),
    /// A newer request of the same kind was issued; this result was dropped.
    Discarded,
}

impl Settled {
    pub fn is_applied(&self) -> bool {
        matches!(self, Settled::Applied)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Settled::Rejected(f) => Some(f),
            _ => None,
        }
    }
}

/// A request ready to send, with the ticket needed to apply its outcome.
#[derive(Debug)]
pub struct Issued<T> {
    pub ticket: T,
    pub request: ApiRequest,
}

/// Work a controller must start once a completion has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// The open note is gone; start a fresh one.
    CreateNote,
}

/// Result of applying one outcome to controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub settled: Settled,
    pub notice: Option<Notice>,
    pub follow_up: Option<FollowUp>,
}

impl Completion {
    pub fn discarded() -> Self {
        Self {
            settled: Settled::Discarded,
            notice: None,
            follow_up: None,
        }
    }

    pub fn applied(notice: Option<Notice>) -> Self {
        Self {
            settled: Settled::Applied,
            notice,
            follow_up: None,
        }
    }

    /// `action` prefixes the user-facing message, e.g. "Error saving note".
    pub fn rejected(failure: Failure, action: &str) -> Self {
        Self {
            notice: Some(Notice::error(failure.user_message(action))),
            settled: Settled::Rejected(failure),
            follow_up: None,
        }
    }

    pub fn then(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }
}
