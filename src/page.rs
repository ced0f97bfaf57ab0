//! Server-rendered pages.
//!
//! The redirecting endpoints (`/upload`, `/delete_pdf/{id}`) and the note
//! listing answer with HTML. The client reads two things out of that markup:
//! the flash alerts the server queued for this response, and the note list
//! items (`.note-item[data-id]` with an `<h6>` title and a `<small>` date).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tracing::debug;

use crate::models::{NoteId, NoteListEntry};
use crate::notify::Flash;
use crate::LOADED_NOTE_FALLBACK_TITLE;

/// A rendered page, reached after any redirects.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Path of the URL that finally answered.
    pub path: String,
    pub html: String,
}

impl Page {
    pub fn new(path: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            html: html.into(),
        }
    }

    /// The server sent us to its login form: no valid session.
    pub fn is_login(&self) -> bool {
        self.path.trim_end_matches('/').ends_with("/login")
    }

    pub fn flashes(&self) -> Vec<Flash> {
        parse_flashes(&self.html)
    }

    pub fn note_listing(&self) -> Vec<NoteListEntry> {
        parse_note_listing(&self.html)
    }
}

// ============================================================================
// Flash Alerts
// ============================================================================

/// Flash alerts in document order. The category is the `alert-*` class
/// (`alert-danger`, `alert-success`, ...).
pub fn parse_flashes(html: &str) -> Vec<Flash> {
    let pattern = r#"(?s)<div\b[^>]*\bclass="([^"]*\balert\b[^"]*)"[^>]*>(.*?)</div>"#;
    let Ok(re) = Regex::new(pattern) else {
        return Vec::new();
    };

    re.captures_iter(html)
        .filter_map(|caps| {
            let category = caps[1]
                .split_whitespace()
                .filter_map(|class| class.strip_prefix("alert-"))
                .find(|class| *class != "dismissible")?;
            let message = text_of(&caps[2]);
            if message.is_empty() {
                return None;
            }
            Some(Flash::new(category, message))
        })
        .collect()
}

// ============================================================================
// Note Listing
// ============================================================================

/// Note list items in document order. Items without an id are skipped.
pub fn parse_note_listing(html: &str) -> Vec<NoteListEntry> {
    let (Ok(item_re), Ok(id_re), Ok(title_re), Ok(date_re)) = (
        Regex::new(r#"<[a-zA-Z]+\b[^>]*\bclass="[^"]*\bnote-item\b[^"]*"[^>]*>"#),
        Regex::new(r#"\bdata-id="([^"]*)""#),
        Regex::new(r"(?s)<h6\b[^>]*>(.*?)</h6>"),
        Regex::new(r"(?s)<small\b[^>]*>(.*?)</small>"),
    ) else {
        return Vec::new();
    };

    let items: Vec<_> = item_re.find_iter(html).collect();
    let mut entries = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let Some(id) = id_re
            .captures(item.as_str())
            .map(|caps| html_unescape(&caps[1]))
            .filter(|id| !id.is_empty())
        else {
            debug!(tag = item.as_str(), "note item without an id");
            continue;
        };

        let end = items.get(index + 1).map(|next| next.start()).unwrap_or(html.len());
        let body = &html[item.end()..end];

        let title = title_re
            .captures(body)
            .map(|caps| text_of(&caps[1]))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| LOADED_NOTE_FALLBACK_TITLE.to_string());
        let raw_date = date_re
            .captures(body)
            .map(|caps| text_of(&caps[1]))
            .unwrap_or_default();
        let last_modified = parse_listing_date(&raw_date).unwrap_or_else(|| {
            debug!(note_id = %id, date = %raw_date, "unreadable listing date");
            Utc::now()
        });

        entries.push(NoteListEntry::new(NoteId::new(id), title, last_modified));
    }
    entries
}

/// Listing dates are either RFC 3339 or the database's UTC
/// `YYYY-MM-DD HH:MM[:SS]` form.
pub fn parse_listing_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// ============================================================================
// Text Helpers
// ============================================================================

/// Visible text of a fragment: buttons dropped, tags stripped, entities
/// decoded, whitespace collapsed.
fn text_of(fragment: &str) -> String {
    let mut text = fragment.to_string();
    if let Ok(re) = Regex::new(r"(?s)<button\b.*?</button>") {
        text = re.replace_all(&text, " ").into_owned();
    }
    if let Ok(re) = Regex::new(r"<[^>]*>") {
        text = re.replace_all(&text, " ").into_owned();
    }
    html_unescape(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn html_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
