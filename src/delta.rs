//! Structured note content and its rendered-markup snapshot.
//!
//! A note body travels in two forms: the canonical delta (an ordered list of
//! rich-text operations, serialized as JSON text) and a derived HTML snapshot
//! that is only used when the delta cannot be parsed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// Delta
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub ops: Vec<DeltaOp>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<Insert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// Inserted text, or an embed such as `{"image": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Insert {
    Text(String),
    Embed(Map<String, Value>),
}

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("content is missing")]
    Missing,
    #[error("content is not valid delta JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("operation {index} has no insert, retain or delete")]
    EmptyOp { index: usize },
}

impl Delta {
    /// A delta holding a single text insert.
    pub fn from_text(text: &str) -> Self {
        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Self {
            ops: vec![DeltaOp::text(text)],
        }
    }

    /// Parses transported delta text. Both the `{"ops": [...]}` form and a
    /// bare operation array are accepted.
    pub fn parse(raw: &str) -> Result<Self, DeltaError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Stored {
            Wrapped(Delta),
            Bare(Vec<DeltaOp>),
        }

        let delta = match serde_json::from_str::<Stored>(raw) {
            Ok(Stored::Wrapped(d)) => d,
            Ok(Stored::Bare(ops)) => Delta { ops },
            // Reparse as the wrapped form for a useful error message.
            Err(_) => serde_json::from_str::<Delta>(raw)?,
        };

        for (index, op) in delta.ops.iter().enumerate() {
            if op.insert.is_none() && op.retain.is_none() && op.delete.is_none() {
                return Err(DeltaError::EmptyOp { index });
            }
        }
        Ok(delta)
    }

    /// Transport form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "delta serialization failed, sending empty content");
            String::from("{\"ops\":[]}")
        })
    }

    pub fn plain_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match &op.insert {
                Some(Insert::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_blank(&self) -> bool {
        self.plain_text().trim().is_empty()
            && !self
                .ops
                .iter()
                .any(|op| matches!(op.insert, Some(Insert::Embed(_))))
    }

    /// Derived HTML snapshot of the document.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        let mut line = String::new();
        let mut open_list: Option<&'static str> = None;

        for op in &self.ops {
            match &op.insert {
                Some(Insert::Text(text)) => {
                    let parts: Vec<&str> = text.split('\n').collect();
                    for (i, part) in parts.iter().enumerate() {
                        if !part.is_empty() {
                            line.push_str(&render_inline(part, &op.attributes));
                        }
                        // Every newline closes a line; its attributes format the line.
                        if i + 1 < parts.len() {
                            flush_line(&mut out, &mut line, &op.attributes, &mut open_list);
                        }
                    }
                }
                Some(Insert::Embed(embed)) => line.push_str(&render_embed(embed)),
                None => {}
            }
        }

        if !line.is_empty() {
            flush_line(&mut out, &mut line, &Map::new(), &mut open_list);
        }
        if let Some(tag) = open_list {
            out.push_str(&format!("</{}>", tag));
        }
        if out.is_empty() {
            out.push_str("<p><br></p>");
        }
        out
    }
}

impl DeltaOp {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            insert: Some(Insert::Text(text.into())),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

fn flush_line(
    out: &mut String,
    line: &mut String,
    attrs: &Map<String, Value>,
    open_list: &mut Option<&'static str>,
) {
    let body = if line.is_empty() {
        String::from("<br>")
    } else {
        std::mem::take(line)
    };

    let list = attrs.get("list").and_then(Value::as_str).map(|kind| {
        if kind == "ordered" {
            "ol"
        } else {
            "ul"
        }
    });
    if *open_list != list {
        if let Some(tag) = open_list.take() {
            out.push_str(&format!("</{}>", tag));
        }
        if let Some(tag) = list {
            out.push_str(&format!("<{}>", tag));
        }
        *open_list = list;
    }

    let header = attrs
        .get("header")
        .and_then(Value::as_u64)
        .filter(|n| (1..=6).contains(n));

    if list.is_some() {
        out.push_str(&format!("<li>{}</li>", body));
    } else if let Some(n) = header {
        out.push_str(&format!("<h{n}>{}</h{n}>", body));
    } else if is_set(attrs, "code-block") {
        out.push_str(&format!("<pre>{}</pre>", body));
    } else if is_set(attrs, "blockquote") {
        out.push_str(&format!("<blockquote>{}</blockquote>", body));
    } else {
        out.push_str(&format!("<p>{}</p>", body));
    }
}

fn is_set(attrs: &Map<String, Value>, name: &str) -> bool {
    match attrs.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn render_inline(text: &str, attrs: &Map<String, Value>) -> String {
    let mut html = html_escape(text);
    for (name, tag) in [
        ("code", "code"),
        ("bold", "strong"),
        ("italic", "em"),
        ("underline", "u"),
        ("strike", "s"),
    ] {
        if is_set(attrs, name) {
            html = format!("<{tag}>{html}</{tag}>");
        }
    }
    if let Some(href) = attrs.get("link").and_then(Value::as_str) {
        html = format!("<a href=\"{}\">{}</a>", html_escape(href), html);
    }
    html
}

fn render_embed(embed: &Map<String, Value>) -> String {
    match embed.get("image").and_then(Value::as_str) {
        Some(src) => format!("<img src=\"{}\">", html_escape(src)),
        None => String::new(),
    }
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn html_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

// ============================================================================
// Editor Content
// ============================================================================

/// What the editor surface currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorContent {
    Structured(Delta),
    /// Sanitized markup shown when the stored delta could not be parsed.
    Markup(String),
}

impl Default for EditorContent {
    fn default() -> Self {
        EditorContent::Structured(Delta::default())
    }
}

impl EditorContent {
    pub fn from_markup(html: &str) -> Self {
        EditorContent::Markup(ammonia::clean(html))
    }

    pub fn to_delta(&self) -> Delta {
        match self {
            EditorContent::Structured(delta) => delta.clone(),
            EditorContent::Markup(html) => Delta::from_text(&markup_text(html)),
        }
    }

    pub fn to_html(&self) -> String {
        match self {
            EditorContent::Structured(delta) => delta.to_html(),
            EditorContent::Markup(html) => html.clone(),
        }
    }

    pub fn plain_text(&self) -> String {
        match self {
            EditorContent::Structured(delta) => delta.plain_text(),
            EditorContent::Markup(html) => markup_text(html),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            EditorContent::Structured(delta) => delta.is_blank(),
            EditorContent::Markup(html) => markup_text(html).trim().is_empty(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, EditorContent::Structured(_))
    }
}

/// Text content of a markup snapshot, one line per block.
fn markup_text(html: &str) -> String {
    let spaced = html
        .replace("<br>", "\n")
        .replace("</p>", "</p>\n")
        .replace("</li>", "</li>\n")
        .replace("</pre>", "</pre>\n");
    let stripped = ammonia::Builder::empty().clean(&spaced).to_string();
    html_unescape(&stripped)
}
