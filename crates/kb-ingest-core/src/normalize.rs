//! Source-specific markup stripping.
//!
//! Turns [`RawUnit`]s and [`RawPage`]s into their normalized forms:
//!
//! - **Chat text**: broadcast mentions (`<!here>`, `<!channel>`,
//!   `<!everyone>`), user and group mentions (`<@U123>`, `<!subteam^S1>`)
//!   are removed; link wrappers keep their label (`<https://x|docs>` →
//!   `docs`) or their bare target (`<https://x>` → `https://x`).
//! - **Page bodies**: storage-format markup is stripped, each block-level
//!   element lands on its own line, CDATA payloads are kept.
//! - Both: HTML entities are decoded, runs of spaces collapse, and line
//!   structure is preserved.
//!
//! Attachments are validated into [`Attachment`]s. Entries without a URL,
//! and entries that are not objects, are dropped without failing the unit.

use std::sync::LazyLock;

use quick_xml::escape::{resolve_html5_entity, unescape_with};
use regex::Regex;
use serde_json::Value;

use crate::error::{IngestError, IngestResult};
use crate::fingerprint::fingerprint;
use crate::models::{Attachment, NormalizedPage, NormalizedUnit, RawPage, RawUnit};

static BROADCAST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!(?:here|channel|everyone)(?:\|[^>]*)?>").expect("valid regex")
});
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:@[A-Z0-9]+|!subteam\^[A-Z0-9]+)(?:\|[^>]*)?>").expect("valid regex")
});
static LABELLED_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>|\s]+\|([^<>]+)>").expect("valid regex"));
static BARE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<((?:https?|mailto):[^<>|\s]+)>").expect("valid regex"));
static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</?(?:p|div|li|h[1-6]|tr|pre|blockquote|table|ul|ol)(?:\s[^>]*)?>")
        .expect("valid regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static INLINE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));

/// Fallback sender label when the adapter could not resolve a name.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Normalize a chat unit.
///
/// Fails only when the unit has no usable identity or no content at all
/// (empty text and no attachments); the caller logs and skips those.
pub fn normalize_unit(raw: &RawUnit) -> IngestResult<NormalizedUnit> {
    if raw.source_id.trim().is_empty() {
        return Err(IngestError::MalformedUnit {
            source_id: String::new(),
            reason: "missing source id".to_string(),
        });
    }

    let text = clean_chat_text(&raw.text);
    let attachments = extract_attachments(&raw.attachments);
    if text.is_empty() && attachments.is_empty() {
        return Err(IngestError::MalformedUnit {
            source_id: raw.source_id.clone(),
            reason: "no text or attachments after cleaning".to_string(),
        });
    }

    let fingerprint = fingerprint(&text, &attachments);
    let sender = raw
        .sender
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SENDER)
        .to_string();

    Ok(NormalizedUnit {
        source_id: raw.source_id.clone(),
        channel: raw.channel.clone(),
        text,
        sender,
        timestamp: raw.timestamp,
        thread_anchor_id: raw.thread_anchor_id.clone(),
        attachments,
        fingerprint,
    })
}

/// Normalize a wiki page. Fails only when the page has no id.
pub fn normalize_page(raw: &RawPage) -> IngestResult<NormalizedPage> {
    if raw.page_id.trim().is_empty() {
        return Err(IngestError::MalformedUnit {
            source_id: String::new(),
            reason: format!("page '{}' has no id", raw.title),
        });
    }
    let title = decode_entities(raw.title.trim());
    Ok(NormalizedPage {
        page_id: raw.page_id.trim().to_string(),
        title: if title.is_empty() {
            "Untitled".to_string()
        } else {
            title
        },
        text: html_to_text(&raw.body_html),
        author: raw.author.clone(),
        version: raw.version,
        modified_at: raw.modified_at,
        url: raw.url.clone(),
        space_key: raw.space_key.clone(),
    })
}

/// Strip chat mention tokens and link wrappers, then decode entities.
pub fn clean_chat_text(text: &str) -> String {
    let text = BROADCAST_RE.replace_all(text, "");
    let text = MENTION_RE.replace_all(&text, "");
    let text = LABELLED_LINK_RE.replace_all(&text, "$1");
    let text = BARE_LINK_RE.replace_all(&text, "$1");
    tidy_lines(&decode_entities(&text), true)
}

/// Reduce storage-format markup to plain text with line structure intact.
pub fn html_to_text(html: &str) -> String {
    let text = html.replace("<![CDATA[", "").replace("]]>", "");
    let text = BLOCK_TAG_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    tidy_lines(&decode_entities(&text), false)
}

/// Decode HTML entities. Text with a broken entity is returned unchanged.
pub fn decode_entities(text: &str) -> String {
    match unescape_with(text, resolve_html5_entity) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Collapse inline whitespace and trim each line. Blank lines are squeezed
/// to one when `keep_blank` is set, dropped otherwise.
fn tidy_lines(text: &str, keep_blank: bool) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut blank_run = false;
    for line in text.lines() {
        let line = INLINE_SPACE_RE.replace_all(line, " ");
        let line = line.trim();
        if line.is_empty() {
            blank_run = keep_blank && !out.is_empty();
            continue;
        }
        if blank_run {
            out.push(String::new());
            blank_run = false;
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

/// Lowercased, formatting-free form of `text` used for matching and hashing.
///
/// Emphasis characters (`` ` `` `*` `_` `~`) become spaces and all
/// whitespace (including newlines) collapses to single spaces.
pub fn normalize_for_match(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| match c {
            '`' | '*' | '_' | '~' => ' ',
            other => other,
        })
        .collect();
    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Validate raw attachment entries.
///
/// The URL is taken from `url_private`, then `permalink`, then `url`.
pub fn extract_attachments(raw: &[Value]) -> Vec<Attachment> {
    raw.iter().filter_map(attachment_from_value).collect()
}

fn attachment_from_value(value: &Value) -> Option<Attachment> {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            tracing::warn!("Dropping attachment entry that is not an object");
            return None;
        }
    };

    let url = ["url_private", "permalink", "url"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|u| !u.is_empty())?;

    let name = ["name", "title"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .find(|n| !n.trim().is_empty())
        .unwrap_or("Unknown");

    let content_type = ["mimetype", "type"]
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .next()
        .unwrap_or("");

    Some(Attachment {
        name: name.to_string(),
        url: url.to_string(),
        content_type: content_type.to_string(),
        size: obj.get("size").and_then(Value::as_u64).unwrap_or(0),
    })
}
