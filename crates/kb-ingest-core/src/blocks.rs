//! Text layout of an article's `raw_text`.
//!
//! # Chat articles
//!
//! An append-only sequence of blocks separated by a blank line:
//!
//! ```text
//! --- Thread Reply from Ann on 10 Nov. ---
//! Message: first line
//!   continuation line
//! _attachments_json: [{"name":"a.png","url":"https://f/a.png","type":"image/png","size":42}]
//! Attachments: a.png: https://f/a.png
//! _msg_date: 2025-11-10
//! _msg_hash: 3f2a...
//! ```
//!
//! Lines starting with `_` are machine markers. Message continuation lines
//! are indented by two spaces so a marker never appears at the start of a
//! line of message text.
//!
//! # Document articles
//!
//! A fixed header followed by a blank line and the page body:
//!
//! ```text
//! URL: https://wiki/spaces/ENG/pages/42
//! PAGE_TITLE: Runbook
//! PAGE_ID: 42
//! PAGE_VERSION: 3
//! PAGE_VERSION_DATE: 2025-11-10T09:00:00+00:00
//!
//! body...
//! ```

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{Attachment, Fingerprint, NormalizedPage, NormalizedUnit};

/// Separator between consecutive chat blocks.
pub const BLOCK_SEPARATOR: &str = "\n\n";

const HASH_MARKER: &str = "_msg_hash: ";
const DATE_MARKER: &str = "_msg_date: ";
const ATTACHMENTS_MARKER: &str = "_attachments_json: ";
const MESSAGE_PREFIX: &str = "Message: ";
const CONTINUATION: &str = "  ";

/// `10 Nov.` style date used in titles and block headers.
pub fn readable_date(date: NaiveDate) -> String {
    format!("{} {}.", date.format("%-d"), date.format("%b"))
}

/// Render one chat unit as a block.
pub fn format_chat_block(unit: &NormalizedUnit) -> String {
    let date = unit.timestamp.date_naive();
    let kind = if unit.is_reply() {
        "Thread Reply"
    } else {
        "Message"
    };
    let mut parts = vec![format!(
        "--- {} from {} on {} ---",
        kind,
        unit.sender,
        readable_date(date)
    )];

    let mut lines = unit.text.lines();
    let first = lines.next().unwrap_or("");
    let mut message = format!("{}{}", MESSAGE_PREFIX, first);
    for line in lines {
        message.push('\n');
        message.push_str(CONTINUATION);
        message.push_str(line);
    }
    parts.push(message);

    if !unit.attachments.is_empty() {
        let json = serde_json::to_string(&unit.attachments).unwrap_or_else(|_| "[]".to_string());
        parts.push(format!("{}{}", ATTACHMENTS_MARKER, json));
        let listing: Vec<String> = unit
            .attachments
            .iter()
            .map(|a| format!("{}: {}", a.name, a.url))
            .collect();
        parts.push(format!("Attachments: {}", listing.join("; ")));
    }

    parts.push(format!("{}{}", DATE_MARKER, date.format("%Y-%m-%d")));
    parts.push(format!("{}{}", HASH_MARKER, unit.fingerprint));
    parts.join("\n")
}

/// Join rendered blocks into one `raw_text` fragment.
pub fn join_blocks(blocks: &[String]) -> String {
    blocks.join(BLOCK_SEPARATOR)
}

/// Every content fingerprint recorded in a chat article's `raw_text`.
pub fn fingerprints_in(raw_text: &str) -> HashSet<Fingerprint> {
    raw_text
        .lines()
        .filter_map(|line| line.strip_prefix(HASH_MARKER))
        .map(|hash| Fingerprint(hash.trim().to_string()))
        .filter(|fp| !fp.0.is_empty())
        .collect()
}

/// A chat block read back from `raw_text`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock {
    pub header: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub date: Option<NaiveDate>,
    pub fingerprint: Option<Fingerprint>,
}

/// Split a chat article's `raw_text` back into blocks.
///
/// Malformed attachment markers yield an empty attachment list for that
/// block; unrecognized lines are ignored.
pub fn parse_chat_blocks(raw_text: &str) -> Vec<ParsedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<ParsedBlock> = None;
    let mut in_message = false;

    for line in raw_text.lines() {
        if line.starts_with("--- ") && line.ends_with(" ---") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(ParsedBlock {
                header: line.to_string(),
                text: String::new(),
                attachments: Vec::new(),
                date: None,
                fingerprint: None,
            });
            in_message = false;
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix(MESSAGE_PREFIX) {
            block.text = rest.to_string();
            in_message = true;
        } else if in_message && line.starts_with(CONTINUATION) {
            block.text.push('\n');
            block.text.push_str(&line[CONTINUATION.len()..]);
        } else {
            in_message = false;
            if let Some(json) = line.strip_prefix(ATTACHMENTS_MARKER) {
                block.attachments = serde_json::from_str(json).unwrap_or_default();
            } else if let Some(date) = line.strip_prefix(DATE_MARKER) {
                block.date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok();
            } else if let Some(hash) = line.strip_prefix(HASH_MARKER) {
                block.fingerprint = Some(Fingerprint(hash.trim().to_string()));
            }
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

/// Metadata embedded at the top of a document article's `raw_text`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentHeader {
    pub url: Option<String>,
    pub title: String,
    pub page_id: String,
    pub version: Option<i64>,
    pub version_date: Option<DateTime<Utc>>,
}

/// Render a page as a document article's `raw_text`.
pub fn format_document(page: &NormalizedPage) -> String {
    format!(
        "URL: {}\nPAGE_TITLE: {}\nPAGE_ID: {}\nPAGE_VERSION: {}\nPAGE_VERSION_DATE: {}\n\n{}",
        page.url.as_deref().unwrap_or(""),
        page.title,
        page.page_id,
        page.version.map(|v| v.to_string()).unwrap_or_default(),
        page.modified_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
        page.text
    )
}

/// Read the header of a document article's `raw_text`. Returns `None`
/// when no `PAGE_ID` line is present.
pub fn parse_document_header(raw_text: &str) -> Option<DocumentHeader> {
    let mut header = DocumentHeader::default();
    for line in raw_text.lines() {
        if line.is_empty() {
            break;
        }
        let Some((field, value)) = line.split_once(": ").or_else(|| {
            line.strip_suffix(':').map(|field| (field, ""))
        }) else {
            continue;
        };
        let value = value.trim();
        match field {
            "URL" if !value.is_empty() => header.url = Some(value.to_string()),
            "PAGE_TITLE" => header.title = value.to_string(),
            "PAGE_ID" => header.page_id = value.to_string(),
            "PAGE_VERSION" => header.version = value.parse().ok(),
            "PAGE_VERSION_DATE" => {
                header.version_date = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
            _ => {}
        }
    }
    if header.page_id.is_empty() {
        None
    } else {
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use chrono::TimeZone;

    fn unit(text: &str, attachments: Vec<Attachment>, reply: bool) -> NormalizedUnit {
        NormalizedUnit {
            source_id: "2.0".to_string(),
            channel: "eng".to_string(),
            text: text.to_string(),
            sender: "Ann".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 11, 10, 9, 30, 0).unwrap(),
            thread_anchor_id: reply.then(|| "1.0".to_string()),
            fingerprint: fingerprint(text, &attachments),
            attachments,
        }
    }

    #[test]
    fn readable_dates() {
        let d = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        assert_eq!(readable_date(d), "10 Nov.");
        let d = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(readable_date(d), "4 Mar.");
    }

    #[test]
    fn block_layout() {
        let att = Attachment {
            name: "a.png".to_string(),
            url: "https://f/a.png".to_string(),
            content_type: "image/png".to_string(),
            size: 42,
        };
        let u = unit("pending approval\n_not a marker", vec![att.clone()], true);
        let block = format_chat_block(&u);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "--- Thread Reply from Ann on 10 Nov. ---");
        assert_eq!(lines[1], "Message: pending approval");
        assert_eq!(lines[2], "  _not a marker");
        assert!(lines[3].starts_with("_attachments_json: "));
        assert_eq!(lines[4], "Attachments: a.png: https://f/a.png");
        assert_eq!(lines[5], "_msg_date: 2025-11-10");
        assert_eq!(lines[6], format!("_msg_hash: {}", u.fingerprint));

        let parsed = parse_chat_blocks(&block);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "pending approval\n_not a marker");
        assert_eq!(parsed[0].attachments, vec![att]);
        assert_eq!(parsed[0].fingerprint.as_ref(), Some(&u.fingerprint));
    }

    #[test]
    fn fingerprints_across_blocks() {
        let a = unit("first", vec![], false);
        let b = unit("second", vec![], true);
        let raw = join_blocks(&[format_chat_block(&a), format_chat_block(&b)]);
        let fps = fingerprints_in(&raw);
        assert_eq!(fps.len(), 2);
        assert!(fps.contains(&a.fingerprint));
        assert!(fps.contains(&b.fingerprint));
        assert_eq!(parse_chat_blocks(&raw).len(), 2);
    }

    #[test]
    fn malformed_attachment_marker_degrades() {
        let raw = "--- Message from Ann on 10 Nov. ---\nMessage: hi\n_attachments_json: [{broken\n_msg_hash: abc";
        let parsed = parse_chat_blocks(raw);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].attachments.is_empty());
        assert_eq!(parsed[0].fingerprint, Some(Fingerprint("abc".to_string())));
    }

    #[test]
    fn document_header_round_trip() {
        let page = NormalizedPage {
            page_id: "42".to_string(),
            title: "Runbook".to_string(),
            text: "Step one\nStep two".to_string(),
            author: None,
            version: Some(3),
            modified_at: Some(Utc.with_ymd_and_hms(2025, 11, 10, 9, 0, 0).unwrap()),
            url: Some("https://wiki/pages/42".to_string()),
            space_key: "ENG".to_string(),
        };
        let raw = format_document(&page);
        assert!(raw.ends_with("\n\nStep one\nStep two"));
        let header = parse_document_header(&raw).unwrap();
        assert_eq!(header.page_id, "42");
        assert_eq!(header.version, Some(3));
        assert_eq!(header.version_date, page.modified_at);
        assert_eq!(header.url.as_deref(), Some("https://wiki/pages/42"));
    }

    #[test]
    fn document_header_without_version() {
        let raw = "URL: \nPAGE_TITLE: T\nPAGE_ID: 7\nPAGE_VERSION: \nPAGE_VERSION_DATE: \n\nbody";
        let header = parse_document_header(raw).unwrap();
        assert_eq!(header.page_id, "7");
        assert_eq!(header.version, None);
        assert_eq!(header.url, None);
        assert!(parse_document_header("just text").is_none());
    }
}
