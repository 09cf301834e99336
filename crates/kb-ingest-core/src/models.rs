//! Core data models used throughout kb-ingest.
//!
//! These types represent the units, threads, pages, and articles that flow
//! through the ingestion pipeline. Raw types are produced by source
//! adapters; normalized types are produced by [`crate::normalize`]; articles
//! are owned by a [`crate::store::KnowledgeStore`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which pipeline an article (or a unit of work) belongs to.
///
/// Chat-origin and document-origin articles are never merged with each
/// other, even when their content overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Chat,
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Chat => "chat",
            SourceKind::Document => "document",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(SourceKind::Chat),
            "document" | "docs" => Ok(SourceKind::Document),
            other => anyhow::bail!("Unknown source kind: '{}'. Must be chat or document.", other),
        }
    }
}

/// A chat message as returned by a chat adapter, before normalization.
///
/// `attachments` is passed through from the source untouched; the
/// normalizer decides which entries are usable.
#[derive(Debug, Clone)]
pub struct RawUnit {
    pub source_id: String,
    pub channel: String,
    pub text: String,
    pub sender: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub thread_anchor_id: Option<String>,
    pub attachments: Vec<serde_json::Value>,
}

/// A validated attachment reference. Always carries a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Stable content hash used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat message after markup stripping and attachment validation.
#[derive(Debug, Clone)]
pub struct NormalizedUnit {
    pub source_id: String,
    pub channel: String,
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub thread_anchor_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub fingerprint: Fingerprint,
}

impl NormalizedUnit {
    /// The thread this unit belongs to: its anchor, or itself when unanchored.
    pub fn thread_id(&self) -> &str {
        self.thread_anchor_id.as_deref().unwrap_or(&self.source_id)
    }

    pub fn is_reply(&self) -> bool {
        matches!(&self.thread_anchor_id, Some(anchor) if anchor != &self.source_id)
    }
}

/// A group of units sharing one thread anchor, sorted by timestamp.
///
/// Threads only exist for the duration of a run.
#[derive(Debug, Clone)]
pub struct Thread {
    pub thread_id: String,
    pub anchor_timestamp: DateTime<Utc>,
    pub units: Vec<NormalizedUnit>,
}

impl Thread {
    /// Calendar date (UTC) of the earliest unit in the thread.
    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor_timestamp.date_naive()
    }

    pub fn channel(&self) -> &str {
        self.units.first().map(|u| u.channel.as_str()).unwrap_or("")
    }
}

/// A wiki page as returned by a document adapter, before normalization.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub page_id: String,
    pub title: String,
    pub body_html: String,
    pub author: Option<String>,
    pub version: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub space_key: String,
}

/// A wiki page with its body reduced to plain text.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub page_id: String,
    pub title: String,
    pub text: String,
    pub author: Option<String>,
    pub version: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub space_key: String,
}

/// Identity of an article.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArticleKey {
    /// Keyword canonical form plus the thread's anchor date.
    Chat { keyword: String, anchor_date: NaiveDate },
    /// Stable page identifier supplied by the wiki.
    Document { page_id: String },
}

impl ArticleKey {
    pub fn source(&self) -> SourceKind {
        match self {
            ArticleKey::Chat { .. } => SourceKind::Chat,
            ArticleKey::Document { .. } => SourceKind::Document,
        }
    }

    /// Flat string form, unique per key. Stored alongside the article.
    pub fn storage_key(&self) -> String {
        match self {
            ArticleKey::Chat {
                keyword,
                anchor_date,
            } => format!("chat:{}:{}", keyword, anchor_date.format("%Y-%m-%d")),
            ArticleKey::Document { page_id } => format!("document:{}", page_id),
        }
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A persisted knowledge article.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub key_points: Vec<String>,
    pub decisions: Vec<String>,
    pub action_items: Vec<String>,
    pub raw_text: String,
    pub source: SourceKind,
    pub date: NaiveDate,
    pub project: String,
    pub sender_name: Option<String>,
    pub page_id: Option<String>,
    pub version: Option<i64>,
    pub version_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An article that has not been written yet. The store assigns the id and
/// timestamps on create.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub key: ArticleKey,
    pub title: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub key_points: Vec<String>,
    pub decisions: Vec<String>,
    pub action_items: Vec<String>,
    pub raw_text: String,
    pub date: NaiveDate,
    pub project: String,
    pub sender_name: Option<String>,
    pub page_id: Option<String>,
    pub version: Option<i64>,
    pub version_date: Option<DateTime<Utc>>,
}

/// A single all-or-nothing change to an existing article.
#[derive(Debug, Clone)]
pub enum ArticleMutation {
    /// Append formatted blocks to a chat article's `raw_text`. Never
    /// touches the summary.
    AppendBlocks { blocks: String },
    /// Overwrite a document article's content wholesale.
    ReplaceContent(DocumentRevision),
}

/// The fields a document replacement overwrites.
#[derive(Debug, Clone)]
pub struct DocumentRevision {
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub decisions: Vec<String>,
    pub action_items: Vec<String>,
    pub raw_text: String,
    pub date: NaiveDate,
    pub sender_name: Option<String>,
    pub version: Option<i64>,
    pub version_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn storage_key_formats() {
        let chat = ArticleKey::Chat {
            keyword: "pending approval".to_string(),
            anchor_date: NaiveDate::from_ymd_opt(2025, 11, 10).unwrap(),
        };
        assert_eq!(chat.storage_key(), "chat:pending approval:2025-11-10");
        let doc = ArticleKey::Document {
            page_id: "12345".to_string(),
        };
        assert_eq!(doc.storage_key(), "document:12345");
        assert_eq!(doc.source(), SourceKind::Document);
    }

    #[test]
    fn reply_detection() {
        let unit = NormalizedUnit {
            source_id: "2.0".to_string(),
            channel: "eng".to_string(),
            text: "hi".to_string(),
            sender: "Ann".to_string(),
            timestamp: Utc.timestamp_opt(2, 0).unwrap(),
            thread_anchor_id: Some("1.0".to_string()),
            attachments: vec![],
            fingerprint: Fingerprint("x".to_string()),
        };
        assert!(unit.is_reply());
        assert_eq!(unit.thread_id(), "1.0");

        let parent = NormalizedUnit {
            source_id: "1.0".to_string(),
            thread_anchor_id: Some("1.0".to_string()),
            ..unit
        };
        assert!(!parent.is_reply());
    }

    #[test]
    fn source_kind_round_trip() {
        assert_eq!("chat".parse::<SourceKind>().unwrap(), SourceKind::Chat);
        assert_eq!("docs".parse::<SourceKind>().unwrap(), SourceKind::Document);
        assert!("wiki".parse::<SourceKind>().is_err());
    }
}
