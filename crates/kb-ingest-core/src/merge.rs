//! Merge policy: what to do with a thread or page given what the store
//! already holds.
//!
//! The two sources follow different rules and each has its own outcome
//! type:
//!
//! | Path | Lookup | Condition | Outcome |
//! |------|--------|-----------|---------|
//! | chat | not found | | [`ChatMergeOutcome::Create`] |
//! | chat | found | some unit's fingerprint is new | [`ChatMergeOutcome::Append`] |
//! | chat | found | every fingerprint already stored | [`ChatMergeOutcome::Skip`] |
//! | document | not found | | [`DocumentMergeOutcome::Insert`] |
//! | document | found | incoming revision is newer | [`DocumentMergeOutcome::Replace`] |
//! | document | found | otherwise | [`DocumentMergeOutcome::Skip`] |
//!
//! Chat summaries are computed once, at creation, and appends never carry
//! a summary. Document summaries are recomputed on every insert and
//! replace. The summarizer is consulted only for those three cases; when it
//! yields nothing the preview-words fallback is used.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};

use crate::blocks::{
    fingerprints_in, format_chat_block, format_document, join_blocks, parse_document_header,
    readable_date,
};
use crate::keyword::Keyword;
use crate::models::{
    Article, ArticleKey, ArticleMutation, DocumentRevision, Fingerprint, NewArticle,
    NormalizedPage, NormalizedUnit, Thread,
};
use crate::resolve::Lookup;
use crate::summarize::{preview_words, to_markdown, Summarizer, Summary};

/// Words kept in a chat article's fallback summary.
pub const CHAT_PREVIEW_WORDS: usize = 3;
/// Words kept in a document article's fallback summary.
pub const DOCUMENT_PREVIEW_WORDS: usize = 30;

/// Why a unit of work produced no write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Every unit in the thread is already in the article.
    AlreadyPresent,
    /// The incoming page is not newer than the stored article.
    NotNewer,
}

/// A single store write.
#[derive(Debug, Clone)]
pub enum PlannedWrite {
    Create(NewArticle),
    Update {
        article_id: String,
        mutation: ArticleMutation,
    },
}

/// Outcome of merging one thread under one keyword.
#[derive(Debug, Clone)]
pub enum ChatMergeOutcome {
    Create(NewArticle),
    Append {
        article_id: String,
        key: ArticleKey,
        blocks: Vec<String>,
    },
    Skip {
        key: ArticleKey,
        reason: SkipReason,
    },
}

impl ChatMergeOutcome {
    pub fn key(&self) -> &ArticleKey {
        match self {
            ChatMergeOutcome::Create(new) => &new.key,
            ChatMergeOutcome::Append { key, .. } | ChatMergeOutcome::Skip { key, .. } => key,
        }
    }

    /// The write this outcome requires, if any.
    pub fn write(&self) -> Option<PlannedWrite> {
        match self {
            ChatMergeOutcome::Create(new) => Some(PlannedWrite::Create(new.clone())),
            ChatMergeOutcome::Append {
                article_id, blocks, ..
            } => Some(PlannedWrite::Update {
                article_id: article_id.clone(),
                mutation: ArticleMutation::AppendBlocks {
                    blocks: join_blocks(blocks),
                },
            }),
            ChatMergeOutcome::Skip { .. } => None,
        }
    }
}

/// Outcome of merging one wiki page.
#[derive(Debug, Clone)]
pub enum DocumentMergeOutcome {
    Insert(NewArticle),
    Replace {
        article_id: String,
        key: ArticleKey,
        previous_version: Option<i64>,
        revision: DocumentRevision,
    },
    Skip {
        key: ArticleKey,
        reason: SkipReason,
    },
}

impl DocumentMergeOutcome {
    pub fn key(&self) -> &ArticleKey {
        match self {
            DocumentMergeOutcome::Insert(new) => &new.key,
            DocumentMergeOutcome::Replace { key, .. } | DocumentMergeOutcome::Skip { key, .. } => {
                key
            }
        }
    }

    /// The write this outcome requires, if any.
    pub fn write(&self) -> Option<PlannedWrite> {
        match self {
            DocumentMergeOutcome::Insert(new) => Some(PlannedWrite::Create(new.clone())),
            DocumentMergeOutcome::Replace {
                article_id,
                revision,
                ..
            } => Some(PlannedWrite::Update {
                article_id: article_id.clone(),
                mutation: ArticleMutation::ReplaceContent(revision.clone()),
            }),
            DocumentMergeOutcome::Skip { .. } => None,
        }
    }
}

/// Merge a thread filed under `keyword`.
///
/// `trigger` is the unit that matched the keyword; its text seeds the
/// fallback summary even when it is a reply rather than the anchor.
pub async fn merge_thread(
    thread: &Thread,
    keyword: &Keyword,
    trigger: &NormalizedUnit,
    key: ArticleKey,
    lookup: &Lookup,
    summarizer: &dyn Summarizer,
) -> ChatMergeOutcome {
    match lookup {
        Lookup::NotFound => {
            let blocks = new_blocks(&thread.units, &HashSet::new());
            let anchor_date = thread.anchor_date();
            let fallback = {
                let preview = preview_words(&trigger.text, CHAT_PREVIEW_WORDS);
                if preview.is_empty() {
                    format!("Chat messages about {}", keyword.display_form)
                } else {
                    preview
                }
            };
            let synopsis = summarizer
                .summarize(&keyword.display_form, &transcript(&thread.units), None)
                .await;
            let (summary, extras) = apply_summary(fallback, synopsis);

            ChatMergeOutcome::Create(NewArticle {
                key,
                title: format!("{} {}", keyword.display_form, readable_date(anchor_date)),
                summary,
                topics: vec![keyword.display_form.clone()],
                key_points: extras.key_points,
                decisions: extras.decisions,
                action_items: extras.action_items,
                raw_text: join_blocks(&blocks),
                date: anchor_date,
                project: thread.channel().to_string(),
                sender_name: Some(trigger.sender.clone()),
                page_id: None,
                version: None,
                version_date: None,
            })
        }
        Lookup::Found(article) => {
            let stored = fingerprints_in(&article.raw_text);
            let blocks = new_blocks(&thread.units, &stored);
            if blocks.is_empty() {
                ChatMergeOutcome::Skip {
                    key,
                    reason: SkipReason::AlreadyPresent,
                }
            } else {
                ChatMergeOutcome::Append {
                    article_id: article.id.clone(),
                    key,
                    blocks,
                }
            }
        }
    }
}

/// Merge a wiki page.
pub async fn merge_page(
    page: &NormalizedPage,
    key: ArticleKey,
    lookup: &Lookup,
    summarizer: &dyn Summarizer,
) -> DocumentMergeOutcome {
    match lookup {
        Lookup::NotFound => {
            let content = document_content(page, None, summarizer).await;
            DocumentMergeOutcome::Insert(NewArticle {
                key,
                title: page.title.clone(),
                summary: content.summary,
                topics: Vec::new(),
                key_points: content.extras.key_points,
                decisions: content.extras.decisions,
                action_items: content.extras.action_items,
                raw_text: content.raw_text,
                date: content.date,
                project: page.space_key.clone(),
                sender_name: page.author.clone(),
                page_id: Some(page.page_id.clone()),
                version: page.version,
                version_date: page.modified_at,
            })
        }
        Lookup::Found(article) => {
            if !is_newer_revision(page, article) {
                return DocumentMergeOutcome::Skip {
                    key,
                    reason: SkipReason::NotNewer,
                };
            }
            let previous_version = stored_version(article);
            let content = document_content(page, Some(&article.summary), summarizer).await;
            DocumentMergeOutcome::Replace {
                article_id: article.id.clone(),
                key,
                previous_version,
                revision: DocumentRevision {
                    title: page.title.clone(),
                    summary: content.summary,
                    key_points: content.extras.key_points,
                    decisions: content.extras.decisions,
                    action_items: content.extras.action_items,
                    raw_text: content.raw_text,
                    date: content.date,
                    sender_name: page.author.clone().or_else(|| article.sender_name.clone()),
                    version: page.version.or(previous_version),
                    version_date: page.modified_at.or(article.version_date),
                },
            }
        }
    }
}

/// Whether `page` should replace the stored `article`.
///
/// Version numbers are compared when both sides have one. Otherwise
/// modification timestamps are compared when both sides have one.
/// Otherwise the page's modification date must be later than the
/// article's date, or the same day and later than the article's last
/// update. A page carrying neither a version nor a modification time is
/// never considered newer.
pub fn is_newer_revision(page: &NormalizedPage, article: &Article) -> bool {
    if let (Some(incoming), Some(stored)) = (page.version, stored_version(article)) {
        return incoming > stored;
    }
    let stored_modified = article.version_date.or_else(|| {
        parse_document_header(&article.raw_text).and_then(|h| h.version_date)
    });
    match (page.modified_at, stored_modified) {
        (Some(incoming), Some(stored)) => incoming > stored,
        (Some(incoming), None) => {
            let incoming_date = incoming.date_naive();
            incoming_date > article.date
                || (incoming_date == article.date && incoming > article.updated_at)
        }
        (None, _) => false,
    }
}

fn stored_version(article: &Article) -> Option<i64> {
    article
        .version
        .or_else(|| parse_document_header(&article.raw_text).and_then(|h| h.version))
}

/// Blocks for every unit whose fingerprint is neither in `stored` nor
/// repeated earlier in `units`.
fn new_blocks(units: &[NormalizedUnit], stored: &HashSet<Fingerprint>) -> Vec<String> {
    let mut seen = HashSet::new();
    units
        .iter()
        .filter(|u| !stored.contains(&u.fingerprint) && seen.insert(u.fingerprint.clone()))
        .map(format_chat_block)
        .collect()
}

/// Plain-text rendering of a thread handed to the summarizer.
pub fn transcript(units: &[NormalizedUnit]) -> String {
    let mut out = String::new();
    for unit in units {
        let kind = if unit.is_reply() {
            "Thread Reply"
        } else {
            "Message"
        };
        out.push_str(&format!(
            "[{}] {} ({}):\n{}\n\n",
            kind,
            unit.sender,
            unit.timestamp.format("%Y-%m-%d %H:%M"),
            unit.text
        ));
    }
    out
}

#[derive(Default)]
struct Extras {
    key_points: Vec<String>,
    decisions: Vec<String>,
    action_items: Vec<String>,
}

fn apply_summary(fallback: String, synopsis: Option<Summary>) -> (String, Extras) {
    match synopsis {
        Some(s) => {
            let rendered = to_markdown(&s);
            (
                rendered,
                Extras {
                    key_points: s.key_points,
                    decisions: s.decisions,
                    action_items: s.action_items,
                },
            )
        }
        None => (fallback, Extras::default()),
    }
}

struct DocumentContent {
    summary: String,
    extras: Extras,
    raw_text: String,
    date: NaiveDate,
}

async fn document_content(
    page: &NormalizedPage,
    previous_summary: Option<&str>,
    summarizer: &dyn Summarizer,
) -> DocumentContent {
    let fallback = {
        let preview = preview_words(&page.text, DOCUMENT_PREVIEW_WORDS);
        if preview.is_empty() {
            format!("Document page: {}", page.title)
        } else {
            preview
        }
    };
    let synopsis = if page.text.trim().is_empty() {
        None
    } else {
        summarizer
            .summarize(&page.title, &page.text, previous_summary)
            .await
    };
    let (summary, extras) = apply_summary(fallback, synopsis);
    DocumentContent {
        summary,
        extras,
        raw_text: format_document(page),
        date: page
            .modified_at
            .map(|d| d.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::summarize::DisabledSummarizer;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, _: &str, _: &str, _: Option<&str>) -> Option<Summary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(Summary {
                summary: "AI summary".to_string(),
                key_points: vec!["point".to_string()],
                decisions: vec![],
                action_items: vec![],
            })
        }
    }

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, day, hour, 0, 0).unwrap()
    }

    fn unit(id: &str, anchor: &str, text: &str, at: DateTime<Utc>) -> NormalizedUnit {
        NormalizedUnit {
            source_id: id.to_string(),
            channel: "eng".to_string(),
            text: text.to_string(),
            sender: "Ann".to_string(),
            timestamp: at,
            thread_anchor_id: Some(anchor.to_string()),
            attachments: vec![],
            fingerprint: fingerprint(text, &[]),
        }
    }

    fn thread(units: Vec<NormalizedUnit>) -> Thread {
        Thread {
            thread_id: units[0].thread_id().to_string(),
            anchor_timestamp: units[0].timestamp,
            units,
        }
    }

    fn keyword(raw: &str) -> Keyword {
        Keyword::new(raw).unwrap()
    }

    fn stored_article(new: &NewArticle) -> Article {
        Article {
            id: "a1".to_string(),
            title: new.title.clone(),
            summary: new.summary.clone(),
            topics: new.topics.clone(),
            key_points: new.key_points.clone(),
            decisions: new.decisions.clone(),
            action_items: new.action_items.clone(),
            raw_text: new.raw_text.clone(),
            source: new.key.source(),
            date: new.date,
            project: new.project.clone(),
            sender_name: new.sender_name.clone(),
            page_id: new.page_id.clone(),
            version: new.version,
            version_date: new.version_date,
            created_at: ts(10, 0),
            updated_at: ts(10, 0),
        }
    }

    fn page(version: Option<i64>, modified: Option<DateTime<Utc>>, body: &str) -> NormalizedPage {
        NormalizedPage {
            page_id: "42".to_string(),
            title: "Runbook".to_string(),
            text: body.to_string(),
            author: Some("Bo".to_string()),
            version,
            modified_at: modified,
            url: None,
            space_key: "ENG".to_string(),
        }
    }

    #[tokio::test]
    async fn create_uses_trigger_text_and_anchor_date() {
        let t = thread(vec![
            unit("p", "p", "lunch plans anyone", ts(10, 23)),
            unit("r", "p", "the deployment is stuck again", ts(11, 1)),
        ]);
        let kw = keyword("Deployment");
        let key = ArticleKey::Chat {
            keyword: kw.canonical_form.clone(),
            anchor_date: t.anchor_date(),
        };
        let outcome =
            merge_thread(&t, &kw, &t.units[1], key, &Lookup::NotFound, &DisabledSummarizer).await;
        let ChatMergeOutcome::Create(new) = outcome else {
            panic!("expected create");
        };
        assert_eq!(new.title, "Deployment 10 Nov.");
        assert_eq!(new.summary, "the deployment is...");
        assert_eq!(new.date, NaiveDate::from_ymd_opt(2025, 11, 10).unwrap());
        assert_eq!(fingerprints_in(&new.raw_text).len(), 2);
        assert_eq!(new.topics, vec!["Deployment"]);
    }

    #[tokio::test]
    async fn create_collapses_duplicate_units() {
        let t = thread(vec![
            unit("p", "p", "pending approval", ts(10, 9)),
            unit("r", "p", "*pending*  approval", ts(10, 10)),
        ]);
        let kw = keyword("pending approval");
        let key = ArticleKey::Chat {
            keyword: kw.canonical_form.clone(),
            anchor_date: t.anchor_date(),
        };
        let outcome =
            merge_thread(&t, &kw, &t.units[0], key, &Lookup::NotFound, &DisabledSummarizer).await;
        let ChatMergeOutcome::Create(new) = outcome else {
            panic!("expected create");
        };
        assert_eq!(new.raw_text.matches("_msg_hash: ").count(), 1);
    }

    #[tokio::test]
    async fn found_appends_only_new_units_without_summarizing() {
        let first = unit("p", "p", "pending approval for release", ts(10, 9));
        let kw = keyword("pending approval");
        let key = ArticleKey::Chat {
            keyword: kw.canonical_form.clone(),
            anchor_date: first.timestamp.date_naive(),
        };
        let summarizer = CountingSummarizer {
            calls: AtomicUsize::new(0),
        };
        let t1 = thread(vec![first.clone()]);
        let ChatMergeOutcome::Create(new) =
            merge_thread(&t1, &kw, &first, key.clone(), &Lookup::NotFound, &summarizer).await
        else {
            panic!("expected create");
        };
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert!(new.summary.starts_with("## Summary\nAI summary"));

        let existing = Lookup::Found(Box::new(stored_article(&new)));
        let t2 = thread(vec![
            first.clone(),
            unit("r", "p", "approved by ops", ts(10, 11)),
        ]);
        let outcome = merge_thread(&t2, &kw, &t2.units[1], key.clone(), &existing, &summarizer).await;
        match &outcome {
            ChatMergeOutcome::Append { blocks, .. } => assert_eq!(blocks.len(), 1),
            other => panic!("expected append, got {:?}", other),
        }
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        let Some(PlannedWrite::Update { mutation, .. }) = outcome.write() else {
            panic!("expected update");
        };
        assert!(matches!(mutation, ArticleMutation::AppendBlocks { .. }));

        let replay = merge_thread(&t1, &kw, &first, key, &existing, &summarizer).await;
        assert!(matches!(
            replay,
            ChatMergeOutcome::Skip {
                reason: SkipReason::AlreadyPresent,
                ..
            }
        ));
        assert!(replay.write().is_none());
    }

    #[tokio::test]
    async fn page_version_rules() {
        let key = ArticleKey::Document {
            page_id: "42".to_string(),
        };
        let v2 = page(Some(2), Some(ts(9, 8)), "old body");
        let DocumentMergeOutcome::Insert(new) =
            merge_page(&v2, key.clone(), &Lookup::NotFound, &DisabledSummarizer).await
        else {
            panic!("expected insert");
        };
        assert_eq!(new.version, Some(2));
        assert_eq!(new.summary, "old body...");
        let stored = Lookup::Found(Box::new(stored_article(&new)));

        let v3 = page(Some(3), Some(ts(10, 8)), "new body");
        match merge_page(&v3, key.clone(), &stored, &DisabledSummarizer).await {
            DocumentMergeOutcome::Replace {
                previous_version,
                revision,
                ..
            } => {
                assert_eq!(previous_version, Some(2));
                assert_eq!(revision.version, Some(3));
                assert!(revision.raw_text.ends_with("new body"));
            }
            other => panic!("expected replace, got {:?}", other),
        }

        let same = page(Some(2), Some(ts(12, 8)), "edited without bump");
        assert!(matches!(
            merge_page(&same, key.clone(), &stored, &DisabledSummarizer).await,
            DocumentMergeOutcome::Skip {
                reason: SkipReason::NotNewer,
                ..
            }
        ));

        let older = page(Some(1), None, "ancient");
        assert!(merge_page(&older, key, &stored, &DisabledSummarizer)
            .await
            .write()
            .is_none());
    }

    #[test]
    fn newer_by_modification_time_without_versions() {
        let mut article = stored_article(&NewArticle {
            key: ArticleKey::Document {
                page_id: "42".to_string(),
            },
            title: "Runbook".to_string(),
            summary: String::new(),
            topics: vec![],
            key_points: vec![],
            decisions: vec![],
            action_items: vec![],
            raw_text: String::new(),
            date: NaiveDate::from_ymd_opt(2025, 11, 10).unwrap(),
            project: "ENG".to_string(),
            sender_name: None,
            page_id: Some("42".to_string()),
            version: None,
            version_date: Some(ts(10, 8)),
        });
        assert!(is_newer_revision(&page(None, Some(ts(10, 9)), "x"), &article));
        assert!(!is_newer_revision(&page(None, Some(ts(10, 8)), "x"), &article));
        assert!(!is_newer_revision(&page(None, None, "x"), &article));

        // No stored modification time: fall back to date, then update time.
        article.version_date = None;
        assert!(is_newer_revision(&page(None, Some(ts(11, 1)), "x"), &article));
        assert!(is_newer_revision(&page(None, Some(ts(10, 5)), "x"), &article));
        assert!(!is_newer_revision(&page(None, Some(ts(9, 23)), "x"), &article));
    }

    #[test]
    fn transcript_labels_replies() {
        let units = vec![
            unit("p", "p", "hello", ts(10, 9)),
            unit("r", "p", "hi", ts(10, 10)),
        ];
        let text = transcript(&units);
        assert!(text.starts_with("[Message] Ann (2025-11-10 09:00):\nhello"));
        assert!(text.contains("[Thread Reply] Ann (2025-11-10 10:00):\nhi"));
    }
}
