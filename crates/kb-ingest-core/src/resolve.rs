//! Article resolution: from a thread or page to its [`ArticleKey`] and the
//! stored article (if any).
//!
//! Chat articles are identified by a topic whose folded form equals the
//! keyword's canonical form, on the thread's anchor date. Document articles
//! are identified by the page id, read from the article's metadata or from
//! the header embedded in its `raw_text`.

use anyhow::Result;

use crate::blocks::parse_document_header;
use crate::keyword::{fold, Keyword};
use crate::models::{Article, ArticleKey, NormalizedPage, SourceKind, Thread};
use crate::store::KnowledgeStore;

/// Result of looking up an article key.
#[derive(Debug, Clone)]
pub enum Lookup {
    NotFound,
    Found(Box<Article>),
}

impl Lookup {
    pub fn article(&self) -> Option<&Article> {
        match self {
            Lookup::NotFound => None,
            Lookup::Found(article) => Some(article),
        }
    }
}

/// Key for a thread filed under `keyword`.
pub fn chat_key(thread: &Thread, keyword: &Keyword) -> ArticleKey {
    ArticleKey::Chat {
        keyword: keyword.canonical_form.clone(),
        anchor_date: thread.anchor_date(),
    }
}

/// Key for a wiki page.
pub fn document_key(page: &NormalizedPage) -> ArticleKey {
    ArticleKey::Document {
        page_id: page.page_id.clone(),
    }
}

/// Whether `article` is the one identified by `key`.
pub fn matches_key(article: &Article, key: &ArticleKey) -> bool {
    match key {
        ArticleKey::Chat {
            keyword,
            anchor_date,
        } => {
            article.source == SourceKind::Chat
                && article.date == *anchor_date
                && article.topics.iter().any(|t| fold(t) == *keyword)
        }
        ArticleKey::Document { page_id } => {
            article.source == SourceKind::Document
                && (article.page_id.as_deref() == Some(page_id.as_str())
                    || parse_document_header(&article.raw_text)
                        .is_some_and(|h| h.page_id == *page_id))
        }
    }
}

/// Look up the article for `key`.
pub async fn resolve(store: &dyn KnowledgeStore, key: &ArticleKey) -> Result<Lookup> {
    Ok(match store.find_by_key(key).await? {
        Some(article) => Lookup::Found(Box::new(article)),
        None => Lookup::NotFound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn article(source: SourceKind, topics: &[&str], date: NaiveDate, raw: &str) -> Article {
        Article {
            id: "a1".to_string(),
            title: "t".to_string(),
            summary: "s".to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            key_points: vec![],
            decisions: vec![],
            action_items: vec![],
            raw_text: raw.to_string(),
            source,
            date,
            project: String::new(),
            sender_name: None,
            page_id: None,
            version: None,
            version_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn chat_key_matches_topic_and_date() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        let a = article(SourceKind::Chat, &["Pending Approvals"], day, "");
        let key = ArticleKey::Chat {
            keyword: "pending approval".to_string(),
            anchor_date: day,
        };
        assert!(matches_key(&a, &key));

        let other_day = ArticleKey::Chat {
            keyword: "pending approval".to_string(),
            anchor_date: day.succ_opt().unwrap(),
        };
        assert!(!matches_key(&a, &other_day));
    }

    #[test]
    fn document_key_reads_embedded_header() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        let a = article(
            SourceKind::Document,
            &[],
            day,
            "URL: \nPAGE_TITLE: T\nPAGE_ID: 42\nPAGE_VERSION: 2\nPAGE_VERSION_DATE: \n\nbody",
        );
        let key = ArticleKey::Document {
            page_id: "42".to_string(),
        };
        assert!(matches_key(&a, &key));
        assert!(!matches_key(
            &a,
            &ArticleKey::Document {
                page_id: "4".to_string()
            }
        ));
    }

    #[test]
    fn sources_never_cross() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        let mut doc = article(SourceKind::Document, &["Deploy"], day, "");
        doc.page_id = Some("42".to_string());
        let chat_key = ArticleKey::Chat {
            keyword: "deploy".to_string(),
            anchor_date: day,
        };
        assert!(!matches_key(&doc, &chat_key));
    }
}
