//! In-memory [`KnowledgeStore`] implementation for testing.
//!
//! Articles live in a `Vec` behind `std::sync::RwLock`. Lookups scan the
//! articles with [`matches_key`], the same identity rules the SQLite store
//! enforces through its unique `article_key` column. Every successful write
//! bumps a counter so tests can assert how many writes a run performed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::blocks::BLOCK_SEPARATOR;
use crate::models::{Article, ArticleKey, ArticleMutation, NewArticle, SourceKind};
use crate::resolve::matches_key;

use super::KnowledgeStore;

/// In-memory article store.
pub struct InMemoryStore {
    articles: RwLock<Vec<Article>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            articles: RwLock::new(Vec::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `create` and `update` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored article.
    pub fn all(&self) -> Result<Vec<Article>> {
        Ok(self
            .articles
            .read()
            .map_err(|_| anyhow!("article lock poisoned"))?
            .clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn find_by_key(&self, key: &ArticleKey) -> Result<Option<Article>> {
        let articles = self
            .articles
            .read()
            .map_err(|_| anyhow!("article lock poisoned"))?;
        Ok(articles.iter().find(|a| matches_key(a, key)).cloned())
    }

    async fn create(&self, new: &NewArticle) -> Result<String> {
        let mut articles = self
            .articles
            .write()
            .map_err(|_| anyhow!("article lock poisoned"))?;
        if articles.iter().any(|a| matches_key(a, &new.key)) {
            bail!("article already exists for key {}", new.key);
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let page_id = match &new.key {
            ArticleKey::Document { page_id } => Some(page_id.clone()),
            ArticleKey::Chat { .. } => new.page_id.clone(),
        };
        articles.push(Article {
            id: id.clone(),
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
            page_id,
            version: new.version,
            version_date: new.version_date,
            created_at: now,
            updated_at: now,
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn update(&self, id: &str, mutation: &ArticleMutation) -> Result<()> {
        let mut articles = self
            .articles
            .write()
            .map_err(|_| anyhow!("article lock poisoned"))?;
        let article = articles
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("article not found: {}", id))?;

        match mutation {
            ArticleMutation::AppendBlocks { blocks } => {
                if article.source != SourceKind::Chat {
                    bail!("cannot append blocks to {} article {}", article.source, id);
                }
                if !article.raw_text.is_empty() {
                    article.raw_text.push_str(BLOCK_SEPARATOR);
                }
                article.raw_text.push_str(blocks);
            }
            ArticleMutation::ReplaceContent(rev) => {
                if article.source != SourceKind::Document {
                    bail!("cannot replace content of {} article {}", article.source, id);
                }
                article.title = rev.title.clone();
                article.summary = rev.summary.clone();
                article.key_points = rev.key_points.clone();
                article.decisions = rev.decisions.clone();
                article.action_items = rev.action_items.clone();
                article.raw_text = rev.raw_text.clone();
                article.date = rev.date;
                article.sender_name = rev.sender_name.clone();
                article.version = rev.version;
                article.version_date = rev.version_date;
            }
        }
        article.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        let articles = self
            .articles
            .read()
            .map_err(|_| anyhow!("article lock poisoned"))?;
        Ok(articles.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, source: Option<SourceKind>) -> Result<Vec<Article>> {
        let articles = self
            .articles
            .read()
            .map_err(|_| anyhow!("article lock poisoned"))?;
        let mut out: Vec<Article> = articles
            .iter()
            .filter(|a| source.is_none_or(|s| a.source == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}
