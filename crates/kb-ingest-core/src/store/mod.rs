//! Storage abstraction for kb-ingest.
//!
//! The [`KnowledgeStore`] trait is the only way the pipeline touches
//! persisted articles, enabling pluggable backends (SQLite in the app
//! crate, in-memory here for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Article, ArticleKey, ArticleMutation, NewArticle, SourceKind};

/// Abstract article store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_key`](KnowledgeStore::find_by_key) | Look up the article for an [`ArticleKey`] |
/// | [`create`](KnowledgeStore::create) | Insert a new article, returning its id |
/// | [`update`](KnowledgeStore::update) | Apply one all-or-nothing mutation |
/// | [`get`](KnowledgeStore::get) | Fetch an article by id |
/// | [`list`](KnowledgeStore::list) | List articles, optionally by source |
///
/// Every write is atomic per article: a failed `create` or `update` leaves
/// the store exactly as it was.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Find the article identified by `key`, if any.
    async fn find_by_key(&self, key: &ArticleKey) -> Result<Option<Article>>;

    /// Insert a new article. Fails if an article with the same key exists.
    async fn create(&self, article: &NewArticle) -> Result<String>;

    /// Apply `mutation` to the article with `id`.
    async fn update(&self, id: &str, mutation: &ArticleMutation) -> Result<()>;

    /// Fetch an article by id.
    async fn get(&self, id: &str) -> Result<Option<Article>>;

    /// List articles, newest first.
    async fn list(&self, source: Option<SourceKind>) -> Result<Vec<Article>>;
}
