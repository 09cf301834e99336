//! SQLite-backed [`KnowledgeStore`] implementation.
//!
//! Articles live in the `articles` table created by [`crate::migrate`].
//! Lookups go through the unique `article_key` column, so the database
//! itself rejects a second article for the same key. Every write is a
//! single statement, which SQLite applies atomically.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use kb_ingest_core::blocks::BLOCK_SEPARATOR;
use kb_ingest_core::models::{Article, ArticleKey, ArticleMutation, NewArticle, SourceKind};
use kb_ingest_core::store::KnowledgeStore;

const ARTICLE_COLUMNS: &str = "id, title, summary, topics_json, key_points_json, \
    decisions_json, action_items_json, raw_text, source, date, project, sender_name, \
    page_id, version, version_date, created_at, updated_at";

/// SQLite implementation of the [`KnowledgeStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json(items: &[String]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

fn from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_article(row: &SqliteRow) -> Result<Article> {
    let source: String = row.get("source");
    let date: String = row.get("date");
    let version_date: Option<String> = row.get("version_date");
    Ok(Article {
        id: row.get("id"),
        title: row.get("title"),
        summary: row.get("summary"),
        topics: from_json(&row.get::<String, _>("topics_json")),
        key_points: from_json(&row.get::<String, _>("key_points_json")),
        decisions: from_json(&row.get::<String, _>("decisions_json")),
        action_items: from_json(&row.get::<String, _>("action_items_json")),
        raw_text: row.get("raw_text"),
        source: source.parse()?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("Invalid article date: {}", date))?,
        project: row.get("project"),
        sender_name: row.get("sender_name"),
        page_id: row.get("page_id"),
        version: row.get("version"),
        version_date: version_date
            .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
            .map(|d| d.with_timezone(&Utc)),
        created_at: parse_ts(row.get("created_at")),
        updated_at: parse_ts(row.get("updated_at")),
    })
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn find_by_key(&self, key: &ArticleKey) -> Result<Option<Article>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE article_key = ?",
            ARTICLE_COLUMNS
        ))
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_article).transpose()
    }

    async fn create(&self, new: &NewArticle) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let page_id = match &new.key {
            ArticleKey::Document { page_id } => Some(page_id.clone()),
            ArticleKey::Chat { .. } => new.page_id.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO articles (id, article_key, title, summary, topics_json,
                                  key_points_json, decisions_json, action_items_json,
                                  raw_text, source, date, project, sender_name, page_id,
                                  version, version_date, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(new.key.storage_key())
        .bind(&new.title)
        .bind(&new.summary)
        .bind(to_json(&new.topics)?)
        .bind(to_json(&new.key_points)?)
        .bind(to_json(&new.decisions)?)
        .bind(to_json(&new.action_items)?)
        .bind(&new.raw_text)
        .bind(new.key.source().as_str())
        .bind(new.date.format("%Y-%m-%d").to_string())
        .bind(&new.project)
        .bind(&new.sender_name)
        .bind(page_id)
        .bind(new.version)
        .bind(new.version_date.map(|d| d.to_rfc3339()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert article {}", new.key))?;

        Ok(id)
    }

    async fn update(&self, id: &str, mutation: &ArticleMutation) -> Result<()> {
        let now = Utc::now().timestamp();
        let result = match mutation {
            ArticleMutation::AppendBlocks { blocks } => {
                sqlx::query(
                    r#"
                    UPDATE articles
                    SET raw_text = CASE WHEN raw_text = '' THEN ? ELSE raw_text || ? END,
                        updated_at = ?
                    WHERE id = ? AND source = 'chat'
                    "#,
                )
                .bind(blocks)
                .bind(format!("{}{}", BLOCK_SEPARATOR, blocks))
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            ArticleMutation::ReplaceContent(rev) => {
                sqlx::query(
                    r#"
                    UPDATE articles
                    SET title = ?, summary = ?, key_points_json = ?, decisions_json = ?,
                        action_items_json = ?, raw_text = ?, date = ?, sender_name = ?,
                        version = ?, version_date = ?, updated_at = ?
                    WHERE id = ? AND source = 'document'
                    "#,
                )
                .bind(&rev.title)
                .bind(&rev.summary)
                .bind(to_json(&rev.key_points)?)
                .bind(to_json(&rev.decisions)?)
                .bind(to_json(&rev.action_items)?)
                .bind(&rev.raw_text)
                .bind(rev.date.format("%Y-%m-%d").to_string())
                .bind(&rev.sender_name)
                .bind(rev.version)
                .bind(rev.version_date.map(|d| d.to_rfc3339()))
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() != 1 {
            bail!("No matching article to update: {}", id);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE id = ?",
            ARTICLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_article).transpose()
    }

    async fn list(&self, source: Option<SourceKind>) -> Result<Vec<Article>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE (? IS NULL OR source = ?) \
             ORDER BY updated_at DESC, id",
            ARTICLE_COLUMNS
        ))
        .bind(source.map(|s| s.as_str()))
        .bind(source.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_article).collect()
    }
}
