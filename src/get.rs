//! Article retrieval by id.

use anyhow::{bail, Result};

use kb_ingest_core::models::Article;
use kb_ingest_core::store::KnowledgeStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Load one article from the configured database.
pub async fn get_article(config: &Config, id: &str) -> Result<Article> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let article = store.get(id).await;
    pool.close().await;

    match article? {
        Some(article) => Ok(article),
        None => bail!("article not found: {}", id),
    }
}

/// CLI entry point: print the article as pretty JSON.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let article = get_article(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&article)?);
    Ok(())
}
