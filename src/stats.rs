//! Knowledge base overview.
//!
//! Summarizes what the store holds (article counts per source) and how the
//! last run of each source went, from the `sync_runs` table. Used by
//! `kbi stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Article counts for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCount {
    pub source: String,
    pub articles: i64,
    pub latest_date: Option<String>,
}

/// The most recent recorded run of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRun {
    pub source: String,
    pub finished_at: i64,
    pub created: i64,
    pub appended: i64,
    pub replaced: i64,
    pub skipped: i64,
    pub unmatched: i64,
    pub errored: i64,
}

pub async fn source_counts(pool: &SqlitePool) -> Result<Vec<SourceCount>> {
    let rows = sqlx::query(
        r#"
        SELECT source, COUNT(*) AS articles, MAX(date) AS latest_date
        FROM articles
        GROUP BY source
        ORDER BY source
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SourceCount {
            source: row.get("source"),
            articles: row.get("articles"),
            latest_date: row.get("latest_date"),
        })
        .collect())
}

pub async fn last_runs(pool: &SqlitePool) -> Result<Vec<LastRun>> {
    let rows = sqlx::query(
        r#"
        SELECT r.source, r.finished_at, r.created, r.appended, r.replaced,
               r.skipped, r.unmatched, r.errored
        FROM sync_runs r
        WHERE r.id = (SELECT MAX(id) FROM sync_runs WHERE source = r.source)
        ORDER BY r.source
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| LastRun {
            source: row.get("source"),
            finished_at: row.get("finished_at"),
            created: row.get("created"),
            appended: row.get("appended"),
            replaced: row.get("replaced"),
            skipped: row.get("skipped"),
            unmatched: row.get("unmatched"),
            errored: row.get("errored"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let counts = source_counts(&pool).await?;
    let runs = last_runs(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let total: i64 = counts.iter().map(|c| c.articles).sum();

    println!("kb-ingest: knowledge base stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Articles:    {}", total);

    if !counts.is_empty() {
        println!();
        println!("  {:<10} {:>8}   {:<12} {}", "SOURCE", "ARTICLES", "LATEST", "LAST RUN");
        println!("  {}", "-".repeat(64));
        for c in &counts {
            let last = runs
                .iter()
                .find(|r| r.source == c.source)
                .map(|r| format_ts_relative(r.finished_at))
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<10} {:>8}   {:<12} {}",
                c.source,
                c.articles,
                c.latest_date.as_deref().unwrap_or("-"),
                last
            );
        }
    }

    for r in &runs {
        println!();
        println!("  Last {} run ({}):", r.source, format_ts_relative(r.finished_at));
        println!(
            "    created {}  appended {}  replaced {}  skipped {}  unmatched {}  errored {}",
            r.created, r.appended, r.replaced, r.skipped, r.unmatched, r.errored
        );
    }
    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 2 * 3600), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
