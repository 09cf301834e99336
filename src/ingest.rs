//! Run coordination.
//!
//! A sync run goes: lock → fetch → normalize → dedup guard → (chat: keyword
//! match and thread grouping) → resolve → merge → upsert → record. Every
//! step runs sequentially inside one process; the lock file keeps a second
//! process out.
//!
//! # Failure scope
//!
//! | Error | Effect |
//! |-------|--------|
//! | configuration (missing credentials, empty vocabulary, rejected auth) | run aborts before any write, non-zero exit |
//! | adapter fetch | source aborted for this run, run recorded, exit 0 |
//! | malformed unit | unit skipped, counted as errored |
//! | page body fetch | page left out, stored copy untouched, counted as errored |
//! | store lookup / write (after retries) | that article skipped, counted as errored |
//! | summarizer | never surfaces; fallback summary used |

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::future::Future;
use std::path::Path;
use tracing::{debug, error, info, warn};

use kb_ingest_core::error::IngestError;
use kb_ingest_core::guard::RunGuard;
use kb_ingest_core::keyword::{Keyword, Vocabulary};
use kb_ingest_core::merge::{merge_page, merge_thread, ChatMergeOutcome, DocumentMergeOutcome};
use kb_ingest_core::models::{NormalizedUnit, SourceKind, Thread};
use kb_ingest_core::normalize::{normalize_page, normalize_unit};
use kb_ingest_core::resolve::{chat_key, document_key, resolve};
use kb_ingest_core::store::KnowledgeStore;
use kb_ingest_core::summarize::{DisabledSummarizer, Summarizer};
use kb_ingest_core::thread::group_threads;

use crate::config::{
    resolve_chat_credentials, resolve_docs_credentials, resolve_summarizer_key, Config,
};
use crate::connector_chat::ChatConnector;
use crate::connector_wiki::WikiConnector;
use crate::db;
use crate::lock::{LockToken, RunLock};
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::summarizer_openai::OpenAiSummarizer;
use crate::traits::{ChatSource, DocumentSource, FetchedPages};
use crate::upsert::{RetryPolicy, UpsertEngine, WriteResult};

/// The time range a run fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RunWindow {
    /// Build a window from CLI arguments.
    ///
    /// `since` / `until` are `YYYY-MM-DD` dates (start of day / end of day,
    /// UTC). Without `since`, the window starts `hours` before its end.
    /// Without `until`, it ends at `now`.
    pub fn from_args(
        hours: i64,
        since: Option<&str>,
        until: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, IngestError> {
        let parse = |flag: &str, value: &str| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                IngestError::Configuration(format!(
                    "--{} must be YYYY-MM-DD, got '{}'",
                    flag, value
                ))
            })
        };

        let end = match until {
            Some(value) => parse("until", value)?
                .and_hms_opt(23, 59, 59)
                .map(|d| d.and_utc())
                .unwrap_or(now),
            None => now,
        };
        let start = match since {
            Some(value) => parse("since", value)?
                .and_hms_opt(0, 0, 0)
                .map(|d| d.and_utc())
                .unwrap_or(end),
            None => {
                if hours < 1 {
                    return Err(IngestError::Configuration(
                        "window hours must be >= 1".to_string(),
                    ));
                }
                end - Duration::hours(hours)
            }
        };

        if start >= end {
            return Err(IngestError::Configuration(format!(
                "empty fetch window: {} is not before {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }
}

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Units or pages returned by the adapter.
    pub fetched: u64,
    /// Articles created (chat) or inserted (document).
    pub created: u64,
    /// Blocks appended to existing chat articles.
    pub appended: u64,
    /// Document articles replaced by a newer revision.
    pub replaced: u64,
    /// Units of work that needed no write, including repeated units.
    pub skipped: u64,
    /// Chat units matching no keyword.
    pub unmatched: u64,
    /// Malformed units and failed lookups or writes.
    pub errored: u64,
    /// Adapter failure that cut the run short, if any.
    pub aborted: Option<String>,
}

/// Orchestrates one run against a store.
pub struct Coordinator<'a> {
    store: &'a dyn KnowledgeStore,
    summarizer: &'a dyn Summarizer,
    engine: UpsertEngine<'a>,
    dry_run: bool,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        store: &'a dyn KnowledgeStore,
        summarizer: &'a dyn Summarizer,
        retry: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            summarizer,
            engine: UpsertEngine::new(store, retry),
            dry_run,
        }
    }

    /// Run the chat pipeline over one window.
    ///
    /// Only a configuration failure reported by the adapter is returned as
    /// an error; every other failure is counted in the stats.
    pub async fn sync_chat(
        &self,
        source: &dyn ChatSource,
        vocabulary: &Vocabulary,
        window: RunWindow,
    ) -> Result<RunStats, IngestError> {
        let mut stats = RunStats::default();
        let mut guard = RunGuard::new();

        let raw_units = match source.fetch(window.start, window.end).await {
            Ok(units) => units,
            Err(e) => return abort_source(source.name(), e, stats),
        };
        stats.fetched = raw_units.len() as u64;
        info!(source = source.name(), units = raw_units.len(), "Fetched chat units");

        let mut units: Vec<NormalizedUnit> = Vec::with_capacity(raw_units.len());
        for raw in &raw_units {
            match normalize_unit(raw) {
                Ok(unit) => {
                    if guard.claim_unit(&unit.source_id) {
                        units.push(unit);
                    } else {
                        debug!(source_id = %unit.source_id, "Unit already processed this run");
                        stats.skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Skipping malformed unit");
                    stats.errored += 1;
                }
            }
        }

        let threads = group_threads(units);
        debug!(threads = threads.len(), "Grouped units into threads");

        for thread in &threads {
            for unit in &thread.units {
                let Some(keyword) = vocabulary.best_match(&unit.text) else {
                    debug!(source_id = %unit.source_id, "No keyword match");
                    stats.unmatched += 1;
                    continue;
                };
                if !guard.claim_thread_keyword(&thread.thread_id, &keyword.canonical_form) {
                    continue;
                }
                self.file_thread(thread, keyword, unit, &mut stats).await;
            }
        }

        info!(
            source = source.name(),
            created = stats.created,
            appended = stats.appended,
            skipped = stats.skipped,
            unmatched = stats.unmatched,
            errored = stats.errored,
            "Chat sync finished"
        );
        Ok(stats)
    }

    async fn file_thread(
        &self,
        thread: &Thread,
        keyword: &Keyword,
        trigger: &NormalizedUnit,
        stats: &mut RunStats,
    ) {
        let key = chat_key(thread, keyword);
        let lookup = match resolve(self.store, &key).await {
            Ok(lookup) => lookup,
            Err(e) => {
                error!(article = %key, error = %format!("{:#}", e), "Article lookup failed");
                stats.errored += 1;
                return;
            }
        };

        let outcome = merge_thread(thread, keyword, trigger, key, &lookup, self.summarizer).await;
        let Some(write) = outcome.write() else {
            debug!(article = %outcome.key(), "All thread units already stored");
            stats.skipped += 1;
            return;
        };
        if !self.commit(&write, outcome.key(), stats).await {
            return;
        }
        match &outcome {
            ChatMergeOutcome::Create(new) => {
                info!(article = %new.key, title = %new.title, "Created chat article");
                stats.created += 1;
            }
            ChatMergeOutcome::Append { key, blocks, .. } => {
                info!(article = %key, blocks = blocks.len(), "Appended to chat article");
                stats.appended += blocks.len() as u64;
            }
            ChatMergeOutcome::Skip { .. } => {}
        }
    }

    /// Run the document pipeline over one window.
    pub async fn sync_documents(
        &self,
        source: &dyn DocumentSource,
        window: RunWindow,
    ) -> Result<RunStats, IngestError> {
        let mut stats = RunStats::default();
        let mut guard = RunGuard::new();

        let FetchedPages {
            pages: raw_pages,
            failed,
        } = match source.fetch(window.start, window.end).await {
            Ok(fetched) => fetched,
            Err(e) => return abort_source(source.name(), e, stats),
        };
        stats.fetched = (raw_pages.len() + failed.len()) as u64;
        stats.errored += failed.len() as u64;
        info!(source = source.name(), pages = raw_pages.len(), failed = failed.len(), "Fetched wiki pages");
        if !failed.is_empty() {
            warn!(source = source.name(), pages = ?failed, "Pages left for the next run");
        }

        for raw in &raw_pages {
            let page = match normalize_page(raw) {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed page");
                    stats.errored += 1;
                    continue;
                }
            };
            if !guard.claim_unit(&page.page_id) {
                debug!(page_id = %page.page_id, "Page already processed this run");
                stats.skipped += 1;
                continue;
            }

            let key = document_key(&page);
            let lookup = match resolve(self.store, &key).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    error!(article = %key, error = %format!("{:#}", e), "Article lookup failed");
                    stats.errored += 1;
                    continue;
                }
            };

            let outcome = merge_page(&page, key, &lookup, self.summarizer).await;
            let Some(write) = outcome.write() else {
                debug!(article = %outcome.key(), version = ?page.version, "Page not newer; skipping");
                stats.skipped += 1;
                continue;
            };
            if !self.commit(&write, outcome.key(), &mut stats).await {
                continue;
            }
            match &outcome {
                DocumentMergeOutcome::Insert(new) => {
                    info!(article = %new.key, title = %new.title, version = ?new.version, "Inserted document article");
                    stats.created += 1;
                }
                DocumentMergeOutcome::Replace {
                    key,
                    previous_version,
                    revision,
                    ..
                } => {
                    info!(
                        article = %key,
                        from = ?previous_version,
                        to = ?revision.version,
                        "Replaced document article"
                    );
                    stats.replaced += 1;
                }
                DocumentMergeOutcome::Skip { .. } => {}
            }
        }

        info!(
            source = source.name(),
            created = stats.created,
            replaced = stats.replaced,
            skipped = stats.skipped,
            errored = stats.errored,
            "Document sync finished"
        );
        Ok(stats)
    }

    /// Execute a planned write unless this is a dry run. Returns whether
    /// the write happened (or would have).
    async fn commit(
        &self,
        write: &kb_ingest_core::merge::PlannedWrite,
        key: &kb_ingest_core::models::ArticleKey,
        stats: &mut RunStats,
    ) -> bool {
        if self.dry_run {
            debug!(article = %key, "Dry run: write planned");
            return true;
        }
        match self.engine.execute(write).await {
            Ok(WriteResult::Created { article_id }) | Ok(WriteResult::Updated { article_id }) => {
                debug!(article = %key, id = %article_id, "Write committed");
                true
            }
            Err(e) => {
                error!(error = %e, "Giving up on article write");
                stats.errored += 1;
                false
            }
        }
    }
}

fn abort_source(
    name: &str,
    err: anyhow::Error,
    mut stats: RunStats,
) -> Result<RunStats, IngestError> {
    match err.downcast::<IngestError>() {
        Ok(e) if e.is_fatal() => Err(e),
        Ok(e) => {
            error!(source = name, error = %e, "Source aborted for this run");
            stats.aborted = Some(e.to_string());
            Ok(stats)
        }
        Err(e) => {
            let e = IngestError::AdapterFetch {
                source_name: name.to_string(),
                message: format!("{:#}", e),
            };
            error!(source = name, error = %e, "Source aborted for this run");
            stats.aborted = Some(e.to_string());
            Ok(stats)
        }
    }
}

/// Run `f` while holding the run lock at `lock_path`.
///
/// Returns `Ok(None)` without calling `f` when another run holds the lock.
/// While `f` runs, a background task refreshes the lock every third of
/// `stale_after` (at least once a second), so a long run is never mistaken
/// for a dead one.
pub async fn with_run_lock<F, Fut, T>(
    lock_path: &Path,
    stale_after: std::time::Duration,
    f: F,
) -> Result<Option<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(lock) = RunLock::acquire(lock_path, stale_after)? else {
        info!(path = %lock_path.display(), "Another run is in progress; exiting");
        return Ok(None);
    };
    let heartbeat = spawn_lock_heartbeat(lock.token(), stale_after);
    let result = f().await;
    heartbeat.abort();
    debug!(path = %lock.path().display(), "Releasing run lock");
    drop(lock);
    result.map(Some)
}

fn spawn_lock_heartbeat(
    token: LockToken,
    stale_after: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (stale_after / 3).max(std::time::Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            match token.refresh() {
                Ok(true) => {}
                Ok(false) => {
                    error!("Run lock was taken over by another run");
                    return;
                }
                Err(e) => warn!(error = %format!("{:#}", e), "Failed to refresh run lock"),
            }
        }
    })
}

/// Build the configured summarizer. A missing API key disables
/// summarization with a warning.
pub fn build_summarizer(config: &Config) -> Result<Box<dyn Summarizer>> {
    if !config.summarizer.is_enabled() {
        return Ok(Box::new(DisabledSummarizer));
    }
    match resolve_summarizer_key(&config.summarizer) {
        Some(key) => Ok(Box::new(OpenAiSummarizer::new(
            config.summarizer.clone(),
            key,
        )?)),
        None => {
            warn!(
                env = %config.summarizer.api_key_env,
                "Summarizer API key not set; summaries fall back to previews"
            );
            Ok(Box::new(DisabledSummarizer))
        }
    }
}

enum ConfiguredSource {
    Chat(ChatConnector, Vocabulary),
    Document(WikiConnector),
}

/// Arguments of one `sync` invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub hours: Option<i64>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub dry_run: bool,
}

/// Entry point for `kbi sync <source>`.
///
/// Validates configuration and credentials before anything else, then
/// runs under the run lock. Returns `Ok(None)` when the lock is held.
pub async fn run_sync(config: &Config, kind: SourceKind, args: &SyncArgs) -> Result<Option<RunStats>> {
    let window = RunWindow::from_args(
        args.hours.unwrap_or(config.run.window_hours),
        args.since.as_deref(),
        args.until.as_deref(),
        Utc::now(),
    )?;

    // Fail on configuration before taking the lock or touching the network
    let source = match kind {
        SourceKind::Chat => {
            let vocabulary = config.vocabulary()?;
            let credentials = resolve_chat_credentials(&config.chat)?;
            ConfiguredSource::Chat(
                ChatConnector::new(config.chat.clone(), credentials)?,
                vocabulary,
            )
        }
        SourceKind::Document => {
            let docs = config.docs.clone().ok_or_else(|| {
                IngestError::Configuration("no [docs] section configured".to_string())
            })?;
            let credentials = resolve_docs_credentials(&docs)?;
            ConfiguredSource::Document(WikiConnector::new(docs, credentials)?)
        }
    };
    let summarizer = build_summarizer(config)?;

    let stale_after = std::time::Duration::from_secs(config.run.stale_lock_minutes as u64 * 60);
    with_run_lock(&config.lock_path(), stale_after, move || async move {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = SqliteStore::new(pool.clone());
        let coordinator = Coordinator::new(
            &store,
            summarizer.as_ref(),
            RetryPolicy::from_config(&config.store),
            args.dry_run,
        );

        let started_at = Utc::now();
        let stats = match &source {
            ConfiguredSource::Chat(connector, vocabulary) => {
                coordinator.sync_chat(connector, vocabulary, window).await?
            }
            ConfiguredSource::Document(connector) => {
                coordinator.sync_documents(connector, window).await?
            }
        };

        if !args.dry_run {
            record_run(&pool, kind, window, started_at, &stats).await?;
        }
        print_report(kind, window, &stats, args.dry_run);
        pool.close().await;
        Ok::<_, anyhow::Error>(stats)
    })
    .await
}

/// Append a row to `sync_runs`.
pub async fn record_run(
    pool: &SqlitePool,
    kind: SourceKind,
    window: RunWindow,
    started_at: DateTime<Utc>,
    stats: &RunStats,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs (source, window_start, window_end, started_at, finished_at,
                               created, appended, replaced, skipped, unmatched, errored)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(kind.as_str())
    .bind(window.start.timestamp())
    .bind(window.end.timestamp())
    .bind(started_at.timestamp())
    .bind(Utc::now().timestamp())
    .bind(stats.created as i64)
    .bind(stats.appended as i64)
    .bind(stats.replaced as i64)
    .bind(stats.skipped as i64)
    .bind(stats.unmatched as i64)
    .bind(stats.errored as i64)
    .execute(pool)
    .await
    .context("Failed to record sync run")?;
    Ok(())
}

fn print_report(kind: SourceKind, window: RunWindow, stats: &RunStats, dry_run: bool) {
    if dry_run {
        println!("sync {} (dry-run)", kind);
    } else {
        println!("sync {}", kind);
    }
    println!(
        "  window: {} .. {}",
        window.start.format("%Y-%m-%d %H:%M"),
        window.end.format("%Y-%m-%d %H:%M")
    );
    println!("  fetched: {}", stats.fetched);
    println!("  created: {}", stats.created);
    match kind {
        SourceKind::Chat => {
            println!("  appended blocks: {}", stats.appended);
            println!("  unmatched units: {}", stats.unmatched);
        }
        SourceKind::Document => println!("  replaced: {}", stats.replaced),
    }
    println!("  skipped: {}", stats.skipped);
    println!("  errored: {}", stats.errored);
    match &stats.aborted {
        Some(reason) => println!("aborted: {}", reason),
        None => println!("ok"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn window_from_hours() {
        let w = RunWindow::from_args(24, None, None, now()).unwrap();
        assert_eq!(w.end, now());
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 11, 9, 12, 0, 0).unwrap());
    }

    #[test]
    fn window_from_dates() {
        let w = RunWindow::from_args(24, Some("2025-11-01"), Some("2025-11-02"), now()).unwrap();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2025, 11, 2, 23, 59, 59).unwrap());
    }

    #[test]
    fn bad_windows_are_configuration_errors() {
        assert!(RunWindow::from_args(24, Some("11/01/2025"), None, now())
            .unwrap_err()
            .is_fatal());
        assert!(RunWindow::from_args(24, Some("2025-11-05"), Some("2025-11-01"), now()).is_err());
        assert!(RunWindow::from_args(0, None, None, now()).is_err());
    }
}
