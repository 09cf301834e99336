//! Source adapter traits.
//!
//! The run coordinator talks to its sources only through these traits. The
//! built-in implementations are [`ChatConnector`](crate::connector_chat::ChatConnector)
//! and [`WikiConnector`](crate::connector_wiki::WikiConnector); tests supply
//! in-memory fakes.
//!
//! # Contract
//!
//! - `fetch(window_start, window_end)` returns every unit whose timestamp
//!   falls inside the window, oldest first.
//! - Calls are restartable and may return overlapping results across
//!   calls; the pipeline's dedup absorbs repeats.
//! - A document source that lists a page but cannot read its body leaves
//!   the page out and reports its id in [`FetchedPages::failed`], so the
//!   stored article is untouched and the next run tries again.
//! - An `Err` aborts that source for the current run only. Errors should be
//!   [`IngestError::AdapterFetch`](kb_ingest_core::error::IngestError)
//!   or [`IngestError::Configuration`](kb_ingest_core::error::IngestError)
//!   wrapped in `anyhow`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kb_ingest_core::models::{RawPage, RawUnit};

/// A chat system producing messages and thread replies.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Short label used in logs and run records (e.g. `"slack"`).
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<RawUnit>>;
}

/// Result of one [`DocumentSource::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchedPages {
    pub pages: Vec<RawPage>,
    /// Ids of listed pages that were dropped because their body could not
    /// be fetched.
    pub failed: Vec<String>,
}

/// A wiki producing pages.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short label used in logs and run records (e.g. `"confluence"`).
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<FetchedPages>;
}
