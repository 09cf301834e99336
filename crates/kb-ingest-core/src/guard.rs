//! Run-scoped deduplication state.
//!
//! A [`RunGuard`] is created by the run coordinator at the start of a run
//! and dropped at the end. It is passed explicitly to whatever needs it;
//! nothing here is global, so independent runs in one process never see
//! each other's state.

use std::collections::HashSet;

/// Per-run sets of already-processed work.
#[derive(Debug, Default)]
pub struct RunGuard {
    seen_unit_ids: HashSet<String>,
    seen_thread_keyword_pairs: HashSet<(String, String)>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a physical unit (message or page) by source id. Returns
    /// `false` if it was already processed in this run.
    pub fn claim_unit(&mut self, source_id: &str) -> bool {
        self.seen_unit_ids.insert(source_id.to_string())
    }

    /// Record a (thread, keyword) pair. Returns `false` if this thread was
    /// already filed under this keyword in this run.
    pub fn claim_thread_keyword(&mut self, thread_id: &str, canonical_keyword: &str) -> bool {
        self.seen_thread_keyword_pairs
            .insert((thread_id.to_string(), canonical_keyword.to_string()))
    }

    pub fn units_seen(&self) -> usize {
        self.seen_unit_ids.len()
    }

    pub fn pairs_seen(&self) -> usize {
        self.seen_thread_keyword_pairs.len()
    }
}
