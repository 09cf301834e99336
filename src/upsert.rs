//! Upsert engine: executes one planned write with bounded retry.
//!
//! Each [`PlannedWrite`] becomes exactly one store call. When the call
//! fails, the engine waits (`base_delay`, then doubling) and tries again,
//! up to the configured number of attempts. Before each retry it checks
//! whether the failed attempt actually landed (a write can commit and
//! still report an error), so a retry never duplicates an article or a
//! block.
//!
//! On exhaustion the caller receives [`IngestError::StoreWrite`]; it logs
//! the failure and moves on to the next unit of work.

use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use kb_ingest_core::blocks::fingerprints_in;
use kb_ingest_core::error::IngestError;
use kb_ingest_core::merge::PlannedWrite;
use kb_ingest_core::models::ArticleMutation;
use kb_ingest_core::store::KnowledgeStore;

use crate::config::StoreConfig;

/// How many times to try a write and how long to wait between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2×base, 4×base, ...
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay * (1u32 << (retry.saturating_sub(1)).min(10))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// What a successful write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Created { article_id: String },
    Updated { article_id: String },
}

pub struct UpsertEngine<'a> {
    store: &'a dyn KnowledgeStore,
    policy: RetryPolicy,
}

impl<'a> UpsertEngine<'a> {
    pub fn new(store: &'a dyn KnowledgeStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Execute `write`, retrying transient failures.
    pub async fn execute(&self, write: &PlannedWrite) -> Result<WriteResult, IngestError> {
        let label = write_label(write);
        let mut last_err = None;

        for attempt in 0..self.policy.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt)).await;
                match self.already_applied(write).await {
                    Ok(Some(result)) => return Ok(result),
                    Ok(None) => {}
                    Err(e) => {
                        last_err = Some(e);
                        continue;
                    }
                }
            }

            match self.apply(write).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        article = %label,
                        attempt = attempt + 1,
                        max_attempts = self.policy.attempts,
                        error = %e,
                        "Store write failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(IngestError::StoreWrite {
            article: label,
            message: last_err
                .map(|e| format!("{:#}", e))
                .unwrap_or_else(|| "write failed after retries".to_string()),
        })
    }

    async fn apply(&self, write: &PlannedWrite) -> Result<WriteResult> {
        match write {
            PlannedWrite::Create(new) => {
                let article_id = self.store.create(new).await?;
                Ok(WriteResult::Created { article_id })
            }
            PlannedWrite::Update {
                article_id,
                mutation,
            } => {
                self.store.update(article_id, mutation).await?;
                Ok(WriteResult::Updated {
                    article_id: article_id.clone(),
                })
            }
        }
    }

    /// Whether an earlier, apparently failed, attempt of `write` committed.
    async fn already_applied(&self, write: &PlannedWrite) -> Result<Option<WriteResult>> {
        match write {
            PlannedWrite::Create(new) => Ok(self
                .store
                .find_by_key(&new.key)
                .await?
                .map(|a| WriteResult::Created { article_id: a.id })),
            PlannedWrite::Update {
                article_id,
                mutation,
            } => {
                let Some(current) = self.store.get(article_id).await? else {
                    return Ok(None);
                };
                let landed = match mutation {
                    ArticleMutation::AppendBlocks { blocks } => {
                        let stored = fingerprints_in(&current.raw_text);
                        let pending = fingerprints_in(blocks);
                        !pending.is_empty() && pending.is_subset(&stored)
                    }
                    ArticleMutation::ReplaceContent(rev) => {
                        current.raw_text == rev.raw_text && current.version == rev.version
                    }
                };
                Ok(landed.then(|| WriteResult::Updated {
                    article_id: article_id.clone(),
                }))
            }
        }
    }
}

fn write_label(write: &PlannedWrite) -> String {
    match write {
        PlannedWrite::Create(new) => new.key.to_string(),
        PlannedWrite::Update { article_id, .. } => article_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn policy_from_config_never_zero_attempts() {
        let policy = RetryPolicy::from_config(&StoreConfig {
            retry_attempts: 0,
            retry_base_delay_ms: 5,
        });
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(5));
    }
}
