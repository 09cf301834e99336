//! # kb-ingest core
//!
//! Pure pipeline logic for kb-ingest: data models, normalization, content
//! fingerprinting, keyword matching, thread grouping, run-scoped dedup,
//! `raw_text` layout, article resolution, merge policy, the store trait and
//! the summarizer capability.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Adapters,
//! persistence and the run coordinator live in the `kb-ingest` app crate.

pub mod blocks;
pub mod error;
pub mod fingerprint;
pub mod guard;
pub mod keyword;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod resolve;
pub mod store;
pub mod summarize;
pub mod thread;
