//! # kb-ingest
//!
//! Ingests team chat and wiki pages into a knowledge base of articles,
//! without ever storing the same content twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  Adapters   │──▶│ normalize → guard → match │──▶│  Upsert  │──▶ SQLite
//! │ chat / wiki │   │ → group → resolve → merge │   │  +retry  │
//! └─────────────┘   └──────────────────────────┘   └──────────┘
//!                                ▲
//!                          Summarizer (optional)
//! ```
//!
//! The pure pipeline stages live in `kb-ingest-core`. This crate adds the
//! I/O around them: configuration, HTTP adapters, the SQLite store, the
//! OpenAI summarizer, the run lock, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential lookup |
//! | [`traits`] | Source adapter traits |
//! | [`connector_chat`] | Slack-style chat adapter |
//! | [`connector_wiki`] | Confluence-style wiki adapter |
//! | [`summarizer_openai`] | OpenAI-backed summarizer |
//! | [`ingest`] | Run coordinator |
//! | [`upsert`] | Store writes with bounded retry |
//! | [`lock`] | Run lock file |
//! | [`sqlite_store`] | SQLite knowledge store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |
//! | [`stats`] | `kbi stats` |
//! | [`get`] | `kbi get` |

pub mod config;
pub mod connector_chat;
pub mod connector_wiki;
pub mod db;
pub mod get;
pub mod ingest;
pub mod lock;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
pub mod summarizer_openai;
pub mod traits;
pub mod upsert;
