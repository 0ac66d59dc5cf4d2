//! # llm-index
//!
//! Keeps a vector + text search index in step with document collections for
//! retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! lifecycle events
//!        │
//!        ▼
//! ┌──────────────┐  tasks  ┌────────────┐        ┌──────────────────┐
//! │ Orchestrator │────────▶│ Task queue │───────▶│ Workers          │
//! └──────┬───────┘         └────────────┘        │ get → chunk →    │
//!        │ purge / scope delete                  │ embed → upsert   │
//!        ▼                                       └────────┬─────────┘
//! ┌──────────────┐◀───────────────────────────────────────┘
//! │ IndexClient  │
//! └──────────────┘
//! ```
//!
//! Documents come from two sources: **managed** documents stored in SQLite
//! and owned by one collection, and **mirrored** pages read from a host
//! store and selected by space prefixes, possibly across tenants.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`logging`] | tracing subscriber setup |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_index`] | SQLite [`IndexClient`](llm_index_core::index::IndexClient) |
//! | [`embedding`] | Providers, model registry, fallback embedder |
//! | [`extract`] | Attachment text extraction |
//! | [`host`] | Host document store interface and implementations |
//! | [`sources`] | Managed and mirrored document sources |
//! | [`collections`] | Collection registry, diffing and snapshots |
//! | [`events`] | Lifecycle events |
//! | [`queue`] / [`locks`] / [`worker`] | Task scheduling and execution |
//! | [`indexer`] | Single-document indexing |
//! | [`orchestrator`] | Event handling and collection sweeps |
//! | [`app`] | Wiring from configuration |
//!
//! The pure parts (chunking, references, the index protocol) live in the
//! `llm-index-core` crate.

pub mod app;
pub mod collections;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod events;
pub mod extract;
pub mod host;
pub mod indexer;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod preview;
pub mod queue;
pub mod sources;
pub mod sqlite_index;
pub mod stats;
pub mod sync;
pub mod worker;
