//! # Memory Harness
//!
//! Hybrid retrieval over a workspace's markdown memory notes.
//!
//! Memory Harness indexes `MEMORY.md` and `memory/**/*.md`, chunks them into
//! overlapping line windows, embeds each chunk through a persistent
//! embedding cache, and answers queries by fusing cosine similarity with
//! FTS5 keyword relevance.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Discovery  │──▶│  Sync        │──▶│  SQLite   │
//! │  MEMORY.md  │   │ Chunk+Embed  │   │ FTS5+JSON │
//! └─────────────┘   └──────┬───────┘   └─────┬─────┘
//!                          │ cache           │
//!                          ▼                 ▼
//!                   ┌─────────────┐   ┌─────────────┐
//!                   │  Provider   │   │ Hybrid      │
//!                   │ OpenAI/...  │   │ search      │
//!                   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mem init                       # create database
//! mem sync                       # index memory files
//! mem search "deployment"        # hybrid search
//! mem get memory/2024-05-01.md   # print a memory file
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`discovery`] | Memory file listing and path validation |
//! | [`embedding`] | Embedding providers and provider resolution |
//! | [`index`] | The `MemoryIndex` orchestrator |
//! | [`sync`] | Sync pipeline |
//! | [`sqlite_store`] | SQLite `Store` backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema bootstrap |
//!
//! The algorithms (chunker, scorers, hybrid merge) live in
//! [`memory_harness_core`].

pub mod config;
pub mod db;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod get;
pub mod index;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;
pub mod status;
pub mod sync;
