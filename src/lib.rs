//! # Catalog Hub
//!
//! Catalog ingestion and hybrid search for installable agents, tools and
//! protocol servers.
//!
//! Catalog Hub pulls remote indexes, fetches and validates the manifests
//! they list, stores normalized catalog entities in SQLite, derives
//! searchable chunks with embeddings, and answers ranked queries that blend
//! lexical, semantic, quality and recency signals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Remotes   │──▶│   Ingestor   │──▶│  SQLite   │
//! │ index+YAML  │   │ Chunk+Embed  │   │ entities  │
//! └─────────────┘   └──────┬───────┘   └─────┬─────┘
//!                          │                 │
//!                          ▼                 ▼
//!                    ┌──────────┐     ┌──────────────┐
//!                    │ Gateway  │     │ SearchEngine │
//!                    │ register │     │ lex+vec+rank │
//!                    └──────────┘     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hub init                                  # create database
//! hub ingest                                # pull every configured remote
//! hub search "pdf summarizer" --mode hybrid
//! hub get tool:pdf-summarizer@1.0.0
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed per-item and registration failures |
//! | [`manifest`] | Index/manifest parsing and validation |
//! | [`fetch`] | HTTP and `file://` document retrieval |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`blob`] | Raw chunk text storage |
//! | [`registration`] | Protocol-server gateway registration |
//! | [`repo`] | Entity repository |
//! | [`ingest`] | Ingestion orchestrator |
//! | [`search`] | Lexical, vector and hybrid search |
//! | [`backends`] | Backend container built from config |
//! | [`get`] | Entity retrieval |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backends;
pub mod blob;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod get;
pub mod ingest;
pub mod manifest;
pub mod migrate;
pub mod models;
pub mod registration;
pub mod repo;
pub mod search;
