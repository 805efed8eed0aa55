//! # catalog-rag
//!
//! Retrieval-augmented chat over a SQLite product catalog.
//!
//! Every catalog product is mirrored into a vector index as a rendered
//! description plus filterable metadata (`id`, `color`, `price`). A
//! question is turned into a metadata filter by the language model, the
//! filtered index is searched, and the matches ground a conversation turn
//! on a per-thread history that is summarized as it grows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  insert / delete  ┌──────────────┐
//! │   Catalog    │──────────────────▶│ VectorIndex  │
//! │ (SQLite rows)│   ProductService  │ (vectors.db) │
//! └──────────────┘                   └──────┬───────┘
//!                                           │ search(filter)
//!        question ─▶ FilterSynthesizer ─▶ Retriever
//!                                           │ texts
//!                                           ▼
//!                                 ConversationEngine ─▶ reply
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! crag init
//! crag products add --name Ring --color gold --price 100
//! crag search "gold ring"
//! crag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connections |
//! | [`migrate`] | Catalog and index schemas |
//! | [`catalog`] | Generic row access and schema registry |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat model providers |
//! | [`sqlite_index`] | On-disk vector store |
//! | [`index`] | Vector index service |
//! | [`synthesizer`] | Question → metadata filter |
//! | [`retriever`] | Filtered retrieval |
//! | [`conversation`] | Per-thread conversation engine |
//! | [`orchestrator`] | RAG facade |
//! | [`service`] | Mirrored product writes |
//! | [`audit`] | Catalog ↔ index consistency |
//! | [`server`] | JSON HTTP server |

pub mod audit;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod http;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod retriever;
pub mod server;
pub mod service;
pub mod sqlite_index;
pub mod synthesizer;

pub use catalog_rag_core::RagError;
