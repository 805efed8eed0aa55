//! # catalog-rag core
//!
//! Shared, runtime-agnostic logic for catalog-rag: data models, metadata
//! filters, the vector store abstraction, provider traits for embeddings
//! and chat models, and the conversation thread state machine.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! Concrete providers and the SQLite-backed store live in the
//! `catalog-rag` application crate.

pub mod conversation;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod llm;
pub mod models;
pub mod store;

pub use error::RagError;
