//! # repo-qa
//!
//! Ask questions about a git repository and get one answer that several
//! language models agree on.
//!
//! ## Architecture
//!
//! ```text
//!    clone ──▶ walk files ──▶ recursive split ──▶ Corpus
//!                                                   │
//!                     ┌─────────────────────────────┼──────────────────────┐
//!                     ▼                             ▼                      ▼
//!            ┌────────────────┐          ┌────────────────┐     ┌──────────────────┐
//!            │ BM25 (tantivy) │          │ TF-IDF (sparse)│     │ Dense collection │
//!            └───────┬────────┘          └───────┬────────┘     └────────┬─────────┘
//!                    │ ×0.34                     │ ×0.33                 │ ×0.33
//!                    └───────────────────────────┼───────────────────────┘
//!                                                ▼
//!                                     top N chunks by combined score
//!                                                │
//!                                                ▼
//!                                 prompt ──▶ every answer model
//!                                                │
//!                                                ▼
//!                            consensus: highest mean cosine similarity
//!                                     to the other answers
//! ```
//!
//! A missing signal (embedder down, collection gone) scores zero and the
//! other two still rank. Each index generation writes to a freshly named
//! dense collection, so a rebuild never disturbs queries on the old one.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration
//! - [`models`] - Shared data types: `Corpus`, `Chunk`, candidate answers, request/response types
//! - [`git`] - Clone, URL normalization, file walking with binary detection
//! - [`chunking`] - Recursive character splitter and corpus assembly
//! - [`search::bm25`] - Lexical index powered by tantivy
//! - [`search::tfidf`] - Sparse TF-IDF cosine scoring
//! - [`search::vector`] - Named-collection vector store with disk persistence
//! - [`search::hybrid`] - Index building and weighted score fusion
//! - [`llm::embeddings`] - Embeddings via Ollama or OpenAI-compatible APIs
//! - [`llm::chat`] - Answer models and concurrent fan-out
//! - [`llm::consensus`] - Agreement-based answer selection
//! - [`api`] - Axum HTTP handlers
//! - [`state`] - Shared application state and persistence

pub mod api;
pub mod chunking;
pub mod config;
pub mod git;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
