//! Persona-scoped RAG ingestion backend
//!
//! Turns uploaded documents (PDF, HTML, markdown-with-frontmatter) into
//! token-bounded overlapping chunks and a lightweight knowledge graph,
//! managed as resumable background jobs with live progress reporting.

pub mod config;
pub mod error;
pub mod graph;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod storage;
pub mod tokens;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
