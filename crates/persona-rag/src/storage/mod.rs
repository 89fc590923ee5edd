//! Persistence backends implementing the `DocumentStore` contract

pub mod database;
pub mod memory;

pub use database::SqliteStore;
pub use memory::MemoryStore;
