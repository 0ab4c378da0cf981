//! Message store implementations.
//!
//! This module contains concrete implementations of the `MessageStore` trait
//! for the supported storage backends.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
