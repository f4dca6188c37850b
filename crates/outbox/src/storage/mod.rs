//! Storage layer for outbox state and directory lookups

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryOutboxStore;
pub use sqlite::SqliteOutboxStore;
pub use traits::{Directory, OutboxStore};
