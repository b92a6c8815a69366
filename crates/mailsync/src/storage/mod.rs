//! Durable cursor store
//!
//! Holds the sync watermark and the set of message IDs already written to
//! the sink. The trait-based design lets tests swap the SQLite store for an
//! in-memory one.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryCursorStore;
pub use sqlite::SqliteCursorStore;
pub use traits::CursorStore;
