//! Storage backends: the `SQLite` rule repository and the file-backed
//! vocabulary store.

mod rules;
mod vocabulary;

pub use rules::{RuleStore, StateCounts};
pub use vocabulary::VocabularyStore;

use crate::Result;
use rusqlite::Connection;

/// Configures a `SQLite` connection for concurrent access.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds on lock contention instead
///   of failing immediately
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // pragma_update returns the new value for journal_mode, which would
    // make execute_batch fail; the results are intentionally ignored.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    Ok(())
}
