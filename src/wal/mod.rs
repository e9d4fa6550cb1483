//! Write-Ahead Log (WAL) Module
//!
//! Per-table append-only logs of row mutations, living in the region.
//!
//! ## Responsibilities
//! - Append entries in a crash-safe order (content, link, tail)
//! - Movable commit pointer (`advance_commit`)
//! - Lazy head-to-tail reads with committed/uncommitted annotation
//! - Per-table recovery after restart
//!
//! ## Entry Chain
//! ```text
//! record: head ──► [e1] ──► [e2] ──► [e3] ──► [e4] ──► 0
//!                            ▲                  ▲
//!                          commit              tail
//! ```
//! e1..e2 are committed; e3..e4 are provisional until the next
//! `advance_commit`.

mod entry;
mod reader;
mod recovery;
mod table;

pub use entry::{Op, WalEntry, ENTRY_SIZE};
pub use reader::{LogCursor, LogRecord};
pub use recovery::{recover_table, TableRecovery};
pub use table::{Appended, TablePointers, WalTable, TABLE_RECORD_SIZE};
