//! SQLite-backed ledger for AlyraSign records.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Acts as a local, single-node ledger:
//! it verifies signatures, enforces create-once and compare-and-swap writes,
//! checks that each account's writer is the authority its record names,
//! charges rent against per-identity balances, and journals every commit.

mod encode;
mod ledger;
mod rules;
mod schema;

pub mod error;

pub use error::{Error, Result};
pub use ledger::{JournalEntry, RentSchedule, SqliteLedger};
