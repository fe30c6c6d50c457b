//! # Storage Module
//!
//! Persistent storage for the Strongbox ledger.
//!
//! ```text
//! db.rs — sled persistence: balances, asset registry, bank metadata
//! ```
//!
//! Bincode is used for structured on-disk values; amounts are stored as
//! fixed-width big-endian integers so they can be decoded without a schema.

pub mod db;

pub use db::{DbError, DbResult, LedgerEntry, OperationCounts, VaultDB};
