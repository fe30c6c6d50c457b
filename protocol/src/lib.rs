// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strongbox Protocol — Shared Vocabulary
//!
//! Types, policy constants and persistence shared by the bank engine
//! (`strongbox-contracts`) and the node binary.
//!
//! - **types** — addresses, asset identifiers, amounts, registry records.
//! - **config** — protocol constants and the TOML-backed [`BankConfig`].
//! - **storage** — sled persistence for balances, assets and metadata.
//!
//! All amounts are integers in an asset's smallest unit. Nothing in this
//! crate divides money; conversion math lives next to the engine.

pub mod config;
pub mod storage;
pub mod types;

pub use config::{BankConfig, ConfigError};
pub use storage::{DbError, VaultDB};
pub use types::{Address, Amount, AssetConfig, AssetId, FeedRef};
