//! # VaultDB — Persistent Storage Engine
//!
//! The persistence layer for the Strongbox ledger, built on sled's
//! embedded key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                       | Value                    |
//! |------------|---------------------------|--------------------------|
//! | `balances` | depositor address (20B)   | `amount` (16B BE u128)   |
//! | `assets`   | asset address (20B)       | `bincode(AssetConfig)`   |
//! | `metadata` | key (UTF-8)               | value (bytes)            |
//!
//! The capacity counter, halt flag, authority and operation counts live in
//! `metadata`.
//!
//! ## Atomicity
//!
//! A balance change and the matching capacity-counter change are written in
//! one sled transaction spanning `balances` and `metadata`. Either both land
//! on disk or neither does, so the persisted counter can never drift from
//! the persisted balances.

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use std::collections::BTreeMap;
use std::path::Path;

use crate::types::{Address, Amount, AssetConfig, AssetId};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("transaction aborted: {0}")]
    Aborted(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

const META_CAPACITY_USED: &[u8] = b"capacity_used";
const META_HALTED: &[u8] = b"halted";
const META_AUTHORITY: &[u8] = b"authority";
const META_OPERATION_COUNTS: &[u8] = b"operation_counts";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The persisted effect of one ledger mutation: the depositor's new balance
/// and the capacity counter after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Depositor whose balance changed.
    pub depositor: Address,
    /// Balance after the change.
    pub balance: Amount,
    /// Capacity counter after the change.
    pub capacity_used: Amount,
}

/// Running totals of successful operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    /// Successful deposits (native and asset).
    pub deposits: u64,
    /// Successful withdrawals.
    pub withdrawals: u64,
}

// ---------------------------------------------------------------------------
// VaultDB
// ---------------------------------------------------------------------------

/// Persistent storage for ledger balances, the asset registry and bank
/// metadata.
///
/// sled is thread-safe, so `VaultDB` is cheap to clone and share. Only the
/// ledger and the registry write to it; everyone else reads through them.
#[derive(Debug, Clone)]
pub struct VaultDB {
    db: Db,
    balances: Tree,
    assets: Tree,
    metadata: Tree,
}

impl VaultDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let balances = db.open_tree("balances")?;
        let assets = db.open_tree("assets")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            balances,
            assets,
            metadata,
        })
    }

    // -- Balances -----------------------------------------------------------

    /// Atomically persist a depositor's new balance together with the new
    /// capacity counter.
    pub fn commit_ledger_entry(&self, entry: &LedgerEntry) -> DbResult<()> {
        let balance_bytes = entry.balance.to_be_bytes();
        let capacity_bytes = entry.capacity_used.to_be_bytes();

        (&self.balances, &self.metadata)
            .transaction(
                |(balances, metadata)| -> ConflictableTransactionResult<(), ()> {
                    balances.insert(&entry.depositor.as_bytes()[..], &balance_bytes[..])?;
                    metadata.insert(META_CAPACITY_USED, &capacity_bytes[..])?;
                    Ok(())
                },
            )
            .map_err(|e| match e {
                TransactionError::Storage(err) => DbError::Sled(err),
                TransactionError::Abort(()) => DbError::Aborted("ledger entry".into()),
            })
    }

    /// Read a single depositor's balance.
    pub fn get_balance(&self, depositor: &Address) -> DbResult<Option<Amount>> {
        match self.balances.get(depositor.as_bytes())? {
            Some(bytes) => Ok(Some(decode_amount("balance", &bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the full balance table.
    pub fn load_balances(&self) -> DbResult<BTreeMap<Address, Amount>> {
        let mut out = BTreeMap::new();
        for item in self.balances.iter() {
            let (key, value) = item?;
            let depositor = Address::from_slice(&key).map_err(|e| DbError::Corrupt {
                key: "balances".into(),
                reason: e.to_string(),
            })?;
            out.insert(depositor, decode_amount("balance", &value)?);
        }
        Ok(out)
    }

    /// The persisted capacity counter; zero for a fresh database.
    pub fn capacity_used(&self) -> DbResult<Amount> {
        match self.metadata.get(META_CAPACITY_USED)? {
            Some(bytes) => decode_amount("capacity_used", &bytes),
            None => Ok(0),
        }
    }

    /// Number of depositors with a balance row.
    pub fn balance_count(&self) -> usize {
        self.balances.len()
    }

    // -- Assets -------------------------------------------------------------

    /// Insert or replace an asset record.
    pub fn put_asset(&self, config: &AssetConfig) -> DbResult<()> {
        let bytes =
            bincode::serialize(config).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.assets
            .insert(&config.asset.address().as_bytes()[..], bytes)?;
        Ok(())
    }

    /// Remove an asset record. Missing records are not an error here; the
    /// registry decides whether removal was legal.
    pub fn delete_asset(&self, asset: &AssetId) -> DbResult<()> {
        self.assets.remove(asset.address().as_bytes())?;
        Ok(())
    }

    /// Load every asset record.
    pub fn load_assets(&self) -> DbResult<Vec<AssetConfig>> {
        let mut out = Vec::new();
        for item in self.assets.iter() {
            let (_, value) = item?;
            let config: AssetConfig = bincode::deserialize(&value)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            out.push(config);
        }
        Ok(out)
    }

    /// Number of registered assets on disk.
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    // -- Metadata -----------------------------------------------------------

    /// The persisted halt flag; `false` for a fresh database.
    pub fn is_halted(&self) -> DbResult<bool> {
        Ok(matches!(
            self.metadata.get(META_HALTED)?.as_deref(),
            Some([1])
        ))
    }

    /// Persist the halt flag.
    pub fn set_halted(&self, halted: bool) -> DbResult<()> {
        self.metadata.insert(META_HALTED, &[u8::from(halted)][..])?;
        Ok(())
    }

    /// The persisted authority, if one was ever recorded.
    pub fn authority(&self) -> DbResult<Option<Address>> {
        match self.metadata.get(META_AUTHORITY)? {
            Some(bytes) => Address::from_slice(&bytes)
                .map(Some)
                .map_err(|e| DbError::Corrupt {
                    key: "authority".into(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Persist the authority.
    pub fn set_authority(&self, authority: &Address) -> DbResult<()> {
        self.metadata
            .insert(META_AUTHORITY, &authority.as_bytes()[..])?;
        Ok(())
    }

    /// Persisted operation totals.
    pub fn operation_counts(&self) -> DbResult<OperationCounts> {
        match self.metadata.get(META_OPERATION_COUNTS)? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| DbError::Serialization(e.to_string()))
            }
            None => Ok(OperationCounts::default()),
        }
    }

    /// Persist operation totals.
    pub fn set_operation_counts(&self, counts: &OperationCounts) -> DbResult<()> {
        let bytes =
            bincode::serialize(counts).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.metadata.insert(META_OPERATION_COUNTS, bytes)?;
        Ok(())
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_amount(key: &str, bytes: &[u8]) -> DbResult<Amount> {
    let arr: [u8; 16] = bytes.try_into().map_err(|_| DbError::Corrupt {
        key: key.to_string(),
        reason: format!("expected 16 bytes, got {}", bytes.len()),
    })?;
    Ok(Amount::from_be_bytes(arr))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
