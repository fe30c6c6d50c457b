//! # Asset Registry
//!
//! The set of accepted assets, their precision and the price feed each one
//! is valued with. Records are keyed by asset identifier and only reach
//! storage through [`AssetRegistry::register`] and
//! [`AssetRegistry::unregister`].
//!
//! The accounting asset and the native reference asset are configured by
//! the bank itself. They are always routable and are never registry
//! entries.

use std::collections::BTreeMap;

use strongbox_protocol::config::MAX_ASSET_DECIMALS;
use strongbox_protocol::{AssetConfig, AssetId, FeedRef, VaultDB};

use crate::error::{BankError, BankResult};
use crate::exchange::ExchangeAdapter;

/// Registered assets, optionally mirrored to disk.
#[derive(Debug)]
pub struct AssetRegistry {
    assets: BTreeMap<AssetId, AssetConfig>,
    accounting_asset: AssetId,
    db: Option<VaultDB>,
}

impl AssetRegistry {
    /// An empty in-memory registry.
    pub fn new(accounting_asset: AssetId) -> Self {
        Self {
            assets: BTreeMap::new(),
            accounting_asset,
            db: None,
        }
    }

    /// A registry backed by `db`, loaded from whatever it already holds.
    pub fn open(accounting_asset: AssetId, db: VaultDB) -> BankResult<Self> {
        let assets = db
            .load_assets()?
            .into_iter()
            .map(|config| (config.asset, config))
            .collect();
        Ok(Self {
            assets,
            accounting_asset,
            db: Some(db),
        })
    }

    /// Add `asset` as supported.
    ///
    /// # Errors
    ///
    /// - [`BankError::AlreadyRegistered`] if present.
    /// - [`BankError::InvalidAsset`] for the native or accounting asset, a
    ///   precision above the supported maximum, or an empty feed reference.
    pub fn register(&mut self, asset: AssetId, decimals: u8, feed: FeedRef) -> BankResult<AssetConfig> {
        if self.assets.contains_key(&asset) {
            return Err(BankError::AlreadyRegistered(asset));
        }
        if asset.is_native() || asset == self.accounting_asset {
            return Err(BankError::InvalidAsset(format!(
                "{asset} is configured by the bank, not the registry"
            )));
        }
        if decimals > MAX_ASSET_DECIMALS {
            return Err(BankError::InvalidAsset(format!(
                "{asset} has {decimals} decimals, maximum is {MAX_ASSET_DECIMALS}"
            )));
        }
        if feed.trim().is_empty() {
            return Err(BankError::InvalidAsset(format!("{asset} has no price feed")));
        }

        let config = AssetConfig {
            asset,
            decimals,
            feed,
            supported: true,
        };
        if let Some(db) = &self.db {
            db.put_asset(&config)?;
        }
        self.assets.insert(asset, config.clone());
        Ok(config)
    }

    /// Remove `asset`. Outstanding balances are not inspected here.
    ///
    /// # Errors
    ///
    /// [`BankError::NotRegistered`] if absent.
    pub fn unregister(&mut self, asset: &AssetId) -> BankResult<AssetConfig> {
        if !self.assets.contains_key(asset) {
            return Err(BankError::NotRegistered(*asset));
        }
        if let Some(db) = &self.db {
            db.delete_asset(asset)?;
        }
        self.assets
            .remove(asset)
            .ok_or(BankError::NotRegistered(*asset))
    }

    /// Whether deposits of `asset` are accepted by registration.
    pub fn is_supported(&self, asset: &AssetId) -> bool {
        self.assets.get(asset).is_some_and(|c| c.supported)
    }

    /// Whether `asset` can be converted into the accounting unit. The
    /// accounting and native assets always can.
    pub fn has_route(&self, asset: &AssetId, exchange: &ExchangeAdapter) -> bool {
        asset.is_native() || *asset == self.accounting_asset || exchange.has_route(asset)
    }

    /// The record for `asset`, if registered.
    pub fn get(&self, asset: &AssetId) -> Option<&AssetConfig> {
        self.assets.get(asset)
    }

    /// The record for `asset`, or an unsupported placeholder.
    pub fn config_of(&self, asset: &AssetId) -> AssetConfig {
        self.assets.get(asset).cloned().unwrap_or_else(|| AssetConfig {
            asset: *asset,
            decimals: 0,
            feed: FeedRef::new(),
            supported: false,
        })
    }

    /// Every registered asset, ordered by identifier.
    pub fn assets(&self) -> impl Iterator<Item = &AssetConfig> {
        self.assets.values()
    }

    /// Number of registered assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether no assets are registered.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
