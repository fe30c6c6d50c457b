//! # Node Configuration
//!
//! The node's TOML file wraps the bank policy ([`BankConfig`]) with the
//! bootstrap data the reference collaborators need: the prices the
//! in-process feed starts with, the assets to register on first start, the
//! router fee, and the native reserve custody holds for payouts.
//!
//! ```toml
//! router_fee_bps = 30
//! native_reserve = 1000
//!
//! [bank]
//! authority = "0x00000000000000000000000000000000000000ad"
//! max_cap = 1000000000000
//!
//! [[prices]]
//! feed = "NATIVE/USD"
//! answer = 200000000000
//! decimals = 8
//!
//! [[assets]]
//! asset = "0x000000000000000000000000000000000000000a"
//! decimals = 8
//! feed = "TKN/USD"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use strongbox_contracts::math::pow10;
use strongbox_contracts::FixedRateRouter;
use strongbox_protocol::config::BPS_DENOMINATOR;
use strongbox_protocol::{Address, Amount, AssetId, BankConfig, FeedRef};

/// A price round published into the node's feed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPrice {
    /// Feed reference.
    pub feed: FeedRef,
    /// Price scaled by `10^decimals`.
    pub answer: i64,
    /// Decimal places of `answer`.
    pub decimals: u8,
}

/// An asset registered on first start if the registry lacks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedAsset {
    /// Token address.
    pub asset: AssetId,
    /// Token precision.
    pub decimals: u8,
    /// Feed the token is priced with.
    pub feed: FeedRef,
}

/// Everything `strongbox-node run` reads from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fee the in-process router keeps on every swap, in basis points.
    pub router_fee_bps: u32,
    /// Custody address swap outputs are delivered to.
    pub custody_address: Address,
    /// Whole native units custody starts with for withdrawal payouts.
    pub native_reserve: u64,
    /// Bank policy.
    pub bank: BankConfig,
    /// Initial feed rounds.
    pub prices: Vec<SeedPrice>,
    /// Assets to register on first start.
    pub assets: Vec<SeedAsset>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            router_fee_bps: 30,
            custody_address: Address::repeat_tail(0xBA),
            native_reserve: 0,
            bank: BankConfig::default(),
            prices: Vec::new(),
            assets: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// A starter config for `strongbox-node init`.
    pub fn sample(authority: Address) -> Self {
        let bank = BankConfig::with_authority(authority);
        Self {
            native_reserve: 1_000,
            prices: vec![SeedPrice {
                feed: bank.native_feed.clone(),
                answer: 2_000_0000_0000,
                decimals: 8,
            }],
            bank,
            ..Self::default()
        }
    }

    /// Load and validate from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the node cannot start with.
    pub fn validate(&self) -> Result<()> {
        self.bank.validate()?;
        if self.router_fee_bps > BPS_DENOMINATOR {
            bail!("router_fee_bps must not exceed {BPS_DENOMINATOR}");
        }
        if self.price_of(&self.bank.native_feed).is_none() {
            bail!("no seed price for native feed {}", self.bank.native_feed);
        }
        for asset in &self.assets {
            if self.price_of(&asset.feed).is_none() {
                bail!("no seed price for feed {} of asset {}", asset.feed, asset.asset);
            }
        }
        Ok(())
    }

    fn price_of(&self, feed: &str) -> Option<&SeedPrice> {
        self.prices.iter().find(|p| p.feed == feed)
    }

    /// Custody's starting native balance in smallest units.
    pub fn native_reserve_amount(&self) -> Result<Amount> {
        pow10(u32::from(self.bank.native_decimals))
            .and_then(|unit| unit.checked_mul(Amount::from(self.native_reserve)))
            .context("native_reserve overflows")
    }

    /// A router quoting every seeded asset, and the native asset, against
    /// the accounting asset at its seed price, in both directions.
    pub fn build_router(&self) -> Result<FixedRateRouter> {
        let router = FixedRateRouter::new().with_fee_bps(self.router_fee_bps);
        let accounting = self.bank.accounting_asset;

        let native = (AssetId::NATIVE, self.bank.native_decimals, &self.bank.native_feed);
        let seeded = self.assets.iter().map(|a| (a.asset, a.decimals, &a.feed));

        for (asset, decimals, feed) in std::iter::once(native).chain(seeded) {
            let Some(price) = self.price_of(feed) else {
                bail!("no seed price for feed {feed}");
            };
            let (numerator, denominator) = oracle_rate(
                price.answer,
                price.decimals,
                decimals,
                self.bank.accounting_decimals,
            )
            .with_context(|| format!("seed price for {feed} gives no usable rate"))?;

            router.set_rate(asset, accounting, numerator, denominator);
            router.set_rate(accounting, asset, denominator, numerator);
        }
        Ok(router)
    }
}

/// Accounting units out per asset unit in, as `(numerator, denominator)`,
/// for an asset priced at `answer / 10^price_decimals`:
/// `answer × 10^acc / 10^(price_decimals + asset_decimals)`.
///
/// `None` for a non-positive price or a scale that overflows.
pub fn oracle_rate(
    answer: i64,
    price_decimals: u8,
    asset_decimals: u8,
    accounting_decimals: u8,
) -> Option<(Amount, Amount)> {
    if answer <= 0 {
        return None;
    }
    let numerator = Amount::from(answer.unsigned_abs())
        .checked_mul(pow10(u32::from(accounting_decimals))?)?;
    let denominator = pow10(u32::from(price_decimals) + u32::from(asset_decimals))?;
    Some((numerator, denominator))
}
