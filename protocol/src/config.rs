//! # Protocol Configuration & Constants
//!
//! Every policy number in Strongbox lives here: decimal conventions, the
//! default oracle freshness bound, the default slippage tolerance, the
//! default capacity ceiling, and the ports the node listens on.
//!
//! Runtime policy is carried by [`BankConfig`], which is loaded from TOML
//! and validated before an engine is ever constructed. The constants below
//! are its defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{Address, Amount, AssetId, FeedRef};

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Ledger format version. Bump when the persisted layout changes.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Denominations
// ---------------------------------------------------------------------------

/// Decimal places of the accounting unit. Balances are stored in
/// millionths, the usual precision for dollar stablecoins.
pub const ACCOUNTING_DECIMALS: u8 = 6;

/// Decimal places of the native reference asset.
pub const NATIVE_DECIMALS: u8 = 18;

/// Largest asset precision the registry accepts. Keeps every scaling
/// factor (`10^decimals`) comfortably inside `u128`.
pub const MAX_ASSET_DECIMALS: u8 = 30;

/// Basis-point denominator: 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

// ---------------------------------------------------------------------------
// Policy Defaults
// ---------------------------------------------------------------------------

/// Maximum age of a price round before it is rejected, in seconds.
pub const DEFAULT_STALENESS_THRESHOLD_SECS: u64 = 3_600;

/// Slippage tolerance applied to oracle-derived swap estimates (5%).
pub const DEFAULT_SLIPPAGE_BPS: u32 = 500;

/// How long a swap request stays executable after it is issued.
pub const DEFAULT_SWAP_DEADLINE_SECS: u64 = 300;

/// Default capacity ceiling: one million accounting units.
pub const DEFAULT_MAX_CAP: u64 = 1_000_000 * 1_000_000;

/// Default per-withdrawal limit: ten thousand accounting units.
pub const DEFAULT_WITHDRAWAL_LIMIT: u64 = 10_000 * 1_000_000;

/// Default feed used to price the native reference asset.
pub const DEFAULT_NATIVE_FEED: &str = "NATIVE/USD";

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

// ---------------------------------------------------------------------------
// BankConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`BankConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be rendered as TOML.
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A field holds a value the ledger cannot operate with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime policy for a bank instance.
///
/// Monetary fields are `u64` in the accounting unit's smallest
/// denomination so the file format stays plain TOML integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// The single administrative authority.
    pub authority: Address,
    /// The asset balances are denominated in.
    pub accounting_asset: AssetId,
    /// Decimal places of the accounting asset.
    pub accounting_decimals: u8,
    /// Decimal places of the native reference asset.
    pub native_decimals: u8,
    /// Feed used to price the native reference asset.
    pub native_feed: FeedRef,
    /// Capacity ceiling: the most normalized value the ledger may hold.
    pub max_cap: u64,
    /// Largest single withdrawal, in accounting units.
    pub withdrawal_limit: u64,
    /// Maximum accepted age of a price round, in seconds.
    pub staleness_threshold_secs: u64,
    /// Slippage tolerance in basis points.
    pub slippage_bps: u32,
    /// Validity window for swap requests, in seconds.
    pub swap_deadline_secs: u64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            authority: Address::ZERO,
            accounting_asset: AssetId::token(Address::repeat_tail(0x01)),
            accounting_decimals: ACCOUNTING_DECIMALS,
            native_decimals: NATIVE_DECIMALS,
            native_feed: DEFAULT_NATIVE_FEED.to_string(),
            max_cap: DEFAULT_MAX_CAP,
            withdrawal_limit: DEFAULT_WITHDRAWAL_LIMIT,
            staleness_threshold_secs: DEFAULT_STALENESS_THRESHOLD_SECS,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            swap_deadline_secs: DEFAULT_SWAP_DEADLINE_SECS,
        }
    }
}

impl BankConfig {
    /// Default policy with the given authority.
    pub fn with_authority(authority: Address) -> Self {
        Self {
            authority,
            ..Self::default()
        }
    }

    /// Load and validate a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BankConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render this config as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Capacity ceiling as an [`Amount`].
    pub fn max_cap_amount(&self) -> Amount {
        Amount::from(self.max_cap)
    }

    /// Withdrawal limit as an [`Amount`].
    pub fn withdrawal_limit_amount(&self) -> Amount {
        Amount::from(self.withdrawal_limit)
    }

    /// Reject configurations the ledger cannot safely run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authority.is_zero() {
            return Err(ConfigError::Invalid("authority must not be the zero address".into()));
        }
        if self.accounting_asset.is_native() {
            return Err(ConfigError::Invalid(
                "accounting asset must be a token, not the native asset".into(),
            ));
        }
        if self.accounting_decimals > MAX_ASSET_DECIMALS || self.native_decimals > MAX_ASSET_DECIMALS
        {
            return Err(ConfigError::Invalid(format!(
                "decimals must not exceed {MAX_ASSET_DECIMALS}"
            )));
        }
        if self.native_feed.trim().is_empty() {
            return Err(ConfigError::Invalid("native_feed must be set".into()));
        }
        if self.max_cap == 0 {
            return Err(ConfigError::Invalid("max_cap must be positive".into()));
        }
        if self.withdrawal_limit == 0 {
            return Err(ConfigError::Invalid("withdrawal_limit must be positive".into()));
        }
        if self.staleness_threshold_secs == 0 {
            return Err(ConfigError::Invalid(
                "staleness_threshold_secs must be positive".into(),
            ));
        }
        if self.slippage_bps > BPS_DENOMINATOR {
            return Err(ConfigError::Invalid(format!(
                "slippage_bps must not exceed {BPS_DENOMINATOR}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BankConfig {
        BankConfig::with_authority(Address::repeat_tail(0xAA))
    }

    #[test]
    fn default_policy_values() {
        let config = BankConfig::default();
        assert_eq!(config.accounting_decimals, 6);
        assert_eq!(config.staleness_threshold_secs, 3_600);
        assert_eq!(config.slippage_bps, 500);
        assert_eq!(config.max_cap_amount(), 1_000_000_000_000);
    }

    #[test]
    fn default_needs_an_authority() {
        assert!(BankConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_native_accounting_asset() {
        let config = BankConfig {
            accounting_asset: AssetId::NATIVE,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_slippage_above_one_hundred_percent() {
        let config = BankConfig {
            slippage_bps: BPS_DENOMINATOR + 1,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_cap_and_zero_threshold() {
        assert!(BankConfig { max_cap: 0, ..valid() }.validate().is_err());
        assert!(BankConfig {
            staleness_threshold_secs: 0,
            ..valid()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = BankConfig {
            max_cap: 5_000_000,
            ..valid()
        };
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("max_cap = 5000000"));
        let parsed = BankConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let text = r#"
            authority = "0x00000000000000000000000000000000000000aa"
            slippage_bps = 100
        "#;
        let config = BankConfig::from_toml_str(text).unwrap();
        assert_eq!(config.slippage_bps, 100);
        assert_eq!(config.max_cap, DEFAULT_MAX_CAP);
        assert_eq!(config.authority, Address::repeat_tail(0xAA));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.toml");
        std::fs::write(&path, valid().to_toml_string().unwrap()).unwrap();
        let loaded = BankConfig::from_file(&path).unwrap();
        assert_eq!(loaded, valid());
    }
}
