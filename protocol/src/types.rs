//! Core type definitions shared by every Strongbox component.
//!
//! These types form the vocabulary of the ledger: who holds a balance
//! ([`Address`]), what was deposited ([`AssetId`]), how much ([`Amount`]),
//! and how an asset is priced ([`FeedRef`], [`AssetConfig`]). They are
//! kept small and `Copy` where possible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A quantity in the smallest unit of some asset.
///
/// Balances are always denominated in the accounting unit; deposit inputs
/// are denominated in whatever asset was deposited. The protocol never uses
/// floating point for money.
pub type Amount = u128;

/// Identifier of a price feed, e.g. `"ETH/USD"`. Opaque to the ledger.
pub type FeedRef = String;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Errors produced when parsing an [`Address`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The input was not valid hex.
    #[error("invalid hex in address: {0}")]
    InvalidHex(String),

    /// The decoded input had the wrong length.
    #[error("address must be {expected} bytes, got {got}")]
    InvalidLength {
        /// Required byte length.
        expected: usize,
        /// Byte length actually decoded.
        got: usize,
    },
}

/// A 20-byte account or token address, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wraps raw address bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Returns `true` for the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Builds an address whose last byte is `tag`. Handy for fixtures.
    pub const fn repeat_tail(tag: u8) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes[ADDRESS_LENGTH - 1] = tag;
        Self(bytes)
    }

    /// Parses an address from a byte slice of exactly [`ADDRESS_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != ADDRESS_LENGTH {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_LENGTH,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; ADDRESS_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Returns the `0x`-prefixed hex rendering.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; ADDRESS_LENGTH]>::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// Identifies a depositable asset.
///
/// The native reference asset is the sentinel zero address; every other
/// asset is identified by its token address. Keeping the sentinel inside
/// the same keyspace means the registry and the persisted tables need no
/// special casing for it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(Address);

impl AssetId {
    /// The native reference asset.
    pub const NATIVE: AssetId = AssetId(Address::ZERO);

    /// An asset identified by a token address. The zero address maps to
    /// [`AssetId::NATIVE`].
    pub const fn token(address: Address) -> Self {
        Self(address)
    }

    /// Returns `true` for the native reference asset.
    pub fn is_native(&self) -> bool {
        self.0.is_zero()
    }

    /// The underlying address.
    pub fn address(&self) -> Address {
        self.0
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "AssetId(native)")
        } else {
            write!(f, "AssetId({})", self.0)
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            f.write_str("native")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for AssetId {
    type Err = AddressError;

    /// Accepts `"native"` or a hex token address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("native") {
            return Ok(Self::NATIVE);
        }
        Ok(Self(s.parse()?))
    }
}

/// Text formats use the [`Display`](fmt::Display) form, so JSON and TOML
/// may spell the native asset `"native"`.
impl Serialize for AssetId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            Address::deserialize(deserializer).map(Self)
        }
    }
}

// ---------------------------------------------------------------------------
// AssetConfig
// ---------------------------------------------------------------------------

/// Registry record for an accepted asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// The asset this record describes.
    pub asset: AssetId,
    /// Decimal precision of the asset's smallest unit.
    pub decimals: u8,
    /// Price feed used to value the asset in accounting units.
    pub feed: FeedRef,
    /// Whether deposits of this asset are currently accepted.
    pub supported: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_round_trip() {
        let addr = Address::repeat_tail(0xAB);
        let text = addr.to_hex();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 2 + ADDRESS_LENGTH * 2);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn address_accepts_unprefixed_hex() {
        let addr: Address = "00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(addr, Address::repeat_tail(0xFF));
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            AddressError::InvalidLength {
                expected: 20,
                got: 2
            }
        );
    }

    #[test]
    fn address_rejects_bad_hex() {
        assert!(matches!(
            "0xzz".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn native_sentinel_is_zero_address() {
        assert!(AssetId::NATIVE.is_native());
        assert_eq!(AssetId::token(Address::ZERO), AssetId::NATIVE);
        assert!(!AssetId::token(Address::repeat_tail(1)).is_native());
    }

    #[test]
    fn asset_id_parses_native_keyword() {
        assert_eq!("native".parse::<AssetId>().unwrap(), AssetId::NATIVE);
        assert_eq!("NATIVE".parse::<AssetId>().unwrap(), AssetId::NATIVE);
        let token = AssetId::token(Address::repeat_tail(7));
        assert_eq!(token.to_string().parse::<AssetId>().unwrap(), token);
    }

    #[test]
    fn address_json_is_hex_string() {
        let addr = Address::repeat_tail(0x10);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn asset_id_json_spells_native() {
        assert_eq!(serde_json::to_string(&AssetId::NATIVE).unwrap(), "\"native\"");
        let token = AssetId::token(Address::repeat_tail(0x0A));
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(serde_json::from_str::<AssetId>(&json).unwrap(), token);
        let zero = format!("\"{}\"", Address::ZERO.to_hex());
        assert_eq!(serde_json::from_str::<AssetId>(&zero).unwrap(), AssetId::NATIVE);
    }

    #[test]
    fn address_bincode_is_raw_bytes() {
        let addr = Address::repeat_tail(0x42);
        let bytes = bincode::serialize(&addr).unwrap();
        assert_eq!(bytes.len(), ADDRESS_LENGTH);
        let back: Address = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, addr);
    }
}
