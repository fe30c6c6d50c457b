//! # Custody
//!
//! The transfer collaborator: where deposited assets are held and where
//! withdrawal payouts come from. The engine pulls deposits in before
//! converting them, hands sold assets to the router, and pushes native
//! payouts out after debiting the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use strongbox_protocol::{Address, Amount, AssetId};

/// Errors raised by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Custody does not hold enough of the asset.
    #[error("custody holds {held} of {asset}, needs {requested}")]
    InsufficientHoldings {
        /// Asset being moved.
        asset: AssetId,
        /// Amount held.
        held: Amount,
        /// Amount requested.
        requested: Amount,
    },

    /// The counterparty or transport refused the transfer.
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Asset custody for the bank.
pub trait Custody: Send {
    /// The address swap outputs are delivered to.
    fn address(&self) -> Address;

    /// Take `amount` of `asset` from `from` into custody.
    fn pull(&mut self, from: &Address, asset: &AssetId, amount: Amount) -> Result<(), TransferError>;

    /// Send `amount` of `asset` from custody to `to`.
    fn push(&mut self, to: &Address, asset: &AssetId, amount: Amount) -> Result<(), TransferError>;

    /// Record a completed swap: `amount_in` of `asset_in` left custody and
    /// `amount_out` of `asset_out` arrived.
    fn settle_swap(
        &mut self,
        asset_in: &AssetId,
        amount_in: Amount,
        asset_out: &AssetId,
        amount_out: Amount,
    ) -> Result<(), TransferError>;
}

// ---------------------------------------------------------------------------
// InMemoryCustody
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Vault {
    holdings: HashMap<AssetId, Amount>,
    refuse_payouts: bool,
}

/// Custody that tracks holdings in memory. Depositors are assumed to own
/// whatever they deposit.
///
/// Clones share the same vault.
#[derive(Debug, Clone)]
pub struct InMemoryCustody {
    address: Address,
    vault: Arc<Mutex<Vault>>,
}

impl InMemoryCustody {
    /// Empty custody at `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            vault: Arc::new(Mutex::new(Vault::default())),
        }
    }

    /// Seed custody with `amount` of `asset`.
    pub fn with_holdings(self, asset: AssetId, amount: Amount) -> Self {
        *self.vault.lock().holdings.entry(asset).or_default() += amount;
        self
    }

    /// Amount of `asset` currently held.
    pub fn holdings(&self, asset: &AssetId) -> Amount {
        self.vault.lock().holdings.get(asset).copied().unwrap_or(0)
    }

    /// While set, every push fails with [`TransferError::Rejected`].
    pub fn set_refuse_payouts(&self, refuse: bool) {
        self.vault.lock().refuse_payouts = refuse;
    }

    fn take(vault: &mut Vault, asset: &AssetId, amount: Amount) -> Result<(), TransferError> {
        let held = vault.holdings.get(asset).copied().unwrap_or(0);
        let remaining = held
            .checked_sub(amount)
            .ok_or(TransferError::InsufficientHoldings {
                asset: *asset,
                held,
                requested: amount,
            })?;
        vault.holdings.insert(*asset, remaining);
        Ok(())
    }

    fn give(vault: &mut Vault, asset: &AssetId, amount: Amount) -> Result<(), TransferError> {
        let held = vault.holdings.entry(*asset).or_default();
        *held = held
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected("holdings overflow".into()))?;
        Ok(())
    }
}

impl Custody for InMemoryCustody {
    fn address(&self) -> Address {
        self.address
    }

    fn pull(&mut self, _from: &Address, asset: &AssetId, amount: Amount) -> Result<(), TransferError> {
        Self::give(&mut self.vault.lock(), asset, amount)
    }

    fn push(&mut self, to: &Address, asset: &AssetId, amount: Amount) -> Result<(), TransferError> {
        let mut vault = self.vault.lock();
        if vault.refuse_payouts {
            return Err(TransferError::Rejected(format!("payout to {to} refused")));
        }
        Self::take(&mut vault, asset, amount)
    }

    fn settle_swap(
        &mut self,
        asset_in: &AssetId,
        amount_in: Amount,
        asset_out: &AssetId,
        amount_out: Amount,
    ) -> Result<(), TransferError> {
        let mut vault = self.vault.lock();
        let held_out = vault.holdings.get(asset_out).copied().unwrap_or(0);
        if held_out.checked_add(amount_out).is_none() {
            return Err(TransferError::Rejected("holdings overflow".into()));
        }
        Self::take(&mut vault, asset_in, amount_in)?;
        Self::give(&mut vault, asset_out, amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> AssetId {
        AssetId::NATIVE
    }

    fn usd() -> AssetId {
        AssetId::token(Address::repeat_tail(0x01))
    }

    #[test]
    fn pull_then_push() {
        let mut custody = InMemoryCustody::new(Address::repeat_tail(0xBA));
        let alice = Address::repeat_tail(0xA1);
        custody.pull(&alice, &native(), 10).unwrap();
        custody.push(&alice, &native(), 4).unwrap();
        assert_eq!(custody.holdings(&native()), 6);
    }

    #[test]
    fn push_beyond_holdings_fails() {
        let mut custody = InMemoryCustody::new(Address::repeat_tail(0xBA)).with_holdings(native(), 3);
        let err = custody
            .push(&Address::repeat_tail(0xA1), &native(), 5)
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::InsufficientHoldings {
                asset: native(),
                held: 3,
                requested: 5,
            }
        );
        assert_eq!(custody.holdings(&native()), 3);
    }

    #[test]
    fn settle_swap_moves_both_legs() {
        let mut custody = InMemoryCustody::new(Address::repeat_tail(0xBA)).with_holdings(native(), 10);
        custody.settle_swap(&native(), 10, &usd(), 25).unwrap();
        assert_eq!(custody.holdings(&native()), 0);
        assert_eq!(custody.holdings(&usd()), 25);
    }

    #[test]
    fn settle_swap_that_would_overflow_moves_nothing() {
        let mut custody = InMemoryCustody::new(Address::repeat_tail(0xBA))
            .with_holdings(native(), 10)
            .with_holdings(usd(), Amount::MAX);
        assert!(custody.settle_swap(&native(), 10, &usd(), 1).is_err());
        assert_eq!(custody.holdings(&native()), 10);
        assert_eq!(custody.holdings(&usd()), Amount::MAX);
    }

    #[test]
    fn refused_payouts_leave_holdings() {
        let mut custody = InMemoryCustody::new(Address::repeat_tail(0xBA)).with_holdings(native(), 10);
        let shared = custody.clone();
        shared.set_refuse_payouts(true);
        assert!(matches!(
            custody.push(&Address::repeat_tail(0xA1), &native(), 1),
            Err(TransferError::Rejected(_))
        ));
        assert_eq!(custody.holdings(&native()), 10);
    }
}
