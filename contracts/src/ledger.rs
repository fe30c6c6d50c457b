//! # Ledger
//!
//! Per-depositor balances in the accounting unit and the global capacity
//! counter. The ledger is the only owner of both.
//!
//! ## Invariant
//!
//! ```text
//! capacity_used == Σ balances   and   capacity_used ≤ max_cap
//! ```
//!
//! Every mutation computes the new balance and the new counter with
//! checked arithmetic, persists them together as one
//! [`LedgerEntry`](strongbox_protocol::storage::LedgerEntry), and only then
//! applies them in memory. A failed write leaves memory untouched.
//!
//! Balances are never deleted; a depositor that withdraws everything keeps
//! a zero row.

use std::collections::BTreeMap;

use strongbox_protocol::storage::LedgerEntry;
use strongbox_protocol::{Address, Amount, VaultDB};

use crate::error::{BankError, BankResult};

/// Balances and the capacity counter.
#[derive(Debug)]
pub struct Ledger {
    balances: BTreeMap<Address, Amount>,
    capacity_used: Amount,
    max_cap: Amount,
    db: Option<VaultDB>,
}

impl Ledger {
    /// An empty in-memory ledger with ceiling `max_cap`.
    pub fn new(max_cap: Amount) -> Self {
        Self {
            balances: BTreeMap::new(),
            capacity_used: 0,
            max_cap,
            db: None,
        }
    }

    /// A ledger backed by `db`.
    ///
    /// # Errors
    ///
    /// [`BankError::InvariantViolation`] if the persisted counter does not
    /// equal the persisted balances' sum or exceeds `max_cap`.
    pub fn open(max_cap: Amount, db: VaultDB) -> BankResult<Self> {
        let balances = db.load_balances()?;
        let capacity_used = db.capacity_used()?;
        let ledger = Self {
            balances,
            capacity_used,
            max_cap,
            db: Some(db),
        };
        ledger.check_invariant()?;
        tracing::debug!(
            depositors = ledger.balances.len(),
            capacity_used,
            "ledger loaded"
        );
        Ok(ledger)
    }

    /// Fail with [`BankError::CapacityExceeded`] unless `amount` fits under
    /// the ceiling right now.
    pub fn ensure_capacity(&self, amount: Amount) -> BankResult<()> {
        match self.capacity_used.checked_add(amount) {
            Some(total) if total <= self.max_cap => Ok(()),
            _ => Err(BankError::CapacityExceeded {
                requested: amount,
                used: self.capacity_used,
                cap: self.max_cap,
            }),
        }
    }

    /// Increase `depositor`'s balance and the counter by exactly `amount`.
    ///
    /// # Errors
    ///
    /// - [`BankError::ZeroAmount`] if `amount` is zero.
    /// - [`BankError::CapacityExceeded`] if the counter would pass the cap.
    pub fn credit(&mut self, depositor: &Address, amount: Amount) -> BankResult<Amount> {
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }
        self.ensure_capacity(amount)?;

        let capacity_used = self
            .capacity_used
            .checked_add(amount)
            .ok_or(BankError::ArithmeticOverflow("capacity counter"))?;
        let balance = self
            .balance_of(depositor)
            .checked_add(amount)
            .ok_or(BankError::ArithmeticOverflow("balance"))?;

        self.commit(*depositor, balance, capacity_used)?;
        Ok(balance)
    }

    /// Decrease `depositor`'s balance and the counter by exactly `amount`.
    ///
    /// # Errors
    ///
    /// - [`BankError::ZeroAmount`] if `amount` is zero.
    /// - [`BankError::InsufficientBalance`] if `amount` exceeds the balance.
    pub fn debit(&mut self, depositor: &Address, amount: Amount) -> BankResult<Amount> {
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }
        let available = self.balance_of(depositor);
        let balance = available
            .checked_sub(amount)
            .ok_or(BankError::InsufficientBalance {
                available,
                requested: amount,
            })?;
        let capacity_used = self.capacity_used.checked_sub(amount).ok_or_else(|| {
            BankError::InvariantViolation(format!(
                "counter {} below balance {available}",
                self.capacity_used
            ))
        })?;

        self.commit(*depositor, balance, capacity_used)?;
        Ok(balance)
    }

    fn commit(&mut self, depositor: Address, balance: Amount, capacity_used: Amount) -> BankResult<()> {
        if let Some(db) = &self.db {
            db.commit_ledger_entry(&LedgerEntry {
                depositor,
                balance,
                capacity_used,
            })?;
        }
        self.balances.insert(depositor, balance);
        self.capacity_used = capacity_used;
        Ok(())
    }

    /// Balance of `depositor`; zero if never seen.
    pub fn balance_of(&self, depositor: &Address) -> Amount {
        self.balances.get(depositor).copied().unwrap_or(0)
    }

    /// The capacity counter.
    pub fn total_capacity_used(&self) -> Amount {
        self.capacity_used
    }

    /// The capacity ceiling.
    pub fn max_cap(&self) -> Amount {
        self.max_cap
    }

    /// Headroom left under the ceiling.
    pub fn cap_remaining(&self) -> Amount {
        self.max_cap.saturating_sub(self.capacity_used)
    }

    /// Σ balances, recomputed from the table. `None` on overflow, which can
    /// only happen if the table is corrupt.
    pub fn sum_of_balances(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(Amount::MIN, |acc, b| acc.checked_add(*b))
    }

    /// Number of depositors with a balance row, including zero rows.
    pub fn depositor_count(&self) -> usize {
        self.balances.len()
    }

    /// Iterate over all balance rows.
    pub fn balances(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    /// Verify `counter == Σ balances ≤ max_cap`.
    pub fn check_invariant(&self) -> BankResult<()> {
        let sum = self
            .sum_of_balances()
            .ok_or_else(|| BankError::InvariantViolation("balance sum overflows".into()))?;
        if sum != self.capacity_used {
            return Err(BankError::InvariantViolation(format!(
                "counter {} != Σ balances {sum}",
                self.capacity_used
            )));
        }
        if self.capacity_used > self.max_cap {
            return Err(BankError::InvariantViolation(format!(
                "counter {} above cap {}",
                self.capacity_used, self.max_cap
            )));
        }
        Ok(())
    }
}
