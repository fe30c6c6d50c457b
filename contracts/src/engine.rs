//! # Bank Engine
//!
//! Orchestrates deposits and withdrawals across the registry, the oracle
//! and exchange adapters, custody and the ledger.
//!
//! ## State Machine
//!
//! ```text
//!   Active ──halt()──▶ Halted
//!     ▲                  │
//!     └────resume()──────┘
//! ```
//!
//! Deposits and withdrawals are only valid while `Active`. Administrative
//! operations work in either state.
//!
//! ## Phase Ordering
//!
//! Oracle, router and custody calls are untrusted boundaries.
//!
//! - **Withdrawals** debit the ledger before anything external runs. If
//!   pricing or the payout then fails, the debit is restored exactly.
//! - **Deposits** credit the ledger only after custody holds the funds and,
//!   for swapped assets, after the router has confirmed its output. The
//!   capacity check that decides the credit uses that confirmed output, so
//!   a route that over-delivers cannot push the counter past the cap.
//!
//! A deposit that fails after custody has taken the funds hands back what
//! custody holds for it: the original asset if no swap happened, the swap
//! output otherwise.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use strongbox_protocol::storage::OperationCounts;
use strongbox_protocol::{Address, Amount, AssetConfig, AssetId, BankConfig, FeedRef, VaultDB};

use crate::clock::Clock;
use crate::custody::{Custody, TransferError};
use crate::error::{BankError, BankResult};
use crate::exchange::{ExchangeAdapter, SwapRouter};
use crate::ledger::Ledger;
use crate::math::{apply_slippage, from_accounting, pow10, to_accounting};
use crate::oracle::{PriceFeed, PriceOracleAdapter};
use crate::registry::AssetRegistry;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether the bank accepts deposits and withdrawals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankState {
    /// Normal operation.
    Active,
    /// Deposits and withdrawals are suspended.
    Halted,
}

/// The external services an engine is wired to.
pub struct Collaborators {
    /// Price source for the oracle adapter.
    pub price_feed: Arc<dyn PriceFeed>,
    /// Routing service for the exchange adapter.
    pub router: Box<dyn SwapRouter>,
    /// Asset custody.
    pub custody: Box<dyn Custody>,
    /// Time source for freshness checks and deadlines.
    pub clock: Arc<dyn Clock>,
}

/// Record of a successful deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    /// Unique receipt identifier.
    pub id: Uuid,
    /// Who deposited.
    pub depositor: Address,
    /// Asset deposited.
    pub asset: AssetId,
    /// Amount deposited, in the asset's smallest unit.
    pub amount_in: Amount,
    /// Accounting units credited.
    pub credited: Amount,
    /// Depositor balance after the credit.
    pub balance_after: Amount,
    /// Capacity counter after the credit.
    pub capacity_used_after: Amount,
    /// Unix seconds.
    pub at: u64,
}

/// Record of a successful withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Unique receipt identifier.
    pub id: Uuid,
    /// Who withdrew.
    pub depositor: Address,
    /// Accounting units debited.
    pub debited: Amount,
    /// Asset paid out.
    pub payout_asset: AssetId,
    /// Amount paid out, in the payout asset's smallest unit.
    pub payout: Amount,
    /// Depositor balance after the debit.
    pub balance_after: Amount,
    /// Capacity counter after the debit.
    pub capacity_used_after: Amount,
    /// Unix seconds.
    pub at: u64,
}

/// Bank-wide summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankInfo {
    /// Σ balances, recomputed from the balance table.
    pub total_balance: Amount,
    /// The capacity counter.
    pub total_capacity_used: Amount,
    /// Headroom under the ceiling.
    pub cap_remaining: Amount,
    /// The ceiling.
    pub max_cap: Amount,
    /// Whether the bank is halted.
    pub halted: bool,
    /// Successful deposits so far.
    pub deposit_count: u64,
    /// Successful withdrawals so far.
    pub withdrawal_count: u64,
}

// ---------------------------------------------------------------------------
// BankEngine
// ---------------------------------------------------------------------------

/// The custodial bank.
pub struct BankEngine {
    config: BankConfig,
    authority: Address,
    state: BankState,
    ledger: Ledger,
    registry: AssetRegistry,
    oracle: PriceOracleAdapter,
    exchange: ExchangeAdapter,
    custody: Box<dyn Custody>,
    clock: Arc<dyn Clock>,
    counts: OperationCounts,
    db: Option<VaultDB>,
}

impl BankEngine {
    /// An in-memory bank. Starts `Active` with `config.authority`.
    pub fn new(config: BankConfig, collaborators: Collaborators) -> BankResult<Self> {
        config.validate()?;
        let ledger = Ledger::new(config.max_cap_amount());
        let registry = AssetRegistry::new(config.accounting_asset);
        Ok(Self::assemble(
            config.authority,
            BankState::Active,
            OperationCounts::default(),
            ledger,
            registry,
            None,
            config,
            collaborators,
        ))
    }

    /// A bank persisted in `db`.
    ///
    /// A fresh database records `config.authority`. An existing one keeps
    /// its own authority, halt flag and counters, and its ledger must still
    /// satisfy the capacity invariant under `config.max_cap`.
    pub fn open(config: BankConfig, db: VaultDB, collaborators: Collaborators) -> BankResult<Self> {
        config.validate()?;
        let ledger = Ledger::open(config.max_cap_amount(), db.clone())?;
        let registry = AssetRegistry::open(config.accounting_asset, db.clone())?;

        let authority = match db.authority()? {
            Some(authority) => authority,
            None => {
                db.set_authority(&config.authority)?;
                config.authority
            }
        };
        let state = if db.is_halted()? {
            BankState::Halted
        } else {
            BankState::Active
        };
        let counts = db.operation_counts()?;

        info!(
            %authority,
            ?state,
            depositors = ledger.depositor_count(),
            assets = registry.len(),
            capacity_used = ledger.total_capacity_used(),
            "bank opened"
        );
        Ok(Self::assemble(
            authority,
            state,
            counts,
            ledger,
            registry,
            Some(db),
            config,
            collaborators,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        authority: Address,
        state: BankState,
        counts: OperationCounts,
        ledger: Ledger,
        registry: AssetRegistry,
        db: Option<VaultDB>,
        config: BankConfig,
        collaborators: Collaborators,
    ) -> Self {
        let oracle = PriceOracleAdapter::new(
            collaborators.price_feed,
            Arc::clone(&collaborators.clock),
            config.staleness_threshold_secs,
        );
        let exchange = ExchangeAdapter::new(
            collaborators.router,
            Arc::clone(&collaborators.clock),
            config.accounting_asset,
        );
        Self {
            config,
            authority,
            state,
            ledger,
            registry,
            oracle,
            exchange,
            custody: collaborators.custody,
            clock: collaborators.clock,
            counts,
            db,
        }
    }

    // -- Deposits -----------------------------------------------------------

    /// Deposit `amount` of the native reference asset, valued at the native
    /// feed's price.
    pub fn deposit_native(&mut self, depositor: Address, amount: Amount) -> BankResult<DepositReceipt> {
        self.ensure_active()?;
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }

        let quote = self.oracle.get_price(&self.config.native_feed)?;
        let credited = to_accounting(
            amount,
            self.config.native_decimals,
            quote.price,
            quote.decimals,
            self.config.accounting_decimals,
        )
        .ok_or(BankError::ArithmeticOverflow("native valuation"))?;
        if credited == 0 {
            return Err(BankError::ZeroAmount);
        }
        self.ledger.ensure_capacity(credited)?;

        self.custody.pull(&depositor, &AssetId::NATIVE, amount)?;
        let balance_after = self.credit_or_refund(&depositor, credited, &AssetId::NATIVE, amount)?;

        Ok(self.record_deposit(depositor, AssetId::NATIVE, amount, credited, balance_after))
    }

    /// Deposit `amount` of `asset`.
    ///
    /// The accounting asset is credited one-for-one. The native asset is
    /// handled as [`deposit_native`](Self::deposit_native). Anything else is
    /// swapped into the accounting asset with a minimum output of the
    /// expected value less the slippage tolerance, and the realized output
    /// is credited.
    pub fn deposit_asset(
        &mut self,
        depositor: Address,
        asset: AssetId,
        amount: Amount,
    ) -> BankResult<DepositReceipt> {
        self.ensure_active()?;
        if !self.registry.is_supported(&asset) && !self.registry.has_route(&asset, &self.exchange) {
            return Err(BankError::NotSupported(asset));
        }
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }

        if asset.is_native() {
            return self.deposit_native(depositor, amount);
        }

        let accounting = self.config.accounting_asset;
        if asset == accounting {
            self.ledger.ensure_capacity(amount)?;
            self.custody.pull(&depositor, &asset, amount)?;
            let balance_after = self.credit_or_refund(&depositor, amount, &asset, amount)?;
            return Ok(self.record_deposit(depositor, asset, amount, amount, balance_after));
        }

        let expected = self.expected_output(&asset, amount)?;
        let min_amount_out = apply_slippage(expected, self.config.slippage_bps);
        debug!(%asset, amount, expected, min_amount_out, "swap estimate");
        if min_amount_out == 0 {
            return Err(BankError::ZeroAmount);
        }
        // Even the worst acceptable fill would not fit.
        self.ledger.ensure_capacity(min_amount_out)?;

        self.custody.pull(&depositor, &asset, amount)?;

        let deadline = self.clock.now().saturating_add(self.config.swap_deadline_secs);
        let recipient = self.custody.address();
        let amount_out = match self
            .exchange
            .convert(asset, amount, min_amount_out, recipient, deadline)
        {
            Ok(out) => out,
            Err(err) => {
                let err = BankError::from(err);
                warn!(%depositor, %asset, amount, kind = err.kind(), "swap failed");
                self.refund(&depositor, &asset, amount, &err)?;
                return Err(err);
            }
        };

        if let Err(err) = self
            .custody
            .settle_swap(&asset, amount, &accounting, amount_out)
        {
            error!(%asset, amount, amount_out, error = %err, "custody could not settle swap");
            // The router has already delivered; hand the output back.
            let err = BankError::from(err);
            self.refund(&depositor, &accounting, amount_out, &err)?;
            return Err(err);
        }

        let balance_after = self.credit_or_refund(&depositor, amount_out, &accounting, amount_out)?;
        Ok(self.record_deposit(depositor, asset, amount, amount_out, balance_after))
    }

    /// Accounting units `amount` of `asset` should fetch: oracle valuation
    /// for registered assets, router quote otherwise.
    fn expected_output(&self, asset: &AssetId, amount: Amount) -> BankResult<Amount> {
        match self.registry.get(asset) {
            Some(config) => {
                let quote = self.oracle.get_price(&config.feed)?;
                to_accounting(
                    amount,
                    config.decimals,
                    quote.price,
                    quote.decimals,
                    self.config.accounting_decimals,
                )
                .ok_or(BankError::ArithmeticOverflow("asset valuation"))
            }
            None => Ok(self
                .exchange
                .quote(asset, &self.config.accounting_asset, amount)?),
        }
    }

    fn credit_or_refund(
        &mut self,
        depositor: &Address,
        credited: Amount,
        held_asset: &AssetId,
        held_amount: Amount,
    ) -> BankResult<Amount> {
        match self.ledger.credit(depositor, credited) {
            Ok(balance) => Ok(balance),
            Err(err) => {
                warn!(%depositor, credited, kind = err.kind(), "credit rejected, refunding");
                self.refund(depositor, held_asset, held_amount, &err)?;
                Err(err)
            }
        }
    }

    /// Return `amount` of `asset` held for a deposit that failed with
    /// `cause`.
    ///
    /// # Errors
    ///
    /// [`BankError::TransferFailed`] naming `cause` if custody refuses, in
    /// which case custody keeps the asset and nothing was credited.
    fn refund(
        &mut self,
        depositor: &Address,
        asset: &AssetId,
        amount: Amount,
        cause: &BankError,
    ) -> BankResult<()> {
        self.custody.push(depositor, asset, amount).map_err(|err| {
            error!(%depositor, %asset, amount, cause = cause.kind(), error = %err, "refund failed");
            BankError::TransferFailed(TransferError::Rejected(format!(
                "refund of {amount} {asset} after {} failed: {err}",
                cause.kind()
            )))
        })
    }

    fn record_deposit(
        &mut self,
        depositor: Address,
        asset: AssetId,
        amount_in: Amount,
        credited: Amount,
        balance_after: Amount,
    ) -> DepositReceipt {
        self.counts.deposits = self.counts.deposits.saturating_add(1);
        self.persist_counts();
        let receipt = DepositReceipt {
            id: Uuid::new_v4(),
            depositor,
            asset,
            amount_in,
            credited,
            balance_after,
            capacity_used_after: self.ledger.total_capacity_used(),
            at: self.clock.now(),
        };
        info!(
            %depositor,
            %asset,
            amount_in,
            credited,
            capacity_used = receipt.capacity_used_after,
            "deposit credited"
        );
        receipt
    }

    // -- Withdrawals --------------------------------------------------------

    /// Withdraw `amount` accounting units, paid out in the native asset.
    ///
    /// The ledger is debited first. If pricing or the payout fails the debit
    /// is restored and the error returned.
    pub fn withdraw(&mut self, depositor: Address, amount: Amount) -> BankResult<WithdrawalReceipt> {
        self.ensure_active()?;
        if amount == 0 {
            return Err(BankError::ZeroAmount);
        }
        let limit = self.config.withdrawal_limit_amount();
        if amount > limit {
            return Err(BankError::WithdrawalLimitExceeded {
                requested: amount,
                limit,
            });
        }

        let balance_after = self.ledger.debit(&depositor, amount)?;

        let payout = match self.pay_out(&depositor, amount) {
            Ok(payout) => payout,
            Err(err) => return Err(revert_debit(&mut self.ledger, &depositor, amount, err)),
        };

        self.counts.withdrawals = self.counts.withdrawals.saturating_add(1);
        self.persist_counts();
        let receipt = WithdrawalReceipt {
            id: Uuid::new_v4(),
            depositor,
            debited: amount,
            payout_asset: AssetId::NATIVE,
            payout,
            balance_after,
            capacity_used_after: self.ledger.total_capacity_used(),
            at: self.clock.now(),
        };
        info!(
            %depositor,
            debited = amount,
            payout,
            capacity_used = receipt.capacity_used_after,
            "withdrawal paid"
        );
        Ok(receipt)
    }

    fn pay_out(&mut self, depositor: &Address, units: Amount) -> BankResult<Amount> {
        let quote = self.oracle.get_price(&self.config.native_feed)?;
        let payout = from_accounting(
            units,
            self.config.native_decimals,
            quote.price,
            quote.decimals,
            self.config.accounting_decimals,
        )
        .ok_or(BankError::ArithmeticOverflow("native payout"))?;
        if payout == 0 {
            return Err(BankError::ZeroAmount);
        }
        self.custody.push(depositor, &AssetId::NATIVE, payout)?;
        Ok(payout)
    }

    // -- Administration -----------------------------------------------------

    fn ensure_authority(&self, caller: &Address) -> BankResult<()> {
        if *caller != self.authority {
            warn!(%caller, "unauthorized admin call");
            return Err(BankError::Unauthorized { caller: *caller });
        }
        Ok(())
    }

    fn ensure_active(&self) -> BankResult<()> {
        match self.state {
            BankState::Active => Ok(()),
            BankState::Halted => Err(BankError::Halted),
        }
    }

    /// Register `asset` as supported.
    pub fn add_asset(
        &mut self,
        caller: &Address,
        asset: AssetId,
        decimals: u8,
        feed: FeedRef,
    ) -> BankResult<AssetConfig> {
        self.ensure_authority(caller)?;
        let config = self.registry.register(asset, decimals, feed)?;
        info!(%asset, decimals, feed = %config.feed, "asset registered");
        Ok(config)
    }

    /// Unregister `asset`.
    ///
    /// Allowed while balances are outstanding: balances are held in the
    /// accounting unit and no longer depend on the asset they came from.
    pub fn remove_asset(&mut self, caller: &Address, asset: &AssetId) -> BankResult<AssetConfig> {
        self.ensure_authority(caller)?;
        let config = self.registry.unregister(asset)?;
        if self.ledger.total_capacity_used() > 0 {
            warn!(
                %asset,
                capacity_used = self.ledger.total_capacity_used(),
                "asset removed while balances are outstanding"
            );
        } else {
            info!(%asset, "asset removed");
        }
        Ok(config)
    }

    /// Suspend deposits and withdrawals. Idempotent.
    pub fn halt(&mut self, caller: &Address) -> BankResult<()> {
        self.ensure_authority(caller)?;
        self.set_state(BankState::Halted)
    }

    /// Resume deposits and withdrawals. Idempotent.
    pub fn resume(&mut self, caller: &Address) -> BankResult<()> {
        self.ensure_authority(caller)?;
        self.set_state(BankState::Active)
    }

    fn set_state(&mut self, state: BankState) -> BankResult<()> {
        if let Some(db) = &self.db {
            db.set_halted(state == BankState::Halted)?;
        }
        if self.state != state {
            info!(from = ?self.state, to = ?state, "bank state changed");
        }
        self.state = state;
        Ok(())
    }

    /// Hand administrative control to `new_authority`.
    pub fn transfer_authority(&mut self, caller: &Address, new_authority: Address) -> BankResult<()> {
        self.ensure_authority(caller)?;
        if new_authority.is_zero() {
            return Err(BankError::InvalidAddress(
                "authority must not be the zero address".into(),
            ));
        }
        if let Some(db) = &self.db {
            db.set_authority(&new_authority)?;
        }
        info!(from = %self.authority, to = %new_authority, "authority transferred");
        self.authority = new_authority;
        Ok(())
    }

    fn persist_counts(&self) {
        if let Some(db) = &self.db {
            if let Err(err) = db.set_operation_counts(&self.counts) {
                warn!(error = %err, "failed to persist operation counts");
            }
        }
    }

    // -- Queries ------------------------------------------------------------

    /// Bank-wide totals.
    pub fn bank_info(&self) -> BankResult<BankInfo> {
        let total_balance = self
            .ledger
            .sum_of_balances()
            .ok_or_else(|| BankError::InvariantViolation("balance sum overflows".into()))?;
        Ok(BankInfo {
            total_balance,
            total_capacity_used: self.ledger.total_capacity_used(),
            cap_remaining: self.ledger.cap_remaining(),
            max_cap: self.ledger.max_cap(),
            halted: self.state == BankState::Halted,
            deposit_count: self.counts.deposits,
            withdrawal_count: self.counts.withdrawals,
        })
    }

    /// Balance of `depositor` in accounting units.
    pub fn balance_of(&self, depositor: &Address) -> Amount {
        self.ledger.balance_of(depositor)
    }

    /// Registry record for `asset`; unsupported if unknown.
    pub fn asset_config(&self, asset: &AssetId) -> AssetConfig {
        self.registry.config_of(asset)
    }

    /// Whether `asset` can be converted into the accounting unit.
    pub fn has_route(&self, asset: &AssetId) -> bool {
        self.registry.has_route(asset, &self.exchange)
    }

    /// Router estimate of `asset_out` received for one whole unit of
    /// `asset_in`.
    pub fn preview_conversion(&self, asset_in: &AssetId, asset_out: &AssetId) -> BankResult<Amount> {
        let decimals = self
            .decimals_of(asset_in)
            .ok_or(BankError::NotSupported(*asset_in))?;
        let one_unit = pow10(u32::from(decimals)).ok_or(BankError::ArithmeticOverflow("unit size"))?;
        Ok(self.exchange.quote(asset_in, asset_out, one_unit)?)
    }

    fn decimals_of(&self, asset: &AssetId) -> Option<u8> {
        if asset.is_native() {
            Some(self.config.native_decimals)
        } else if *asset == self.config.accounting_asset {
            Some(self.config.accounting_decimals)
        } else {
            self.registry.get(asset).map(|c| c.decimals)
        }
    }

    /// Current state.
    pub fn state(&self) -> BankState {
        self.state
    }

    /// Whether the bank is halted.
    pub fn is_halted(&self) -> bool {
        self.state == BankState::Halted
    }

    /// The administrative authority.
    pub fn authority(&self) -> Address {
        self.authority
    }

    /// The policy this bank runs with.
    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    /// Registered assets.
    pub fn assets(&self) -> Vec<AssetConfig> {
        self.registry.assets().cloned().collect()
    }

    /// Verify `counter == Σ balances ≤ cap`.
    pub fn check_invariant(&self) -> BankResult<()> {
        self.ledger.check_invariant()
    }
}

/// Re-credit a withdrawal debit after its payout failed with `cause`.
///
/// Returns `cause` when the balance is back. If the credit itself fails the
/// debit stays committed, and the caller gets
/// [`BankError::InvariantViolation`] instead so it is not told the
/// withdrawal had no effect.
fn revert_debit(ledger: &mut Ledger, depositor: &Address, amount: Amount, cause: BankError) -> BankError {
    match ledger.credit(depositor, amount) {
        Ok(_) => {
            warn!(%depositor, amount, kind = cause.kind(), "withdrawal reverted");
            cause
        }
        Err(restore) => {
            error!(%depositor, amount, error = %restore, "failed to restore debit");
            BankError::InvariantViolation(format!(
                "withdrawal of {amount} by {depositor} failed with {} and the debit could not \
                 be restored: {restore}",
                cause.kind()
            ))
        }
    }
}
