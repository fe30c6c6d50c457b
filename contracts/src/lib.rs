//! # Strongbox Bank Engine
//!
//! The accounting and conversion core of a custodial ledger. Deposits in
//! several asset denominations are normalized into a single accounting unit
//! and depositors withdraw that balance back in the native reference asset.
//!
//! - **Ledger**: per-depositor balances and the global capacity counter.
//! - **AssetRegistry**: accepted assets, their precision and price feeds.
//! - **PriceOracleAdapter**: validated prices with a staleness bound.
//! - **ExchangeAdapter**: bounded-slippage swaps through an external router.
//! - **BankEngine**: orchestration, halt state and the authority guard.
//!
//! ## Design Principles
//!
//! 1. Every monetary operation is checked. Conversions round toward zero.
//! 2. `capacity_used == Σ balances ≤ max_cap` holds after every operation,
//!    successful or not.
//! 3. Debits are committed before any external call; deposit credits only
//!    after the external result is confirmed.
//! 4. Collaborators (price feed, router, custody, clock) sit behind traits,
//!    so the engine runs identically against test doubles and live services.

pub mod clock;
pub mod custody;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod math;
pub mod oracle;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use custody::{Custody, InMemoryCustody, TransferError};
pub use engine::{BankEngine, BankInfo, BankState, Collaborators, DepositReceipt, WithdrawalReceipt};
pub use error::{BankError, BankResult};
pub use exchange::{ExchangeAdapter, ExchangeError, FixedRateRouter, SwapRequest, SwapRouter};
pub use ledger::Ledger;
pub use oracle::{ManualPriceFeed, OracleError, PriceFeed, PriceOracleAdapter, PriceQuote, PriceRound};
pub use registry::AssetRegistry;
