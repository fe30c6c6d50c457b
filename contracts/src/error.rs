//! Errors surfaced by the bank engine.
//!
//! Every failure is terminal for the operation that raised it and leaves
//! ledger state unchanged. [`BankError::kind`] gives the stable code the
//! integration layer reports to callers.

use thiserror::Error;

use strongbox_protocol::{Address, Amount, AssetId, ConfigError, DbError};

use crate::custody::TransferError;
use crate::exchange::ExchangeError;
use crate::oracle::OracleError;

/// Errors that can occur during bank operations.
#[derive(Debug, Error)]
pub enum BankError {
    /// A deposit or withdrawal of zero, or one that normalizes to zero.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The caller is not the administrative authority.
    #[error("unauthorized: {caller} is not the bank authority")]
    Unauthorized {
        /// Who attempted the call.
        caller: Address,
    },

    /// The asset is neither registered nor routable.
    #[error("asset {0} is not supported")]
    NotSupported(AssetId),

    /// No exchange path exists for the asset.
    #[error("no route for asset {0}")]
    NoRoute(AssetId),

    /// The price feed was stale, invalid or unavailable.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// The exchange produced less than the slippage-bounded minimum.
    #[error("slippage exceeded: wanted at least {min_amount_out}, got {amount_out}")]
    SlippageExceeded {
        /// Minimum acceptable output.
        min_amount_out: Amount,
        /// Realized output.
        amount_out: Amount,
    },

    /// The swap deadline passed before the exchange executed.
    #[error("swap deadline {deadline} passed at {now}")]
    DeadlineExpired {
        /// Deadline carried by the request.
        deadline: u64,
        /// Time of the attempt.
        now: u64,
    },

    /// Crediting would push the capacity counter above the cap.
    #[error("capacity exceeded: {used} used + {requested} requested > cap {cap}")]
    CapacityExceeded {
        /// Amount that was to be credited.
        requested: Amount,
        /// Counter before the credit.
        used: Amount,
        /// Configured ceiling.
        cap: Amount,
    },

    /// The depositor's balance does not cover the debit.
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance {
        /// Current balance.
        available: Amount,
        /// Amount requested.
        requested: Amount,
    },

    /// A single withdrawal above the configured limit.
    #[error("withdrawal of {requested} exceeds limit {limit}")]
    WithdrawalLimitExceeded {
        /// Amount requested.
        requested: Amount,
        /// Configured limit.
        limit: Amount,
    },

    /// The asset is already in the registry.
    #[error("asset {0} is already registered")]
    AlreadyRegistered(AssetId),

    /// The asset is not in the registry.
    #[error("asset {0} is not registered")]
    NotRegistered(AssetId),

    /// Deposits and withdrawals are suspended.
    #[error("bank is halted")]
    Halted,

    /// Moving assets in or out of custody failed.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    /// The router failed for reasons other than slippage or routing.
    #[error("exchange failure: {0}")]
    Exchange(String),

    /// A fixed-point computation left the `u128` range.
    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    /// An asset record the registry refuses to hold.
    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    /// An address the bank refuses to use.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Persisted state does not satisfy the ledger invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The bank configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The storage layer failed.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl From<ExchangeError> for BankError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::NoRoute { asset_in, .. } => BankError::NoRoute(asset_in),
            ExchangeError::SlippageExceeded {
                min_amount_out,
                amount_out,
            } => BankError::SlippageExceeded {
                min_amount_out,
                amount_out,
            },
            ExchangeError::DeadlineExpired { deadline, now } => {
                BankError::DeadlineExpired { deadline, now }
            }
            ExchangeError::Router(msg) => BankError::Exchange(msg),
        }
    }
}

impl BankError {
    /// Stable machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            BankError::ZeroAmount => "ZeroAmount",
            BankError::Unauthorized { .. } => "Unauthorized",
            BankError::NotSupported(_) => "NotSupported",
            BankError::NoRoute(_) => "NoRoute",
            BankError::Oracle(_) => "OracleError",
            BankError::SlippageExceeded { .. } => "SlippageExceeded",
            BankError::DeadlineExpired { .. } => "DeadlineExpired",
            BankError::CapacityExceeded { .. } => "CapacityExceeded",
            BankError::InsufficientBalance { .. } => "InsufficientBalance",
            BankError::WithdrawalLimitExceeded { .. } => "WithdrawalLimitExceeded",
            BankError::AlreadyRegistered(_) => "AlreadyRegistered",
            BankError::NotRegistered(_) => "NotRegistered",
            BankError::Halted => "Halted",
            BankError::TransferFailed(_) => "TransferFailed",
            BankError::Exchange(_) => "ExchangeError",
            BankError::ArithmeticOverflow(_) => "ArithmeticOverflow",
            BankError::InvalidAsset(_) => "InvalidAsset",
            BankError::InvalidAddress(_) => "InvalidAddress",
            BankError::InvariantViolation(_) => "InvariantViolation",
            BankError::InvalidConfig(_) => "InvalidConfig",
            BankError::Storage(_) => "StorageError",
        }
    }
}

/// Result alias for bank operations.
pub type BankResult<T> = Result<T, BankError>;
