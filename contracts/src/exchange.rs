//! # Exchange Adapter
//!
//! Bounded-slippage conversion through an external routing service. The
//! router is untrusted: the adapter enforces the deadline itself before
//! calling out, and re-checks the realized output against the caller's
//! minimum after the router returns, regardless of what the router claims
//! to have enforced.
//!
//! The adapter never touches balances. Moving the input and output assets
//! between custody and the router is the engine's job.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use strongbox_protocol::config::BPS_DENOMINATOR;
use strongbox_protocol::{Address, Amount, AssetId};

use crate::clock::Clock;
use crate::math::mul_div;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while converting between assets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The router has no path between the two assets.
    #[error("no route from {asset_in} to {asset_out}")]
    NoRoute {
        /// Asset offered.
        asset_in: AssetId,
        /// Asset wanted.
        asset_out: AssetId,
    },

    /// The realized output fell below the caller's minimum.
    #[error("slippage exceeded: wanted at least {min_amount_out}, got {amount_out}")]
    SlippageExceeded {
        /// Minimum acceptable output.
        min_amount_out: Amount,
        /// What the router produced.
        amount_out: Amount,
    },

    /// The request was issued with a deadline already in the past.
    #[error("swap deadline {deadline} passed at {now}")]
    DeadlineExpired {
        /// Deadline carried by the request.
        deadline: u64,
        /// Time of the attempt.
        now: u64,
    },

    /// The router failed for its own reasons.
    #[error("router failure: {0}")]
    Router(String),
}

// ---------------------------------------------------------------------------
// Router Boundary
// ---------------------------------------------------------------------------

/// One exact-input swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    /// Asset offered.
    pub asset_in: AssetId,
    /// Asset wanted.
    pub asset_out: AssetId,
    /// Exact amount of `asset_in` to sell.
    pub amount_in: Amount,
    /// Minimum acceptable amount of `asset_out`.
    pub min_amount_out: Amount,
    /// Who receives the output.
    pub recipient: Address,
    /// Unix seconds after which the swap must not execute.
    pub deadline: u64,
}

/// An external routing service.
pub trait SwapRouter: Send {
    /// Whether any path exists from `asset_in` to `asset_out`.
    fn has_route(&self, asset_in: &AssetId, asset_out: &AssetId) -> bool;

    /// Expected output for selling `amount_in`, without executing.
    fn quote(
        &self,
        asset_in: &AssetId,
        asset_out: &AssetId,
        amount_in: Amount,
    ) -> Result<Amount, ExchangeError>;

    /// Execute the swap and return the realized output.
    fn swap_exact_in(&mut self, request: &SwapRequest) -> Result<Amount, ExchangeError>;
}

// ---------------------------------------------------------------------------
// ExchangeAdapter
// ---------------------------------------------------------------------------

/// Converts assets into the accounting unit through a [`SwapRouter`].
pub struct ExchangeAdapter {
    router: Box<dyn SwapRouter>,
    clock: Arc<dyn Clock>,
    accounting_asset: AssetId,
}

impl ExchangeAdapter {
    /// Wraps `router`; conversions always target `accounting_asset`.
    pub fn new(router: Box<dyn SwapRouter>, clock: Arc<dyn Clock>, accounting_asset: AssetId) -> Self {
        Self {
            router,
            clock,
            accounting_asset,
        }
    }

    /// The asset every conversion produces.
    pub fn accounting_asset(&self) -> AssetId {
        self.accounting_asset
    }

    /// Whether `asset_in` can be converted into the accounting unit.
    pub fn has_route(&self, asset_in: &AssetId) -> bool {
        self.router.has_route(asset_in, &self.accounting_asset)
    }

    /// Router estimate for an arbitrary pair. Identical assets quote 1:1.
    pub fn quote(
        &self,
        asset_in: &AssetId,
        asset_out: &AssetId,
        amount_in: Amount,
    ) -> Result<Amount, ExchangeError> {
        if asset_in == asset_out {
            return Ok(amount_in);
        }
        if !self.router.has_route(asset_in, asset_out) {
            return Err(ExchangeError::NoRoute {
                asset_in: *asset_in,
                asset_out: *asset_out,
            });
        }
        self.router.quote(asset_in, asset_out, amount_in)
    }

    /// Sell exactly `amount_in` of `asset_in` for the accounting unit.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::DeadlineExpired`] if `deadline` is already past.
    /// - [`ExchangeError::NoRoute`] if the router has no path.
    /// - [`ExchangeError::SlippageExceeded`] if the output is below
    ///   `min_amount_out`.
    /// - [`ExchangeError::Router`] for anything the router reports.
    pub fn convert(
        &mut self,
        asset_in: AssetId,
        amount_in: Amount,
        min_amount_out: Amount,
        recipient: Address,
        deadline: u64,
    ) -> Result<Amount, ExchangeError> {
        let now = self.clock.now();
        if now > deadline {
            return Err(ExchangeError::DeadlineExpired { deadline, now });
        }
        if !self.has_route(&asset_in) {
            return Err(ExchangeError::NoRoute {
                asset_in,
                asset_out: self.accounting_asset,
            });
        }

        let request = SwapRequest {
            asset_in,
            asset_out: self.accounting_asset,
            amount_in,
            min_amount_out,
            recipient,
            deadline,
        };
        let amount_out = self.router.swap_exact_in(&request)?;

        if amount_out < min_amount_out {
            return Err(ExchangeError::SlippageExceeded {
                min_amount_out,
                amount_out,
            });
        }
        tracing::debug!(%asset_in, amount_in, amount_out, "swap settled");
        Ok(amount_out)
    }
}

impl std::fmt::Debug for ExchangeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeAdapter")
            .field("accounting_asset", &self.accounting_asset)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// FixedRateRouter
// ---------------------------------------------------------------------------

/// Output per unit of input, as a fraction of smallest units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    /// Output smallest units.
    pub numerator: Amount,
    /// Input smallest units.
    pub denominator: Amount,
}

#[derive(Debug, Default)]
struct RouterBook {
    pairs: HashMap<(AssetId, AssetId), Rate>,
    fee_bps: u32,
    offline: bool,
}

/// A router with administratively set rates and a flat fee.
///
/// Clones share the same rate book, so a caller can hand one clone to the
/// engine and keep another to move rates around.
#[derive(Debug, Clone, Default)]
pub struct FixedRateRouter {
    book: Arc<RwLock<RouterBook>>,
}

impl FixedRateRouter {
    /// A router with no routes and no fee.
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge `fee_bps` on every swap output.
    pub fn with_fee_bps(self, fee_bps: u32) -> Self {
        self.set_fee_bps(fee_bps);
        self
    }

    /// Change the fee charged on swap output.
    pub fn set_fee_bps(&self, fee_bps: u32) {
        self.book.write().fee_bps = fee_bps.min(BPS_DENOMINATOR);
    }

    /// Set the rate for one direction of a pair.
    pub fn set_rate(&self, asset_in: AssetId, asset_out: AssetId, numerator: Amount, denominator: Amount) {
        self.book.write().pairs.insert(
            (asset_in, asset_out),
            Rate {
                numerator,
                denominator,
            },
        );
    }

    /// Remove a route.
    pub fn remove_route(&self, asset_in: &AssetId, asset_out: &AssetId) {
        self.book.write().pairs.remove(&(*asset_in, *asset_out));
    }

    /// While offline every swap fails; quotes and route checks still work.
    pub fn set_offline(&self, offline: bool) {
        self.book.write().offline = offline;
    }

    fn output(&self, asset_in: &AssetId, asset_out: &AssetId, amount_in: Amount) -> Result<Amount, ExchangeError> {
        let book = self.book.read();
        let rate = book
            .pairs
            .get(&(*asset_in, *asset_out))
            .ok_or(ExchangeError::NoRoute {
                asset_in: *asset_in,
                asset_out: *asset_out,
            })?;
        let gross = mul_div(amount_in, rate.numerator, rate.denominator)
            .ok_or_else(|| ExchangeError::Router("rate overflow".into()))?;
        let keep = Amount::from(BPS_DENOMINATOR - book.fee_bps);
        mul_div(gross, keep, Amount::from(BPS_DENOMINATOR))
            .ok_or_else(|| ExchangeError::Router("fee overflow".into()))
    }
}

impl SwapRouter for FixedRateRouter {
    fn has_route(&self, asset_in: &AssetId, asset_out: &AssetId) -> bool {
        self.book.read().pairs.contains_key(&(*asset_in, *asset_out))
    }

    fn quote(&self, asset_in: &AssetId, asset_out: &AssetId, amount_in: Amount) -> Result<Amount, ExchangeError> {
        self.output(asset_in, asset_out, amount_in)
    }

    fn swap_exact_in(&mut self, request: &SwapRequest) -> Result<Amount, ExchangeError> {
        if self.book.read().offline {
            return Err(ExchangeError::Router("router offline".into()));
        }
        let amount_out = self.output(&request.asset_in, &request.asset_out, request.amount_in)?;
        if amount_out < request.min_amount_out {
            return Err(ExchangeError::SlippageExceeded {
                min_amount_out: request.min_amount_out,
                amount_out,
            });
        }
        Ok(amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: u64 = 1_000;

    fn usd() -> AssetId {
        AssetId::token(Address::repeat_tail(0x01))
    }

    fn tkn() -> AssetId {
        AssetId::token(Address::repeat_tail(0x0A))
    }

    fn adapter(router: &FixedRateRouter) -> ExchangeAdapter {
        ExchangeAdapter::new(
            Box::new(router.clone()),
            Arc::new(ManualClock::new(NOW)),
            usd(),
        )
    }

    fn recipient() -> Address {
        Address::repeat_tail(0xCC)
    }

    #[test]
    fn converts_at_rate_less_fee() {
        // 8-dp token at 2.0 into 6-dp units: 1e8 in -> 2e6 out.
        let router = FixedRateRouter::new().with_fee_bps(100);
        router.set_rate(tkn(), usd(), 2_000_000, 100_000_000);
        let mut ex = adapter(&router);

        let out = ex
            .convert(tkn(), 100 * 100_000_000, 190_000_000, recipient(), NOW + 60)
            .unwrap();
        assert_eq!(out, 198_000_000);
    }

    #[test]
    fn below_minimum_is_slippage() {
        let router = FixedRateRouter::new().with_fee_bps(600);
        router.set_rate(tkn(), usd(), 1, 1);
        let err = adapter(&router)
            .convert(tkn(), 1_000, 950, recipient(), NOW)
            .unwrap_err();
        assert_eq!(
            err,
            ExchangeError::SlippageExceeded {
                min_amount_out: 950,
                amount_out: 940,
            }
        );
    }

    #[test]
    fn missing_route_is_reported() {
        let router = FixedRateRouter::new();
        let mut ex = adapter(&router);
        assert!(!ex.has_route(&tkn()));
        assert!(matches!(
            ex.convert(tkn(), 1, 0, recipient(), NOW),
            Err(ExchangeError::NoRoute { .. })
        ));
    }

    #[test]
    fn expired_deadline_fails_before_routing() {
        let router = FixedRateRouter::new();
        router.set_rate(tkn(), usd(), 1, 1);
        let err = adapter(&router)
            .convert(tkn(), 1, 0, recipient(), NOW - 1)
            .unwrap_err();
        assert_eq!(
            err,
            ExchangeError::DeadlineExpired {
                deadline: NOW - 1,
                now: NOW,
            }
        );
    }

    #[test]
    fn offline_router_fails_swaps_only() {
        let router = FixedRateRouter::new();
        router.set_rate(tkn(), usd(), 1, 1);
        router.set_offline(true);
        let mut ex = adapter(&router);
        assert!(ex.has_route(&tkn()));
        assert_eq!(ex.quote(&tkn(), &usd(), 5).unwrap(), 5);
        assert!(matches!(
            ex.convert(tkn(), 5, 0, recipient(), NOW),
            Err(ExchangeError::Router(_))
        ));
    }

    #[test]
    fn quote_same_asset_is_identity() {
        let router = FixedRateRouter::new();
        assert_eq!(adapter(&router).quote(&usd(), &usd(), 42).unwrap(), 42);
    }

    #[test]
    fn removed_route_disappears() {
        let router = FixedRateRouter::new();
        router.set_rate(tkn(), usd(), 1, 1);
        let ex = adapter(&router);
        router.remove_route(&tkn(), &usd());
        assert!(!ex.has_route(&tkn()));
    }
}
