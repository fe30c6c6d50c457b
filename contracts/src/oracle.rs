//! # Price Oracle Adapter
//!
//! Reads prices from an external feed and refuses to hand anything
//! questionable to the conversion math. A round is rejected when:
//!
//! - the answer is zero or negative,
//! - the round never completed (`updated_at == 0`),
//! - the answer's decimal count is beyond what the math supports, or
//! - `now − updated_at` is strictly greater than the staleness threshold.
//!
//! An age exactly equal to the threshold is still fresh. The threshold is
//! bank policy (see [`BankConfig`](strongbox_protocol::BankConfig)), not a
//! per-feed setting.
//!
//! The feed itself is an untrusted collaborator behind [`PriceFeed`]. The
//! adapter has no side effects.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use strongbox_protocol::config::MAX_ASSET_DECIMALS;
use strongbox_protocol::{Amount, FeedRef};

use crate::clock::Clock;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a price is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// The feed does not exist or could not be read.
    #[error("price feed {0} is unavailable")]
    Unavailable(FeedRef),

    /// The feed reported a zero or negative price.
    #[error("price feed {feed} reported invalid price {answer}")]
    InvalidPrice {
        /// Feed that was queried.
        feed: FeedRef,
        /// The raw answer.
        answer: i128,
    },

    /// The feed's latest round has no timestamp.
    #[error("price feed {0} reported an incomplete round")]
    IncompleteRound(FeedRef),

    /// The feed uses more decimals than the conversion math supports.
    #[error("price feed {feed} uses {decimals} decimals")]
    UnsupportedDecimals {
        /// Feed that was queried.
        feed: FeedRef,
        /// Decimals it reported.
        decimals: u8,
    },

    /// The latest round is older than the staleness threshold.
    #[error("price feed {feed} is stale: {age_secs}s old, threshold {threshold_secs}s")]
    Stale {
        /// Feed that was queried.
        feed: FeedRef,
        /// Age of the latest round.
        age_secs: u64,
        /// Configured threshold.
        threshold_secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Feed Boundary
// ---------------------------------------------------------------------------

/// The raw latest round as reported by a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRound {
    /// Price of one whole asset unit in accounting currency, scaled by
    /// `10^decimals`. Signed because feeds may report garbage.
    pub answer: i128,
    /// Decimal places of `answer`.
    pub decimals: u8,
    /// Unix seconds when the round was last updated. Zero means the round
    /// never completed.
    pub updated_at: u64,
}

/// An external price source.
pub trait PriceFeed: Send + Sync {
    /// The latest round for `feed`.
    fn latest_round(&self, feed: &str) -> Result<PriceRound, OracleError>;
}

/// A validated price, consumed immediately and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    /// Feed the price came from.
    pub feed: FeedRef,
    /// Positive price scaled by `10^decimals`.
    pub price: Amount,
    /// Decimal places of `price`.
    pub decimals: u8,
    /// When the feed last updated.
    pub as_of: u64,
}

// ---------------------------------------------------------------------------
// PriceOracleAdapter
// ---------------------------------------------------------------------------

/// Validating wrapper around a [`PriceFeed`].
#[derive(Clone)]
pub struct PriceOracleAdapter {
    source: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
    staleness_threshold_secs: u64,
}

impl PriceOracleAdapter {
    /// Wraps `source`, rejecting rounds older than `staleness_threshold_secs`.
    pub fn new(
        source: Arc<dyn PriceFeed>,
        clock: Arc<dyn Clock>,
        staleness_threshold_secs: u64,
    ) -> Self {
        Self {
            source,
            clock,
            staleness_threshold_secs,
        }
    }

    /// The configured staleness threshold.
    pub fn staleness_threshold_secs(&self) -> u64 {
        self.staleness_threshold_secs
    }

    /// Fetch and validate the latest price for `feed`.
    ///
    /// # Errors
    ///
    /// Any [`OracleError`]; see the module docs for the rules.
    pub fn get_price(&self, feed: &str) -> Result<PriceQuote, OracleError> {
        let round = self.source.latest_round(feed)?;

        if round.answer <= 0 {
            return Err(OracleError::InvalidPrice {
                feed: feed.to_string(),
                answer: round.answer,
            });
        }
        if round.updated_at == 0 {
            return Err(OracleError::IncompleteRound(feed.to_string()));
        }
        if round.decimals > MAX_ASSET_DECIMALS {
            return Err(OracleError::UnsupportedDecimals {
                feed: feed.to_string(),
                decimals: round.decimals,
            });
        }

        // A round stamped in the future counts as brand new.
        let age_secs = self.clock.now().saturating_sub(round.updated_at);
        if age_secs > self.staleness_threshold_secs {
            return Err(OracleError::Stale {
                feed: feed.to_string(),
                age_secs,
                threshold_secs: self.staleness_threshold_secs,
            });
        }

        Ok(PriceQuote {
            feed: feed.to_string(),
            price: round.answer.unsigned_abs(),
            decimals: round.decimals,
            as_of: round.updated_at,
        })
    }
}

impl std::fmt::Debug for PriceOracleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceOracleAdapter")
            .field("staleness_threshold_secs", &self.staleness_threshold_secs)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ManualPriceFeed
// ---------------------------------------------------------------------------

/// A feed whose rounds are pushed in by hand: by tests, or by the node's
/// price keeper endpoint.
#[derive(Debug, Default)]
pub struct ManualPriceFeed {
    rounds: RwLock<HashMap<FeedRef, PriceRound>>,
}

impl ManualPriceFeed {
    /// An empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a round for `feed`, replacing any previous one.
    pub fn set_price(&self, feed: &str, answer: i128, decimals: u8, updated_at: u64) {
        self.rounds.write().insert(
            feed.to_string(),
            PriceRound {
                answer,
                decimals,
                updated_at,
            },
        );
    }

    /// Drop a feed entirely.
    pub fn remove(&self, feed: &str) {
        self.rounds.write().remove(feed);
    }

    /// The feeds currently published.
    pub fn feeds(&self) -> Vec<FeedRef> {
        let mut feeds: Vec<FeedRef> = self.rounds.read().keys().cloned().collect();
        feeds.sort();
        feeds
    }
}

impl PriceFeed for ManualPriceFeed {
    fn latest_round(&self, feed: &str) -> Result<PriceRound, OracleError> {
        self.rounds
            .read()
            .get(feed)
            .copied()
            .ok_or_else(|| OracleError::Unavailable(feed.to_string()))
    }
}
