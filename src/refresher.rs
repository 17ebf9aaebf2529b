//! Market state refresher: one batched chain read per market, projection
//! write-back, and the refreshed in-memory state handed straight to
//! snapshotting/analytics so no second read is needed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tracing::debug;

use crate::chain::rpc::{MarketInfo, RpcClient};
use crate::config::REFRESH_CONCURRENCY;
use crate::db::markets::{MarketRepo, TrackedMarket};
use crate::error::Result;
use crate::types::{CycleError, CyclePhase, MarketAddress, MarketCycleState};

pub struct MarketRefresher {
    rpc: Arc<RpcClient>,
    repo: MarketRepo,
}

impl MarketRefresher {
    pub fn new(rpc: Arc<RpcClient>, pool: SqlitePool) -> Self {
        Self { rpc, repo: MarketRepo::new(pool) }
    }

    /// Refresh one market: read, write the projection, backfill tokens if
    /// the read included them, and return the cycle state.
    ///
    /// `include_tokens` is the per-cycle token-backfill allowance decided
    /// by the orchestrator — token reads happen only while the addresses
    /// are unknown AND this market is inside the allowance.
    pub async fn refresh_one(
        &self,
        market: &TrackedMarket,
        include_tokens: bool,
    ) -> Result<MarketCycleState> {
        let need_tokens = include_tokens && !market.has_tokens;
        let (info, tokens) = self.rpc.read_market(&market.address, need_tokens).await?;

        let yes_price = display_price(info.yes_probability, info.yes_price);
        let no_price = display_price(info.no_probability, info.no_price);

        self.repo
            .write_projection(&market.address, &info, yes_price, no_price)
            .await?;

        if let Some((yes_token, no_token)) = tokens {
            self.repo
                .backfill_tokens(&market.address, &yes_token, &no_token)
                .await?;
            debug!(market = %market.address, "token addresses backfilled");
        }

        Ok(cycle_state(market.address, &info, yes_price, no_price))
    }

    /// Refresh a set of markets with bounded concurrency. Failures are
    /// per-market soft errors; the rest of the set still refreshes.
    pub async fn refresh_all(
        &self,
        markets: &[(TrackedMarket, bool)],
    ) -> (HashMap<MarketAddress, MarketCycleState>, Vec<CycleError>) {
        // Materialize the per-market futures eagerly as owned, boxed `Send`
        // futures before handing them to the buffered stream. Driving them via
        // `stream::iter(futures)` (rather than `stream::iter(markets).map(..)`)
        // keeps the lifetimes concrete and avoids the higher-ranked
        // "Send is not general enough" limitation the streaming `.map` closure
        // otherwise triggers. Bounded concurrency is unchanged.
        type MarketFuture<'a> =
            Pin<Box<dyn Future<Output = (MarketAddress, Result<MarketCycleState>)> + Send + 'a>>;
        let futures: Vec<MarketFuture<'_>> = markets
            .iter()
            .map(|(market, include_tokens)| {
                Box::pin(async move {
                    (market.address, self.refresh_one(market, *include_tokens).await)
                }) as MarketFuture<'_>
            })
            .collect();

        let results: Vec<(MarketAddress, Result<MarketCycleState>)> = stream::iter(futures)
            .buffer_unordered(REFRESH_CONCURRENCY)
            .collect()
            .await;

        let mut states = HashMap::with_capacity(results.len());
        let mut errors = Vec::new();
        for (address, result) in results {
            match result {
                Ok(state) => {
                    states.insert(address, state);
                }
                Err(e) => {
                    errors.push(CycleError::new(
                        CyclePhase::Refresh,
                        address.to_db(),
                        e.to_string(),
                    ));
                }
            }
        }
        (states, errors)
    }
}

/// Display price rule: the probability field wins; the raw price field is
/// only consulted when probability is exactly zero. YES+NO can then sum
/// away from 1 — preserved as observed upstream.
fn display_price(probability: f64, raw_price: f64) -> f64 {
    if probability == 0.0 {
        raw_price
    } else {
        probability
    }
}

fn cycle_state(
    address: MarketAddress,
    info: &MarketInfo,
    yes_price: f64,
    no_price: f64,
) -> MarketCycleState {
    MarketCycleState {
        address,
        yes_price,
        no_price,
        yes_shares: info.yes_shares,
        no_shares: info.no_shares,
        total_collateral: info.total_collateral,
        liquidity_param: info.liquidity_param,
        resolved: info.resolved,
        yes_wins: info.resolved.then_some(info.yes_wins),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address};

    #[test]
    fn probability_wins_unless_exactly_zero() {
        assert_eq!(display_price(0.65, 0.60), 0.65);
        assert_eq!(display_price(0.0, 0.60), 0.60);
        // Even a sliver of probability beats the raw price.
        assert_eq!(display_price(1e-12, 0.60), 1e-12);
    }

    #[test]
    fn cycle_state_carries_resolution_only_when_resolved() {
        let info = MarketInfo {
            resolution_time: 0,
            oracle: Address::ZERO,
            yes_price: 0.5,
            no_price: 0.5,
            yes_probability: 0.5,
            no_probability: 0.5,
            yes_shares: 1.0,
            no_shares: 1.0,
            total_collateral: 1.0,
            liquidity_param: 10.0,
            resolved: false,
            yes_wins: true, // garbage until resolved
        };
        let addr = MarketAddress(address!("00000000000000000000000000000000000000bb"));

        let state = cycle_state(addr, &info, 0.5, 0.5);
        assert_eq!(state.yes_wins, None);

        let resolved = MarketInfo { resolved: true, ..info };
        let state = cycle_state(addr, &resolved, 1.0, 0.0);
        assert_eq!(state.yes_wins, Some(true));
    }
}
