//! Cycle orchestrator — the scheduled entry point.
//!
//! One invocation: take the sync lock, pull and decode new logs, apply
//! trades and resolutions, refresh every tracked market, snapshot, run
//! analytics, release the lock with the new height and the cycle's soft
//! errors. Hard failures (height, market enumeration, sync row, the log
//! pull itself) abort without advancing the cursor; everything else is a
//! per-item soft error and the cycle still counts as a success.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::analytics::AnalyticsEngine;
use crate::chain::events::{decode_log, tracked_topics};
use crate::chain::logs::LogClient;
use crate::chain::rpc::RpcClient;
use crate::config::{Config, TOKEN_BACKFILL_BATCH};
use crate::db::markets::{MarketRepo, TrackedMarket};
use crate::db::snapshots::SnapshotStore;
use crate::db::sync_state::SyncStateStore;
use crate::db::trades::TradeLedger;
use crate::error::Result;
use crate::refresher::MarketRefresher;
use crate::types::{
    hash_hex, now_secs, CycleError, CyclePhase, CycleSummary, DecodedEvent, MarketAddress,
};

pub struct Indexer {
    cfg: Config,
    sync: SyncStateStore,
    logs: LogClient,
    rpc: Arc<RpcClient>,
    refresher: MarketRefresher,
    ledger: TradeLedger,
    repo: MarketRepo,
    snapshots: SnapshotStore,
    analytics: AnalyticsEngine,
}

impl Indexer {
    pub fn new(cfg: Config, pool: SqlitePool) -> Result<Self> {
        let rpc = Arc::new(RpcClient::new(cfg.rpc_url.clone())?);
        Ok(Self {
            sync: SyncStateStore::new(pool.clone(), cfg.chain_id),
            logs: LogClient::new(cfg.log_api_url.clone())?,
            refresher: MarketRefresher::new(Arc::clone(&rpc), pool.clone()),
            rpc,
            ledger: TradeLedger::new(pool.clone()),
            repo: MarketRepo::new(pool.clone()),
            snapshots: SnapshotStore::new(pool.clone()),
            analytics: AnalyticsEngine::new(pool),
            cfg,
        })
    }

    pub fn sync_state(&self) -> &SyncStateStore {
        &self.sync
    }

    /// Run one cycle. `Ok(None)` means another invocation holds the lock
    /// and this one no-oped.
    pub async fn run_cycle(&self) -> Result<Option<CycleSummary>> {
        if !self.sync.acquire().await? {
            info!(chain_id = self.cfg.chain_id, "sync lock held, skipping cycle");
            return Ok(None);
        }

        match self.cycle_inner().await {
            Ok(summary) => {
                self.sync.release(summary.to_block, &summary.errors).await?;
                info!(
                    from = summary.from_block,
                    to = summary.to_block,
                    logs = summary.logs_fetched,
                    trades = summary.trades_applied,
                    resolutions = summary.resolutions_applied,
                    refreshed = summary.markets_refreshed,
                    soft_errors = summary.errors.len(),
                    "cycle complete"
                );
                Ok(Some(summary))
            }
            Err(e) => {
                // Keep the cursor where it was: MAX() in release ignores 0.
                let err = CycleError::new(CyclePhase::Cycle, "cycle", e.to_string());
                if let Err(release_err) = self.sync.release(0, &[err]).await {
                    warn!("failed to release sync lock after hard error: {release_err}");
                }
                Err(e)
            }
        }
    }

    async fn cycle_inner(&self) -> Result<CycleSummary> {
        let chain_height = self.rpc.chain_height().await?;
        let last = self.sync.last_indexed_block().await?;

        if chain_height <= last {
            info!(height = chain_height, "no new blocks");
            return Ok(empty_summary(self.cfg.chain_id, last));
        }
        let from = last + 1;

        let tracked = self.repo.tracked().await?;
        let mut errors: Vec<CycleError> = Vec::new();

        // 4. Pull and apply the new log range.
        let addresses: Vec<MarketAddress> = tracked.iter().map(|m| m.address).collect();
        let raw_logs = self
            .logs
            .fetch_logs(from, chain_height, &addresses, &tracked_topics())
            .await?;

        let mut trades_applied = 0usize;
        let mut resolutions_applied = 0usize;
        let mut touched: HashSet<MarketAddress> = HashSet::new();

        for raw in &raw_logs {
            match decode_log(raw) {
                Ok(Some(DecodedEvent::Trade(trade))) => match self.ledger.apply(&trade).await {
                    Ok(inserted) => {
                        if inserted {
                            trades_applied += 1;
                        }
                        touched.insert(trade.market);
                    }
                    Err(e) => errors.push(CycleError::new(
                        CyclePhase::Ledger,
                        hash_hex(&trade.tx_hash),
                        e.to_string(),
                    )),
                },
                Ok(Some(DecodedEvent::Resolution(res))) => {
                    match self.repo.apply_resolution(&res.market, res.yes_wins).await {
                        Ok(()) => {
                            resolutions_applied += 1;
                            touched.insert(res.market);
                            info!(market = %res.market, yes_wins = res.yes_wins, "market resolved");
                        }
                        Err(e) => errors.push(CycleError::new(
                            CyclePhase::Resolution,
                            res.market.to_db(),
                            e.to_string(),
                        )),
                    }
                }
                Ok(None) => {}
                Err(e) => errors.push(CycleError::new(
                    CyclePhase::Decode,
                    hash_hex(&raw.tx_hash),
                    e.to_string(),
                )),
            }
        }

        // 5+6. Refresh every tracked market, event-touched first; cap how
        // many get the extra token-lookup reads this cycle.
        let allowance: HashSet<MarketAddress> = match self
            .repo
            .missing_tokens(TOKEN_BACKFILL_BATCH as i64)
            .await
        {
            Ok(list) => list.into_iter().collect(),
            Err(e) => {
                errors.push(CycleError::new(CyclePhase::Backfill, "missing-tokens", e.to_string()));
                HashSet::new()
            }
        };

        let plan = refresh_plan(tracked, &touched, &allowance);
        let (states, refresh_errors) = self.refresher.refresh_all(&plan).await;
        errors.extend(refresh_errors);

        // 7. Snapshot the cycle and derive analytics from it.
        let now = now_secs();
        if let Err(e) = self.snapshots.prune(now).await {
            errors.push(CycleError::new(CyclePhase::Snapshot, "prune", e.to_string()));
        }

        let mut snapshots_written = 0usize;
        for state in states.values().filter(|s| !s.resolved) {
            match self.snapshots.append(state, now).await {
                Ok(()) => snapshots_written += 1,
                Err(e) => errors.push(CycleError::new(
                    CyclePhase::Snapshot,
                    state.address.to_db(),
                    e.to_string(),
                )),
            }
        }

        errors.extend(self.analytics.run(&states, now).await);

        Ok(CycleSummary {
            chain_id: self.cfg.chain_id,
            from_block: from,
            to_block: chain_height,
            logs_fetched: raw_logs.len(),
            trades_applied,
            resolutions_applied,
            markets_refreshed: states.len(),
            snapshots_written,
            errors,
        })
    }
}

fn empty_summary(chain_id: i64, last: u64) -> CycleSummary {
    CycleSummary {
        chain_id,
        from_block: last,
        to_block: last,
        logs_fetched: 0,
        trades_applied: 0,
        resolutions_applied: 0,
        markets_refreshed: 0,
        snapshots_written: 0,
        errors: Vec::new(),
    }
}

/// Refresh ordering and token allowance: markets touched by this cycle's
/// events go first so their projection is current before snapshotting;
/// `allowance` marks which markets get token-lookup reads this cycle.
fn refresh_plan(
    tracked: Vec<TrackedMarket>,
    touched: &HashSet<MarketAddress>,
    allowance: &HashSet<MarketAddress>,
) -> Vec<(TrackedMarket, bool)> {
    let mut plan: Vec<(TrackedMarket, bool)> = tracked
        .into_iter()
        .map(|m| {
            let include_tokens = allowance.contains(&m.address);
            (m, include_tokens)
        })
        .collect();
    plan.sort_by_key(|(m, _)| !touched.contains(&m.address));
    plan
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
