//! Derived market signals: velocity/acceleration over short windows,
//! 24h price stress, liquidity fragility, trailing activity, and the
//! cohort-normalized heat score.
//!
//! Runs once per cycle over the refreshed states, skipping resolved
//! markets so their last computed values stay frozen.

use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::{
    ALPHA_DEEP, NO_TRADE_HOURS, SNAPSHOT_RETENTION_SECS, VELOCITY_OFFSETS_MIN,
    VELOCITY_TOLERANCE_SECS,
};
use crate::db::models::SnapshotRow;
use crate::db::snapshots::SnapshotStore;
use crate::error::Result;
use crate::types::{CycleError, CyclePhase, MarketAddress, MarketCycleState};

/// Heat score factor weights.
const W_COUNT: f64 = 0.30;
const W_VOLUME: f64 = 0.25;
const W_STRESS: f64 = 0.15;
const W_RECENCY: f64 = 0.20;
const W_LIQUIDITY: f64 = 0.10;

/// One market's computed signals, staged until the cohort maxima are known.
#[derive(Debug)]
struct MarketMetrics {
    address: MarketAddress,
    velocity_1m: f64,
    velocity_5m: f64,
    velocity_15m: f64,
    acceleration: f64,
    stress: f64,
    fragility: f64,
    trades_24h: i64,
    volume_24h: f64,
    fee_velocity_24h: f64,
    recency: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    trades: i64,
    volume: Option<f64>,
    fees: Option<f64>,
    last_trade_at: Option<i64>,
}

pub struct AnalyticsEngine {
    pool: SqlitePool,
    snapshots: SnapshotStore,
}

impl AnalyticsEngine {
    pub fn new(pool: SqlitePool) -> Self {
        let snapshots = SnapshotStore::new(pool.clone());
        Self { pool, snapshots }
    }

    /// Compute and persist analytics for this cycle's unresolved cohort.
    /// Per-market failures are collected; the rest of the cohort proceeds.
    pub async fn run(
        &self,
        states: &HashMap<MarketAddress, MarketCycleState>,
        now: i64,
    ) -> Vec<CycleError> {
        let mut errors = Vec::new();
        let mut metrics = Vec::new();

        for state in states.values() {
            if state.resolved {
                debug!(market = %state.address, "resolved, analytics frozen");
                continue;
            }
            match self.compute_one(state, now).await {
                Ok(m) => metrics.push(m),
                Err(e) => errors.push(CycleError::new(
                    CyclePhase::Analytics,
                    state.address.to_db(),
                    e.to_string(),
                )),
            }
        }

        // Cross-sectional normalization: each market's activity against the
        // busiest market of this cycle's cohort.
        let max_count = metrics.iter().map(|m| m.trades_24h).max().unwrap_or(0);
        let max_volume = metrics.iter().map(|m| m.volume_24h).fold(0.0, f64::max);

        let mut persisted = 0usize;
        for m in &metrics {
            let heat = heat_score(
                norm_count(m.trades_24h, max_count),
                norm_volume(m.volume_24h, max_volume),
                m.stress,
                m.recency,
                m.fragility,
            );
            if let Err(e) = self.persist(m, heat, now).await {
                errors.push(CycleError::new(
                    CyclePhase::Analytics,
                    m.address.to_db(),
                    e.to_string(),
                ));
            } else {
                persisted += 1;
            }
        }

        info!(cohort = metrics.len(), persisted, "analytics pass complete");
        errors
    }

    async fn compute_one(&self, state: &MarketCycleState, now: i64) -> Result<MarketMetrics> {
        let snapshots = self
            .snapshots
            .for_market_since(&state.address.to_db(), now - SNAPSHOT_RETENTION_SECS)
            .await?;

        let [v1, v5, v15] = VELOCITY_OFFSETS_MIN
            .map(|offset| velocity(&snapshots, now, offset, state.yes_price));

        let activity = self.activity(&state.address, now).await?;
        let hours_since_last = match activity.last_trade_at {
            Some(t) => (now - t).max(0) as f64 / 3600.0,
            None => NO_TRADE_HOURS,
        };

        Ok(MarketMetrics {
            address: state.address,
            velocity_1m: v1,
            velocity_5m: v5,
            velocity_15m: v15,
            acceleration: acceleration(v1, v5),
            stress: stress(&snapshots),
            fragility: fragility(state.liquidity_param),
            trades_24h: activity.trades,
            volume_24h: activity.volume.unwrap_or(0.0),
            fee_velocity_24h: activity.fees.unwrap_or(0.0),
            recency: recency(hours_since_last),
        })
    }

    async fn activity(&self, address: &MarketAddress, now: i64) -> Result<ActivityRow> {
        let row = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT COUNT(*) AS trades,
                   SUM(CAST(amount AS REAL)) AS volume,
                   SUM(CAST(creator_fee AS REAL)) AS fees,
                   MAX(block_time) AS last_trade_at
            FROM trades
            WHERE market_address = ? AND block_time > ?
            "#,
        )
        .bind(address.to_db())
        .bind(now - SNAPSHOT_RETENTION_SECS)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn persist(&self, m: &MarketMetrics, heat: f64, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE markets
            SET velocity_1m = ?, velocity_5m = ?, velocity_15m = ?,
                acceleration = ?, stress_score = ?, fragility = ?,
                heat_score = ?, volume_24h = ?, trades_24h = ?,
                fee_velocity_24h = ?, analytics_at = ?
            WHERE address = ?
            "#,
        )
        .bind(m.velocity_1m)
        .bind(m.velocity_5m)
        .bind(m.velocity_15m)
        .bind(m.acceleration)
        .bind(m.stress)
        .bind(m.fragility)
        .bind(heat)
        .bind(m.volume_24h)
        .bind(m.trades_24h)
        .bind(m.fee_velocity_24h)
        .bind(now)
        .bind(m.address.to_db())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signal math
// ---------------------------------------------------------------------------

/// Price change since the snapshot nearest (now − offset), accepted within
/// a 90-second tolerance. No usable snapshot means no signal yet: 0.
fn velocity(snapshots: &[SnapshotRow], now: i64, offset_min: i64, current_price: f64) -> f64 {
    let target = now - offset_min * 60;
    snapshots
        .iter()
        .filter(|s| (s.time - target).abs() <= VELOCITY_TOLERANCE_SECS)
        .min_by_key(|s| (s.time - target).abs())
        .map(|s| current_price - s.yes_price)
        .unwrap_or(0.0)
}

/// Per-minute-normalized second derivative: v1m minus the per-minute rate
/// implied by v5m.
fn acceleration(v1m: f64, v5m: f64) -> f64 {
    v1m - v5m / 5.0
}

/// 24h YES-price range over 0.5, saturating at 1 — a 50-point swing is
/// maximal stress.
fn stress(snapshots: &[SnapshotRow]) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for s in snapshots {
        min = min.min(s.yes_price);
        max = max.max(s.yes_price);
    }
    if snapshots.is_empty() {
        return 0.0;
    }
    ((max - min) / 0.5).clamp(0.0, 1.0)
}

/// 1 − α/ALPHA_DEEP floored at 0; a market with no liquidity parameter is
/// maximally fragile.
fn fragility(liquidity_param: f64) -> f64 {
    if liquidity_param <= 0.0 {
        return 1.0;
    }
    (1.0 - liquidity_param / ALPHA_DEEP).max(0.0)
}

fn recency(hours_since_last_trade: f64) -> f64 {
    (1.0 - hours_since_last_trade / NO_TRADE_HOURS).clamp(0.0, 1.0)
}

fn norm_count(count: i64, cohort_max: i64) -> f64 {
    count as f64 / if cohort_max > 0 { cohort_max as f64 } else { 1.0 }
}

fn norm_volume(volume: f64, cohort_max: f64) -> f64 {
    volume / if cohort_max > 0.0 { cohort_max } else { 1.0 }
}

fn heat_score(
    norm_count: f64,
    norm_volume: f64,
    stress: f64,
    recency: f64,
    fragility: f64,
) -> f64 {
    let score = 100.0
        * (W_COUNT * norm_count
            + W_VOLUME * norm_volume
            + W_STRESS * stress
            + W_RECENCY * recency
            + W_LIQUIDITY * (1.0 - fragility));
    score.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    use crate::db::markets::seed_market;
    use crate::db::test_pool;

    const NOW: i64 = 1_700_000_000;

    fn snap(time: i64, yes_price: f64) -> SnapshotRow {
        SnapshotRow {
            id: 0,
            market_address: "0xbb".to_string(),
            time,
            yes_price,
            no_price: 1.0 - yes_price,
            yes_shares: 0.0,
            no_shares: 0.0,
            total_collateral: 0.0,
            liquidity_param: 10.0,
        }
    }

    #[test]
    fn deep_liquidity_is_not_fragile_and_empty_liquidity_is() {
        assert_eq!(fragility(ALPHA_DEEP), 0.0);
        assert_eq!(fragility(0.0), 1.0);
        assert!((fragility(5.0) - 0.5).abs() < 1e-9);
        // Deeper than the reference scale still floors at 0.
        assert_eq!(fragility(25.0), 0.0);
    }

    #[test]
    fn stress_is_range_over_half_point() {
        let snapshots = vec![snap(NOW - 3600, 0.20), snap(NOW - 1800, 0.45), snap(NOW, 0.30)];
        assert!((stress(&snapshots) - 0.5).abs() < 1e-9);

        // A 50-point swing saturates.
        let wild = vec![snap(NOW - 60, 0.10), snap(NOW, 0.90)];
        assert_eq!(stress(&wild), 1.0);

        assert_eq!(stress(&[]), 0.0);
    }

    #[test]
    fn velocity_uses_tolerant_lookup_and_defaults_to_zero() {
        // Snapshot one minute back at 0.60; nothing near five minutes back.
        let snapshots = vec![snap(NOW - 60, 0.60)];
        let v1 = velocity(&snapshots, NOW, 1, 0.65);
        let v5 = velocity(&snapshots, NOW, 5, 0.65);
        assert!((v1 - 0.05).abs() < 1e-9);
        assert_eq!(v5, 0.0, "missing history is no signal, not an error");

        // 95 seconds off target is outside the 90s tolerance.
        let stale = vec![snap(NOW - 155, 0.60)];
        assert_eq!(velocity(&stale, NOW, 1, 0.65), 0.0);

        assert!((acceleration(v1, v5) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn velocity_picks_the_closest_qualifying_snapshot() {
        let snapshots = vec![snap(NOW - 130, 0.40), snap(NOW - 70, 0.55)];
        // Both qualify for the 1m offset; -70 is closer to -60.
        let v = velocity(&snapshots, NOW, 1, 0.65);
        assert!((v - 0.10).abs() < 1e-9);
    }

    #[test]
    fn cohort_normalization_divides_by_the_max() {
        // counts [0,5,10], volumes [0,100,50]
        assert_eq!(norm_count(10, 10), 1.0);
        assert_eq!(norm_count(5, 10), 0.5);
        assert_eq!(norm_volume(50.0, 100.0), 0.5);
        assert_eq!(norm_volume(0.0, 100.0), 0.0);
        // All-zero cohort: divisor defaults to 1 instead of dividing by 0.
        assert_eq!(norm_count(0, 0), 0.0);
        assert_eq!(norm_volume(0.0, 0.0), 0.0);
    }

    #[test]
    fn heat_score_stays_in_bounds() {
        assert_eq!(heat_score(0.0, 0.0, 0.0, 0.0, 1.0), 0.0);
        assert_eq!(heat_score(1.0, 1.0, 1.0, 1.0, 0.0), 100.0);
        let mid = heat_score(1.0, 0.5, 0.5, 0.25, 0.5);
        assert!(mid > 0.0 && mid < 100.0);
    }

    #[test]
    fn recency_decays_over_48_hours() {
        assert_eq!(recency(0.0), 1.0);
        assert!((recency(24.0) - 0.5).abs() < 1e-9);
        assert_eq!(recency(NO_TRADE_HOURS), 0.0);
        assert_eq!(recency(100.0), 0.0);
    }

    #[tokio::test]
    async fn resolved_markets_keep_their_frozen_analytics() {
        let pool = test_pool().await;
        let engine = AnalyticsEngine::new(pool.clone());
        let addr = MarketAddress(address!("00000000000000000000000000000000000000bb"));
        seed_market(&pool, &addr, "frozen?").await;

        sqlx::query("UPDATE markets SET heat_score = 77.0, resolved = 1 WHERE address = ?")
            .bind(addr.to_db())
            .execute(&pool)
            .await
            .unwrap();

        let mut states = HashMap::new();
        states.insert(
            addr,
            MarketCycleState {
                address: addr,
                yes_price: 1.0,
                no_price: 0.0,
                yes_shares: 0.0,
                no_shares: 0.0,
                total_collateral: 0.0,
                liquidity_param: 10.0,
                resolved: true,
                yes_wins: Some(true),
            },
        );

        let errors = engine.run(&states, NOW).await;
        assert!(errors.is_empty());

        let heat: f64 = sqlx::query_scalar("SELECT heat_score FROM markets WHERE address = ?")
            .bind(addr.to_db())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(heat, 77.0, "resolved market must be left untouched");
    }

    #[tokio::test]
    async fn engine_persists_all_fields_for_unresolved_markets() {
        let pool = test_pool().await;
        let engine = AnalyticsEngine::new(pool.clone());
        let addr = MarketAddress(address!("00000000000000000000000000000000000000cc"));
        seed_market(&pool, &addr, "hot?").await;

        let mut states = HashMap::new();
        states.insert(
            addr,
            MarketCycleState {
                address: addr,
                yes_price: 0.65,
                no_price: 0.35,
                yes_shares: 10.0,
                no_shares: 10.0,
                total_collateral: 5.0,
                liquidity_param: 5.0,
                resolved: false,
                yes_wins: None,
            },
        );

        let errors = engine.run(&states, NOW).await;
        assert!(errors.is_empty());

        let (fragility, heat, analytics_at): (f64, f64, Option<i64>) = sqlx::query_as(
            "SELECT fragility, heat_score, analytics_at FROM markets WHERE address = ?",
        )
        .bind(addr.to_db())
        .fetch_one(&pool)
        .await
        .unwrap();

        assert!((fragility - 0.5).abs() < 1e-9);
        // No trades, no snapshots: only the liquidity term contributes.
        assert!((heat - 100.0 * W_LIQUIDITY * 0.5).abs() < 1e-9);
        assert_eq!(analytics_at, Some(NOW));
    }
}
