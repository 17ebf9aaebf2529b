//! Per-cycle price/liquidity snapshots, the raw material for velocity and
//! stress. Append-only; retention is bounded by age, not row count, so any
//! cycle frequency self-limits.

use sqlx::SqlitePool;

use crate::config::SNAPSHOT_RETENTION_SECS;
use crate::db::models::SnapshotRow;
use crate::error::Result;
use crate::types::MarketCycleState;

pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, state: &MarketCycleState, time: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_snapshots (
                market_address, time, yes_price, no_price,
                yes_shares, no_shares, total_collateral, liquidity_param
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.address.to_db())
        .bind(time)
        .bind(state.yes_price)
        .bind(state.no_price)
        .bind(state.yes_shares)
        .bind(state.no_shares)
        .bind(state.total_collateral)
        .bind(state.liquidity_param)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop everything older than the 24h retention window.
    pub async fn prune(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM market_snapshots WHERE time < ?")
            .bind(now - SNAPSHOT_RETENTION_SECS)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Snapshots for one market from `since` onward, oldest first.
    pub async fn for_market_since(&self, market: &str, since: i64) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT * FROM market_snapshots
            WHERE market_address = ? AND time >= ?
            ORDER BY time
            "#,
        )
        .bind(market)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    use crate::db::test_pool;
    use crate::types::MarketAddress;

    fn state(yes_price: f64) -> MarketCycleState {
        MarketCycleState {
            address: MarketAddress(address!("00000000000000000000000000000000000000bb")),
            yes_price,
            no_price: 1.0 - yes_price,
            yes_shares: 10.0,
            no_shares: 10.0,
            total_collateral: 5.0,
            liquidity_param: 10.0,
            resolved: false,
            yes_wins: None,
        }
    }

    #[tokio::test]
    async fn prune_keeps_only_the_trailing_window() {
        let pool = test_pool().await;
        let store = SnapshotStore::new(pool);
        let now = 1_700_000_000;
        let s = state(0.5);

        store.append(&s, now - SNAPSHOT_RETENTION_SECS - 10).await.unwrap();
        store.append(&s, now - 60).await.unwrap();
        store.append(&s, now).await.unwrap();

        let deleted = store.prune(now).await.unwrap();
        assert_eq!(deleted, 1);

        let rows = store.for_market_since(&s.address.to_db(), 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.windows(2).all(|w| w[0].time <= w[1].time), "oldest first");
    }
}
