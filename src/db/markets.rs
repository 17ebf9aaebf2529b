//! Market repository: the cached on-chain projection plus analytics
//! columns. Rows are created by the listing flow — this side only ever
//! mutates projection, token, analytics and status columns.

use std::str::FromStr;

use sqlx::SqlitePool;

use crate::chain::rpc::MarketInfo;
use crate::db::models::MarketRow;
use crate::error::Result;
use crate::types::{now_secs, wallet_hex, MarketAddress};

/// The subset of a market row the orchestrator plans a cycle from.
#[derive(Debug, Clone)]
pub struct TrackedMarket {
    pub address: MarketAddress,
    pub has_tokens: bool,
    pub resolved: bool,
}

pub struct MarketRepo {
    pool: SqlitePool,
}

impl MarketRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every market the indexer mirrors, oldest first.
    pub async fn tracked(&self) -> Result<Vec<TrackedMarket>> {
        let rows: Vec<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT address, yes_token, resolved FROM markets ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (address, yes_token, resolved) in rows {
            let address = MarketAddress::from_str(&address)
                .map_err(|e| crate::error::AppError::Decode(format!("bad market address {address}: {e}")))?;
            out.push(TrackedMarket { address, has_tokens: yes_token.is_some(), resolved: resolved != 0 });
        }
        Ok(out)
    }

    /// Rewrite the cached projection from a fresh chain read. `resolved`
    /// only moves forward and the status follows it; a PAUSED market stays
    /// paused until resolution.
    pub async fn write_projection(
        &self,
        address: &MarketAddress,
        info: &MarketInfo,
        yes_price: f64,
        no_price: f64,
    ) -> Result<()> {
        let yes_wins: Option<i64> = info.resolved.then_some(info.yes_wins as i64);

        sqlx::query(
            r#"
            UPDATE markets
            SET resolution_time = ?,
                oracle = ?,
                yes_price = ?,
                no_price = ?,
                yes_shares = ?,
                no_shares = ?,
                total_collateral = ?,
                liquidity_param = ?,
                resolved = MAX(resolved, ?),
                yes_wins = COALESCE(?, yes_wins),
                status = CASE WHEN MAX(resolved, ?) = 1 THEN 'RESOLVED' ELSE status END,
                updated_at = ?
            WHERE address = ?
            "#,
        )
        .bind(info.resolution_time)
        .bind(wallet_hex(&info.oracle))
        .bind(yes_price)
        .bind(no_price)
        .bind(info.yes_shares)
        .bind(info.no_shares)
        .bind(info.total_collateral)
        .bind(info.liquidity_param)
        .bind(info.resolved as i64)
        .bind(yes_wins)
        .bind(info.resolved as i64)
        .bind(now_secs())
        .bind(address.to_db())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a market resolved from an observed resolution event. Never
    /// reverts; repeated application is harmless.
    pub async fn apply_resolution(&self, address: &MarketAddress, yes_wins: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE markets
            SET resolved = 1, yes_wins = ?, status = 'RESOLVED', updated_at = ?
            WHERE address = ?
            "#,
        )
        .bind(yes_wins as i64)
        .bind(now_secs())
        .bind(address.to_db())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn backfill_tokens(
        &self,
        address: &MarketAddress,
        yes_token: &alloy_primitives::Address,
        no_token: &alloy_primitives::Address,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE markets SET yes_token = ?, no_token = ?, updated_at = ? WHERE address = ?",
        )
        .bind(wallet_hex(yes_token))
        .bind(wallet_hex(no_token))
        .bind(now_secs())
        .bind(address.to_db())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Markets still missing token addresses, capped for per-cycle work.
    pub async fn missing_tokens(&self, limit: i64) -> Result<Vec<MarketAddress>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT address FROM markets WHERE yes_token IS NULL ORDER BY created_at LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(a,)| {
                MarketAddress::from_str(&a)
                    .map_err(|e| crate::error::AppError::Decode(format!("bad market address {a}: {e}")))
            })
            .collect()
    }

    /// Heat-ranked listing for the read API.
    pub async fn list(
        &self,
        min_heat: f64,
        status: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MarketRow>> {
        let rows = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT * FROM markets
            WHERE heat_score >= ?
              AND (? IS NULL OR status = ?)
            ORDER BY heat_score DESC, created_at
            LIMIT ?
            "#,
        )
        .bind(min_heat)
        .bind(status)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, address: &str) -> Result<Option<MarketRow>> {
        let row = sqlx::query_as::<_, MarketRow>("SELECT * FROM markets WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

/// Insert a bare market row the way the listing flow would.
#[cfg(test)]
pub async fn seed_market(pool: &SqlitePool, address: &MarketAddress, question: &str) {
    let now = now_secs();
    sqlx::query(
        "INSERT INTO markets (address, question, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(address.to_db())
    .bind(question)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("seed market");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
