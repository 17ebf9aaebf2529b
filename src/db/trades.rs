//! Idempotent trade ledger.
//!
//! (tx_hash, outcome) is the conflict key: re-applying a log that was
//! already written — the normal case after a crash between ledger write
//! and lock release — is a no-op, not an error.

use alloy_primitives::U256;
use sqlx::SqlitePool;

use crate::chain::events::scale_units;
use crate::config::{COLLATERAL_DECIMALS, FEE_DIVISOR};
use crate::db::models::TradeRow;
use crate::error::Result;
use crate::types::{hash_hex, now_secs, wallet_hex, TradeEvent, TradeKind};

pub struct TradeLedger {
    pool: SqlitePool,
}

impl TradeLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one decoded trade. Returns true if the row was newly
    /// inserted, false if the ledger already held this (tx_hash, outcome).
    pub async fn apply(&self, trade: &TradeEvent) -> Result<bool> {
        let trader_id = self.trader_id(trade).await?;
        let (trading_fee, creator_fee) = fees(trade);
        let price = price_at_trade(trade);

        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                tx_hash, log_index, market_address, trader_id,
                trade_type, outcome, shares, amount,
                trading_fee, creator_fee, protocol_fee,
                price_at_trade, block_number, block_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '0', ?, ?, ?)
            ON CONFLICT (tx_hash, outcome) DO NOTHING
            "#,
        )
        .bind(hash_hex(&trade.tx_hash))
        .bind(trade.log_index as i64)
        .bind(trade.market.to_db())
        .bind(trader_id)
        .bind(trade.kind.to_string())
        .bind(trade.outcome.to_string())
        .bind(&trade.shares)
        .bind(&trade.amount)
        .bind(trading_fee)
        .bind(creator_fee)
        .bind(price)
        .bind(trade.block_number as i64)
        .bind(trade.block_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get-or-create the trader row for this trade's wallet.
    async fn trader_id(&self, trade: &TradeEvent) -> Result<i64> {
        let address = wallet_hex(&trade.trader);

        sqlx::query("INSERT OR IGNORE INTO traders (address, first_seen_at) VALUES (?, ?)")
            .bind(&address)
            .bind(now_secs())
            .execute(&self.pool)
            .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM traders WHERE address = ?")
            .bind(&address)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn recent_for_market(&self, market: &str, limit: i64) -> Result<Vec<TradeRow>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT * FROM trades
            WHERE market_address = ?
            ORDER BY block_time DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(market)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// BUY pays 0.5% of the collateral amount, mirrored to the market creator;
/// SELL and REDEEM are fee-free. Computed on the raw integer so the stored
/// decimal is exact.
fn fees(trade: &TradeEvent) -> (String, String) {
    match trade.kind {
        TradeKind::Buy => {
            let fee_raw = trade.amount_raw / U256::from(FEE_DIVISOR);
            let fee = scale_units(fee_raw, COLLATERAL_DECIMALS);
            (fee.clone(), fee)
        }
        TradeKind::Sell | TradeKind::Redeem => ("0".to_string(), "0".to_string()),
    }
}

/// amount / shares, or None for a zero-share trade.
fn price_at_trade(trade: &TradeEvent) -> Option<f64> {
    if trade.shares_raw == U256::ZERO {
        return None;
    }
    let amount: f64 = trade.amount.parse().ok()?;
    let shares: f64 = trade.shares.parse().ok()?;
    Some(amount / shares)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, Address, B256};

    use crate::chain::events::scale_units;
    use crate::config::SHARE_DECIMALS;
    use crate::db::test_pool;
    use crate::types::{MarketAddress, Outcome};

    const TRADER: Address = address!("00000000000000000000000000000000000000aa");
    const MARKET: Address = address!("00000000000000000000000000000000000000bb");

    fn trade(kind: TradeKind, outcome: Outcome, shares_raw: u128, amount_raw: u64) -> TradeEvent {
        let shares_raw = U256::from(shares_raw);
        let amount_raw = U256::from(amount_raw);
        TradeEvent {
            market: MarketAddress(MARKET),
            trader: TRADER,
            kind,
            outcome,
            shares_raw,
            amount_raw,
            shares: scale_units(shares_raw, SHARE_DECIMALS),
            amount: scale_units(amount_raw, COLLATERAL_DECIMALS),
            block_number: 100,
            tx_hash: B256::repeat_byte(0x42),
            log_index: 0,
            block_time: 1_700_000_000,
        }
    }

    async fn trade_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM trades")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reapplying_the_same_log_writes_one_row() {
        let pool = test_pool().await;
        let ledger = TradeLedger::new(pool.clone());
        let t = trade(TradeKind::Buy, Outcome::Yes, 2_500_000_000_000_000_000, 1_250_000);

        assert!(ledger.apply(&t).await.unwrap());
        assert!(!ledger.apply(&t).await.unwrap(), "replay must be a no-op");
        assert_eq!(trade_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn same_tx_different_outcome_is_a_distinct_row() {
        let pool = test_pool().await;
        let ledger = TradeLedger::new(pool.clone());

        ledger
            .apply(&trade(TradeKind::Buy, Outcome::Yes, 1_000_000_000_000_000_000, 500_000))
            .await
            .unwrap();
        ledger
            .apply(&trade(TradeKind::Buy, Outcome::No, 1_000_000_000_000_000_000, 500_000))
            .await
            .unwrap();

        assert_eq!(trade_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn trader_is_created_once() {
        let pool = test_pool().await;
        let ledger = TradeLedger::new(pool.clone());

        let mut a = trade(TradeKind::Buy, Outcome::Yes, 1_000_000_000_000_000_000, 500_000);
        let mut b = a.clone();
        a.tx_hash = B256::repeat_byte(0x01);
        b.tx_hash = B256::repeat_byte(0x02);
        ledger.apply(&a).await.unwrap();
        ledger.apply(&b).await.unwrap();

        let traders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM traders")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(traders, 1);
    }

    #[tokio::test]
    async fn buy_fee_and_price_are_exact() {
        let pool = test_pool().await;
        let ledger = TradeLedger::new(pool.clone());

        // cost 1.25 USDC on 2.5 shares: fee = 1.25/200 = 0.00625, price = 0.5
        let t = trade(TradeKind::Buy, Outcome::Yes, 2_500_000_000_000_000_000, 1_250_000);
        ledger.apply(&t).await.unwrap();

        let row = ledger.recent_for_market(&t.market.to_db(), 1).await.unwrap().remove(0);
        assert_eq!(row.trading_fee, "0.00625");
        assert_eq!(row.creator_fee, "0.00625");
        assert_eq!(row.protocol_fee, "0");
        assert!((row.price_at_trade.unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_is_fee_free_and_zero_shares_has_no_price() {
        let pool = test_pool().await;
        let ledger = TradeLedger::new(pool.clone());

        let t = trade(TradeKind::Sell, Outcome::No, 0, 400_000);
        ledger.apply(&t).await.unwrap();

        let row = ledger.recent_for_market(&t.market.to_db(), 1).await.unwrap().remove(0);
        assert_eq!(row.trading_fee, "0");
        assert!(row.price_at_trade.is_none(), "zero shares must not divide");
    }
}
