/// Database row types. Used by sqlx for typed query mapping.

#[derive(Debug, sqlx::FromRow)]
pub struct MarketRow {
    pub address: String,
    pub question: String,
    pub resolution_time: Option<i64>,
    pub oracle: Option<String>,
    pub yes_token: Option<String>,
    pub no_token: Option<String>,
    pub yes_price: f64,
    pub no_price: f64,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub total_collateral: f64,
    pub liquidity_param: f64,
    pub resolved: i64,
    pub yes_wins: Option<i64>,
    pub velocity_1m: f64,
    pub velocity_5m: f64,
    pub velocity_15m: f64,
    pub acceleration: f64,
    pub stress_score: f64,
    pub fragility: f64,
    pub heat_score: f64,
    pub volume_24h: f64,
    pub trades_24h: i64,
    pub fee_velocity_24h: f64,
    pub analytics_at: Option<i64>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub market_address: String,
    pub trader_id: i64,
    pub trade_type: String,
    pub outcome: String,
    pub shares: String,
    pub amount: String,
    pub trading_fee: String,
    pub creator_fee: String,
    pub protocol_fee: String,
    pub price_at_trade: Option<f64>,
    pub block_number: i64,
    pub block_time: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TraderRow {
    pub id: i64,
    pub address: String,
    pub first_seen_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub market_address: String,
    pub time: i64,
    pub yes_price: f64,
    pub no_price: f64,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub total_collateral: f64,
    pub liquidity_param: f64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct IndexerStateRow {
    pub chain_id: i64,
    pub last_indexed_block: i64,
    pub is_syncing: i64,
    pub sync_started_at: Option<i64>,
    pub last_indexed_at: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_errors: i64,
}
