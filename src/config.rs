use crate::error::{AppError, Result};

pub const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";
pub const DEFAULT_LOG_API_URL: &str = "https://logs.indexed.xyz/query";

/// A sync lock older than this is treated as abandoned by a crashed run
/// and may be stolen by the next invocation.
pub const STALE_LOCK_SECS: i64 = 300;

/// Snapshots older than this are pruned at the start of every cycle's
/// snapshot phase. Retention is bounded by time, not row count.
pub const SNAPSHOT_RETENTION_SECS: i64 = 24 * 3600;

/// A snapshot counts as "at" a velocity offset if its timestamp is within
/// this many seconds of (now - offset).
pub const VELOCITY_TOLERANCE_SECS: i64 = 90;

/// Velocity lookback offsets, in minutes.
pub const VELOCITY_OFFSETS_MIN: [i64; 3] = [1, 5, 15];

/// Liquidity parameter considered "deep" — fragility hits 0 here.
pub const ALPHA_DEEP: f64 = 10.0;

/// Trading fee on BUY orders: amount / FEE_DIVISOR (0.5%).
pub const FEE_DIVISOR: u64 = 200;

/// Hours-since-last-trade assigned when no trade fell in the 24h window.
pub const NO_TRADE_HOURS: f64 = 48.0;

/// Share amounts are 18-decimal fixed point on chain.
pub const SHARE_DECIMALS: u32 = 18;
/// Collateral (USDC) amounts are 6-decimal fixed point on chain.
pub const COLLATERAL_DECIMALS: u32 = 6;

/// Max markets whose token addresses are backfilled per cycle.
pub const TOKEN_BACKFILL_BATCH: usize = 5;

/// Concurrent per-market refresh reads within one cycle.
pub const REFRESH_CONCURRENCY: usize = 8;

/// Max logs requested per log-source page.
pub const LOG_PAGE_LIMIT: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub log_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub chain_id: i64,
    /// Static bearer credential required by POST /indexer/run (INDEXER_TOKEN).
    pub indexer_token: String,
    /// Built-in scheduler interval; 0 disables it and an external
    /// scheduler is expected to hit the trigger endpoint instead.
    pub sync_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let indexer_token = std::env::var("INDEXER_TOKEN")
            .map_err(|_| AppError::Config("INDEXER_TOKEN must be set".to_string()))?;
        if indexer_token.is_empty() {
            return Err(AppError::Config("INDEXER_TOKEN must not be empty".to_string()));
        }

        Ok(Self {
            rpc_url: std::env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            log_api_url: std::env::var("LOG_API_URL")
                .unwrap_or_else(|_| DEFAULT_LOG_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "indexer.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            chain_id: std::env::var("CHAIN_ID")
                .unwrap_or_else(|_| "8453".to_string())
                .parse::<i64>()
                .map_err(|_| AppError::Config("CHAIN_ID must be an integer".to_string()))?,
            indexer_token,
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u64>()
                .unwrap_or(0),
        })
    }
}
