use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// On-chain address of a market contract — the primary key everywhere a
/// market is referenced (DB rows, the per-cycle state map, RPC calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketAddress(pub Address);

impl MarketAddress {
    /// Lowercase 0x-prefixed hex, the canonical DB representation.
    pub fn to_db(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_slice()))
    }
}

impl std::fmt::Display for MarketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_slice()))
    }
}

impl FromStr for MarketAddress {
    type Err = <Address as FromStr>::Err;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Address::from_str(s).map(MarketAddress)
    }
}

/// Lowercase 0x-prefixed hex for a wallet address.
pub fn wallet_hex(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr.as_slice()))
}

/// Lowercase 0x-prefixed hex for a 32-byte hash.
pub fn hash_hex(h: &B256) -> String {
    format!("0x{}", hex::encode(h.as_slice()))
}

// ---------------------------------------------------------------------------
// Trade classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
    Redeem,
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
            TradeKind::Redeem => "REDEEM",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Active,
    Resolved,
    Paused,
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketStatus::Active => "ACTIVE",
            MarketStatus::Resolved => "RESOLVED",
            MarketStatus::Paused => "PAUSED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Raw log + decoded events
// ---------------------------------------------------------------------------

/// A log record normalized from the log-source wire shape.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_time: i64,
}

/// A trade decoded from a buy/sell/redeem log. Raw integer amounts are kept
/// alongside the scaled decimal strings so fee math stays in integer space.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub market: MarketAddress,
    pub trader: Address,
    pub kind: TradeKind,
    pub outcome: Outcome,
    pub shares_raw: alloy_primitives::U256,
    pub amount_raw: alloy_primitives::U256,
    /// Exact decimal string, scaled from the 18-decimal share integer.
    pub shares: String,
    /// Exact decimal string, scaled from the 6-decimal collateral integer.
    pub amount: String,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_time: i64,
}

#[derive(Debug, Clone)]
pub struct ResolutionEvent {
    pub market: MarketAddress,
    pub yes_wins: bool,
    pub block_number: u64,
    pub tx_hash: B256,
    pub block_time: i64,
}

/// Every tracked log decodes into exactly one of these; resolutions are
/// routed separately and never enter the trade ledger.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Trade(TradeEvent),
    Resolution(ResolutionEvent),
}

// ---------------------------------------------------------------------------
// Per-cycle state
// ---------------------------------------------------------------------------

/// A market's refreshed on-chain projection for the current cycle. Built
/// once by the refresh phase and passed by reference into snapshotting and
/// analytics — phases never mutate it.
#[derive(Debug, Clone)]
pub struct MarketCycleState {
    pub address: MarketAddress,
    pub yes_price: f64,
    pub no_price: f64,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub total_collateral: f64,
    pub liquidity_param: f64,
    pub resolved: bool,
    pub yes_wins: Option<bool>,
}

// ---------------------------------------------------------------------------
// Cycle reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// Hard failure before any phase-scoped work.
    Cycle,
    Logs,
    Decode,
    Ledger,
    Resolution,
    Refresh,
    Backfill,
    Snapshot,
    Analytics,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Cycle => "cycle",
            CyclePhase::Logs => "logs",
            CyclePhase::Decode => "decode",
            CyclePhase::Ledger => "ledger",
            CyclePhase::Resolution => "resolution",
            CyclePhase::Refresh => "refresh",
            CyclePhase::Backfill => "backfill",
            CyclePhase::Snapshot => "snapshot",
            CyclePhase::Analytics => "analytics",
        };
        write!(f, "{s}")
    }
}

/// A soft failure scoped to one item of one phase. Collected per phase and
/// merged once by the orchestrator; never aborts the cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleError {
    pub phase: CyclePhase,
    pub subject: String,
    pub message: String,
}

impl CycleError {
    pub fn new(phase: CyclePhase, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self { phase, subject: subject.into(), message: message.into() }
    }
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.subject, self.message)
    }
}

/// What one scheduled invocation accomplished. Returned to the trigger
/// caller; soft errors ride along without failing the cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub chain_id: i64,
    pub from_block: u64,
    pub to_block: u64,
    pub logs_fetched: usize,
    pub trades_applied: usize,
    pub resolutions_applied: usize,
    pub markets_refreshed: usize,
    pub snapshots_written: usize,
    pub errors: Vec<CycleError>,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
