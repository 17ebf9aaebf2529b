//! Minimal JSON-RPC client for the chain reads the indexer needs:
//! current height, the fixed-layout market-info call, and the two token
//! address lookups. The per-market reads go out as one JSON-RPC batch so a
//! refresh costs a single round trip.

use std::time::Duration;

use alloy_primitives::{keccak256, Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chain::events::scale_units;
use crate::config::{COLLATERAL_DECIMALS, SHARE_DECIMALS};
use crate::error::{AppError, Result};
use crate::types::MarketAddress;

/// Return layout of `getMarketInfo()`: 14 ordered 32-byte slots. Slot 0
/// is the head offset of the question string, slots 1..=12 the scalars,
/// slot 13 the string's length word. The question text belongs to the
/// listing flow and is not re-read here, so only slots 1..=12 are consumed.
const MARKET_INFO_WORDS: usize = 14;

/// A market's on-chain state as returned by `getMarketInfo()`.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub resolution_time: i64,
    pub oracle: Address,
    pub yes_price: f64,
    pub no_price: f64,
    pub yes_probability: f64,
    pub no_probability: f64,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub total_collateral: f64,
    pub liquidity_param: f64,
    pub resolved: bool,
    pub yes_wins: bool,
}

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Value,
}

impl RpcRequest {
    fn eth_call(id: u64, to: &MarketAddress, selector: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: "eth_call",
            params: json!([{ "to": to.to_db(), "data": calldata(selector) }, "latest"]),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, url })
    }

    /// Current chain height via `eth_blockNumber`.
    pub async fn chain_height(&self) -> Result<u64> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_blockNumber",
            params: json!([]),
        };
        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_hex_quantity(&expect_hex(response)?)
    }

    /// One batched read per market: `getMarketInfo()` always, plus
    /// `yesToken()`/`noToken()` only while the addresses are still unknown.
    pub async fn read_market(
        &self,
        market: &MarketAddress,
        need_tokens: bool,
    ) -> Result<(MarketInfo, Option<(Address, Address)>)> {
        let mut batch = vec![RpcRequest::eth_call(1, market, "getMarketInfo()")];
        if need_tokens {
            batch.push(RpcRequest::eth_call(2, market, "yesToken()"));
            batch.push(RpcRequest::eth_call(3, market, "noToken()"));
        }

        let mut responses: Vec<RpcResponse> = self
            .client
            .post(&self.url)
            .json(&batch)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // Batch responses may arrive in any order.
        responses.sort_by_key(|r| r.id);

        let mut iter = responses.into_iter();
        let info_hex = expect_hex(iter.next().ok_or_else(|| {
            AppError::Rpc(format!("empty batch response for {market}"))
        })?)?;
        let info = decode_market_info(&info_hex)?;

        let tokens = if need_tokens {
            let yes_hex = expect_hex(iter.next().ok_or_else(|| {
                AppError::Rpc(format!("missing yesToken response for {market}"))
            })?)?;
            let no_hex = expect_hex(iter.next().ok_or_else(|| {
                AppError::Rpc(format!("missing noToken response for {market}"))
            })?)?;
            Some((decode_address_word(&yes_hex)?, decode_address_word(&no_hex)?))
        } else {
            None
        };

        Ok((info, tokens))
    }
}

fn calldata(signature: &str) -> String {
    format!("0x{}", hex::encode(&keccak256(signature)[..4]))
}

fn expect_hex(response: RpcResponse) -> Result<String> {
    if let Some(err) = response.error {
        return Err(AppError::Rpc(format!("rpc error {}: {}", err.code, err.message)));
    }
    match response.result {
        Some(Value::String(s)) => Ok(s),
        other => Err(AppError::Rpc(format!("unexpected rpc result: {other:?}"))),
    }
}

/// "0x1a2b" → 0x1a2b.
pub fn parse_hex_quantity(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| AppError::Rpc(format!("bad hex quantity {s}: {e}")))
}

fn decode_market_info(return_hex: &str) -> Result<MarketInfo> {
    let data = hex::decode(return_hex.trim_start_matches("0x"))
        .map_err(|e| AppError::Rpc(format!("bad eth_call return: {e}")))?;
    if data.len() < MARKET_INFO_WORDS * 32 {
        return Err(AppError::Rpc(format!(
            "market info return too short: {} bytes, need {}",
            data.len(),
            MARKET_INFO_WORDS * 32
        )));
    }

    let word = |i: usize| U256::from_be_slice(&data[i * 32..(i + 1) * 32]);
    let shares = |i: usize| scaled_f64(word(i), SHARE_DECIMALS);
    let collateral = |i: usize| scaled_f64(word(i), COLLATERAL_DECIMALS);

    Ok(MarketInfo {
        resolution_time: word(1).try_into().unwrap_or(i64::MAX),
        oracle: Address::from_slice(&data[2 * 32 + 12..3 * 32]),
        yes_price: shares(3),
        no_price: shares(4),
        yes_probability: shares(5),
        no_probability: shares(6),
        yes_shares: shares(7),
        no_shares: shares(8),
        total_collateral: collateral(9),
        liquidity_param: shares(10),
        resolved: word(11) != U256::ZERO,
        yes_wins: word(12) != U256::ZERO,
    })
}

fn decode_address_word(return_hex: &str) -> Result<Address> {
    let data = hex::decode(return_hex.trim_start_matches("0x"))
        .map_err(|e| AppError::Rpc(format!("bad eth_call return: {e}")))?;
    if data.len() < 32 {
        return Err(AppError::Rpc(format!(
            "address return too short: {} bytes",
            data.len()
        )));
    }
    Ok(Address::from_slice(&data[12..32]))
}

/// Display-value conversion only — ledger amounts never pass through here.
fn scaled_f64(raw: U256, decimals: u32) -> f64 {
    scale_units(raw, decimals).parse().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
