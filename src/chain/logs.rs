//! Client for the remote log-indexing service.
//!
//! One POST per page: the service answers with a batch of raw log records
//! and, when the range is not exhausted, a `next_block` cursor. We loop
//! with `from = next_block` until the cursor is absent or past `to`.
//! No retries here — failures propagate to the orchestrator, which treats
//! a failed log pull as a hard cycle error.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LOG_PAGE_LIMIT;
use crate::error::{AppError, Result};
use crate::types::{hash_hex, MarketAddress, RawLog};

#[derive(Debug, Serialize)]
struct LogQueryRequest {
    from_block: u64,
    to_block: u64,
    addresses: Vec<String>,
    /// One position: any of the four tracked signatures in topic0.
    topics: Vec<Vec<String>>,
    limit: u64,
}

#[derive(Debug, Deserialize)]
struct LogQueryResponse {
    logs: Vec<WireLog>,
    next_block: Option<u64>,
}

/// A log record as the service ships it — hex strings for binary fields.
#[derive(Debug, Deserialize)]
struct WireLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: u64,
    transaction_hash: String,
    log_index: u64,
    block_time: i64,
}

pub struct LogClient {
    client: reqwest::Client,
    base_url: String,
}

impl LogClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Pull every tracked log in `[from_block, to_block]`, following the
    /// pagination cursor. Records are normalized into `RawLog`s.
    pub async fn fetch_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[MarketAddress],
        topics: &[B256],
    ) -> Result<Vec<RawLog>> {
        let address_filter: Vec<String> = addresses.iter().map(|a| a.to_db()).collect();
        let topic_filter = vec![topics.iter().map(hash_hex).collect::<Vec<_>>()];

        let mut from = from_block;
        let mut out = Vec::new();

        loop {
            let request = LogQueryRequest {
                from_block: from,
                to_block,
                addresses: address_filter.clone(),
                topics: topic_filter.clone(),
                limit: LOG_PAGE_LIMIT,
            };

            let response: LogQueryResponse = self
                .client
                .post(&self.base_url)
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            debug!(
                from = from,
                to = to_block,
                page_logs = response.logs.len(),
                next_block = ?response.next_block,
                "log page fetched"
            );

            for wire in response.logs {
                out.push(normalize(wire)?);
            }

            match next_from(response.next_block, to_block) {
                Some(next) => from = next,
                None => break,
            }
        }

        Ok(out)
    }
}

/// Cursor rule: keep paging while the service returns a `next_block` that
/// is still inside the requested range.
fn next_from(next_block: Option<u64>, to_block: u64) -> Option<u64> {
    match next_block {
        Some(next) if next <= to_block => Some(next),
        _ => None,
    }
}

fn normalize(wire: WireLog) -> Result<RawLog> {
    let address = Address::from_str(&wire.address)
        .map_err(|e| AppError::LogSource(format!("bad log address {}: {e}", wire.address)))?;

    let topics = wire
        .topics
        .iter()
        .map(|t| {
            B256::from_str(t).map_err(|e| AppError::LogSource(format!("bad topic {t}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let tx_hash = B256::from_str(&wire.transaction_hash).map_err(|e| {
        AppError::LogSource(format!("bad tx hash {}: {e}", wire.transaction_hash))
    })?;

    let data = hex::decode(wire.data.trim_start_matches("0x"))
        .map_err(|e| AppError::LogSource(format!("bad log data: {e}")))?;

    Ok(RawLog {
        address,
        topics,
        data,
        block_number: wire.block_number,
        tx_hash,
        log_index: wire.log_index,
        block_time: wire.block_time,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_within_range_and_stops_past_it() {
        assert_eq!(next_from(Some(150), 200), Some(150));
        assert_eq!(next_from(Some(200), 200), Some(200));
        assert_eq!(next_from(Some(201), 200), None);
        assert_eq!(next_from(None, 200), None);
    }

    #[test]
    fn normalize_parses_hex_fields() {
        let wire = WireLog {
            address: "0x00000000000000000000000000000000000000ab".to_string(),
            topics: vec![
                "0x1111111111111111111111111111111111111111111111111111111111111111"
                    .to_string(),
            ],
            data: "0x0000000000000000000000000000000000000000000000000000000000000001"
                .to_string(),
            block_number: 42,
            transaction_hash:
                "0x2222222222222222222222222222222222222222222222222222222222222222".to_string(),
            log_index: 7,
            block_time: 1_700_000_000,
        };

        let log = normalize(wire).unwrap();
        assert_eq!(log.block_number, 42);
        assert_eq!(log.log_index, 7);
        assert_eq!(log.topics.len(), 1);
        assert_eq!(log.data.len(), 32);
        assert_eq!(log.data[31], 1);
    }

    #[test]
    fn normalize_rejects_malformed_hex() {
        let wire = WireLog {
            address: "not-an-address".to_string(),
            topics: vec![],
            data: "0x".to_string(),
            block_number: 0,
            transaction_hash: "0x00".to_string(),
            log_index: 0,
            block_time: 0,
        };
        assert!(normalize(wire).is_err());
    }
}
