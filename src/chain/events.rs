//! Typed decoders for the four tracked AMM events.
//!
//! topic0 selects the decoder; topic1 carries the actor address for
//! buy/sell/redeem; the data payload is fixed 32-byte words in declared
//! order. Every slice is length-checked — a short payload is a decode
//! error, never a panic.

use std::sync::LazyLock;

use alloy_primitives::{keccak256, Address, B256, U256};

use crate::config::{COLLATERAL_DECIMALS, SHARE_DECIMALS};
use crate::error::{AppError, Result};
use crate::types::{
    DecodedEvent, MarketAddress, Outcome, RawLog, ResolutionEvent, TradeEvent, TradeKind,
};

// ---------------------------------------------------------------------------
// Event signatures
// ---------------------------------------------------------------------------

/// SharesBought(address indexed trader, bool isYes, uint256 shares, uint256 cost)
pub static TOPIC_BUY: LazyLock<B256> =
    LazyLock::new(|| keccak256("SharesBought(address,bool,uint256,uint256)"));

/// SharesSold(address indexed trader, bool isYes, uint256 shares, uint256 payout)
pub static TOPIC_SELL: LazyLock<B256> =
    LazyLock::new(|| keccak256("SharesSold(address,bool,uint256,uint256)"));

/// SharesRedeemed(address indexed trader, uint256 shares, uint256 payout)
pub static TOPIC_REDEEM: LazyLock<B256> =
    LazyLock::new(|| keccak256("SharesRedeemed(address,uint256,uint256)"));

/// MarketResolved(bool yesWins)
pub static TOPIC_RESOLVED: LazyLock<B256> = LazyLock::new(|| keccak256("MarketResolved(bool)"));

/// The full topic filter sent to the log source.
pub fn tracked_topics() -> [B256; 4] {
    [*TOPIC_BUY, *TOPIC_SELL, *TOPIC_REDEEM, *TOPIC_RESOLVED]
}

// ---------------------------------------------------------------------------
// Decode table
// ---------------------------------------------------------------------------

type DecodeFn = fn(&RawLog) -> Result<DecodedEvent>;

fn decoder_for(topic0: &B256) -> Option<DecodeFn> {
    if *topic0 == *TOPIC_BUY {
        Some(decode_buy)
    } else if *topic0 == *TOPIC_SELL {
        Some(decode_sell)
    } else if *topic0 == *TOPIC_REDEEM {
        Some(decode_redeem)
    } else if *topic0 == *TOPIC_RESOLVED {
        Some(decode_resolution)
    } else {
        None
    }
}

/// Decode a raw log into a typed event. Returns `Ok(None)` for topics we
/// don't track (the log source filter should make that rare).
pub fn decode_log(log: &RawLog) -> Result<Option<DecodedEvent>> {
    let topic0 = log
        .topics
        .first()
        .ok_or_else(|| AppError::Decode(format!("log {} has no topic0", log.tx_hash)))?;

    match decoder_for(topic0) {
        Some(decode) => decode(log).map(Some),
        None => Ok(None),
    }
}

fn decode_buy(log: &RawLog) -> Result<DecodedEvent> {
    let trader = actor_topic(log)?;
    let is_yes = word_bool(log, 0)?;
    let shares = word_u256(log, 1)?;
    let cost = word_u256(log, 2)?;
    Ok(DecodedEvent::Trade(trade_event(log, trader, TradeKind::Buy, outcome(is_yes), shares, cost)))
}

fn decode_sell(log: &RawLog) -> Result<DecodedEvent> {
    let trader = actor_topic(log)?;
    let is_yes = word_bool(log, 0)?;
    let shares = word_u256(log, 1)?;
    let payout = word_u256(log, 2)?;
    Ok(DecodedEvent::Trade(trade_event(
        log,
        trader,
        TradeKind::Sell,
        outcome(is_yes),
        shares,
        payout,
    )))
}

fn decode_redeem(log: &RawLog) -> Result<DecodedEvent> {
    let trader = actor_topic(log)?;
    let shares = word_u256(log, 0)?;
    let payout = word_u256(log, 1)?;
    // The redeem event carries no outcome flag; the upstream contract has
    // always recorded these as YES. Preserved verbatim — do not "fix" to
    // infer the redeemed side, it would change ledger keys.
    Ok(DecodedEvent::Trade(trade_event(
        log,
        trader,
        TradeKind::Redeem,
        Outcome::Yes,
        shares,
        payout,
    )))
}

fn decode_resolution(log: &RawLog) -> Result<DecodedEvent> {
    let yes_wins = word_bool(log, 0)?;
    Ok(DecodedEvent::Resolution(ResolutionEvent {
        market: MarketAddress(log.address),
        yes_wins,
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        block_time: log.block_time,
    }))
}

fn trade_event(
    log: &RawLog,
    trader: Address,
    kind: TradeKind,
    outcome: Outcome,
    shares_raw: U256,
    amount_raw: U256,
) -> TradeEvent {
    TradeEvent {
        market: MarketAddress(log.address),
        trader,
        kind,
        outcome,
        shares_raw,
        amount_raw,
        shares: scale_units(shares_raw, SHARE_DECIMALS),
        amount: scale_units(amount_raw, COLLATERAL_DECIMALS),
        block_number: log.block_number,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        block_time: log.block_time,
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// The actor address lives in topic1 as a left-padded 32-byte word.
fn actor_topic(log: &RawLog) -> Result<Address> {
    let topic = log.topics.get(1).ok_or_else(|| {
        AppError::Decode(format!("log {} missing actor topic", log.tx_hash))
    })?;
    Ok(Address::from_slice(&topic.as_slice()[12..]))
}

/// The `index`-th 32-byte word of the data payload.
fn word(log: &RawLog, index: usize) -> Result<&[u8]> {
    let start = index * 32;
    let end = start + 32;
    if log.data.len() < end {
        return Err(AppError::Decode(format!(
            "log {} data too short: {} bytes, need {}",
            log.tx_hash,
            log.data.len(),
            end
        )));
    }
    Ok(&log.data[start..end])
}

fn word_u256(log: &RawLog, index: usize) -> Result<U256> {
    Ok(U256::from_be_slice(word(log, index)?))
}

fn word_bool(log: &RawLog, index: usize) -> Result<bool> {
    Ok(word_u256(log, index)? != U256::ZERO)
}

fn outcome(is_yes: bool) -> Outcome {
    if is_yes {
        Outcome::Yes
    } else {
        Outcome::No
    }
}

// ---------------------------------------------------------------------------
// Decimal scaling
// ---------------------------------------------------------------------------

/// Scale a raw fixed-point integer to an exact decimal string.
///
/// Pure integer divide/modulo — floating point would round 18-decimal
/// amounts above 2^53. Trailing fractional zeros are trimmed:
/// `1500000 @ 6 → "1.5"`, `3000000 @ 6 → "3"`.
pub fn scale_units(raw: U256, decimals: u32) -> String {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let integer = raw / divisor;
    let frac = raw % divisor;

    if frac == U256::ZERO {
        return integer.to_string();
    }

    let frac_str = frac.to_string();
    let mut padded = "0".repeat(decimals as usize - frac_str.len());
    padded.push_str(&frac_str);
    let trimmed = padded.trim_end_matches('0');
    format!("{integer}.{trimmed}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const TRADER: Address = address!("00000000000000000000000000000000000000aa");
    const MARKET: Address = address!("00000000000000000000000000000000000000bb");

    fn actor_word(addr: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_slice());
        B256::from(word)
    }

    fn data_words(values: &[U256]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * 32);
        for v in values {
            out.extend_from_slice(&v.to_be_bytes::<32>());
        }
        out
    }

    fn raw_log(topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: MARKET,
            topics,
            data,
            block_number: 1000,
            tx_hash: B256::repeat_byte(0x11),
            log_index: 3,
            block_time: 1_700_000_000,
        }
    }

    #[test]
    fn buy_decodes_to_trade_with_scaled_amounts() {
        // isYes=1, shares=2.5e18, cost=1.25e6
        let data = data_words(&[
            U256::from(1u64),
            U256::from(2_500_000_000_000_000_000u128),
            U256::from(1_250_000u64),
        ]);
        let log = raw_log(vec![*TOPIC_BUY, actor_word(TRADER)], data);

        let event = decode_log(&log).unwrap().expect("tracked topic");
        match event {
            DecodedEvent::Trade(t) => {
                assert_eq!(t.kind, TradeKind::Buy);
                assert_eq!(t.outcome, Outcome::Yes);
                assert_eq!(t.trader, TRADER);
                assert_eq!(t.market.0, MARKET);
                assert_eq!(t.shares, "2.5");
                assert_eq!(t.amount, "1.25");
            }
            DecodedEvent::Resolution(_) => panic!("buy must decode as trade"),
        }
    }

    #[test]
    fn sell_no_side_decodes_no_outcome() {
        let data = data_words(&[
            U256::ZERO, // isYes = false
            U256::from(1_000_000_000_000_000_000u128),
            U256::from(400_000u64),
        ]);
        let log = raw_log(vec![*TOPIC_SELL, actor_word(TRADER)], data);

        match decode_log(&log).unwrap().unwrap() {
            DecodedEvent::Trade(t) => {
                assert_eq!(t.kind, TradeKind::Sell);
                assert_eq!(t.outcome, Outcome::No);
                assert_eq!(t.amount, "0.4");
            }
            _ => panic!("sell must decode as trade"),
        }
    }

    #[test]
    fn redeem_is_always_recorded_as_yes() {
        let data = data_words(&[
            U256::from(3_000_000_000_000_000_000u128),
            U256::from(3_000_000u64),
        ]);
        let log = raw_log(vec![*TOPIC_REDEEM, actor_word(TRADER)], data);

        match decode_log(&log).unwrap().unwrap() {
            DecodedEvent::Trade(t) => {
                assert_eq!(t.kind, TradeKind::Redeem);
                assert_eq!(t.outcome, Outcome::Yes);
                assert_eq!(t.shares, "3");
            }
            _ => panic!("redeem must decode as trade"),
        }
    }

    #[test]
    fn resolution_routes_separately_from_trades() {
        let data = data_words(&[U256::from(1u64)]);
        let log = raw_log(vec![*TOPIC_RESOLVED], data);

        match decode_log(&log).unwrap().unwrap() {
            DecodedEvent::Resolution(r) => {
                assert!(r.yes_wins);
                assert_eq!(r.market.0, MARKET);
            }
            DecodedEvent::Trade(_) => panic!("resolution must never be a trade"),
        }
    }

    #[test]
    fn truncated_data_is_a_decode_error() {
        // Buy needs 96 bytes of data; give it 64.
        let data = data_words(&[U256::from(1u64), U256::from(5u64)]);
        let log = raw_log(vec![*TOPIC_BUY, actor_word(TRADER)], data);
        assert!(decode_log(&log).is_err());
    }

    #[test]
    fn unknown_topic_is_skipped_not_an_error() {
        let log = raw_log(vec![B256::repeat_byte(0xde)], vec![]);
        assert!(decode_log(&log).unwrap().is_none());
    }

    #[test]
    fn scale_units_is_exact_on_large_integers() {
        // 123456789.012345678901234567 — exceeds f64 precision; the string
        // must survive untouched.
        let raw = U256::from_str_radix("123456789012345678901234567", 10).unwrap();
        assert_eq!(scale_units(raw, 18), "123456789.012345678901234567");
    }

    #[test]
    fn scale_units_edge_cases() {
        assert_eq!(scale_units(U256::ZERO, 6), "0");
        assert_eq!(scale_units(U256::from(1u64), 18), "0.000000000000000001");
        assert_eq!(scale_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(scale_units(U256::from(3_000_000u64), 6), "3");
        assert_eq!(scale_units(U256::from(42u64), 0), "42");
    }
}
