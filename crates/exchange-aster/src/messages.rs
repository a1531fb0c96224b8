//! Parsers for Aster stream payloads.
//!
//! Parsing is separated from socket handling so each payload shape can be
//! exercised without a connection. A malformed message yields `None`; the
//! listener logs and continues.

use chrono::{DateTime, Utc};
use funding_arb_connector::BookLevel;
use funding_arb_core::{Bbo, LiquidationEvent, OrderSide, OrderStatus, OrderUpdate};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Unwraps a combined-stream envelope (`{"stream": ..., "data": ...}`).
#[must_use]
pub fn unwrap_combined(value: &Value) -> &Value {
    value.get("data").unwrap_or(value)
}

/// Event type discriminator (`"e"` field).
#[must_use]
pub fn event_type(value: &Value) -> Option<&str> {
    value.get("e").and_then(Value::as_str)
}

fn decimal(value: &Value, key: &str) -> Option<Decimal> {
    value.get(key).and_then(Value::as_str).and_then(|s| Decimal::from_str(s).ok())
}

fn event_time(value: &Value) -> DateTime<Utc> {
    value
        .get("E")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Parses a `bookTicker` event into a BBO.
#[must_use]
pub fn parse_book_ticker(data: &Value) -> Option<Bbo> {
    if event_type(data) != Some("bookTicker") {
        return None;
    }
    let symbol = data.get("s").and_then(Value::as_str)?.to_string();
    let bid = decimal(data, "b")?;
    let ask = decimal(data, "a")?;
    Some(Bbo {
        symbol,
        bid,
        ask,
        timestamp: event_time(data),
        sequence: data.get("u").and_then(Value::as_u64),
    })
}

/// Parsed partial-depth snapshot.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub sequence: Option<u64>,
}

fn parse_levels(raw: Option<&Value>) -> Vec<BookLevel> {
    raw.and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|pair| {
                    let arr = pair.as_array()?;
                    let price = Decimal::from_str(arr.first()?.as_str()?).ok()?;
                    let size = Decimal::from_str(arr.get(1)?.as_str()?).ok()?;
                    Some(BookLevel { price, size })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses a `depthUpdate` event. Aster's partial-depth channel replaces the
/// whole book every tick, so this is a snapshot rather than a delta.
#[must_use]
pub fn parse_depth(data: &Value) -> Option<DepthSnapshot> {
    if event_type(data) != Some("depthUpdate") {
        return None;
    }
    Some(DepthSnapshot {
        symbol: data.get("s").and_then(Value::as_str)?.to_string(),
        bids: parse_levels(data.get("b")),
        asks: parse_levels(data.get("a")),
        sequence: data.get("u").and_then(Value::as_u64),
    })
}

/// Parses a `forceOrder` liquidation event.
#[must_use]
pub fn parse_force_order(data: &Value) -> Option<LiquidationEvent> {
    if event_type(data) != Some("forceOrder") {
        return None;
    }
    let order = data.get("o")?;
    let side = match order.get("S").and_then(Value::as_str)? {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        _ => return None,
    };
    Some(LiquidationEvent {
        venue: "aster".to_string(),
        symbol: order.get("s").and_then(Value::as_str)?.to_string(),
        side,
        quantity: decimal(order, "q")?,
        price: decimal(order, "p")?,
        timestamp: event_time(data),
    })
}

fn parse_status(raw: &str) -> Option<OrderStatus> {
    Some(match raw {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => return None,
    })
}

/// Parses an `ORDER_TRADE_UPDATE` event from the private stream.
#[must_use]
pub fn parse_order_update(data: &Value) -> Option<OrderUpdate> {
    if event_type(data) != Some("ORDER_TRADE_UPDATE") {
        return None;
    }
    let order = data.get("o")?;
    let status = parse_status(order.get("X").and_then(Value::as_str)?)?;
    let is_liquidation = order.get("x").and_then(Value::as_str) == Some("LIQUIDATION")
        || order.get("ot").and_then(Value::as_str) == Some("LIQUIDATION");
    let side = match order.get("S").and_then(Value::as_str) {
        Some("SELL") => OrderSide::Sell,
        _ => OrderSide::Buy,
    };

    Some(OrderUpdate {
        venue: "aster".to_string(),
        symbol: order.get("s").and_then(Value::as_str)?.to_string(),
        order_id: order.get("i").map(|v| v.to_string().trim_matches('"').to_string())?,
        side,
        status,
        filled_quantity: decimal(order, "z").unwrap_or(Decimal::ZERO),
        avg_fill_price: decimal(order, "ap").filter(|p| *p > Decimal::ZERO),
        fee: decimal(order, "n").unwrap_or(Decimal::ZERO),
        fee_currency: order.get("N").and_then(Value::as_str).map(str::to_string),
        is_liquidation,
        timestamp: event_time(data),
    })
}

/// True for a `listenKeyExpired` control event.
#[must_use]
pub fn is_listen_key_expired(data: &Value) -> bool {
    event_type(data) == Some("listenKeyExpired")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn book_ticker_parses() {
        let msg = json!({
            "e": "bookTicker", "u": 400900217, "E": 1571889248277i64,
            "s": "BTCUSDT", "b": "49990.10", "B": "31.21", "a": "50010.50", "A": "40.66"
        });
        let bbo = parse_book_ticker(&msg).unwrap();
        assert_eq!(bbo.symbol, "BTCUSDT");
        assert_eq!(bbo.bid, dec!(49990.10));
        assert_eq!(bbo.ask, dec!(50010.50));
        assert_eq!(bbo.sequence, Some(400_900_217));
    }

    #[test]
    fn combined_envelope_unwraps() {
        let msg = json!({
            "stream": "btcusdt@bookTicker",
            "data": {"e": "bookTicker", "s": "BTCUSDT", "b": "1", "a": "2"}
        });
        let bbo = parse_book_ticker(unwrap_combined(&msg)).unwrap();
        assert_eq!(bbo.bid, dec!(1));
    }

    #[test]
    fn depth_update_parses_levels() {
        let msg = json!({
            "e": "depthUpdate", "E": 1571889248277i64, "s": "BTCUSDT", "u": 160,
            "b": [["7403.89", "0.002"], ["7403.90", "3.906"]],
            "a": [["7405.96", "3.340"]]
        });
        let depth = parse_depth(&msg).unwrap();
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.asks.len(), 1);
        assert_eq!(depth.sequence, Some(160));
        assert_eq!(depth.bids[0].price, dec!(7403.89));
    }

    #[test]
    fn malformed_levels_are_skipped() {
        let msg = json!({
            "e": "depthUpdate", "s": "BTCUSDT", "u": 161,
            "b": [["not-a-number", "1"], ["7403.90", "2"]],
            "a": []
        });
        let depth = parse_depth(&msg).unwrap();
        assert_eq!(depth.bids.len(), 1);
    }

    #[test]
    fn force_order_parses() {
        let msg = json!({
            "e": "forceOrder", "E": 1568014460893i64,
            "o": {"s": "BTCUSDT", "S": "SELL", "q": "0.014", "p": "9910", "ap": "9910", "X": "FILLED"}
        });
        let event = parse_force_order(&msg).unwrap();
        assert_eq!(event.side, OrderSide::Sell);
        assert_eq!(event.quantity, dec!(0.014));
        assert_eq!(event.price, dec!(9910));
    }

    #[test]
    fn order_update_parses_fill() {
        let msg = json!({
            "e": "ORDER_TRADE_UPDATE", "E": 1568879465651i64,
            "o": {
                "s": "BTCUSDT", "i": 8886774, "X": "FILLED", "x": "TRADE",
                "z": "0.020", "ap": "49995.0", "n": "0.05", "N": "USDT"
            }
        });
        let update = parse_order_update(&msg).unwrap();
        assert_eq!(update.order_id, "8886774");
        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.filled_quantity, dec!(0.020));
        assert_eq!(update.avg_fill_price, Some(dec!(49995.0)));
        assert!(!update.is_liquidation);
    }

    #[test]
    fn liquidation_flag_detected() {
        let msg = json!({
            "e": "ORDER_TRADE_UPDATE",
            "o": {"s": "BTCUSDT", "i": 1, "X": "FILLED", "x": "LIQUIDATION", "z": "0.5"}
        });
        assert!(parse_order_update(&msg).unwrap().is_liquidation);
    }

    #[test]
    fn listen_key_expiry_detected() {
        assert!(is_listen_key_expired(&json!({"e": "listenKeyExpired"})));
        assert!(!is_listen_key_expired(&json!({"e": "bookTicker"})));
    }

    #[test]
    fn wrong_event_types_yield_none() {
        let msg = json!({"e": "bookTicker", "s": "BTCUSDT", "b": "1", "a": "2"});
        assert!(parse_depth(&msg).is_none());
        assert!(parse_force_order(&msg).is_none());
        assert!(parse_order_update(&msg).is_none());
    }
}
