//! Parsers for Lighter stream payloads.

use chrono::{DateTime, Utc};
use funding_arb_connector::BookLevel;
use funding_arb_core::{OrderSide, OrderStatus, OrderUpdate};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Message discriminator (`"type"` field).
#[must_use]
pub fn message_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Order-book payload: snapshot on subscribe, delta afterwards.
#[derive(Debug, Clone)]
pub struct OrderBookMessage {
    /// True for the full snapshot delivered on (re)subscribe.
    pub is_snapshot: bool,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    /// Monotonic stream offset.
    pub offset: u64,
}

fn decimal_value(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn parse_levels(raw: Option<&Value>) -> Vec<BookLevel> {
    raw.and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|entry| {
                    Some(BookLevel {
                        price: decimal_value(entry.get("price"))?,
                        size: decimal_value(entry.get("size"))?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses `subscribed/order_book` and `update/order_book` messages.
#[must_use]
pub fn parse_order_book(value: &Value) -> Option<OrderBookMessage> {
    let is_snapshot = match message_type(value) {
        Some("subscribed/order_book") => true,
        Some("update/order_book") => false,
        _ => return None,
    };
    let book = value.get("order_book")?;
    Some(OrderBookMessage {
        is_snapshot,
        bids: parse_levels(book.get("bids")),
        asks: parse_levels(book.get("asks")),
        offset: value.get("offset").and_then(Value::as_u64)?,
    })
}

fn parse_status(raw: &str) -> Option<OrderStatus> {
    Some(match raw {
        "open" | "pending" => OrderStatus::New,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" => OrderStatus::Canceled,
        "rejected" => OrderStatus::Rejected,
        "expired" => OrderStatus::Expired,
        _ => return None,
    })
}

/// Parses `update/account_orders` into individual order updates.
#[must_use]
pub fn parse_account_orders(value: &Value, venue_symbol: &str) -> Vec<OrderUpdate> {
    if message_type(value) != Some("update/account_orders") {
        return Vec::new();
    }

    value
        .get("orders")
        .and_then(Value::as_array)
        .map(|orders| {
            orders
                .iter()
                .filter_map(|order| {
                    let status = parse_status(order.get("status").and_then(Value::as_str)?)?;
                    let side = match order.get("side").and_then(Value::as_str)? {
                        "sell" => OrderSide::Sell,
                        "buy" => OrderSide::Buy,
                        _ => return None,
                    };
                    Some(OrderUpdate {
                        venue: "lighter".to_string(),
                        symbol: venue_symbol.to_string(),
                        order_id: order
                            .get("order_index")
                            .map(|v| v.to_string().trim_matches('"').to_string())?,
                        side,
                        status,
                        filled_quantity: decimal_value(order.get("filled_base_amount"))
                            .unwrap_or(Decimal::ZERO),
                        avg_fill_price: decimal_value(order.get("avg_fill_price"))
                            .filter(|p| *p > Decimal::ZERO),
                        fee: decimal_value(order.get("fee")).unwrap_or(Decimal::ZERO),
                        fee_currency: Some("USDC".to_string()),
                        is_liquidation: order
                            .get("is_liquidation")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        timestamp: order
                            .get("timestamp")
                            .and_then(Value::as_i64)
                            .and_then(DateTime::from_timestamp_millis)
                            .unwrap_or_else(Utc::now),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn snapshot_parses() {
        let msg = json!({
            "type": "subscribed/order_book",
            "channel": "order_book:3",
            "offset": 100,
            "order_book": {
                "bids": [{"price": "49990", "size": "1.5"}],
                "asks": [{"price": "50010", "size": "2"}]
            }
        });
        let book = parse_order_book(&msg).unwrap();
        assert!(book.is_snapshot);
        assert_eq!(book.offset, 100);
        assert_eq!(book.bids[0].price, dec!(49990));
        assert_eq!(book.asks[0].size, dec!(2));
    }

    #[test]
    fn delta_parses() {
        let msg = json!({
            "type": "update/order_book",
            "offset": 101,
            "order_book": {"bids": [{"price": "49995", "size": "0"}], "asks": []}
        });
        let book = parse_order_book(&msg).unwrap();
        assert!(!book.is_snapshot);
        assert_eq!(book.offset, 101);
        assert_eq!(book.bids[0].size, Decimal::ZERO);
    }

    #[test]
    fn missing_offset_is_rejected() {
        let msg = json!({
            "type": "update/order_book",
            "order_book": {"bids": [], "asks": []}
        });
        assert!(parse_order_book(&msg).is_none());
    }

    #[test]
    fn account_orders_parse_with_liquidation_flag() {
        let msg = json!({
            "type": "update/account_orders",
            "orders": [
                {
                    "order_index": 77, "side": "sell", "status": "filled",
                    "filled_base_amount": "0.02", "avg_fill_price": "50005",
                    "fee": "0.01", "is_liquidation": true, "timestamp": 1700000000000i64
                },
                {"order_index": 78, "side": "buy", "status": "open", "filled_base_amount": "0"}
            ]
        });
        let updates = parse_account_orders(&msg, "BTC_USDC_PERP");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].order_id, "77");
        assert!(updates[0].is_liquidation);
        assert_eq!(updates[0].status, OrderStatus::Filled);
        assert_eq!(updates[1].status, OrderStatus::New);
        assert!(!updates[1].is_liquidation);
    }

    #[test]
    fn unknown_types_yield_nothing() {
        let msg = json!({"type": "connected"});
        assert!(parse_order_book(&msg).is_none());
        assert!(parse_account_orders(&msg, "X").is_empty());
    }
}
