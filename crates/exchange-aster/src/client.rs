//! Signed REST client for Aster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_arb_core::{
    Bbo, ContractAttributes, EngineError, ExchangePositionSnapshot, FeeStructure, LeverageInfo,
    OrderSide, Side, TimeInForce, TradeData, VenueClient,
};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;

type HmacSha256 = Hmac<Sha256>;

/// Aster settles funding every 8 hours.
pub const FUNDING_INTERVAL_SECS: u64 = 8 * 60 * 60;

/// REST client implementing the venue capability set.
pub struct AsterClient {
    api_url: String,
    api_key: String,
    secret_key: String,
    http: reqwest::Client,
    /// Contract metadata cache keyed by normalized symbol.
    contracts: RwLock<HashMap<String, ContractAttributes>>,
}

impl AsterClient {
    #[must_use]
    pub fn new(api_url: String, api_key: String, secret_key: String) -> Self {
        Self {
            api_url,
            api_key,
            secret_key,
            http: reqwest::Client::new(),
            contracts: RwLock::new(HashMap::new()),
        }
    }

    /// Requests a fresh listen key for the private stream.
    ///
    /// # Errors
    /// Returns an error on transport failure or a malformed response.
    pub async fn create_listen_key(&self) -> Result<String, EngineError> {
        let url = format!("{}/fapi/v1/listenKey", self.api_url);
        let body: Value = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        body.get("listenKey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::VenueRejected {
                venue: "aster".to_string(),
                message: format!("listenKey missing in response: {body}"),
            })
    }

    /// Extends the current listen key's TTL.
    ///
    /// # Errors
    /// Returns an error when the venue rejects the keepalive; callers treat
    /// this as expiry and rebuild the stream.
    pub async fn keepalive_listen_key(&self) -> Result<(), EngineError> {
        let url = format!("{}/fapi/v1/listenKey", self.api_url);
        let resp = self
            .http
            .put(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::ListenKeyExpired)
        }
    }

    fn sign(&self, query: &str) -> String {
        // HMAC accepts keys of any length; construction cannot fail.
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret_key.as_bytes()) else {
            return String::new();
        };
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Value, EngineError> {
        params.push(("timestamp".to_string(), Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow".to_string(), "5000".to_string()));

        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.api_url, path, query, signature);

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body: Value = resp.json().await.map_err(transport)?;

        if !status.is_success() || body.get("code").and_then(Value::as_i64).unwrap_or(0) < 0 {
            return Err(EngineError::VenueRejected {
                venue: "aster".to_string(),
                message: body.to_string(),
            });
        }
        Ok(body)
    }

    async fn public_request(&self, path: &str, query: &str) -> Result<Value, EngineError> {
        let url = if query.is_empty() {
            format!("{}{}", self.api_url, path)
        } else {
            format!("{}{}?{}", self.api_url, path, query)
        };
        self.http
            .get(&url)
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)
    }

    fn cached_attributes(&self, symbol: &str) -> Option<ContractAttributes> {
        self.contracts.read().get(symbol).cloned()
    }
}

fn transport(err: reqwest::Error) -> EngineError {
    EngineError::TransientNetwork(err.to_string())
}

fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
    value.get(key).and_then(Value::as_str).and_then(|s| Decimal::from_str(s).ok())
}

#[async_trait]
impl VenueClient for AsterClient {
    fn name(&self) -> &str {
        "aster"
    }

    fn normalize_symbol(&self, venue_symbol: &str) -> String {
        funding_arb_core::symbol::normalize(venue_symbol)
    }

    fn venue_symbol(&self, symbol: &str) -> String {
        format!("{}USDT", symbol.to_ascii_uppercase())
    }

    fn fee_structure(&self) -> FeeStructure {
        FeeStructure {
            maker_fee: Decimal::new(2, 4),
            taker_fee: Decimal::new(4, 4),
            funding_interval_secs: FUNDING_INTERVAL_SECS,
        }
    }

    async fn contract_attributes(&self, symbol: &str) -> Result<ContractAttributes, EngineError> {
        if let Some(cached) = self.cached_attributes(symbol) {
            return Ok(cached);
        }

        let venue_symbol = self.venue_symbol(symbol);
        let info = self.public_request("/fapi/v1/exchangeInfo", "").await?;
        let symbols = info
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::VenueRejected {
                venue: "aster".to_string(),
                message: "exchangeInfo missing symbols".to_string(),
            })?;

        let entry = symbols
            .iter()
            .find(|s| s.get("symbol").and_then(Value::as_str) == Some(venue_symbol.as_str()))
            .ok_or_else(|| EngineError::VenueRejected {
                venue: "aster".to_string(),
                message: format!("symbol {venue_symbol} not listed"),
            })?;

        let mut tick_size = Decimal::new(1, 2);
        let mut step_size = Decimal::new(1, 3);
        let mut min_quantity = Decimal::ZERO;
        if let Some(filters) = entry.get("filters").and_then(Value::as_array) {
            for filter in filters {
                match filter.get("filterType").and_then(Value::as_str) {
                    Some("PRICE_FILTER") => {
                        if let Some(t) = decimal_field(filter, "tickSize") {
                            tick_size = t;
                        }
                    }
                    Some("LOT_SIZE") => {
                        if let Some(s) = decimal_field(filter, "stepSize") {
                            step_size = s;
                        }
                        if let Some(m) = decimal_field(filter, "minQty") {
                            min_quantity = m;
                        }
                    }
                    _ => {}
                }
            }
        }

        let attrs = ContractAttributes {
            contract_id: venue_symbol,
            tick_size,
            step_size,
            quantity_multiplier: Decimal::ONE,
            price_multiplier: Decimal::ONE,
            min_quantity,
            max_leverage: 20,
        };
        self.contracts.write().insert(symbol.to_string(), attrs.clone());
        Ok(attrs)
    }

    async fn leverage_info(&self, symbol: &str) -> Result<LeverageInfo, EngineError> {
        let venue_symbol = self.venue_symbol(symbol);
        let body = self
            .signed_request(
                reqwest::Method::GET,
                "/fapi/v1/leverageBracket",
                vec![("symbol".to_string(), venue_symbol.clone())],
            )
            .await?;

        let max_leverage = body
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|e| e.get("brackets"))
            .and_then(Value::as_array)
            .and_then(|b| b.first())
            .and_then(|b| b.get("initialLeverage"))
            .and_then(Value::as_u64)
            .unwrap_or(20) as u32;

        let positions = self
            .signed_request(
                reqwest::Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol".to_string(), venue_symbol)],
            )
            .await?;
        let current_leverage = positions
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|p| p.get("leverage"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(1);

        Ok(LeverageInfo { current_leverage, max_leverage })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), EngineError> {
        self.signed_request(
            reqwest::Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol".to_string(), self.venue_symbol(symbol)),
                ("leverage".to_string(), leverage.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch_bbo(&self, symbol: &str) -> Result<Bbo, EngineError> {
        let venue_symbol = self.venue_symbol(symbol);
        let body = self
            .public_request("/fapi/v1/ticker/bookTicker", &format!("symbol={venue_symbol}"))
            .await?;

        let bid = decimal_field(&body, "bidPrice").unwrap_or(Decimal::ZERO);
        let ask = decimal_field(&body, "askPrice").unwrap_or(Decimal::ZERO);
        Ok(Bbo {
            symbol: venue_symbol,
            bid,
            ask,
            timestamp: Utc::now(),
            sequence: None,
        })
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        reduce_only: bool,
        time_in_force: TimeInForce,
    ) -> Result<String, EngineError> {
        let tif = match time_in_force {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::PostOnly => "GTX",
        };
        let mut params = vec![
            ("symbol".to_string(), self.venue_symbol(symbol)),
            ("side".to_string(), side.as_str().to_ascii_uppercase()),
            ("type".to_string(), "LIMIT".to_string()),
            ("timeInForce".to_string(), tif.to_string()),
            ("quantity".to_string(), quantity.normalize().to_string()),
            ("price".to_string(), price.normalize().to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }

        let body = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", params)
            .await?;
        order_id_from(&body)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<String, EngineError> {
        let mut params = vec![
            ("symbol".to_string(), self.venue_symbol(symbol)),
            ("side".to_string(), side.as_str().to_ascii_uppercase()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.normalize().to_string()),
        ];
        if reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }

        let body = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", params)
            .await?;
        order_id_from(&body)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        let result = self
            .signed_request(
                reqwest::Method::DELETE,
                "/fapi/v1/order",
                vec![
                    ("symbol".to_string(), self.venue_symbol(symbol)),
                    ("orderId".to_string(), order_id.to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // An order that already filled or was already canceled is gone
            // either way; the caller only needs it off the book.
            Err(EngineError::VenueRejected { message, .. })
                if message.contains("-2011") || message.contains("Unknown order") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn position_snapshot(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePositionSnapshot>, EngineError> {
        let venue_symbol = self.venue_symbol(symbol);
        let body = self
            .signed_request(
                reqwest::Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol".to_string(), venue_symbol.clone())],
            )
            .await?;

        let Some(entry) = body.as_array().and_then(|arr| arr.first()) else {
            return Ok(None);
        };

        let quantity = decimal_field(entry, "positionAmt").unwrap_or(Decimal::ZERO);
        if quantity.is_zero() {
            return Ok(None);
        }

        let side = if quantity > Decimal::ZERO { Side::Long } else { Side::Short };
        Ok(Some(ExchangePositionSnapshot {
            symbol: venue_symbol,
            side,
            quantity,
            entry_price: decimal_field(entry, "entryPrice").unwrap_or(Decimal::ZERO),
            mark_price: decimal_field(entry, "markPrice").unwrap_or(Decimal::ZERO),
            unrealized_pnl: decimal_field(entry, "unRealizedProfit").unwrap_or(Decimal::ZERO),
            realized_pnl: Decimal::ZERO,
            funding_accrued: None,
            leverage: entry
                .get("leverage")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            margin_reserved: decimal_field(entry, "isolatedMargin").unwrap_or(Decimal::ZERO),
            liquidation_price: decimal_field(entry, "liquidationPrice")
                .filter(|p| *p > Decimal::ZERO),
        }))
    }

    async fn user_trade_history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        order_id: Option<&str>,
    ) -> Result<Vec<TradeData>, EngineError> {
        let mut params = vec![
            ("symbol".to_string(), self.venue_symbol(symbol)),
            ("startTime".to_string(), start.timestamp_millis().to_string()),
            ("endTime".to_string(), end.timestamp_millis().to_string()),
        ];
        if let Some(id) = order_id {
            params.push(("orderId".to_string(), id.to_string()));
        }

        let body = self
            .signed_request(reqwest::Method::GET, "/fapi/v1/userTrades", params)
            .await?;

        let mut trades = Vec::new();
        for entry in body.as_array().map(Vec::as_slice).unwrap_or_default() {
            let side = if entry.get("buyer").and_then(Value::as_bool).unwrap_or(false) {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };
            trades.push(TradeData {
                order_id: entry
                    .get("orderId")
                    .map(|v| v.to_string().trim_matches('"').to_string())
                    .unwrap_or_default(),
                trade_id: entry
                    .get("id")
                    .map(|v| v.to_string().trim_matches('"').to_string())
                    .unwrap_or_default(),
                symbol: entry
                    .get("symbol")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                side,
                quantity: decimal_field(entry, "qty").unwrap_or(Decimal::ZERO),
                price: decimal_field(entry, "price").unwrap_or(Decimal::ZERO),
                fee: decimal_field(entry, "commission").unwrap_or(Decimal::ZERO),
                fee_currency: entry
                    .get("commissionAsset")
                    .and_then(Value::as_str)
                    .unwrap_or("USDT")
                    .to_string(),
                realized_pnl: decimal_field(entry, "realizedPnl"),
                realized_funding: None,
                timestamp: entry
                    .get("time")
                    .and_then(Value::as_i64)
                    .and_then(|ms| DateTime::from_timestamp_millis(ms))
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(trades)
    }

    fn round_to_step(&self, symbol: &str, quantity: Decimal) -> Decimal {
        let step = self
            .cached_attributes(symbol)
            .map(|a| a.step_size)
            .unwrap_or_else(|| Decimal::new(1, 3));
        if step <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (quantity / step).floor() * step
    }
}

fn order_id_from(body: &Value) -> Result<String, EngineError> {
    body.get("orderId")
        .map(|v| v.to_string().trim_matches('"').to_string())
        .ok_or_else(|| EngineError::VenueRejected {
            venue: "aster".to_string(),
            message: format!("orderId missing in response: {body}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client() -> AsterClient {
        AsterClient::new(
            "https://fapi.asterdex.com".to_string(),
            "key".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn symbol_round_trip() {
        let c = client();
        assert_eq!(c.venue_symbol("BTC"), "BTCUSDT");
        assert_eq!(c.normalize_symbol("BTCUSDT"), "BTC");
        assert_eq!(c.normalize_symbol(&c.venue_symbol("eth")), "ETH");
    }

    #[test]
    fn signature_is_stable_hex() {
        let c = client();
        let sig = c.sign("symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(sig, c.sign("symbol=BTCUSDT&timestamp=1700000000000"));
    }

    #[test]
    fn round_to_step_defaults_and_floors() {
        let c = client();
        // No cached attributes: default 0.001 step.
        assert_eq!(c.round_to_step("BTC", dec!(0.0239)), dec!(0.023));
        assert_eq!(c.round_to_step("BTC", dec!(-1)), Decimal::ZERO);
    }

    #[test]
    fn round_to_step_uses_cached_attrs() {
        let c = client();
        c.contracts.write().insert(
            "BTC".to_string(),
            ContractAttributes {
                contract_id: "BTCUSDT".to_string(),
                tick_size: dec!(0.1),
                step_size: dec!(0.01),
                quantity_multiplier: Decimal::ONE,
                price_multiplier: Decimal::ONE,
                min_quantity: dec!(0.01),
                max_leverage: 20,
            },
        );
        assert_eq!(c.round_to_step("BTC", dec!(0.0199)), dec!(0.01));
    }

    #[test]
    fn funding_interval_is_eight_hours() {
        assert_eq!(client().fee_structure().funding_interval_secs, 28_800);
    }
}
