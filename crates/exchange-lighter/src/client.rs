//! REST client for Lighter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use funding_arb_core::{
    Bbo, ContractAttributes, EngineError, ExchangePositionSnapshot, FeeStructure, LeverageInfo,
    OrderSide, Side, TimeInForce, TradeData, VenueClient,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// Lighter settles funding hourly.
pub const FUNDING_INTERVAL_SECS: u64 = 60 * 60;

/// REST client implementing the venue capability set.
///
/// Lighter addresses markets by integer index; the index doubles as the
/// contract id and is resolved once per symbol from the market catalog.
pub struct LighterClient {
    api_url: String,
    auth_token: String,
    http: reqwest::Client,
    contracts: RwLock<HashMap<String, ContractAttributes>>,
}

impl LighterClient {
    #[must_use]
    pub fn new(api_url: String, auth_token: String) -> Self {
        Self {
            api_url,
            auth_token,
            http: reqwest::Client::new(),
            contracts: RwLock::new(HashMap::new()),
        }
    }

    /// Auth token presented at websocket handshake.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Resolved market index for a normalized symbol, if cached.
    #[must_use]
    pub fn market_id(&self, symbol: &str) -> Option<String> {
        self.contracts.read().get(symbol).map(|a| a.contract_id.clone())
    }

    async fn get(&self, path: &str, query: &str) -> Result<Value, EngineError> {
        let url = if query.is_empty() {
            format!("{}{}", self.api_url, path)
        } else {
            format!("{}{}?{}", self.api_url, path, query)
        };
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(transport)?;
        parse_response(resp).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, EngineError> {
        let url = format!("{}{}", self.api_url, path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        parse_response(resp).await
    }

    fn cached_attributes(&self, symbol: &str) -> Option<ContractAttributes> {
        self.contracts.read().get(symbol).cloned()
    }
}

async fn parse_response(resp: reqwest::Response) -> Result<Value, EngineError> {
    let status = resp.status();
    let body: Value = resp.json().await.map_err(transport)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(EngineError::VenueRejected {
            venue: "lighter".to_string(),
            message: body.to_string(),
        })
    }
}

fn transport(err: reqwest::Error) -> EngineError {
    EngineError::TransientNetwork(err.to_string())
}

fn decimal_value(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[async_trait]
impl VenueClient for LighterClient {
    fn name(&self) -> &str {
        "lighter"
    }

    fn normalize_symbol(&self, venue_symbol: &str) -> String {
        funding_arb_core::symbol::normalize(venue_symbol)
    }

    fn venue_symbol(&self, symbol: &str) -> String {
        format!("{}_USDC_PERP", symbol.to_ascii_uppercase())
    }

    fn fee_structure(&self) -> FeeStructure {
        FeeStructure {
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::new(3, 4),
            funding_interval_secs: FUNDING_INTERVAL_SECS,
        }
    }

    async fn contract_attributes(&self, symbol: &str) -> Result<ContractAttributes, EngineError> {
        if let Some(cached) = self.cached_attributes(symbol) {
            return Ok(cached);
        }

        let venue_symbol = self.venue_symbol(symbol);
        let catalog = self.get("/api/v1/orderBooks", "").await?;
        let markets = catalog
            .get("order_books")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::VenueRejected {
                venue: "lighter".to_string(),
                message: "market catalog missing order_books".to_string(),
            })?;

        let entry = markets
            .iter()
            .find(|m| m.get("symbol").and_then(Value::as_str) == Some(venue_symbol.as_str()))
            .ok_or_else(|| EngineError::VenueRejected {
                venue: "lighter".to_string(),
                message: format!("symbol {venue_symbol} not listed"),
            })?;

        let market_index = entry
            .get("market_index")
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::VenueRejected {
                venue: "lighter".to_string(),
                message: "market entry missing market_index".to_string(),
            })?;

        let attrs = ContractAttributes {
            contract_id: market_index.to_string(),
            tick_size: decimal_value(entry.get("price_tick")).unwrap_or_else(|| Decimal::new(1, 2)),
            step_size: decimal_value(entry.get("size_tick")).unwrap_or_else(|| Decimal::new(1, 4)),
            quantity_multiplier: decimal_value(entry.get("size_multiplier")).unwrap_or(Decimal::ONE),
            price_multiplier: Decimal::ONE,
            min_quantity: decimal_value(entry.get("min_base_amount")).unwrap_or(Decimal::ZERO),
            max_leverage: entry.get("max_leverage").and_then(Value::as_u64).unwrap_or(10) as u32,
        };
        self.contracts.write().insert(symbol.to_string(), attrs.clone());
        Ok(attrs)
    }

    async fn leverage_info(&self, symbol: &str) -> Result<LeverageInfo, EngineError> {
        let attrs = self.contract_attributes(symbol).await?;
        let account = self.get("/api/v1/account", "").await?;
        let current_leverage = account
            .get("positions")
            .and_then(Value::as_array)
            .and_then(|positions| {
                positions
                    .iter()
                    .find(|p| p.get("market_index").map(ToString::to_string)
                        == Some(attrs.contract_id.clone()))
            })
            .and_then(|p| p.get("leverage"))
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;

        Ok(LeverageInfo { current_leverage, max_leverage: attrs.max_leverage })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), EngineError> {
        let attrs = self.contract_attributes(symbol).await?;
        self.post(
            "/api/v1/updateLeverage",
            json!({ "market_index": attrs.contract_id, "leverage": leverage }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_bbo(&self, symbol: &str) -> Result<Bbo, EngineError> {
        let attrs = self.contract_attributes(symbol).await?;
        let body = self
            .get("/api/v1/orderBookOrders", &format!("market_index={}&limit=1", attrs.contract_id))
            .await?;

        let bid = decimal_value(
            body.get("bids")
                .and_then(Value::as_array)
                .and_then(|b| b.first())
                .and_then(|l| l.get("price")),
        )
        .unwrap_or(Decimal::ZERO);
        let ask = decimal_value(
            body.get("asks")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(|l| l.get("price")),
        )
        .unwrap_or(Decimal::ZERO);

        Ok(Bbo {
            symbol: self.venue_symbol(symbol),
            bid,
            ask,
            timestamp: Utc::now(),
            sequence: body.get("offset").and_then(Value::as_u64),
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
        let attrs = self.contract_attributes(symbol).await?;
        let tif = match time_in_force {
            TimeInForce::Gtc => "good_till_time",
            TimeInForce::Ioc => "immediate_or_cancel",
            TimeInForce::PostOnly => "post_only",
        };
        let body = self
            .post(
                "/api/v1/order",
                json!({
                    "market_index": attrs.contract_id,
                    "side": side.as_str(),
                    "type": "limit",
                    "time_in_force": tif,
                    "base_amount": quantity.normalize().to_string(),
                    "price": price.normalize().to_string(),
                    "reduce_only": reduce_only,
                }),
            )
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
        let attrs = self.contract_attributes(symbol).await?;
        let body = self
            .post(
                "/api/v1/order",
                json!({
                    "market_index": attrs.contract_id,
                    "side": side.as_str(),
                    "type": "market",
                    "base_amount": quantity.normalize().to_string(),
                    "reduce_only": reduce_only,
                }),
            )
            .await?;
        order_id_from(&body)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        let attrs = self.contract_attributes(symbol).await?;
        let result = self
            .post(
                "/api/v1/cancelOrder",
                json!({ "market_index": attrs.contract_id, "order_index": order_id }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(EngineError::VenueRejected { message, .. }) if message.contains("not found") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn position_snapshot(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePositionSnapshot>, EngineError> {
        let attrs = self.contract_attributes(symbol).await?;
        let account = self.get("/api/v1/account", "").await?;

        let Some(position) = account
            .get("positions")
            .and_then(Value::as_array)
            .and_then(|positions| {
                positions
                    .iter()
                    .find(|p| p.get("market_index").map(ToString::to_string)
                        == Some(attrs.contract_id.clone()))
            })
        else {
            return Ok(None);
        };

        let quantity = decimal_value(position.get("position")).unwrap_or(Decimal::ZERO);
        if quantity.is_zero() {
            return Ok(None);
        }

        let side = if quantity > Decimal::ZERO { Side::Long } else { Side::Short };
        Ok(Some(ExchangePositionSnapshot {
            symbol: self.venue_symbol(symbol),
            side,
            quantity,
            entry_price: decimal_value(position.get("avg_entry_price")).unwrap_or(Decimal::ZERO),
            mark_price: decimal_value(position.get("mark_price")).unwrap_or(Decimal::ZERO),
            unrealized_pnl: decimal_value(position.get("unrealized_pnl")).unwrap_or(Decimal::ZERO),
            realized_pnl: decimal_value(position.get("realized_pnl")).unwrap_or(Decimal::ZERO),
            funding_accrued: decimal_value(position.get("funding_accrued")),
            leverage: position.get("leverage").and_then(Value::as_u64).unwrap_or(1) as u32,
            margin_reserved: decimal_value(position.get("allocated_margin")).unwrap_or(Decimal::ZERO),
            liquidation_price: decimal_value(position.get("liquidation_price"))
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
        let attrs = self.contract_attributes(symbol).await?;
        let mut query = format!(
            "market_index={}&start={}&end={}",
            attrs.contract_id,
            start.timestamp_millis(),
            end.timestamp_millis()
        );
        if let Some(id) = order_id {
            query.push_str(&format!("&order_index={id}"));
        }

        let body = self.get("/api/v1/trades", &query).await?;
        let mut trades = Vec::new();
        for entry in body
            .get("trades")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let side = match entry.get("side").and_then(Value::as_str) {
                Some("sell") => OrderSide::Sell,
                _ => OrderSide::Buy,
            };
            trades.push(TradeData {
                order_id: entry
                    .get("order_index")
                    .map(|v| v.to_string().trim_matches('"').to_string())
                    .unwrap_or_default(),
                trade_id: entry
                    .get("trade_index")
                    .map(|v| v.to_string().trim_matches('"').to_string())
                    .unwrap_or_default(),
                symbol: self.venue_symbol(symbol),
                side,
                quantity: decimal_value(entry.get("size")).unwrap_or(Decimal::ZERO),
                price: decimal_value(entry.get("price")).unwrap_or(Decimal::ZERO),
                fee: decimal_value(entry.get("fee")).unwrap_or(Decimal::ZERO),
                fee_currency: "USDC".to_string(),
                realized_pnl: decimal_value(entry.get("realized_pnl")),
                realized_funding: decimal_value(entry.get("funding_payment")),
                timestamp: entry
                    .get("timestamp")
                    .and_then(Value::as_i64)
                    .and_then(DateTime::from_timestamp_millis)
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(trades)
    }

    fn round_to_step(&self, symbol: &str, quantity: Decimal) -> Decimal {
        let step = self
            .cached_attributes(symbol)
            .map(|a| a.step_size)
            .unwrap_or_else(|| Decimal::new(1, 4));
        if step <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (quantity / step).floor() * step
    }
}

fn order_id_from(body: &Value) -> Result<String, EngineError> {
    body.get("order_index")
        .map(|v| v.to_string().trim_matches('"').to_string())
        .ok_or_else(|| EngineError::VenueRejected {
            venue: "lighter".to_string(),
            message: format!("order_index missing in response: {body}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client() -> LighterClient {
        LighterClient::new("https://mainnet.zklighter.elliot.ai".to_string(), "token".to_string())
    }

    #[test]
    fn symbol_round_trip() {
        let c = client();
        assert_eq!(c.venue_symbol("BTC"), "BTC_USDC_PERP");
        assert_eq!(c.normalize_symbol("BTC_USDC_PERP"), "BTC");
        assert_eq!(c.normalize_symbol(&c.venue_symbol("sol")), "SOL");
    }

    #[test]
    fn maker_fee_is_zero_taker_is_three_bps() {
        let fees = client().fee_structure();
        assert_eq!(fees.maker_fee, Decimal::ZERO);
        assert_eq!(fees.taker_fee, dec!(0.0003));
        assert_eq!(fees.funding_interval_secs, 3600);
    }

    #[test]
    fn round_to_step_floors_with_cached_attrs() {
        let c = client();
        c.contracts.write().insert(
            "SOL".to_string(),
            ContractAttributes {
                contract_id: "4".to_string(),
                tick_size: dec!(0.001),
                step_size: dec!(0.1),
                quantity_multiplier: dec!(1000),
                price_multiplier: Decimal::ONE,
                min_quantity: dec!(0.1),
                max_leverage: 10,
            },
        );
        assert_eq!(c.round_to_step("SOL", dec!(2.39)), dec!(2.3));
        assert_eq!(c.market_id("SOL").as_deref(), Some("4"));
    }
}
