//! REST adapter for the external funding-rate service.
//!
//! The collection service is out of process; this client only asks it for
//! ranked candidates matching a filter.

use async_trait::async_trait;
use funding_arb_core::{EngineError, OpportunityData, OpportunityFilter, OpportunityStore};

pub struct HttpOpportunityStore {
    base_url: String,
    http: reqwest::Client,
}

impl HttpOpportunityStore {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: reqwest::Client::new() }
    }

    fn query_string(filter: &OpportunityFilter) -> String {
        let mut params = Vec::new();
        if let Some(min_profit) = filter.min_profit_percent {
            params.push(format!("min_profit_percent={min_profit}"));
        }
        if let Some(max_oi) = filter.max_oi_usd {
            params.push(format!("max_oi_usd={max_oi}"));
        }
        if let Some(whitelist) = &filter.whitelist_dexes {
            if !whitelist.is_empty() {
                params.push(format!("whitelist_dexes={}", whitelist.join(",")));
            }
        }
        if let Some(required) = &filter.required_dex {
            params.push(format!("required_dex={required}"));
        }
        if let Some(symbol) = &filter.symbol {
            params.push(format!("symbol={symbol}"));
        }
        if let Some(limit) = filter.limit {
            params.push(format!("limit={limit}"));
        }
        params.join("&")
    }
}

#[async_trait]
impl OpportunityStore for HttpOpportunityStore {
    async fn find_opportunities(
        &self,
        filter: &OpportunityFilter,
    ) -> Result<Vec<OpportunityData>, EngineError> {
        let query = Self::query_string(filter);
        let url = if query.is_empty() {
            format!("{}/opportunities", self.base_url)
        } else {
            format!("{}/opportunities?{}", self.base_url, query)
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::TransientNetwork(format!(
                "opportunity store returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::TransientNetwork(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn query_string_includes_set_fields_only() {
        let filter = OpportunityFilter {
            min_profit_percent: Some(dec!(0.001)),
            max_oi_usd: None,
            whitelist_dexes: Some(vec!["aster".to_string(), "lighter".to_string()]),
            required_dex: None,
            symbol: Some("BTC".to_string()),
            limit: Some(10),
        };
        let query = HttpOpportunityStore::query_string(&filter);
        assert!(query.contains("min_profit_percent=0.001"));
        assert!(query.contains("whitelist_dexes=aster,lighter"));
        assert!(query.contains("symbol=BTC"));
        assert!(query.contains("limit=10"));
        assert!(!query.contains("max_oi_usd"));
        assert!(!query.contains("required_dex"));
    }

    #[test]
    fn empty_filter_produces_empty_query() {
        assert_eq!(HttpOpportunityStore::query_string(&OpportunityFilter::default()), "");
    }
}
