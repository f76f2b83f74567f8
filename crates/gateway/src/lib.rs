use crate::auth::sign_request;
use crate::error::GatewayError;
use crate::types::{
    AccountInfoResponse, ApiErrorResponse, AssetBalance, ExchangeInfoResponse, ListenKeyResponse,
    OhlcBar, OrderResponse, OrderView, PriceResponse, RawKline, ServerTimeResponse,
};
use async_trait::async_trait;
use core_types::{OrderSide, SymbolFilters};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use crate::time_sync::TimeOffset;

mod auth;
pub mod error;
pub mod stream;
pub mod time_sync;
pub mod types;

pub use error::GatewayError as Error;

/// Requests fail 3 times before the caller sees the error, per the retry
/// policy applied uniformly to every gateway call.
fn default_retry_policy() -> retry::BackoffPolicy {
    retry::BackoffPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(300),
        factor: 2,
    }
}

fn is_retryable(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Network(_) | GatewayError::Server5xx { .. })
}

/// Parameters for a new limit order. Grid/DCA runners always place
/// `LIMIT_MAKER` (post-only) orders.
#[derive(Debug, Clone)]
pub struct NewOrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub client_order_id: String,
}

/// The abstract interface for a trading exchange. Runners and the bot
/// manager depend only on this trait (as `Arc<dyn ExchangeGateway>`),
/// keeping strategy logic testable against a mock implementation.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_server_time(&self) -> Result<i64, GatewayError>;
    async fn get_price(&self, symbol: &str) -> Result<Decimal, GatewayError>;
    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<OhlcBar>, GatewayError>;
    async fn exchange_info(&self, symbol: &str) -> Result<SymbolFilters, GatewayError>;

    async fn new_order(&self, params: &NewOrderParams) -> Result<OrderResponse, GatewayError>;
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<(), GatewayError>;
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError>;
    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderView, GatewayError>;
    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderView>, GatewayError>;
    async fn get_all_orders(&self, symbol: &str, limit: u32) -> Result<Vec<OrderView>, GatewayError>;
    async fn account_info(&self) -> Result<Vec<AssetBalance>, GatewayError>;

    async fn create_listen_key(&self) -> Result<String, GatewayError>;
    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), GatewayError>;
    async fn close_listen_key(&self, listen_key: &str) -> Result<(), GatewayError>;
}

/// A concrete `ExchangeGateway` speaking Binance's spot REST API.
#[derive(Clone)]
pub struct BinanceGateway {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
    offset: TimeOffset,
    retry_policy: retry::BackoffPolicy,
}

impl BinanceGateway {
    pub fn new(base_url: impl Into<String>, api_key: &str, api_secret: &str) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(api_key).map_err(|e| GatewayError::InvalidData(e.to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_secret: api_secret.to_string(),
            offset: TimeOffset::new(),
            retry_policy: default_retry_policy(),
        })
    }

    pub fn time_offset(&self) -> TimeOffset {
        self.offset.clone()
    }

    /// Spawns the periodic clock-offset sampler. 60s between samples per
    /// the signing contract.
    pub fn spawn_time_sync(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        time_sync::start_periodic_sync(self.offset.clone(), Duration::from_secs(60), move || {
            let this = this.clone();
            async move { this.sample_server_time().await }
        })
    }

    async fn sample_server_time(&self) -> Result<(i64, i64, i64), GatewayError> {
        let before = chrono::Utc::now().timestamp_millis();
        let response: ServerTimeResponse = self
            .get_public("/api/v3/time", &[])
            .await?;
        let after = chrono::Utc::now().timestamp_millis();
        Ok((before, response.server_time, after))
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| GatewayError::Deserialization(e.to_string()))
        } else if status.is_server_error() {
            Err(GatewayError::Server5xx { status: status.as_u16(), body: text })
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text)
                .map_err(|e| GatewayError::Deserialization(format!("{e}: {text}")))?;
            Err(GatewayError::Exchange { code: api_error.code, message: api_error.msg })
        }
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, GatewayError> {
        retry::with_backoff(self.retry_policy, is_retryable, || async {
            let response = self.client.get(format!("{}{path}", self.base_url)).query(query).send().await?;
            self.handle_response(response).await
        })
        .await
    }

    fn signed_query_string(&self, params: &BTreeMap<&str, String>) -> String {
        let query_string = serde_qs::to_string(params).expect("param map serializes to a query string");
        let signature = sign_request(&self.api_secret, &query_string);
        format!("{query_string}&signature={signature}")
    }

    async fn get_signed<T: DeserializeOwned>(&self, path: &str, params: BTreeMap<&str, String>) -> Result<T, GatewayError> {
        retry::with_backoff(self.retry_policy, is_retryable, || async {
            let mut params = params.clone();
            params.insert("timestamp", self.offset.now_adjusted_millis().to_string());
            let query = self.signed_query_string(&params);
            let response = self.client.get(format!("{}{path}?{query}", self.base_url)).send().await?;
            self.handle_response(response).await
        })
        .await
    }

    async fn post_signed<T: DeserializeOwned>(&self, path: &str, params: BTreeMap<&str, String>) -> Result<T, GatewayError> {
        retry::with_backoff(self.retry_policy, is_retryable, || async {
            let mut params = params.clone();
            params.insert("timestamp", self.offset.now_adjusted_millis().to_string());
            let query = self.signed_query_string(&params);
            let response = self.client.post(format!("{}{path}?{query}", self.base_url)).send().await?;
            self.handle_response(response).await
        })
        .await
    }

    async fn delete_signed<T: DeserializeOwned>(&self, path: &str, params: BTreeMap<&str, String>) -> Result<T, GatewayError> {
        retry::with_backoff(self.retry_policy, is_retryable, || async {
            let mut params = params.clone();
            params.insert("timestamp", self.offset.now_adjusted_millis().to_string());
            let query = self.signed_query_string(&params);
            let response = self.client.delete(format!("{}{path}?{query}", self.base_url)).send().await?;
            self.handle_response(response).await
        })
        .await
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn get_server_time(&self) -> Result<i64, GatewayError> {
        let response: ServerTimeResponse = self.get_public("/api/v3/time", &[]).await?;
        Ok(response.server_time)
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let response: PriceResponse = self
            .get_public("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(response.price)
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<OhlcBar>, GatewayError> {
        let raw: Vec<RawKline> = self
            .get_public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        raw.into_iter()
            .map(OhlcBar::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::InvalidData(e.to_string()))
    }

    async fn exchange_info(&self, symbol: &str) -> Result<SymbolFilters, GatewayError> {
        let response: ExchangeInfoResponse = self
            .get_public("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let entry = response
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| GatewayError::InvalidData(format!("symbol {symbol} not found in exchangeInfo")))?;

        let mut tick_size = None;
        let mut step_size = None;
        for filter in entry.filters {
            match filter {
                types::SymbolFilterEntry::PriceFilter { tick_size: t } => tick_size = Some(t),
                types::SymbolFilterEntry::LotSize { step_size: s } => step_size = Some(s),
                types::SymbolFilterEntry::Other => {}
            }
        }

        Ok(SymbolFilters {
            tick_size: tick_size.ok_or_else(|| GatewayError::InvalidData("missing PRICE_FILTER".to_string()))?,
            step_size: step_size.ok_or_else(|| GatewayError::InvalidData("missing LOT_SIZE filter".to_string()))?,
        })
    }

    async fn new_order(&self, params: &NewOrderParams) -> Result<OrderResponse, GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("symbol", params.symbol.clone());
        query.insert("side", params.side.as_str().to_string());
        query.insert("type", "LIMIT_MAKER".to_string());
        query.insert("price", params.price.to_string());
        query.insert("quantity", params.quantity.to_string());
        query.insert("newClientOrderId", params.client_order_id.clone());
        self.post_signed("/api/v3/order", query).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<(), GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("symbol", symbol.to_string());
        query.insert("orderId", order_id.to_string());
        let _: serde_json::Value = self.delete_signed("/api/v3/order", query).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("symbol", symbol.to_string());
        let _: serde_json::Value = self.delete_signed("/api/v3/openOrders", query).await?;
        Ok(())
    }

    async fn get_order(&self, symbol: &str, order_id: i64) -> Result<OrderView, GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("symbol", symbol.to_string());
        query.insert("orderId", order_id.to_string());
        self.get_signed("/api/v3/order", query).await
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderView>, GatewayError> {
        let mut query = BTreeMap::new();
        if let Some(symbol) = symbol {
            query.insert("symbol", symbol.to_string());
        }
        self.get_signed("/api/v3/openOrders", query).await
    }

    async fn get_all_orders(&self, symbol: &str, limit: u32) -> Result<Vec<OrderView>, GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("symbol", symbol.to_string());
        query.insert("limit", limit.to_string());
        self.get_signed("/api/v3/allOrders", query).await
    }

    async fn account_info(&self) -> Result<Vec<AssetBalance>, GatewayError> {
        let response: AccountInfoResponse = self.get_signed("/api/v3/account", BTreeMap::new()).await?;
        Ok(response.balances)
    }

    async fn create_listen_key(&self) -> Result<String, GatewayError> {
        let response: ListenKeyResponse = self.post_signed("/api/v3/userDataStream", BTreeMap::new()).await?;
        Ok(response.listen_key)
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<(), GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("listenKey", listen_key.to_string());
        let _: serde_json::Value = self.post_signed("/api/v3/userDataStream", query).await?;
        Ok(())
    }

    async fn close_listen_key(&self, listen_key: &str) -> Result<(), GatewayError> {
        let mut query = BTreeMap::new();
        query.insert("listenKey", listen_key.to_string());
        let _: serde_json::Value = self.delete_signed("/api/v3/userDataStream", query).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_params_carries_post_only_fields() {
        let params = NewOrderParams {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            price: Decimal::new(2999000, 2),
            quantity: Decimal::new(1, 5),
            client_order_id: "tag-1-b-x1".to_string(),
        };
        assert_eq!(params.side.as_str(), "BUY");
    }

    #[test]
    fn is_retryable_matches_only_network_and_5xx() {
        assert!(is_retryable(&GatewayError::Server5xx { status: 503, body: String::new() }));
        assert!(!is_retryable(&GatewayError::Exchange { code: -2010, message: "x".to_string() }));
    }
}
