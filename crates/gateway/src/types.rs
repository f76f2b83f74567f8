use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::Deserialize;

/// `GET /api/v3/time` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    pub server_time: i64,
}

/// `GET /api/v3/ticker/price` response.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceResponse {
    pub symbol: String,
    pub price: Decimal,
}

/// One `filters[]` entry from `exchangeInfo`. The exchange emits a mixed
/// bag of filter types in one array; only the two this system cares about
/// are modeled, the rest are ignored during parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilterEntry {
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter { tick_size: Decimal },
    #[serde(rename = "LOT_SIZE")]
    LotSize { step_size: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoSymbol {
    pub symbol: String,
    pub filters: Vec<SymbolFilterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<ExchangeInfoSymbol>,
}

/// `GET /api/v3/klines` entries come back as heterogeneous JSON arrays.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKline(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
);

/// A single OHLC bar, parsed out of a [`RawKline`].
#[derive(Debug, Clone, Copy)]
pub struct OhlcBar {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl TryFrom<RawKline> for OhlcBar {
    type Error = rust_decimal::Error;

    fn try_from(raw: RawKline) -> Result<Self, Self::Error> {
        use std::str::FromStr;
        Ok(Self {
            open_time: raw.0,
            open: Decimal::from_str(&raw.1)?,
            high: Decimal::from_str(&raw.2)?,
            low: Decimal::from_str(&raw.3)?,
            close: Decimal::from_str(&raw.4)?,
            volume: Decimal::from_str(&raw.5)?,
            close_time: raw.6,
        })
    }
}

/// The response from a successful `POST /api/v3/order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: String,
    pub side: OrderSide,
}

/// A single open/historical order from `getOpenOrders`/`getAllOrders`,
/// normalised into the runner-local `OrderRecord` shape at the call site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: String,
    pub side: OrderSide,
}

/// A single asset's balance from `accountInfo`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfoResponse {
    pub balances: Vec<AssetBalance>,
}

/// Error body the exchange returns on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// `POST /api/v3/userDataStream` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}
