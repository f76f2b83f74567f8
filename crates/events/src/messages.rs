use chrono::{DateTime, Utc};
use core_types::{BotId, ExecutionReportStatus, OrderRecordStatus, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Severity of a log message published on the bot channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Published whenever a runner places, updates, or closes a locally tracked
/// order, independent of whether the exchange has acknowledged it yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub bot_id: BotId,
    pub client_order_id: String,
    pub exchange_order_id: Option<u64>,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderRecordStatus,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A price tick for a symbol, fed from the gateway's market stream into
/// every runner subscribed to that symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// An execution report as classified off the user-data stream, before a
/// runner has matched it against its own order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub symbol: String,
    pub client_order_id: String,
    pub exchange_order_id: u64,
    pub side: OrderSide,
    pub exec_status: ExecutionReportStatus,
    pub fill_price: Decimal,
    pub fill_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle and diagnostic notifications scoped to a single bot (or, for
/// process-wide log lines, to no bot at all).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum BotEvent {
    Started { bot_id: BotId },
    Stopped { bot_id: BotId, reason: String },
    RoundCompleted { bot_id: BotId, realized_pnl: Decimal },
    Log { bot_id: Option<BotId>, level: LogLevel, message: String },
    /// A fatal-to-bot exchange error, carrying the exchange's numeric error
    /// code as structured data rather than folded into a log string.
    Error { bot_id: BotId, code: i64, message: String },
}
