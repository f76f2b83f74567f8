//! WebSocket streams: the user-data stream (execution reports + balance
//! updates) and per-symbol market streams (kline/trade ticks).
//!
//! Both reconnect on close, following the same `loop { connect_async ...
//! sleep ... }` shape: a keepalive-driven user stream with a fresh
//! listen-key on reconnect, and a market stream with a 1s base delay.

use crate::error::GatewayError;
use crate::ExchangeGateway;
use core_types::{ExecutionReportStatus, OrderSide};
use futures_util::stream::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A frame delivered off the user-data stream, already classified.
#[derive(Debug, Clone)]
pub enum UserStreamFrame {
    ExecutionReport {
        symbol: String,
        client_order_id: String,
        exchange_order_id: u64,
        side: OrderSide,
        status: ExecutionReportStatus,
        fill_price: Decimal,
        fill_quantity: Decimal,
    },
    AccountUpdate {
        balances: Vec<(String, Decimal, Decimal)>,
    },
    Other { event_type: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum RawUserEvent {
    #[serde(rename = "executionReport")]
    ExecutionReport(RawExecutionReport),
    #[serde(rename = "outboundAccountPosition")]
    OutboundAccountPosition(RawAccountPosition),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawExecutionReport {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "L")]
    last_filled_price: String,
    #[serde(rename = "l")]
    last_filled_qty: String,
}

#[derive(Debug, Deserialize)]
struct RawAccountPosition {
    #[serde(rename = "B")]
    balances: Vec<RawBalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct RawBalanceEntry {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: String,
    #[serde(rename = "l")]
    locked: String,
}

fn parse_user_frame(text: &str) -> Option<UserStreamFrame> {
    let raw: RawUserEvent = serde_json::from_str(text).ok()?;
    match raw {
        RawUserEvent::ExecutionReport(r) => {
            let side = if r.side.eq_ignore_ascii_case("BUY") { OrderSide::Buy } else { OrderSide::Sell };
            let status = ExecutionReportStatus::from_exchange_str(&r.status)?;
            Some(UserStreamFrame::ExecutionReport {
                symbol: r.symbol,
                client_order_id: r.client_order_id,
                exchange_order_id: r.order_id,
                side,
                status,
                fill_price: Decimal::from_str(&r.last_filled_price).ok()?,
                fill_quantity: Decimal::from_str(&r.last_filled_qty).ok()?,
            })
        }
        RawUserEvent::OutboundAccountPosition(r) => {
            let balances = r
                .balances
                .into_iter()
                .filter_map(|b| {
                    Some((b.asset, Decimal::from_str(&b.free).ok()?, Decimal::from_str(&b.locked).ok()?))
                })
                .collect();
            Some(UserStreamFrame::AccountUpdate { balances })
        }
        RawUserEvent::Other => Some(UserStreamFrame::Other { event_type: "unclassified".to_string() }),
    }
}

/// Opens the user-data stream, spawning a background task that owns the
/// listen-key lifecycle (creation, 30s keepalive, reconnect with a fresh
/// key on close) and forwards classified frames to the returned receiver.
/// Dropping the returned handle stops the background task.
pub struct UserStreamHandle {
    closed: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl UserStreamHandle {
    pub async fn close_all(self) {
        self.closed.store(true, Ordering::SeqCst);
        self.join.abort();
    }
}

pub async fn connect_user_stream(
    gateway: Arc<dyn ExchangeGateway>,
    ws_base_url: Url,
) -> Result<(mpsc::Receiver<UserStreamFrame>, UserStreamHandle), GatewayError> {
    let (tx, rx) = mpsc::channel(1024);
    let closed = Arc::new(AtomicBool::new(false));
    let closed_task = closed.clone();

    let join = tokio::spawn(async move {
        loop {
            if closed_task.load(Ordering::SeqCst) {
                return;
            }
            let listen_key = match gateway.create_listen_key().await {
                Ok(k) => k,
                Err(err) => {
                    error!(%err, "failed to obtain listen key, retrying shortly");
                    tokio::time::sleep(RECONNECT_BASE_DELAY).await;
                    continue;
                }
            };

            let mut url = ws_base_url.clone();
            url.set_path(&format!("/ws/{listen_key}"));

            let keepalive_gateway = gateway.clone();
            let keepalive_key = listen_key.clone();
            let keepalive_closed = closed_task.clone();
            let keepalive_handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
                loop {
                    ticker.tick().await;
                    if keepalive_closed.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Err(err) = keepalive_gateway.keepalive_listen_key(&keepalive_key).await {
                        warn!(%err, "listen key keepalive failed");
                    }
                }
            });

            info!("connecting to user-data stream");
            match connect_async(url).await {
                Ok((mut stream, _)) => {
                    while let Some(msg) = stream.next().await {
                        if closed_task.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Ok(Message::Text(text)) = msg {
                            if let Some(frame) = parse_user_frame(&text) {
                                if tx.send(frame).await.is_err() {
                                    keepalive_handle.abort();
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(err) => error!(%err, "user-data stream connection failed"),
            }
            keepalive_handle.abort();
            if closed_task.load(Ordering::SeqCst) {
                return;
            }
            warn!("user-data stream disconnected, reconnecting with a fresh listen key");
            tokio::time::sleep(RECONNECT_BASE_DELAY).await;
        }
    });

    Ok((rx, UserStreamHandle { closed, join }))
}

/// A price/trade tick from a market stream.
#[derive(Debug, Clone, Copy)]
pub struct MarketFrame {
    pub price: Decimal,
    pub is_kline_close: bool,
}

#[derive(Debug, Deserialize)]
struct RawTradeEvent {
    #[serde(rename = "p")]
    price: String,
}

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "k")]
    kline: RawKlinePayload,
}

#[derive(Debug, Deserialize)]
struct RawKlinePayload {
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn parse_market_frame(stream_type: &str, text: &str) -> Option<MarketFrame> {
    if stream_type.starts_with("kline") {
        let event: RawKlineEvent = serde_json::from_str(text).ok()?;
        Some(MarketFrame {
            price: Decimal::from_str(&event.kline.close).ok()?,
            is_kline_close: event.kline.is_closed,
        })
    } else {
        let event: RawTradeEvent = serde_json::from_str(text).ok()?;
        Some(MarketFrame { price: Decimal::from_str(&event.price).ok()?, is_kline_close: false })
    }
}

pub struct MarketStreamHandle {
    closed: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl MarketStreamHandle {
    pub async fn close_all(self) {
        self.closed.store(true, Ordering::SeqCst);
        self.join.abort();
    }
}

/// Subscribes to a single `(symbol, streamType)` market stream (e.g.
/// `kline_1m`, `trade`), reconnecting on close with the same base delay as
/// the user stream.
pub fn connect_market_stream(
    ws_base_url: Url,
    symbol: String,
    stream_type: String,
) -> (mpsc::Receiver<MarketFrame>, MarketStreamHandle) {
    let (tx, rx) = mpsc::channel(1024);
    let closed = Arc::new(AtomicBool::new(false));
    let closed_task = closed.clone();

    let stream_name = format!("{}@{}", symbol.to_lowercase(), stream_type);
    let join = tokio::spawn(async move {
        loop {
            if closed_task.load(Ordering::SeqCst) {
                return;
            }
            let mut url = ws_base_url.clone();
            url.set_path(&format!("/ws/{stream_name}"));

            debug!(stream = %stream_name, "connecting to market stream");
            match connect_async(url).await {
                Ok((mut stream, _)) => {
                    while let Some(msg) = stream.next().await {
                        if closed_task.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Ok(Message::Text(text)) = msg {
                            if let Some(frame) = parse_market_frame(&stream_type, &text) {
                                if tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(err) => error!(%err, stream = %stream_name, "market stream connection failed"),
            }
            if closed_task.load(Ordering::SeqCst) {
                return;
            }
            warn!(stream = %stream_name, "market stream disconnected, reconnecting");
            tokio::time::sleep(RECONNECT_BASE_DELAY).await;
        }
    });

    (rx, MarketStreamHandle { closed, join })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_execution_report_into_typed_frame() {
        let text = r#"{"e":"executionReport","s":"BTCUSDT","c":"tag-1-b-x1","i":555,"S":"BUY","X":"FILLED","L":"29990.00","l":"0.00001"}"#;
        match parse_user_frame(text).unwrap() {
            UserStreamFrame::ExecutionReport { symbol, status, fill_price, .. } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(status, ExecutionReportStatus::Filled);
                assert_eq!(fill_price, Decimal::from_str("29990.00").unwrap());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_account_position_balances() {
        let text = r#"{"e":"outboundAccountPosition","B":[{"a":"USDT","f":"100.5","l":"0"}]}"#;
        match parse_user_frame(text).unwrap() {
            UserStreamFrame::AccountUpdate { balances } => {
                assert_eq!(balances.len(), 1);
                assert_eq!(balances[0].0, "USDT");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_kline_close_price() {
        let text = r#"{"k":{"c":"30010.50","x":true}}"#;
        let frame = parse_market_frame("kline_1m", text).unwrap();
        assert!(frame.is_kline_close);
        assert_eq!(frame.price, Decimal::from_str("30010.50").unwrap());
    }

    #[test]
    fn parses_trade_price() {
        let text = r#"{"p":"30005.00"}"#;
        let frame = parse_market_frame("trade", text).unwrap();
        assert_eq!(frame.price, Decimal::from_str("30005.00").unwrap());
    }
}
