//! Real-time event bus shared between runners, the manager, and anything
//! that observes bot activity.
//!
//! As a Layer 0 crate, it depends only on `core-types`. Instead of a single
//! catch-all broadcast channel, the bus is split into four topics — order,
//! market, user execution, and bot lifecycle — so a subscriber only pays
//! for (and only has to filter through) the traffic it actually cares
//! about.

pub mod error;
pub mod messages;

pub use error::EventsError;
pub use messages::{BotEvent, LogLevel, MarketEvent, OrderEvent, UserEvent};

use tokio::sync::broadcast;

/// Channel capacity for each topic. A slow subscriber that falls behind by
/// more than this many messages will observe a `Lagged` error on its next
/// `recv` and skip forward — acceptable for all four topics here, since
/// each is a stream of independently meaningful point-in-time facts rather
/// than a log that must never skip an entry.
const CHANNEL_CAPACITY: usize = 1024;

/// The process-wide event bus. Cheap to clone — every clone shares the same
/// underlying broadcast channels.
#[derive(Clone)]
pub struct EventBus {
    order_tx: broadcast::Sender<OrderEvent>,
    market_tx: broadcast::Sender<MarketEvent>,
    user_event_tx: broadcast::Sender<UserEvent>,
    bot_tx: broadcast::Sender<BotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            order_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            market_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            user_event_tx: broadcast::channel(CHANNEL_CAPACITY).0,
            bot_tx: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn publish_order(&self, event: OrderEvent) {
        let _ = self.order_tx.send(event);
    }

    pub fn publish_market(&self, event: MarketEvent) {
        let _ = self.market_tx.send(event);
    }

    pub fn publish_user_event(&self, event: UserEvent) {
        let _ = self.user_event_tx.send(event);
    }

    pub fn publish_bot(&self, event: BotEvent) {
        let _ = self.bot_tx.send(event);
    }

    pub fn subscribe_orders(&self) -> broadcast::Receiver<OrderEvent> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_market(&self) -> broadcast::Receiver<MarketEvent> {
        self.market_tx.subscribe()
    }

    pub fn subscribe_user_events(&self) -> broadcast::Receiver<UserEvent> {
        self.user_event_tx.subscribe()
    }

    pub fn subscribe_bot(&self) -> broadcast::Receiver<BotEvent> {
        self.bot_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::BotId;

    #[tokio::test]
    async fn market_event_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut sub_a = bus.subscribe_market();
        let mut sub_b = bus.subscribe_market();

        bus.publish_market(MarketEvent {
            symbol: "BTCUSDT".to_string(),
            price: rust_decimal::Decimal::new(30000, 0),
            timestamp: chrono::Utc::now(),
        });

        let got_a = sub_a.recv().await.unwrap();
        let got_b = sub_b.recv().await.unwrap();
        assert_eq!(got_a.symbol, "BTCUSDT");
        assert_eq!(got_b.symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = EventBus::new();
        let mut order_sub = bus.subscribe_orders();
        bus.publish_bot(BotEvent::Started { bot_id: BotId::new() });

        assert!(order_sub.try_recv().is_err());
    }
}
