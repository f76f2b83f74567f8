use crate::enums::{OrderRecordStatus, OrderSide};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single order a runner placed or intends to place, tracked locally
/// alongside whatever the exchange reports back for it. `client_order_id`
/// is the join key between this record and execution reports arriving on
/// the user-data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub client_order_id: String,
    pub exchange_order_id: Option<u64>,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderRecordStatus,
    pub filled_quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(client_order_id: String, side: OrderSide, price: Decimal, quantity: Decimal) -> Self {
        let now = Utc::now();
        Self {
            client_order_id,
            exchange_order_id: None,
            side,
            price,
            quantity,
            status: OrderRecordStatus::Pending,
            filled_quantity: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderRecordStatus::Open | OrderRecordStatus::Pending)
    }
}

/// Mints a `clientOrderId` of the form `<botTag>-<epochMillis>-<side>-<rand>`,
/// unique enough that two orders placed in the same millisecond by the same
/// bot still don't collide.
pub fn mint_client_order_id(bot_tag: &str, side: OrderSide, rand_suffix: &str) -> String {
    let side_char = match side {
        OrderSide::Buy => "b",
        OrderSide::Sell => "s",
    };
    format!(
        "{bot_tag}-{}-{side_char}-{rand_suffix}",
        Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_record_starts_pending_and_unfilled() {
        let rec = OrderRecord::new("tag-1-b-x1".to_string(), OrderSide::Buy, Decimal::new(100, 0), Decimal::new(1, 0));
        assert_eq!(rec.status, OrderRecordStatus::Pending);
        assert_eq!(rec.filled_quantity, Decimal::ZERO);
        assert!(rec.is_open());
    }

    #[test]
    fn minted_client_order_id_embeds_bot_tag_and_side() {
        let id = mint_client_order_id("ab12cd34", OrderSide::Sell, "xyz");
        assert!(id.starts_with("ab12cd34-"));
        assert!(id.contains("-s-"));
        assert!(id.ends_with("xyz"));
    }
}
