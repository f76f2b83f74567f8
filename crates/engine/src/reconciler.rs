//! Reconciliation: comparing a runner's locally-tracked open orders against
//! the exchange's authoritative open-order set and deciding what to repair.
//! Shared by all three runners since the comparison itself doesn't depend on
//! strategy — only what "re-place" means afterward does.

use core_types::OrderRecord;
use gateway::types::OrderView;

/// What to do about one locally-open order that's missing from the
/// exchange's open-order set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationAction {
    /// The exchange confirms it's filled or partially filled — do nothing,
    /// the user-data stream will deliver the fill and the runner's own fill
    /// handler will take it from there.
    LeaveToFillHandler,
    /// Anything else (canceled, expired, rejected, or the exchange has no
    /// record at all) — re-place at the original price with a fresh
    /// `clientOrderId`.
    NeedsReplacement,
}

pub fn classify_missing_order(exchange_status: &str) -> ReconciliationAction {
    match exchange_status {
        "FILLED" | "PARTIALLY_FILLED" => ReconciliationAction::LeaveToFillHandler,
        _ => ReconciliationAction::NeedsReplacement,
    }
}

/// Returns the locally-`open` orders (by reference) whose exchange order id
/// is absent from `exchange_open` — the set that needs a `getOrder` lookup
/// to decide their fate.
pub fn missing_from_exchange<'a>(
    local_open: &'a [OrderRecord],
    exchange_open: &[OrderView],
) -> Vec<&'a OrderRecord> {
    local_open
        .iter()
        .filter(|local| local.is_open())
        .filter(|local| match local.exchange_order_id {
            Some(id) => !exchange_open.iter().any(|e| e.order_id == id as i64),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{OrderRecordStatus, OrderSide};
    use rust_decimal_macros::dec;

    fn open_order(id: u64, price: rust_decimal::Decimal) -> OrderRecord {
        let mut rec = OrderRecord::new(format!("tag-{id}"), OrderSide::Buy, price, dec!(0.001));
        rec.exchange_order_id = Some(id);
        rec.status = OrderRecordStatus::Open;
        rec
    }

    #[test]
    fn missing_order_is_detected_when_absent_from_exchange_set() {
        let local = vec![open_order(1, dec!(100)), open_order(2, dec!(110))];
        let exchange = vec![OrderView {
            symbol: "BTCUSDT".to_string(),
            order_id: 1,
            client_order_id: "tag-1".to_string(),
            price: dec!(100),
            orig_qty: dec!(0.001),
            executed_qty: dec!(0),
            status: "NEW".to_string(),
            side: OrderSide::Buy,
        }];
        let missing = missing_from_exchange(&local, &exchange);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].exchange_order_id, Some(2));
    }

    #[test]
    fn reconciliation_idempotent_when_nothing_missing() {
        let local = vec![open_order(1, dec!(100))];
        let exchange = vec![OrderView {
            symbol: "BTCUSDT".to_string(),
            order_id: 1,
            client_order_id: "tag-1".to_string(),
            price: dec!(100),
            orig_qty: dec!(0.001),
            executed_qty: dec!(0),
            status: "NEW".to_string(),
            side: OrderSide::Buy,
        }];
        assert!(missing_from_exchange(&local, &exchange).is_empty());
        assert!(missing_from_exchange(&local, &exchange).is_empty());
    }

    #[test]
    fn filled_status_leaves_it_to_the_fill_handler() {
        assert_eq!(classify_missing_order("FILLED"), ReconciliationAction::LeaveToFillHandler);
        assert_eq!(classify_missing_order("PARTIALLY_FILLED"), ReconciliationAction::LeaveToFillHandler);
        assert_eq!(classify_missing_order("CANCELED"), ReconciliationAction::NeedsReplacement);
    }
}
