//! The grid strategy: on first start, lays a symmetric ladder of
//! `gridLevels` buy orders below the start price and `gridLevels` sell
//! orders above it, each `gridSpread` apart. Every fill places one counter
//! order on the opposite side; a filled sell also closes out the oldest
//! matching buy from `unmatchedBuys`, banking the spread as realized P&L.
//! `orderSize` is a quote-currency budget, divided by the start price once to
//! get the (constant) order quantity every level trades in.

use crate::support::{cancel_bot_orders, current_price, place_with_policy, PlacementOutcome};
use async_trait::async_trait;
use core_types::{floor_step, floor_tick, BotId, ExecutionReportStatus, OrderRecord, OrderSide, SymbolFilters};
use engine::reconciler::{classify_missing_order, missing_from_exchange, ReconciliationAction};
use engine::{Runner, RunnerContext, RunnerError};
use events::UserEvent;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct GridState {
    filters: Option<SymbolFilters>,
    /// Every order this runner currently considers live, flat across both
    /// sides and all levels — there's no per-level slot, just the set of
    /// orders the exchange and the fill handler agree are outstanding.
    orders: Vec<OrderRecord>,
    /// Filled buys awaiting a matching sell to close the round and realize
    /// P&L, oldest first.
    unmatched_buys: Vec<(Decimal, Decimal)>,
}

/// Implements [`Runner`] for [`core_types::StrategyId::Grid`]. One instance
/// per bot; the manager spawns [`Runner::start`] as a single background
/// task that owns this struct's state for the bot's whole lifetime.
pub struct GridRunner {
    state: Mutex<GridState>,
}

impl GridRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(GridState { filters: None, orders: Vec::new(), unmatched_buys: Vec::new() }) })
    }

    async fn tick_size(&self) -> Decimal {
        self.state.lock().await.filters.expect("filters loaded before use").tick_size
    }

    /// Places the initial symmetric ladder: `gridLevels` buys below
    /// `start_price` and `gridLevels` sells above it, each `i * gridSpread`
    /// away. Only ever called once, on a bot's very first start.
    async fn place_initial_ladder(
        &self,
        ctx: &RunnerContext,
        bot_id: BotId,
        symbol: &str,
        start_price: Decimal,
        grid_levels: u32,
        spread: Decimal,
        qty: Decimal,
        tick_size: Decimal,
    ) {
        for i in 1..=grid_levels {
            let idx = Decimal::from(i);
            let buy_price = floor_tick(start_price - idx * spread, tick_size);
            let sell_price = floor_tick(start_price + idx * spread, tick_size);
            self.place_order(ctx, bot_id, symbol, OrderSide::Buy, buy_price, qty).await;
            self.place_order(ctx, bot_id, symbol, OrderSide::Sell, sell_price, qty).await;
        }
    }

    /// Rebuilds tracked orders from the exchange's open-order set on resume,
    /// since in-memory state never survives a restart but the persisted
    /// `initialStartPrice` tells us the ladder was already placed in a prior
    /// run. Filtered to this bot's own `clientOrderId` tag so another bot
    /// sharing the symbol isn't adopted.
    async fn rebuild_from_exchange(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str) -> Result<(), RunnerError> {
        let tag = bot_id.bot_tag();
        let exchange_open = ctx.gateway.get_open_orders(Some(symbol)).await?;
        let orders = exchange_open
            .into_iter()
            .filter(|o| o.client_order_id.starts_with(&tag))
            .map(|o| {
                let mut rec = OrderRecord::new(o.client_order_id, o.side, o.price, o.orig_qty);
                rec.exchange_order_id = Some(o.order_id as u64);
                rec.status = core_types::OrderRecordStatus::Open;
                rec.filled_quantity = o.executed_qty;
                rec
            })
            .collect();
        self.state.lock().await.orders = orders;
        Ok(())
    }

    async fn place_order(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str, side: OrderSide, price: Decimal, qty: Decimal) {
        match place_with_policy(ctx, bot_id, symbol, side, price, qty, executor::GRID_FATAL_CODES).await {
            PlacementOutcome::Placed(rec) | PlacementOutcome::Skipped(rec) => {
                self.state.lock().await.orders.push(rec);
            }
            PlacementOutcome::Retry => {}
            PlacementOutcome::Fatal { code, message } => ctx.handle.mark_fatal_error(code, message).await,
        }
    }

    /// Compares tracked orders against the exchange's open-order set; any
    /// locally-tracked order missing from it gets its final status checked
    /// and, unless the fill handler will pick it up, is re-placed at its
    /// original price and side with a fresh `clientOrderId`.
    async fn reconcile(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str) -> Result<(), RunnerError> {
        let exchange_open = ctx.gateway.get_open_orders(Some(symbol)).await?;
        let local_open: Vec<OrderRecord> = {
            let state = self.state.lock().await;
            state.orders.iter().filter(|o| o.is_open()).cloned().collect()
        };
        let missing: Vec<OrderRecord> = missing_from_exchange(&local_open, &exchange_open).into_iter().cloned().collect();

        for record in missing {
            let Some(exchange_order_id) = record.exchange_order_id else { continue };
            match ctx.gateway.get_order(symbol, exchange_order_id as i64).await {
                Ok(view) => {
                    if classify_missing_order(&view.status) == ReconciliationAction::NeedsReplacement {
                        {
                            let mut state = self.state.lock().await;
                            state.orders.retain(|o| o.client_order_id != record.client_order_id);
                        }
                        self.place_order(ctx, bot_id, symbol, record.side, record.price, record.quantity).await;
                    }
                }
                Err(err) => tracing::warn!(bot_id = %bot_id, %err, "failed to check a missing grid order's status"),
            }
        }
        Ok(())
    }

    /// Removes the filled order from tracking, then arms the counter order
    /// on the opposite side: a filled buy pushes onto `unmatchedBuys` and
    /// places a sell `gridSpread` above it; a filled sell places a buy
    /// `gridSpread` below it and, if a matching unmatched buy exists within
    /// half a tick, closes the round and banks the spread as P&L.
    async fn handle_fill(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str, event: UserEvent) -> Result<(), RunnerError> {
        if event.symbol != symbol {
            return Ok(());
        }
        if !matches!(event.exec_status, ExecutionReportStatus::Filled | ExecutionReportStatus::PartiallyFilled) {
            return Ok(());
        }

        let order = {
            let mut state = self.state.lock().await;
            let pos = state.orders.iter().position(|o| o.exchange_order_id == Some(event.exchange_order_id));
            pos.map(|i| state.orders.remove(i))
        };
        let Some(order) = order else { return Ok(()) };

        let spread = ctx.handle.snapshot().await.config.grid_spread;
        let tick_size = self.tick_size().await;

        if order.side == OrderSide::Buy {
            self.state.lock().await.unmatched_buys.push((order.price, order.quantity));
            let sell_price = floor_tick(order.price + spread, tick_size);
            self.place_order(ctx, bot_id, symbol, OrderSide::Sell, sell_price, order.quantity).await;
        } else {
            let buy_price = floor_tick(order.price - spread, tick_size);
            self.place_order(ctx, bot_id, symbol, OrderSide::Buy, buy_price, order.quantity).await;

            let half_tick = tick_size / Decimal::from(2);
            // first match wins; FIFO not required by spec
            let matched = {
                let mut state = self.state.lock().await;
                state
                    .unmatched_buys
                    .iter()
                    .position(|(price, _)| (*price - buy_price).abs() <= half_tick)
                    .map(|idx| state.unmatched_buys.remove(idx))
            };
            if let Some((matched_buy_price, _)) = matched {
                let pnl = (order.price - matched_buy_price) * order.quantity;
                ctx.handle.update_stats(1, pnl).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Runner for GridRunner {
    async fn start(self: Arc<Self>, ctx: RunnerContext) -> Result<(), RunnerError> {
        let bot = ctx.handle.snapshot().await;
        let symbol = bot.symbol.clone();
        let bot_id = bot.id;

        let filters = ctx.gateway.exchange_info(&symbol).await?;
        self.state.lock().await.filters = Some(filters);

        let (start_price, first_start) = match bot.config.initial_start_price {
            Some(p) => (p, false),
            None => {
                let p = current_price(&ctx, &symbol).await?;
                ctx.handle
                    .mutate_and_persist(|b| b.config.initial_start_price = Some(p))
                    .await
                    .map_err(|err| RunnerError::Other(err.to_string()))?;
                (p, true)
            }
        };

        if first_start {
            let qty = floor_step((bot.config.order_size / start_price).max(filters.step_size), filters.step_size);
            self.place_initial_ladder(
                &ctx,
                bot_id,
                &symbol,
                start_price,
                bot.config.grid_levels,
                bot.config.grid_spread,
                qty,
                filters.tick_size,
            )
            .await;
        } else {
            self.rebuild_from_exchange(&ctx, bot_id, &symbol).await?;
        }

        self.reconcile(&ctx, bot_id, &symbol).await?;

        let mut user_events = ctx.bus.subscribe_user_events();
        let mut reconcile_interval = tokio::time::interval(Duration::from_secs(300));
        let mut stop_rx = ctx.handle.stop_rx();

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = reconcile_interval.tick() => {
                    if let Err(err) = self.reconcile(&ctx, bot_id, &symbol).await {
                        tracing::warn!(bot_id = %bot_id, %err, "grid reconciliation pass failed");
                    }
                }
                event = user_events.recv() => {
                    match event {
                        Ok(event) if event.symbol == symbol => {
                            if let Err(err) = self.handle_fill(&ctx, bot_id, &symbol, event).await {
                                tracing::warn!(bot_id = %bot_id, %err, "failed to process a grid fill");
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop(&self, ctx: &RunnerContext) -> Result<(), RunnerError> {
        let bot = ctx.handle.snapshot().await;
        cancel_bot_orders(ctx, bot.id, &bot.symbol).await
    }

    fn get_details(&self) -> serde_json::Value {
        serde_json::json!({ "strategy": "grid" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn s1_ladder_prices_match_the_literal_scenario() {
        let start_price = dec!(30000.00);
        let spread = dec!(10);
        let tick = dec!(0.01);

        let buy1 = floor_tick(start_price - Decimal::from(1) * spread, tick);
        let buy2 = floor_tick(start_price - Decimal::from(2) * spread, tick);
        let sell1 = floor_tick(start_price + Decimal::from(1) * spread, tick);
        let sell2 = floor_tick(start_price + Decimal::from(2) * spread, tick);

        assert_eq!(buy1, dec!(29990.00));
        assert_eq!(buy2, dec!(29980.00));
        assert_eq!(sell1, dec!(30010.00));
        assert_eq!(sell2, dec!(30020.00));
    }

    #[test]
    fn s1_round_trip_pnl_matches_the_literal_scenario() {
        let qty = dec!(0.00001);
        let buy_price = dec!(29990.00);
        let sell_price = dec!(30000.00);
        let pnl = (sell_price - buy_price) * qty;
        assert_eq!(pnl, dec!(0.0000001));
    }
}
