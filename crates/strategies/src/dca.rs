//! The two DCA strategies: a ladder of entries spaced `gridSpread` apart
//! around an anchor price, with a single exit order sized at the running
//! weighted average once any entry fills. `DcaBuy` accumulates on dips and
//! exits into a take-profit sell; `DcaSell` distributes into rallies and
//! exits into a take-profit buy-back. Both are the same state machine run
//! in opposite [`Direction`]s, to avoid maintaining two near-identical files.

use crate::support::{cancel_bot_orders, current_price, place_with_policy, PlacementOutcome};
use async_trait::async_trait;
use core_types::{floor_step, floor_tick, BotId, ExecutionReportStatus, OrderRecord, OrderSide, SymbolFilters};
use engine::reconciler::{classify_missing_order, missing_from_exchange, ReconciliationAction};
use engine::{Runner, RunnerContext, RunnerError};
use events::UserEvent;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Which way a DCA round works. `order_size` (base units) is the same for
/// every entry regardless of direction — see `BotConfig`'s doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Buy dips below the anchor, take profit selling above the average.
    Accumulate,
    /// Sell rallies above the anchor, take profit buying back below the average.
    Distribute,
}

impl Direction {
    fn entry_side(self) -> OrderSide {
        match self {
            Direction::Accumulate => OrderSide::Buy,
            Direction::Distribute => OrderSide::Sell,
        }
    }

    fn exit_side(self) -> OrderSide {
        match self {
            Direction::Accumulate => OrderSide::Sell,
            Direction::Distribute => OrderSide::Buy,
        }
    }

    fn entry_price(self, anchor: Decimal, level: i64, spread: Decimal, tick_size: Decimal) -> Decimal {
        match self {
            Direction::Accumulate => floor_tick(anchor - Decimal::from(level) * spread, tick_size),
            Direction::Distribute => floor_tick(anchor + Decimal::from(level) * spread, tick_size),
        }
    }

    fn exit_price(self, avg_price: Decimal, margin: Decimal, tick_size: Decimal) -> Decimal {
        match self {
            Direction::Accumulate => floor_tick(avg_price + margin, tick_size),
            Direction::Distribute => floor_tick(avg_price - margin, tick_size),
        }
    }

    fn round_pnl(self, avg_price: Decimal, exit_price: Decimal, qty: Decimal) -> Decimal {
        match self {
            Direction::Accumulate => (exit_price - avg_price) * qty,
            Direction::Distribute => (avg_price - exit_price) * qty,
        }
    }
}

/// One configured entry level's state across a round: empty (never placed
/// or reset for a new round), resting open on the exchange, or filled (its
/// price/qty already folded into `DcaState::filled`, not re-placed until
/// the round completes).
#[derive(Clone)]
enum EntrySlot {
    Empty,
    Open(OrderRecord),
    Filled,
}

struct DcaState {
    filters: Option<SymbolFilters>,
    anchor: Decimal,
    entries: Vec<EntrySlot>,
    /// `(price, qty)` of every entry filled so far this round — the inputs
    /// to the running weighted average.
    filled: Vec<(Decimal, Decimal)>,
    exit_order: Option<OrderRecord>,
}

/// Implements [`Runner`] for [`core_types::StrategyId::DcaBuy`] and
/// [`core_types::StrategyId::DcaSell`], parametrized by [`Direction`].
pub struct DcaRunner {
    direction: Direction,
    state: Mutex<DcaState>,
}

impl DcaRunner {
    pub fn new(direction: Direction) -> Arc<Self> {
        Arc::new(Self {
            direction,
            state: Mutex::new(DcaState {
                filters: None,
                anchor: Decimal::ZERO,
                entries: Vec::new(),
                filled: Vec::new(),
                exit_order: None,
            }),
        })
    }

    pub fn buy() -> Arc<Self> {
        Self::new(Direction::Accumulate)
    }

    pub fn sell() -> Arc<Self> {
        Self::new(Direction::Distribute)
    }

    /// (Re-)builds the entry ladder around `anchor` and checks the current
    /// exchange open-order set against what's locally tracked, repairing
    /// anything missing. Called once at `start()` and on every reconciliation
    /// tick, and again with a fresh anchor whenever a round completes.
    async fn arm_round(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str, anchor: Decimal) -> Result<(), RunnerError> {
        let bot = ctx.handle.snapshot().await;
        let levels = bot.config.grid_levels;
        let filters = {
            let mut state = self.state.lock().await;
            state.anchor = anchor;
            while state.entries.len() < levels as usize {
                state.entries.push(EntrySlot::Empty);
            }
            state.filters.expect("filters loaded before arming a DCA round")
        };

        let exchange_open = ctx.gateway.get_open_orders(Some(symbol)).await?;
        let local_open: Vec<(Option<usize>, OrderRecord)> = {
            let state = self.state.lock().await;
            let mut v: Vec<(Option<usize>, OrderRecord)> = state
                .entries
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| match slot {
                    EntrySlot::Open(o) if o.is_open() => Some((Some(i), o.clone())),
                    _ => None,
                })
                .collect();
            if let Some(exit) = &state.exit_order {
                if exit.is_open() {
                    v.push((None, exit.clone()));
                }
            }
            v
        };
        let records: Vec<OrderRecord> = local_open.iter().map(|(_, r)| r.clone()).collect();
        let missing_ids: HashSet<String> = missing_from_exchange(&records, &exchange_open)
            .into_iter()
            .map(|r| r.client_order_id.clone())
            .collect();

        for (slot, record) in local_open {
            if !missing_ids.contains(&record.client_order_id) {
                continue;
            }
            let Some(exchange_order_id) = record.exchange_order_id else { continue };
            match ctx.gateway.get_order(symbol, exchange_order_id as i64).await {
                Ok(view) => match classify_missing_order(&view.status) {
                    ReconciliationAction::LeaveToFillHandler => {
                        if let Some(status) = ExecutionReportStatus::from_exchange_str(&view.status) {
                            if status.is_fill() {
                                self.apply_fill(ctx, bot_id, symbol, slot, status).await?;
                            }
                        }
                    }
                    ReconciliationAction::NeedsReplacement => match slot {
                        Some(idx) => self.place_entry(ctx, bot_id, symbol, idx).await,
                        None => self.replace_exit_order(ctx, bot_id, symbol).await,
                    },
                },
                Err(err) => tracing::warn!(bot_id = %bot_id, %err, "failed to check a missing DCA order's status"),
            }
        }

        let mut seen_prices: HashSet<Decimal> = {
            let state = self.state.lock().await;
            state
                .entries
                .iter()
                .filter_map(|slot| match slot {
                    EntrySlot::Open(o) => Some(o.price),
                    _ => None,
                })
                .collect()
        };
        for idx in 0..levels as usize {
            let (needs_placement, price) = {
                let state = self.state.lock().await;
                let needs_placement = matches!(state.entries[idx], EntrySlot::Empty);
                let price = self.direction.entry_price(anchor, idx as i64 + 1, bot.config.grid_spread, filters.tick_size);
                (needs_placement, price)
            };
            if !needs_placement {
                continue;
            }
            // Two levels can floor to the same tick when gridSpread is finer
            // than the symbol's tick size; only the first claims that price.
            if !seen_prices.insert(price) {
                tracing::debug!(bot_id = %bot_id, %price, "skipping duplicate DCA entry price");
                continue;
            }
            self.place_entry(ctx, bot_id, symbol, idx).await;
        }
        Ok(())
    }

    /// Rebuilds entry slots and the exit order from the exchange's open-order
    /// set on resume, since in-memory state never survives a restart but a
    /// persisted `initialStartPrice` means this round was already underway.
    /// An open order is matched to an entry level by price proximity (within
    /// half a tick of that level's expected price); anything on the exit
    /// side is taken as the exit order, and its implied average price and
    /// quantity seed `filled` as a single synthetic entry so the next fill's
    /// weighted average still comes out right.
    async fn rebuild_from_exchange(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str, anchor: Decimal) -> Result<(), RunnerError> {
        let tag = bot_id.bot_tag();
        let exchange_open = ctx.gateway.get_open_orders(Some(symbol)).await?;
        let bot = ctx.handle.snapshot().await;
        let levels = bot.config.grid_levels;
        let spread = bot.config.grid_spread;
        let margin = bot.config.take_profit.unwrap_or(spread);
        let tick_size = { self.state.lock().await.filters.expect("filters loaded before rebuilding").tick_size };
        let half_tick = tick_size / Decimal::from(2);
        let exit_side = self.direction.exit_side();

        let mut entries = vec![EntrySlot::Empty; levels as usize];
        let mut exit_order = None;
        let mut filled = Vec::new();

        for o in exchange_open.into_iter().filter(|o| o.client_order_id.starts_with(&tag)) {
            let mut rec = OrderRecord::new(o.client_order_id.clone(), o.side, o.price, o.orig_qty);
            rec.exchange_order_id = Some(o.order_id as u64);
            rec.status = core_types::OrderRecordStatus::Open;
            rec.filled_quantity = o.executed_qty;

            if o.side == exit_side {
                let implied_avg = match self.direction {
                    Direction::Accumulate => o.price - margin,
                    Direction::Distribute => o.price + margin,
                };
                filled.push((implied_avg, o.orig_qty));
                exit_order = Some(rec);
                continue;
            }
            if let Some(idx) = (1..=levels as i64).find(|&i| {
                let expected = self.direction.entry_price(anchor, i, spread, tick_size);
                (expected - o.price).abs() <= half_tick
            }) {
                entries[(idx - 1) as usize] = EntrySlot::Open(rec);
            }
        }

        let mut state = self.state.lock().await;
        state.entries = entries;
        state.exit_order = exit_order;
        state.filled = filled;
        Ok(())
    }

    async fn place_entry(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str, idx: usize) {
        let bot = ctx.handle.snapshot().await;
        let (anchor, tick_size, step_size) = {
            let state = self.state.lock().await;
            let filters = state.filters.expect("filters loaded");
            (state.anchor, filters.tick_size, filters.step_size)
        };
        let price = self.direction.entry_price(anchor, idx as i64 + 1, bot.config.grid_spread, tick_size);
        let qty = floor_step(bot.config.order_size, step_size);

        match place_with_policy(ctx, bot_id, symbol, self.direction.entry_side(), price, qty, executor::DCA_FATAL_CODES).await {
            PlacementOutcome::Placed(rec) | PlacementOutcome::Skipped(rec) => {
                self.state.lock().await.entries[idx] = EntrySlot::Open(rec);
            }
            PlacementOutcome::Retry => {}
            PlacementOutcome::Fatal { code, message } => ctx.handle.mark_fatal_error(code, message).await,
        }
    }

    /// Cancels every entry-side order still resting on the exchange per the
    /// locally tracked slots. Called right before a completed round clears
    /// local state and re-arms with a fresh anchor, so the previous round's
    /// entries never go on to live orphaned on the books once they're
    /// invisible to the next `arm_round`'s reconcile pass.
    async fn cancel_open_entries(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str) {
        let exchange_order_ids: Vec<u64> = {
            let state = self.state.lock().await;
            state
                .entries
                .iter()
                .filter_map(|slot| match slot {
                    EntrySlot::Open(o) => o.exchange_order_id,
                    _ => None,
                })
                .collect()
        };
        for exchange_order_id in exchange_order_ids {
            if let Err(err) = ctx.gateway.cancel_order(symbol, exchange_order_id as i64).await {
                if !executor::is_unknown_order(&err) {
                    tracing::warn!(bot_id = %bot_id, %err, "failed to cancel a leftover DCA entry order before re-arming");
                }
            }
        }
    }

    async fn handle_fill(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str, event: UserEvent) -> Result<(), RunnerError> {
        if !event.exec_status.is_fill() {
            return Ok(());
        }
        let slot = {
            let state = self.state.lock().await;
            if state.exit_order.as_ref().is_some_and(|o| o.client_order_id == event.client_order_id) {
                Some(None)
            } else {
                state
                    .entries
                    .iter()
                    .position(|slot| matches!(slot, EntrySlot::Open(o) if o.client_order_id == event.client_order_id))
                    .map(Some)
            }
        };
        let Some(slot) = slot else { return Ok(()) };
        self.apply_fill(ctx, bot_id, symbol, slot, event.exec_status).await
    }

    /// `slot = Some(idx)` is an entry fill; `slot = None` is the exit fill
    /// that completes the round. Only a full `Filled` report is actionable.
    async fn apply_fill(
        &self,
        ctx: &RunnerContext,
        bot_id: BotId,
        symbol: &str,
        slot: Option<usize>,
        status: ExecutionReportStatus,
    ) -> Result<(), RunnerError> {
        if status != ExecutionReportStatus::Filled {
            return Ok(());
        }
        match slot {
            Some(idx) => {
                let entry = {
                    let mut state = self.state.lock().await;
                    match std::mem::replace(&mut state.entries[idx], EntrySlot::Filled) {
                        EntrySlot::Open(o) => Some(o),
                        other => {
                            state.entries[idx] = other;
                            None
                        }
                    }
                };
                if let Some(entry) = entry {
                    {
                        let mut state = self.state.lock().await;
                        state.filled.push((entry.price, entry.quantity));
                    }
                    self.replace_exit_order(ctx, bot_id, symbol).await;
                }
            }
            None => {
                let (avg_price, total_qty, exit_price) = {
                    let mut state = self.state.lock().await;
                    let exit = state.exit_order.take();
                    let (avg, qty) = weighted_average(&state.filled);
                    let exit_price = exit.map(|o| o.price).unwrap_or(avg);
                    (avg, qty, exit_price)
                };
                let pnl = self.direction.round_pnl(avg_price, exit_price, total_qty);
                ctx.handle.update_stats(1, pnl).await;

                self.cancel_open_entries(ctx, bot_id, symbol).await;

                let fresh_anchor = current_price(ctx, symbol).await.unwrap_or(avg_price);
                {
                    let mut state = self.state.lock().await;
                    state.filled.clear();
                    state.entries.iter_mut().for_each(|e| *e = EntrySlot::Empty);
                }
                self.arm_round(ctx, bot_id, symbol, fresh_anchor).await?;
            }
        }
        Ok(())
    }

    /// Cancels any resting exit order and places a fresh one sized at the
    /// round's current weighted average — called after every entry fill, so
    /// the exit order's price and quantity always reflect the full position.
    async fn replace_exit_order(&self, ctx: &RunnerContext, bot_id: BotId, symbol: &str) {
        let (avg_price, total_qty, tick_size, margin, old_exit) = {
            let bot = ctx.handle.snapshot().await;
            let mut state = self.state.lock().await;
            let (avg, qty) = weighted_average(&state.filled);
            let margin = bot.config.take_profit.unwrap_or(bot.config.grid_spread);
            let old_exit = state.exit_order.take();
            (avg, qty, state.filters.expect("filters loaded").tick_size, margin, old_exit)
        };
        if total_qty <= Decimal::ZERO {
            return;
        }
        if let Some(old_exit) = old_exit {
            if let Some(exchange_order_id) = old_exit.exchange_order_id {
                if let Err(err) = ctx.gateway.cancel_order(symbol, exchange_order_id as i64).await {
                    if !executor::is_unknown_order(&err) {
                        tracing::warn!(bot_id = %bot_id, %err, "failed to cancel the old DCA exit order before replacing it");
                    }
                }
            }
        }

        let price = self.direction.exit_price(avg_price, margin, tick_size);
        match place_with_policy(ctx, bot_id, symbol, self.direction.exit_side(), price, total_qty, executor::DCA_FATAL_CODES).await {
            PlacementOutcome::Placed(rec) | PlacementOutcome::Skipped(rec) => {
                self.state.lock().await.exit_order = Some(rec);
            }
            PlacementOutcome::Retry => {}
            PlacementOutcome::Fatal { code, message } => ctx.handle.mark_fatal_error(code, message).await,
        }
    }
}

fn weighted_average(filled: &[(Decimal, Decimal)]) -> (Decimal, Decimal) {
    let total_qty: Decimal = filled.iter().map(|(_, qty)| *qty).sum();
    if total_qty <= Decimal::ZERO {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let weighted_sum: Decimal = filled.iter().map(|(price, qty)| *price * *qty).sum();
    (weighted_sum / total_qty, total_qty)
}


#[async_trait]
impl Runner for DcaRunner {
    async fn start(self: Arc<Self>, ctx: RunnerContext) -> Result<(), RunnerError> {
        let bot = ctx.handle.snapshot().await;
        let symbol = bot.symbol.clone();
        let bot_id = bot.id;

        let filters = ctx.gateway.exchange_info(&symbol).await?;
        self.state.lock().await.filters = Some(filters);

        let (anchor, first_start) = match bot.config.initial_start_price {
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

        if !first_start {
            self.rebuild_from_exchange(&ctx, bot_id, &symbol, anchor).await?;
        }

        self.arm_round(&ctx, bot_id, &symbol, anchor).await?;

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
                    let anchor = self.state.lock().await.anchor;
                    if let Err(err) = self.arm_round(&ctx, bot_id, &symbol, anchor).await {
                        tracing::warn!(bot_id = %bot_id, %err, "DCA reconciliation pass failed");
                    }
                }
                event = user_events.recv() => {
                    match event {
                        Ok(event) if event.symbol == symbol => {
                            if let Err(err) = self.handle_fill(&ctx, bot_id, &symbol, event).await {
                                tracing::warn!(bot_id = %bot_id, %err, "failed to process a DCA fill");
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
        serde_json::json!({ "strategy": if self.direction == Direction::Accumulate { "dca_buy" } else { "dca_sell" } })
    }
}
