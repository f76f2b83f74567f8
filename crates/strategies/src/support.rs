//! Small helpers shared by every runner: client-order-id minting, a
//! cache-then-REST price lookup, and tolerant cancellation of a bot's own
//! tagged orders. None of this carries strategy-specific behaviour — it's
//! the plumbing every strategy needs identically.

use core_types::{mint_client_order_id, BotId, OrderRecord, OrderRecordStatus, OrderSide};
use engine::{RunnerContext, RunnerError};
use executor::{is_filter_failure, is_insufficient_balance, is_unknown_order, ErrorClass};
use gateway::NewOrderParams;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use std::time::Duration;

/// Mints a fresh `clientOrderId` tagged with this bot's id, so reconciliation
/// and the user-data stream can both recognise "this bot's" orders.
pub fn mint_order_id(bot_id: BotId, side: OrderSide) -> String {
    let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(6).map(char::from).collect();
    mint_client_order_id(&bot_id.bot_tag(), side, &suffix)
}

/// The current price for `symbol`: cache first, REST on a miss, re-populating
/// the cache either way. The one place every runner goes for "what's the
/// price right now" outside of live ticks off the market stream.
pub async fn current_price(ctx: &RunnerContext, symbol: &str) -> Result<Decimal, RunnerError> {
    if let Some(price) = ctx.cache.get_price(symbol).await {
        return Ok(price);
    }
    let price = ctx.gateway.get_price(symbol).await?;
    ctx.cache.set_price(symbol, price).await;
    Ok(price)
}

/// Places a post-only limit order tagged with a freshly minted client order
/// id, returning the id alongside the exchange's response.
pub async fn place_limit_order(
    ctx: &RunnerContext,
    bot_id: BotId,
    symbol: &str,
    side: OrderSide,
    price: Decimal,
    quantity: Decimal,
) -> Result<gateway::types::OrderResponse, RunnerError> {
    let client_order_id = mint_order_id(bot_id, side);
    let params = NewOrderParams {
        symbol: symbol.to_string(),
        side,
        price,
        quantity,
        client_order_id,
    };
    Ok(ctx.gateway.new_order(&params).await?)
}

/// How a level placement attempt resolved, once the error-policy
/// compensations below have run their course.
pub enum PlacementOutcome {
    /// Order resting on the exchange.
    Placed(OrderRecord),
    /// Rejected for a reason the strategy can compensate for locally
    /// (`ignored_balance` / `error`); the slot carries a marker record with
    /// no `exchange_order_id` so it isn't mistaken for something resting.
    Skipped(OrderRecord),
    /// Transient failure after the gateway's own retries — leave the slot
    /// empty so the next reconciliation pass tries again.
    Retry,
    /// `-2014`/`-2015`-class: the caller should stop the bot.
    Fatal { code: i64, message: String },
}

fn marker(client_order_id: String, side: OrderSide, price: Decimal, quantity: Decimal, status: OrderRecordStatus) -> OrderRecord {
    let mut rec = OrderRecord::new(client_order_id, side, price, quantity);
    rec.status = status;
    rec
}

/// Places a level's order under the grid/DCA error policy from the design:
/// insufficient balance marks the slot `ignored_balance` and moves on; a
/// filter failure (likely slippage) waits 3s and retries once with a fresh
/// `clientOrderId`, giving up to `error` if that retry also fails; anything
/// else not covered by `fatal_codes` is logged and marked `error` so it
/// isn't reattempted until the level is explicitly re-armed.
pub async fn place_with_policy(
    ctx: &RunnerContext,
    bot_id: BotId,
    symbol: &str,
    side: OrderSide,
    price: Decimal,
    quantity: Decimal,
    fatal_codes: &[i64],
) -> PlacementOutcome {
    match place_limit_order(ctx, bot_id, symbol, side, price, quantity).await {
        Ok(resp) => {
            let mut rec = OrderRecord::new(resp.client_order_id, resp.side, resp.price, resp.orig_qty);
            rec.exchange_order_id = Some(resp.order_id as u64);
            rec.status = OrderRecordStatus::Open;
            rec.filled_quantity = resp.executed_qty;
            PlacementOutcome::Placed(rec)
        }
        Err(RunnerError::Gateway(err)) => match executor::classify(&err, fatal_codes) {
            ErrorClass::FatalToBot => PlacementOutcome::Fatal { code: err.exchange_code().unwrap_or(0), message: err.to_string() },
            ErrorClass::LogicalBenign if is_insufficient_balance(&err) => {
                tracing::warn!(bot_id = %bot_id, %err, "insufficient balance, skipping this level");
                PlacementOutcome::Skipped(marker(mint_order_id(bot_id, side), side, price, quantity, OrderRecordStatus::IgnoredBalance))
            }
            ErrorClass::LogicalBenign if is_filter_failure(&err) => {
                tracing::warn!(bot_id = %bot_id, %err, "filter failure placing order, retrying once after 3s");
                tokio::time::sleep(Duration::from_secs(3)).await;
                match place_limit_order(ctx, bot_id, symbol, side, price, quantity).await {
                    Ok(resp) => {
                        let mut rec = OrderRecord::new(resp.client_order_id, resp.side, resp.price, resp.orig_qty);
                        rec.exchange_order_id = Some(resp.order_id as u64);
                        rec.status = OrderRecordStatus::Open;
                        rec.filled_quantity = resp.executed_qty;
                        PlacementOutcome::Placed(rec)
                    }
                    Err(retry_err) => {
                        tracing::error!(bot_id = %bot_id, %retry_err, "retry after filter failure also failed, marking level errored");
                        PlacementOutcome::Skipped(marker(mint_order_id(bot_id, side), side, price, quantity, OrderRecordStatus::Error))
                    }
                }
            }
            ErrorClass::Transient => {
                tracing::warn!(bot_id = %bot_id, %err, "transient error placing order after retries, will retry next reconciliation pass");
                PlacementOutcome::Retry
            }
            ErrorClass::LogicalBenign | ErrorClass::Other | ErrorClass::FatalToProcess => {
                tracing::error!(bot_id = %bot_id, %err, "order placement failed, marking level errored");
                PlacementOutcome::Skipped(marker(mint_order_id(bot_id, side), side, price, quantity, OrderRecordStatus::Error))
            }
        },
        Err(other) => {
            tracing::error!(bot_id = %bot_id, %other, "unexpected error placing order");
            PlacementOutcome::Retry
        }
    }
}

/// Cancels every order still open on the exchange for `symbol` whose
/// `clientOrderId` carries this bot's tag. Used on `stop()` — deliberately
/// per-order rather than a blanket `cancelAllOrders`, since another bot may
/// share the same symbol.
pub async fn cancel_bot_orders(ctx: &RunnerContext, bot_id: BotId, symbol: &str) -> Result<(), RunnerError> {
    let tag = bot_id.bot_tag();
    let open = ctx.gateway.get_open_orders(Some(symbol)).await?;
    for order in open.into_iter().filter(|o| o.client_order_id.starts_with(&tag)) {
        match ctx.gateway.cancel_order(symbol, order.order_id).await {
            Ok(()) => {}
            Err(err) if is_unknown_order(&err) => {
                tracing::debug!(order_id = order.order_id, "order already gone when cancelling on stop");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
