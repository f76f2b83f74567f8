//! The capability interface every strategy runner implements, and the
//! bundle of shared collaborators the manager hands it at start time.
//!
//! The manager holds each bot's runner behind this trait object only — it
//! never downcasts to a concrete `GridRunner`/`DcaBuyRunner`/`DcaSellRunner`,
//! matching the "tagged variant or capability interface" design guidance.

use crate::handle::BotHandle;
use async_trait::async_trait;
use cache::MarketCache;
use events::EventBus;
use gateway::ExchangeGateway;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("gateway error: {0}")]
    Gateway(#[from] gateway::Error),
    #[error("{0}")]
    Other(String),
}

/// Everything a runner needs to do its job, handed to it once at `start()`.
/// Cheap to clone — every field is already an `Arc`/channel handle.
#[derive(Clone)]
pub struct RunnerContext {
    pub handle: BotHandle,
    pub gateway: Arc<dyn ExchangeGateway>,
    pub cache: Arc<MarketCache>,
    pub bus: EventBus,
}

/// `{start(), stop(), getDetails()}` — the one interface the manager depends
/// on for all three strategies.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Begins the strategy's background work (initial placement, the fill
    /// listener, the reconciliation interval, the duration timer). Returns
    /// once initial placement has either succeeded or failed — the
    /// long-running pieces continue on their own spawned tasks and exit when
    /// `ctx.handle.stop_rx()` reports `true`.
    async fn start(self: Arc<Self>, ctx: RunnerContext) -> Result<(), RunnerError>;

    /// Cancels every exchange order still tagged with this bot's id and
    /// waits for the background tasks spawned by `start` to exit. Called
    /// both on an explicit `bot.stop()` and during process shutdown.
    async fn stop(&self, ctx: &RunnerContext) -> Result<(), RunnerError>;

    /// A point-in-time, JSON-serialisable view of runner-local state (order
    /// books, unmatched buys, running averages) for an external observer —
    /// the admin surface collaborator named in the data model, not consumed
    /// anywhere in this workspace.
    fn get_details(&self) -> serde_json::Value;
}
