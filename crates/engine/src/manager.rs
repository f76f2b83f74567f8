//! The bot manager: owns every bot's [`BotHandle`] and runner, and is the
//! only thing in this workspace that starts, stops, or restarts a bot.
//!
//! Runners never hold a manager reference and the manager never downcasts a
//! runner — the two talk only through [`crate::runner::Runner`] and
//! [`BotHandle`], which keeps a stopped bot's strategy object free to be
//! dropped and rebuilt fresh on its next start.

use crate::error::EngineError;
use crate::handle::BotHandle;
use crate::runner::{Runner, RunnerContext};
use cache::MarketCache;
use core_types::{Bot, BotConfig, BotId, BotSnapshot, BotStats, BotStatus, StrategyId};
use events::EventBus;
use gateway::ExchangeGateway;
use persistence::SnapshotStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Builds the concrete runner for a given strategy. Supplied by the binary
/// at construction time so this crate never depends on the strategy
/// implementations themselves.
pub type RunnerFactory = Arc<dyn Fn(StrategyId) -> Arc<dyn Runner> + Send + Sync>;

struct ManagedBot {
    handle: BotHandle,
    runner: Arc<dyn Runner>,
    duration_timer: Mutex<Option<JoinHandle<()>>>,
}

/// A read-only projection of one bot for a caller that just wants to list
/// them — the admin-surface collaborator's natural input, not otherwise
/// consumed in this workspace.
#[derive(Debug, Clone, Serialize)]
pub struct BotView {
    pub id: BotId,
    pub name: String,
    pub strategy: StrategyId,
    pub symbol: String,
    pub status: BotStatus,
    pub stats: BotStats,
    pub current_duration_ms: Option<i64>,
}

pub struct BotManager {
    bots: RwLock<HashMap<BotId, ManagedBot>>,
    store: Arc<SnapshotStore>,
    bus: EventBus,
    gateway: Arc<dyn ExchangeGateway>,
    cache: Arc<MarketCache>,
    runner_factory: RunnerFactory,
}

impl BotManager {
    pub fn new(
        store: Arc<SnapshotStore>,
        bus: EventBus,
        gateway: Arc<dyn ExchangeGateway>,
        cache: Arc<MarketCache>,
        runner_factory: RunnerFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            bots: RwLock::new(HashMap::new()),
            store,
            bus,
            gateway,
            cache,
            runner_factory,
        })
    }

    /// Registers a new bot in `Stopped` state and persists its initial
    /// snapshot. Call [`Self::start`] separately to actually run it —
    /// creation and starting are deliberately two steps, matching the
    /// distinction between "configured" and "running".
    pub async fn create_bot(
        &self,
        name: String,
        strategy: StrategyId,
        symbol: String,
        config: BotConfig,
    ) -> Result<BotId, EngineError> {
        config.validate()?;
        let bot = Bot::new(name, strategy, symbol, config);
        let id = bot.id;
        self.store.save(&id, &BotSnapshot::new(&bot)).await?;

        let handle = BotHandle::new(bot, self.store.clone(), self.bus.clone());
        let runner = (self.runner_factory)(strategy);
        let managed = ManagedBot { handle, runner, duration_timer: Mutex::new(None) };
        self.bots.write().await.insert(id, managed);
        Ok(id)
    }

    /// Reloads every snapshot under the configured data directory. A bot
    /// that was `Running` when the process last exited is resumed here —
    /// its runner is rebuilt and restarted, but `time_started` is left
    /// untouched by [`BotHandle::mark_started`] since it's already set.
    pub async fn load_bots_from_disk(self: &Arc<Self>) -> Result<(), EngineError> {
        for id in self.store.list_ids().await? {
            let Some(snapshot) = self.store.load(&id).await? else { continue };
            let bot = snapshot.state;
            let was_running = bot.status == BotStatus::Running;
            let strategy = bot.strategy;

            let handle = BotHandle::new(bot, self.store.clone(), self.bus.clone());
            let runner = (self.runner_factory)(strategy);
            let managed = ManagedBot { handle: handle.clone(), runner, duration_timer: Mutex::new(None) };
            self.bots.write().await.insert(id, managed);

            if was_running {
                tracing::info!(bot_id = %id, "resuming bot that was running before restart");
                self.activate(id, &handle).await?;
            }
        }
        Ok(())
    }

    /// Starts a `Stopped` bot. A no-op if it's already running.
    pub async fn start(self: &Arc<Self>, id: BotId) -> Result<(), EngineError> {
        let handle = self.handle_for(id).await?;
        if handle.snapshot().await.status == BotStatus::Running {
            return Ok(());
        }
        self.activate(id, &handle).await
    }

    /// Shared by a fresh `start()` and disk-resume: resets the stop signal,
    /// marks the bot running, spawns the runner, and arms the duration
    /// timer if the bot's config names a nonzero `durationMinutes`.
    async fn activate(self: &Arc<Self>, id: BotId, handle: &BotHandle) -> Result<(), EngineError> {
        handle.reset_stop_signal();
        handle.mark_started().await;
        self.spawn_runner_task(id, handle.clone()).await?;

        let duration_minutes = handle.snapshot().await.config.duration_minutes;
        if duration_minutes > 0 {
            self.spawn_duration_timer(id, duration_minutes).await;
        }
        Ok(())
    }

    async fn spawn_runner_task(&self, id: BotId, handle: BotHandle) -> Result<(), EngineError> {
        let runner = {
            let bots = self.bots.read().await;
            bots.get(&id).ok_or(EngineError::BotNotFound(id))?.runner.clone()
        };
        let ctx = RunnerContext {
            handle,
            gateway: self.gateway.clone(),
            cache: self.cache.clone(),
            bus: self.bus.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = runner.start(ctx).await {
                tracing::error!(bot_id = %id, %err, "runner start failed");
            }
        });
        Ok(())
    }

    /// Arms a one-shot timer that calls [`Self::stop`] once `duration_minutes`
    /// has elapsed, matching the spec's bot-level (not grid-specific) auto-stop
    /// concern. The handle is stored so an explicit manual stop can cancel it
    /// before it fires.
    async fn spawn_duration_timer(self: &Arc<Self>, id: BotId, duration_minutes: u64) {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration_minutes * 60)).await;
            if let Err(err) = manager.stop(id).await {
                tracing::warn!(bot_id = %id, %err, "duration-timer auto-stop failed");
            }
        });
        let bots = self.bots.read().await;
        if let Some(managed) = bots.get(&id) {
            *managed.duration_timer.lock().await = Some(task);
        }
    }

    /// Stops a running bot: cancels its duration timer, asks the runner to
    /// cancel its open exchange orders, marks it `Stopped`, and signals its
    /// background tasks to exit. A no-op if it's already stopped.
    pub async fn stop(&self, id: BotId) -> Result<(), EngineError> {
        let (handle, runner, timer) = {
            let bots = self.bots.read().await;
            let managed = bots.get(&id).ok_or(EngineError::BotNotFound(id))?;
            (managed.handle.clone(), managed.runner.clone(), managed.duration_timer.lock().await.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if handle.snapshot().await.status != BotStatus::Running {
            return Ok(());
        }

        let ctx = RunnerContext {
            handle: handle.clone(),
            gateway: self.gateway.clone(),
            cache: self.cache.clone(),
            bus: self.bus.clone(),
        };
        if let Err(err) = runner.stop(&ctx).await {
            tracing::warn!(bot_id = %id, %err, "runner reported an error while stopping, marking it stopped anyway");
        }

        handle.mark_stopped("requested").await;
        handle.request_stop();
        Ok(())
    }

    pub async fn list_bots(&self) -> Vec<BotView> {
        let bots = self.bots.read().await;
        let mut views = Vec::with_capacity(bots.len());
        for managed in bots.values() {
            let bot = managed.handle.snapshot().await;
            let current_duration_ms = if bot.status == BotStatus::Running {
                managed.handle.current_run_duration_ms().await
            } else {
                None
            };
            views.push(BotView {
                id: bot.id,
                name: bot.name,
                strategy: bot.strategy,
                symbol: bot.symbol,
                status: bot.status,
                stats: bot.stats,
                current_duration_ms,
            });
        }
        views
    }

    pub async fn get_bot(&self, id: BotId) -> Result<Bot, EngineError> {
        Ok(self.handle_for(id).await?.snapshot().await)
    }

    async fn handle_for(&self, id: BotId) -> Result<BotHandle, EngineError> {
        let bots = self.bots.read().await;
        bots.get(&id).map(|m| m.handle.clone()).ok_or(EngineError::BotNotFound(id))
    }

    /// Stops every running bot. Called from the process's shutdown-signal
    /// handler so a SIGINT/SIGTERM leaves every bot's last known state
    /// persisted and its exchange orders canceled before the process exits.
    pub async fn shutdown(&self) {
        let ids: Vec<BotId> = self.bots.read().await.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.stop(id).await {
                tracing::error!(bot_id = %id, %err, "failed to stop bot during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway::types::{AssetBalance, OhlcBar, OrderResponse, OrderView};
    use gateway::{Error as GatewayError, ExchangeGateway, NewOrderParams};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct DeadGateway;

    #[async_trait]
    impl ExchangeGateway for DeadGateway {
        async fn get_server_time(&self) -> Result<i64, GatewayError> {
            unimplemented!()
        }
        async fn get_price(&self, _symbol: &str) -> Result<rust_decimal::Decimal, GatewayError> {
            unimplemented!()
        }
        async fn klines(&self, _symbol: &str, _interval: &str, _limit: u32) -> Result<Vec<OhlcBar>, GatewayError> {
            unimplemented!()
        }
        async fn exchange_info(&self, _symbol: &str) -> Result<core_types::SymbolFilters, GatewayError> {
            unimplemented!()
        }
        async fn new_order(&self, _params: &NewOrderParams) -> Result<OrderResponse, GatewayError> {
            unimplemented!()
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: i64) -> Result<(), GatewayError> {
            unimplemented!()
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), GatewayError> {
            unimplemented!()
        }
        async fn get_order(&self, _symbol: &str, _order_id: i64) -> Result<OrderView, GatewayError> {
            unimplemented!()
        }
        async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OrderView>, GatewayError> {
            unimplemented!()
        }
        async fn get_all_orders(&self, _symbol: &str, _limit: u32) -> Result<Vec<OrderView>, GatewayError> {
            unimplemented!()
        }
        async fn account_info(&self) -> Result<Vec<AssetBalance>, GatewayError> {
            unimplemented!()
        }
        async fn create_listen_key(&self) -> Result<String, GatewayError> {
            unimplemented!()
        }
        async fn keepalive_listen_key(&self, _listen_key: &str) -> Result<(), GatewayError> {
            unimplemented!()
        }
        async fn close_listen_key(&self, _listen_key: &str) -> Result<(), GatewayError> {
            unimplemented!()
        }
    }

    /// Records how many times it was started/stopped and waits on
    /// `ctx.handle.stop_rx()` before returning from `start`, mimicking a
    /// real runner's long-lived background work.
    struct CountingRunner {
        starts: AtomicUsize,
        stops: AtomicUsize,
        started_notify: Notify,
    }

    impl CountingRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self { starts: AtomicUsize::new(0), stops: AtomicUsize::new(0), started_notify: Notify::new() })
        }
    }

    #[async_trait]
    impl Runner for CountingRunner {
        async fn start(self: Arc<Self>, ctx: RunnerContext) -> Result<(), crate::runner::RunnerError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.started_notify.notify_one();
            let mut stop_rx = ctx.handle.stop_rx();
            while !*stop_rx.borrow() {
                if stop_rx.changed().await.is_err() {
                    break;
                }
            }
            Ok(())
        }

        async fn stop(&self, _ctx: &RunnerContext) -> Result<(), crate::runner::RunnerError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_details(&self) -> serde_json::Value {
            serde_json::json!({})
        }
    }

    fn sample_config() -> BotConfig {
        BotConfig {
            grid_levels: 5,
            grid_spread: dec!(10),
            order_size: dec!(100),
            take_profit: None,
            duration_minutes: 0,
            initial_start_price: None,
            options: Default::default(),
        }
    }

    async fn test_manager() -> (Arc<BotManager>, Arc<CountingRunner>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path()).await.unwrap());
        let runner = CountingRunner::new();
        let runner_for_factory = runner.clone();
        let factory: RunnerFactory = Arc::new(move |_strategy| runner_for_factory.clone() as Arc<dyn Runner>);
        let manager = BotManager::new(store, EventBus::new(), Arc::new(DeadGateway), Arc::new(MarketCache::new()), factory);
        (manager, runner)
    }

    #[tokio::test]
    async fn create_bot_starts_stopped() {
        let (manager, _runner) = test_manager().await;
        let id = manager.create_bot("g1".to_string(), StrategyId::Grid, "BTCUSDT".to_string(), sample_config()).await.unwrap();
        let bot = manager.get_bot(id).await.unwrap();
        assert_eq!(bot.status, BotStatus::Stopped);
    }

    #[tokio::test]
    async fn start_then_stop_spawns_and_tears_down_the_runner() {
        let (manager, runner) = test_manager().await;
        let id = manager.create_bot("g1".to_string(), StrategyId::Grid, "BTCUSDT".to_string(), sample_config()).await.unwrap();

        manager.start(id).await.unwrap();
        runner.started_notify.notified().await;
        assert_eq!(runner.starts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get_bot(id).await.unwrap().status, BotStatus::Running);

        manager.stop(id).await.unwrap();
        assert_eq!(runner.stops.load(Ordering::SeqCst), 1);
        let bot = manager.get_bot(id).await.unwrap();
        assert_eq!(bot.status, BotStatus::Stopped);
        assert!(bot.stats.last_duration_ms >= 0);
    }

    #[tokio::test]
    async fn starting_an_already_running_bot_is_a_no_op() {
        let (manager, runner) = test_manager().await;
        let id = manager.create_bot("g1".to_string(), StrategyId::Grid, "BTCUSDT".to_string(), sample_config()).await.unwrap();
        manager.start(id).await.unwrap();
        runner.started_notify.notified().await;
        manager.start(id).await.unwrap();
        assert_eq!(runner.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resuming_from_disk_preserves_time_started() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::open(dir.path()).await.unwrap());
        let runner = CountingRunner::new();
        let runner_for_factory = runner.clone();
        let factory: RunnerFactory = Arc::new(move |_s| runner_for_factory.clone() as Arc<dyn Runner>);
        let manager = BotManager::new(store.clone(), EventBus::new(), Arc::new(DeadGateway), Arc::new(MarketCache::new()), factory);

        let id = manager.create_bot("g1".to_string(), StrategyId::Grid, "BTCUSDT".to_string(), sample_config()).await.unwrap();
        manager.start(id).await.unwrap();
        runner.started_notify.notified().await;
        let original_started = manager.get_bot(id).await.unwrap().time_started;

        let runner2 = CountingRunner::new();
        let runner2_for_factory = runner2.clone();
        let factory2: RunnerFactory = Arc::new(move |_s| runner2_for_factory.clone() as Arc<dyn Runner>);
        let manager2 = BotManager::new(store, EventBus::new(), Arc::new(DeadGateway), Arc::new(MarketCache::new()), factory2);
        manager2.load_bots_from_disk().await.unwrap();
        runner2.started_notify.notified().await;

        let resumed = manager2.get_bot(id).await.unwrap();
        assert_eq!(resumed.status, BotStatus::Running);
        assert_eq!(resumed.time_started, original_started);
    }
}
