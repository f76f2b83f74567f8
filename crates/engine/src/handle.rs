//! A runner's back-reference to its bot: never an ownership edge, just an id
//! plus the shared pieces a runner needs to report progress — matching the
//! "use a handle plus manager lookup, or a weak pointer" guidance for
//! avoiding ownership cycles between the manager and its runners.

use core_types::{Bot, BotId};
use events::{BotEvent, EventBus};
use persistence::SnapshotStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Shared, per-bot state a runner reads and mutates, plus the means to
/// persist it and tell the bot's background tasks to stop.
#[derive(Clone)]
pub struct BotHandle {
    pub id: BotId,
    bot: Arc<Mutex<Bot>>,
    store: Arc<SnapshotStore>,
    bus: EventBus,
    stop_tx: watch::Sender<bool>,
    /// When the *current* run began. Unlike `Bot::time_started` (set once,
    /// preserved across restarts), this is cleared on every stop and reset
    /// on every start/resume — it's what `lastDurationMs` and a running
    /// bot's live duration are measured against.
    run_start_time: Arc<Mutex<Option<chrono::DateTime<chrono::Utc>>>>,
}

impl BotHandle {
    pub(crate) fn new(bot: Bot, store: Arc<SnapshotStore>, bus: EventBus) -> Self {
        let id = bot.id;
        let (stop_tx, _) = watch::channel(false);
        Self {
            id,
            bot: Arc::new(Mutex::new(bot)),
            store,
            bus,
            stop_tx,
            run_start_time: Arc::new(Mutex::new(None)),
        }
    }

    /// Marks the bot `Running`: sets `time_started` only if this is its
    /// first-ever start, clears `time_stopped`, resets the current-run
    /// timer, persists, and publishes `BotEvent::Started`. Safe to call both
    /// for a brand-new bot and to resume one loaded from disk as `Running`.
    pub(crate) async fn mark_started(&self) {
        let now = chrono::Utc::now();
        *self.run_start_time.lock().await = Some(now);
        let mut guard = self.bot.lock().await;
        if guard.time_started.is_none() {
            guard.time_started = Some(now);
        }
        guard.time_stopped = None;
        guard.status = core_types::BotStatus::Running;
        let snapshot = core_types::BotSnapshot::new(&guard);
        drop(guard);
        if let Err(err) = self.store.save(&self.id, &snapshot).await {
            tracing::error!(bot_id = %self.id, %err, "failed to persist start");
        }
        self.bus.publish_bot(BotEvent::Started { bot_id: self.id });
    }

    /// Marks the bot `Stopped`: records `lastDurationMs` off the current-run
    /// timer (not `time_started`, which never resets), persists, and
    /// publishes `BotEvent::Stopped` with `reason`.
    pub(crate) async fn mark_stopped(&self, reason: &str) {
        let now = chrono::Utc::now();
        let run_start = self.run_start_time.lock().await.take();
        let mut guard = self.bot.lock().await;
        if guard.status == core_types::BotStatus::Running {
            guard.stats.last_duration_ms = run_start
                .map(|started| (now - started).num_milliseconds())
                .unwrap_or(guard.stats.last_duration_ms);
        }
        guard.status = core_types::BotStatus::Stopped;
        guard.time_stopped = Some(now);
        let snapshot = core_types::BotSnapshot::new(&guard);
        drop(guard);
        if let Err(err) = self.store.save(&self.id, &snapshot).await {
            tracing::error!(bot_id = %self.id, %err, "failed to persist stop");
        }
        self.bus.publish_bot(BotEvent::Stopped { bot_id: self.id, reason: reason.to_string() });
    }

    /// Milliseconds since the current run began, or `None` if the bot isn't
    /// running right now. Used for the live `currentDurationMs` projection.
    pub async fn current_run_duration_ms(&self) -> Option<i64> {
        let start = *self.run_start_time.lock().await;
        start.map(|started| (chrono::Utc::now() - started).num_milliseconds())
    }

    /// A cloned snapshot of the current bot state — cheap enough to call
    /// freely, since `Bot` only carries scalars, small strings and decimals.
    pub async fn snapshot(&self) -> Bot {
        self.bot.lock().await.clone()
    }

    /// Runs `mutate` under the bot's mutex, then persists the result. Every
    /// runner-local state change that should survive a restart goes through
    /// this single choke point.
    pub async fn mutate_and_persist<F>(&self, mutate: F) -> Result<(), persistence::StoreError>
    where
        F: FnOnce(&mut Bot),
    {
        let snapshot = {
            let mut guard = self.bot.lock().await;
            mutate(&mut guard);
            core_types::BotSnapshot::new(&guard)
        };
        self.store.save(&self.id, &snapshot).await
    }

    pub async fn persist(&self) -> Result<(), persistence::StoreError> {
        let snapshot = core_types::BotSnapshot::new(&*self.bot.lock().await);
        self.store.save(&self.id, &snapshot).await
    }

    /// Adds `rounds_delta`/`pnl_delta` to the bot's running stats and
    /// persists, then publishes `BotEvent::RoundCompleted`. The per-round
    /// P&L bookkeeping operation every runner calls on a completed round.
    pub async fn update_stats(&self, rounds_delta: u64, pnl_delta: Decimal) {
        let realized_pnl = {
            let mut guard = self.bot.lock().await;
            guard.stats.completed_rounds += rounds_delta;
            guard.stats.realized_pnl += pnl_delta;
            let snapshot = core_types::BotSnapshot::new(&guard);
            drop(guard);
            if let Err(err) = self.store.save(&self.id, &snapshot).await {
                tracing::warn!(bot_id = %self.id, %err, "failed to persist stats update");
            }
            pnl_delta
        };
        self.bus.publish_bot(BotEvent::RoundCompleted { bot_id: self.id, realized_pnl });
    }

    /// Marks the bot fatally errored: stops it (same bookkeeping as a normal
    /// stop, via [`Self::mark_stopped`]), publishes a `BotEvent::Error`
    /// carrying the exchange code as structured data, then signals every
    /// background task watching [`Self::stop_rx`] to exit.
    pub async fn mark_fatal_error(&self, code: i64, message: String) {
        self.mark_stopped(&format!("fatal:{code}")).await;
        self.bus.publish_bot(BotEvent::Error { bot_id: self.id, code, message });
        let _ = self.stop_tx.send(true);
    }

    pub fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub(crate) fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Clears a prior stop signal so a freshly `start()`ed runner's tasks
    /// (and any new subscriber to [`Self::stop_rx`]) don't see a stale
    /// `true` left over from the bot's previous run.
    pub(crate) fn reset_stop_signal(&self) {
        let _ = self.stop_tx.send(false);
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }
}
