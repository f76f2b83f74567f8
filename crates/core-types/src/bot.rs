use crate::enums::{BotStatus, StrategyId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique bot identifier. Wraps a `Uuid` so the `clientOrderId` tag
/// derivation (`bot_tag`) has a single, well-tested home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub Uuid);

impl BotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The first hyphen-delimited segment of the id, used to prefix
    /// `clientOrderId`s so reconciliation can recognise "this bot's" orders
    /// among all open orders for the symbol.
    pub fn bot_tag(&self) -> String {
        self.0
            .to_string()
            .split('-')
            .next()
            .expect("uuid always has at least one segment")
            .to_string()
    }
}

impl Default for BotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options accepted and persisted but only partially wired to runtime
/// behaviour. `recenter_enabled` and the bot's top-level `duration_minutes`
/// are the only two with live semantics today; the rest round-trip
/// losslessly and are reserved for later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotOptions {
    pub start_price: Option<Decimal>,
    pub capital: Option<Decimal>,
    #[serde(default)]
    pub recenter_enabled: bool,
    // reserved, not yet implemented
    pub recenter_minutes: Option<u32>,
    // reserved, not yet implemented
    #[serde(default)]
    pub sell_on_stop_enabled: bool,
    // reserved, not yet implemented
    pub sell_on_stop_minutes: Option<u32>,
}

/// Strategy parameters, common fields plus the grid-only `initial_start_price`.
///
/// `order_size` means different things for different strategies: for `Grid`
/// it is a quote-currency budget (the placement math divides it by price);
/// for `DcaBuy`/`DcaSell` it is a base-unit quantity used directly. Not
/// unified on purpose — each runner interprets its own config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub grid_levels: u32,
    pub grid_spread: Decimal,
    /// Quote units for `Grid`, base units for `DcaBuy`/`DcaSell` — see the
    /// struct-level doc comment.
    pub order_size: Decimal,
    pub take_profit: Option<Decimal>,
    /// 0 means unbounded.
    #[serde(default)]
    pub duration_minutes: u64,
    /// Set once on first placement for a `Grid` bot, never overwritten while
    /// the bot is alive.
    #[serde(default)]
    pub initial_start_price: Option<Decimal>,
    #[serde(default)]
    pub options: BotOptions,
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), crate::error::CoreError> {
        if self.grid_levels == 0 {
            return Err(crate::error::CoreError::InvalidConfig("gridLevels must be positive".to_string()));
        }
        if self.grid_spread <= Decimal::ZERO {
            return Err(crate::error::CoreError::InvalidConfig("gridSpread must be positive".to_string()));
        }
        if self.order_size <= Decimal::ZERO {
            return Err(crate::error::CoreError::InvalidConfig("orderSize must be positive".to_string()));
        }
        if let Some(tp) = self.take_profit {
            if tp <= Decimal::ZERO {
                return Err(crate::error::CoreError::InvalidConfig("takeProfit must be positive when set".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStats {
    pub completed_rounds: u64,
    pub realized_pnl: Decimal,
    pub last_duration_ms: i64,
}

/// The full, mutable record the manager owns for a single bot.
///
/// `run_start_time` is intentionally excluded from `Serialize`/`Deserialize`
/// — it is in-memory only, recomputed on `start()` from `time_started`, and
/// never part of the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    pub strategy: StrategyId,
    pub symbol: String,
    pub status: BotStatus,
    pub config: BotConfig,
    pub stats: BotStats,
    pub time_created: DateTime<Utc>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_stopped: Option<DateTime<Utc>>,
}

impl Bot {
    pub fn new(name: String, strategy: StrategyId, symbol: String, config: BotConfig) -> Self {
        Self {
            id: BotId::new(),
            name,
            strategy,
            symbol,
            status: BotStatus::Stopped,
            config,
            stats: BotStats::default(),
            time_created: Utc::now(),
            time_started: None,
            time_stopped: None,
        }
    }

    /// `status == Running` iff `time_started` is set and `time_stopped` is not.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            BotStatus::Running => self.time_started.is_some() && self.time_stopped.is_none(),
            BotStatus::Stopped => true,
        }
    }
}

/// The on-disk persisted form of a bot: `{updatedAt, state}` where `state`
/// mirrors `Bot` minus the in-memory-only `run_start_time`. The `id` is
/// carried by the file name rather than duplicated inside the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub updated_at: i64,
    pub state: Bot,
}

impl BotSnapshot {
    pub fn new(bot: &Bot) -> Self {
        Self {
            updated_at: Utc::now().timestamp_millis(),
            state: bot.clone(),
        }
    }
}
