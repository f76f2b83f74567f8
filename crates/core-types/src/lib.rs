pub mod bot;
pub mod enums;
pub mod error;
pub mod filters;
pub mod numeric;
pub mod order;

pub use bot::{Bot, BotConfig, BotId, BotOptions, BotSnapshot, BotStats};
pub use enums::{BotStatus, ExecutionReportStatus, OrderRecordStatus, OrderSide, StrategyId};
pub use error::CoreError;
pub use filters::SymbolFilters;
pub use numeric::{floor_step, floor_tick};
pub use order::{mint_client_order_id, OrderRecord};
