use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-imposed minimum price/quantity increments for a symbol.
/// Loaded on demand from `exchangeInfo` and cached per bot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
}
