//! The specific price/balance cache shape runners and the gateway's stream
//! client share: prices keyed `price:<SYMBOL>`, a single balances entry keyed
//! `account:balances`, both served only within [`DEFAULT_PRICE_TTL`].

use crate::{TtlCache, DEFAULT_PRICE_TTL};
use rust_decimal::Decimal;
use std::collections::HashMap;

const BALANCES_KEY: &str = "account:balances";

fn price_key(symbol: &str) -> String {
    format!("price:{symbol}")
}

/// A balance entry for one asset: `{free, locked}`.
pub type AssetBalance = (Decimal, Decimal);

/// The cache as the rest of the system actually uses it: symbol prices and
/// the single account-wide balance map, each independently TTL-bounded.
#[derive(Clone)]
pub struct MarketCache {
    prices: TtlCache<String, Decimal>,
    balances: TtlCache<String, HashMap<String, AssetBalance>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self { prices: TtlCache::new(DEFAULT_PRICE_TTL), balances: TtlCache::new(DEFAULT_PRICE_TTL) }
    }

    pub async fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(&price_key(symbol)).await
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.set(price_key(symbol), price).await;
    }

    pub async fn get_balances(&self) -> Option<HashMap<String, AssetBalance>> {
        self.balances.get(&BALANCES_KEY.to_string()).await
    }

    pub async fn set_balances(&self, balances: HashMap<String, AssetBalance>) {
        self.balances.set(BALANCES_KEY.to_string(), balances).await;
    }

    pub async fn get_asset_balance(&self, asset: &str) -> Option<AssetBalance> {
        self.get_balances().await.and_then(|m| m.get(asset).copied())
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn price_round_trips_under_the_prefixed_key() {
        let cache = MarketCache::new();
        cache.set_price("BTCUSDT", dec!(30000)).await;
        assert_eq!(cache.get_price("BTCUSDT").await, Some(dec!(30000)));
        assert_eq!(cache.get_price("ETHUSDT").await, None);
    }

    #[tokio::test]
    async fn balances_are_looked_up_by_asset() {
        let cache = MarketCache::new();
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), (dec!(100), dec!(5)));
        cache.set_balances(balances).await;
        assert_eq!(cache.get_asset_balance("USDT").await, Some((dec!(100), dec!(5))));
        assert_eq!(cache.get_asset_balance("BTC").await, None);
    }
}
