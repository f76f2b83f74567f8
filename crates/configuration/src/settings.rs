use serde::Deserialize;

/// Process-wide configuration, sourced primarily from the environment.
///
/// `binance_api_key`/`binance_api_secret` are the only required values —
/// their absence is a fatal startup error, handled by [`crate::load_config`]
/// rather than by this struct (so the caller gets a clear, specific error
/// instead of a generic deserialization failure).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub binance_api_key: String,
    pub binance_api_secret: String,

    #[serde(default = "default_base_url")]
    pub binance_base_url: String,

    pub redis_url: Option<String>,

    #[serde(default = "default_subscribe_symbols")]
    pub subscribe_symbols: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl AppConfig {
    pub fn symbols(&self) -> Vec<String> {
        self.subscribe_symbols.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
    }
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_subscribe_symbols() -> String {
    "BTCUSDT,ETHUSDT,BTCFDUSD".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_data_dir() -> String {
    "./data/bots".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_splits_and_trims_csv() {
        let config = AppConfig {
            binance_api_key: "k".to_string(),
            binance_api_secret: "s".to_string(),
            binance_base_url: default_base_url(),
            redis_url: None,
            subscribe_symbols: "BTCUSDT, ETHUSDT ,BTCFDUSD".to_string(),
            port: default_port(),
            data_dir: default_data_dir(),
        };
        assert_eq!(config.symbols(), vec!["BTCUSDT", "ETHUSDT", "BTCFDUSD"]);
    }
}
