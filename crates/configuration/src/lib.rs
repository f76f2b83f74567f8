use crate::error::ConfigError;

pub mod error;
pub mod settings;

pub use settings::AppConfig;

/// Loads [`AppConfig`] from the process environment, reading a `.env` file
/// first if one is present so local runs don't need real shell exports.
///
/// `BINANCE_API_KEY`/`BINANCE_API_SECRET` are checked explicitly before the
/// generic deserialization step so a missing credential produces
/// [`ConfigError::MissingEnvVar`] rather than an opaque deserialize failure —
/// this is the one fatal-to-process condition the caller should surface and
/// exit on, rather than retry.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    for required in ["BINANCE_API_KEY", "BINANCE_API_SECRET"] {
        if std::env::var(required).unwrap_or_default().is_empty() {
            return Err(ConfigError::MissingEnvVar(required.to_string()));
        }
    }

    let builder = config::Config::builder().add_source(config::Environment::default()).build()?;

    let config = builder.try_deserialize::<AppConfig>()?;
    Ok(config)
}
