use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("bot {0} not found")]
    BotNotFound(core_types::BotId),

    #[error("gateway error: {0}")]
    Gateway(#[from] gateway::Error),

    #[error("persistence error: {0}")]
    Store(#[from] persistence::StoreError),

    #[error("runner error: {0}")]
    Runner(String),

    #[error("invalid bot config: {0}")]
    InvalidConfig(#[from] core_types::CoreError),
}
