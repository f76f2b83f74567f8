use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("calculation error: {0}")]
    Calculation(String),
}
