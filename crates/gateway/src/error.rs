use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("exchange returned server error {status}: {body}")]
    Server5xx { status: u16, body: String },

    #[error("exchange rejected the request: code={code} message={message}")]
    Exchange { code: i64, message: String },

    #[error("failed to deserialize exchange response: {0}")]
    Deserialization(String),

    #[error("invalid data in exchange response: {0}")]
    InvalidData(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl GatewayError {
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            GatewayError::Exchange { code, .. } => Some(*code),
            _ => None,
        }
    }
}
