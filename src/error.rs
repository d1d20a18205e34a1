use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnifferError {
    #[error("radio error: {0}")]
    Radio(String),

    #[error("storage unavailable: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnifferError>;
