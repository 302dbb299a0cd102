use thiserror::Error;

#[derive(Error, Debug)]
pub enum SsrError {
    #[error("Event table is missing required key: {0}")]
    MissingKey(String),

    #[error("Event table has unexpected key: {0}")]
    UnexpectedKey(String),

    #[error("Event table length mismatch: Index={index}, Duration={duration}, Code={code}")]
    LengthMismatch {
        index: usize,
        duration: usize,
        code: usize,
    },

    #[error("Invalid event in column {column} at row {row}: {reason}")]
    InvalidEvent {
        column: &'static str,
        row: usize,
        reason: String,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("No valid channels selected: {0}")]
    EmptySelection(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SsrError>;
