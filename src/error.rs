use thiserror::Error;

/// Why a single input row could not become a `CustomerRecord`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestionError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' is not a valid number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("field '{field}' is not a boolean flag: {value:?}")]
    InvalidFlag { field: &'static str, value: String },

    #[error("field '{field}' must be non-negative, got {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("churn risk score {score} lies outside [0, 1]")]
    ScoreOutOfRange { score: f64 },

    #[error("unreadable row: {reason}")]
    MalformedRow { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid risk thresholds: need 0 <= medium ({medium}) < high ({high}) <= 1")]
    InvalidThresholds { high: f64, medium: f64 },

    #[error("top_n must be at least 1")]
    InvalidTopN,

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
