use thiserror::Error;

/// Main error type for the arena orchestrator
#[derive(Error, Debug)]
pub enum ArenaError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Quote unavailable for instrument: {instrument}")]
    QuoteUnavailable { instrument: String },

    #[error("Stale data: {0}")]
    StaleData(String),

    // Decision provider errors
    #[error("Decision provider error: {0}")]
    Provider(String),

    #[error("Decision provider timed out after {elapsed_ms}ms")]
    ProviderTimeout { elapsed_ms: u64 },

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order timeout: {0}")]
    OrderTimeout(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    // Balance reconciliation errors
    #[error("Anomalous balance swing: {0}")]
    AnomalyDetected(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ArenaError
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Specific error types for position ledger operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient balance: available ${available}, requested ${requested}")]
    InsufficientBalance {
        available: rust_decimal::Decimal,
        requested: rust_decimal::Decimal,
    },

    #[error("Notional ${notional} below minimum ${minimum}")]
    SubMinimumNotional {
        notional: rust_decimal::Decimal,
        minimum: rust_decimal::Decimal,
    },

    #[error("Max open positions reached: {cap}")]
    MaxPositionsReached { cap: usize },

    #[error("Position not found: {position_id}")]
    NotFound { position_id: String },
}

impl From<LedgerError> for ArenaError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { position_id } => {
                ArenaError::Validation(format!("position not found: {position_id}"))
            }
            other => ArenaError::OrderRejected(other.to_string()),
        }
    }
}
