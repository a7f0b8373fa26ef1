//! Error types for the rebalancing simulator.

use crate::engine::REFERENCE_SCOPE;
use thiserror::Error;

/// Main error type for the simulator.
#[derive(Error, Debug)]
pub enum SimError {
    /// Global settings are unusable; aborts the whole batch.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A single portfolio definition is unusable; aborts that portfolio only.
    #[error("Invalid configuration for portfolio '{portfolio}': {reason}")]
    PortfolioConfig { portfolio: String, reason: String },

    /// An instrument has no usable price history in the requested window.
    #[error("No price data for '{instrument}' (portfolio '{portfolio}'): {reason}")]
    DataAvailability {
        portfolio: String,
        instrument: String,
        reason: String,
    },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SimError {
    pub(crate) fn portfolio_config(portfolio: &str, reason: impl Into<String>) -> Self {
        SimError::PortfolioConfig {
            portfolio: portfolio.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(
        portfolio: &str,
        instrument: &str,
        reason: impl Into<String>,
    ) -> Self {
        SimError::DataAvailability {
            portfolio: portfolio.to_string(),
            instrument: instrument.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error only concerns one portfolio of a batch.
    pub fn is_portfolio_scoped(&self) -> bool {
        match self {
            SimError::PortfolioConfig { .. } => true,
            SimError::DataAvailability { portfolio, .. } => portfolio != REFERENCE_SCOPE,
            _ => false,
        }
    }
}

/// Result type alias for simulator operations.
pub type Result<T> = std::result::Result<T, SimError>;
