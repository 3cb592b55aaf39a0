// Error taxonomy for trading and resolution.

use std::fmt;

/// Everything that can go wrong between intent submission and settlement.
///
/// Validation failures (bad side, non-positive amount) are rejected before an
/// intent ever enters the queue. Errors discovered inside the pipeline are
/// recorded as failed results under the intent's request id, never thrown
/// back at the submitter.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeError {
    MarketNotFound(String),
    PositionNotFound(String),
    MarketNotOpen(String),
    InsufficientBalance(String),
    InvalidAmount(String),
    InvalidTrade(String),
    AlreadyResolved(String),
    InvalidOutcome(String),
}

impl fmt::Display for TradeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeError::MarketNotFound(msg) => write!(f, "Market not found: {}", msg),
            TradeError::PositionNotFound(msg) => write!(f, "Position not found: {}", msg),
            TradeError::MarketNotOpen(msg) => write!(f, "Market is not open: {}", msg),
            TradeError::InsufficientBalance(msg) => write!(f, "Insufficient balance: {}", msg),
            TradeError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            TradeError::InvalidTrade(msg) => write!(f, "Invalid trade: {}", msg),
            TradeError::AlreadyResolved(msg) => write!(f, "Market already resolved: {}", msg),
            TradeError::InvalidOutcome(msg) => write!(f, "Invalid outcome: {}", msg),
        }
    }
}

impl std::error::Error for TradeError {}
