//! Error types for a buy run.

use rust_decimal::Decimal;

/// Everything that can end or degrade a buy run.
///
/// `DataUnavailable` and `OrderPlacement` are recovered locally (the candidate
/// or order is skipped); the remaining variants abort the run and are surfaced
/// to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum AutobuyError {
    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("cash in account ({cash} {currency}) is less than minimum cash invest ({minimum} {currency})")]
    InsufficientCash {
        cash: Decimal,
        minimum: Decimal,
        currency: String,
    },

    #[error("allocation infeasible: {0}")]
    AllocationInfeasible(String),

    #[error("order for {quantity} x {symbol} rejected: {reason}")]
    OrderPlacement {
        symbol: String,
        quantity: u64,
        reason: String,
    },

    #[error("there are open orders and open orders are not allowed")]
    OpenOrders,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("config error: {0}")]
    Config(String),
}

impl AutobuyError {
    /// True for outcomes that end a run without anything being wrong.
    ///
    /// The scheduler logs these at info level and waits for the next trigger.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            AutobuyError::InsufficientCash { .. }
                | AutobuyError::AllocationInfeasible(_)
                | AutobuyError::OpenOrders
        )
    }
}

impl From<reqwest::Error> for AutobuyError {
    fn from(e: reqwest::Error) -> Self {
        AutobuyError::Broker(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AutobuyError>;
