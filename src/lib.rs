//! # ETF Auto-Buyer
//!
//! Periodically invests the cash of a DEGIRO account into a set of ETFs,
//! buying whole units so the portfolio moves toward configured target ratios.
//!
//! ## Architecture
//!
//! - `allocation`: Candidate assembly, ratio-matching allocator and fee filter
//! - `broker`: Broker traits, DEGIRO client and in-memory mock
//! - `buyer`: One complete buy run from cash check to order placement
//! - `config`: Configuration loading and validation
//! - `error`: Domain error type
//! - `scheduler`: Cron trigger with overlap protection
//! - `utils`: Shared decimal helpers

pub mod allocation;
pub mod broker;
pub mod buyer;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod utils;

pub use config::Config;
pub use error::{AutobuyError, Result};
