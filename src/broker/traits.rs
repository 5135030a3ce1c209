//! Broker-agnostic traits for portfolio data and order placement.
//!
//! The buy run only talks to these traits, so the DEGIRO client and the
//! in-memory mock are interchangeable.

use super::types::{OrderInfo, OrderRequest, OwnedPosition, Product};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Read side of a broker: account state, product search and quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Establish (or reuse) an authenticated session.
    async fn login(&self) -> Result<()>;

    /// Available cash in the given currency.
    async fn cash_funds(&self, currency: &str) -> Result<Decimal>;

    /// Positions currently held, with their market value.
    async fn owned_positions(&self) -> Result<Vec<OwnedPosition>>;

    /// Whether any order is still waiting to be filled.
    async fn has_open_orders(&self) -> Result<bool>;

    /// Find the product with this ISIN listed on the given exchange.
    async fn search_product(&self, isin: &str, exchange: u32) -> Result<Option<Product>>;

    /// Latest unit price, `None` when no quote is available.
    async fn unit_price(&self, product: &Product) -> Result<Option<Decimal>>;

    /// Per-order fee and core-selection membership for a product.
    async fn order_info(&self, product: &Product) -> Result<OrderInfo>;
}

/// Write side of a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Place a buy order and return the broker's confirmation.
    ///
    /// With `dry_run` the order is validated by the broker but not executed.
    async fn place_order(&self, order: &OrderRequest, dry_run: bool) -> Result<String>;
}
