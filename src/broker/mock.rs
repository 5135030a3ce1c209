//! In-memory broker for paper runs and tests.

use super::traits::{BrokerProvider, OrderExecutor};
use super::types::*;
use crate::error::{AutobuyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// An order received by the mock broker.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: OrderRequest,
    pub dry_run: bool,
    pub placed_at: DateTime<Utc>,
}

/// A product known to the mock broker, with its quote and fee.
#[derive(Debug, Clone)]
struct MockListing {
    product: Product,
    exchange: u32,
    price: Option<Decimal>,
    info: Option<OrderInfo>,
}

#[derive(Debug, Default)]
struct MockBrokerState {
    logged_in: bool,
    cash: HashMap<String, Decimal>,
    positions: Vec<OwnedPosition>,
    open_orders: bool,
    placed_orders: Vec<PlacedOrder>,
    listings: Vec<MockListing>,
    rejecting: HashSet<String>,
}

/// Broker double holding its whole account in memory.
///
/// Live (non dry-run) orders are paid from the cash balance of the product's
/// currency at the limit price (or the quoted price for market orders) plus
/// the fee.
#[derive(Debug, Default)]
pub struct MockBroker {
    state: RwLock<MockBrokerState>,
    order_counter: AtomicU64,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cash(mut self, currency: &str, amount: Decimal) -> Self {
        self.state.get_mut().cash.insert(currency.to_string(), amount);
        self
    }

    /// List a product; `None` price or info makes the respective lookup fail.
    pub fn with_product(
        mut self,
        product: Product,
        exchange: u32,
        price: Option<Decimal>,
        info: Option<OrderInfo>,
    ) -> Self {
        self.state.get_mut().listings.push(MockListing {
            product,
            exchange,
            price,
            info,
        });
        self
    }

    pub fn with_position(mut self, position: OwnedPosition) -> Self {
        self.state.get_mut().positions.push(position);
        self
    }

    pub fn with_open_orders(mut self, open: bool) -> Self {
        self.state.get_mut().open_orders = open;
        self
    }

    /// Reject every order for this product id.
    pub fn rejecting_orders_for(mut self, product_id: &str) -> Self {
        self.state.get_mut().rejecting.insert(product_id.to_string());
        self
    }

    pub async fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.state.read().await.placed_orders.clone()
    }

    pub async fn cash(&self, currency: &str) -> Decimal {
        self.state
            .read()
            .await
            .cash
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    async fn ensure_logged_in(&self) -> Result<()> {
        if self.state.read().await.logged_in {
            Ok(())
        } else {
            Err(AutobuyError::Broker("not logged in".to_string()))
        }
    }
}

#[async_trait]
impl BrokerProvider for MockBroker {
    async fn login(&self) -> Result<()> {
        self.state.write().await.logged_in = true;
        debug!("Mock broker session opened");
        Ok(())
    }

    async fn cash_funds(&self, currency: &str) -> Result<Decimal> {
        self.ensure_logged_in().await?;
        self.state
            .read()
            .await
            .cash
            .get(currency)
            .copied()
            .ok_or_else(|| AutobuyError::Broker(format!("no cash funds in {currency}")))
    }

    async fn owned_positions(&self) -> Result<Vec<OwnedPosition>> {
        self.ensure_logged_in().await?;
        Ok(self.state.read().await.positions.clone())
    }

    async fn has_open_orders(&self) -> Result<bool> {
        self.ensure_logged_in().await?;
        Ok(self.state.read().await.open_orders)
    }

    async fn search_product(&self, isin: &str, exchange: u32) -> Result<Option<Product>> {
        self.ensure_logged_in().await?;
        Ok(self
            .state
            .read()
            .await
            .listings
            .iter()
            .find(|l| l.product.isin.eq_ignore_ascii_case(isin) && l.exchange == exchange)
            .map(|l| l.product.clone()))
    }

    async fn unit_price(&self, product: &Product) -> Result<Option<Decimal>> {
        self.ensure_logged_in().await?;
        let state = self.state.read().await;
        Ok(state
            .listings
            .iter()
            .find(|l| l.product.id == product.id)
            .and_then(|l| l.price))
    }

    async fn order_info(&self, product: &Product) -> Result<OrderInfo> {
        self.ensure_logged_in().await?;
        let state = self.state.read().await;
        state
            .listings
            .iter()
            .find(|l| l.product.id == product.id)
            .and_then(|l| l.info)
            .ok_or_else(|| AutobuyError::Broker(format!("no order info for {}", product.symbol)))
    }
}

#[async_trait]
impl OrderExecutor for MockBroker {
    async fn place_order(&self, order: &OrderRequest, dry_run: bool) -> Result<String> {
        self.ensure_logged_in().await?;
        let mut state = self.state.write().await;

        if state.rejecting.contains(&order.product_id) {
            return Err(AutobuyError::Broker(format!(
                "order for product {} rejected",
                order.product_id
            )));
        }

        let listing = state
            .listings
            .iter()
            .find(|l| l.product.id == order.product_id)
            .cloned()
            .ok_or_else(|| AutobuyError::Broker(format!("unknown product {}", order.product_id)))?;

        if dry_run {
            state.placed_orders.push(PlacedOrder {
                order: order.clone(),
                dry_run,
                placed_at: Utc::now(),
            });
            return Ok("Dry run. Not placing an actual order.".to_string());
        }

        let unit = order
            .limit_price
            .or(listing.price)
            .ok_or_else(|| AutobuyError::Broker(format!("no price for {}", order.symbol)))?;
        let fee = listing.info.map(|i| i.transaction_fee).unwrap_or(Decimal::ZERO);
        let cost = unit * Decimal::from(order.quantity) + fee;

        let balance = state
            .cash
            .entry(listing.product.currency.clone())
            .or_insert(Decimal::ZERO);
        if *balance < cost {
            return Err(AutobuyError::Broker(format!(
                "insufficient funds: need {cost}, have {balance}"
            )));
        }
        *balance -= cost;
        state.placed_orders.push(PlacedOrder {
            order: order.clone(),
            dry_run,
            placed_at: Utc::now(),
        });

        let id = self.order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        info!(order = %order, %cost, "Mock order filled");
        Ok(format!("mock-{id}"))
    }
}
