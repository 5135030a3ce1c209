//! One complete buy run: account checks, allocation and order placement.

use crate::allocation::{self, assemble_candidates, AllocationResult};
use crate::broker::{BrokerProvider, OrderExecutor, OrderRequest};
use crate::config::Config;
use crate::error::{AutobuyError, Result};
use crate::utils::round_to_precision;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// What a run is allowed to do with the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Place real orders
    Live,
    /// Let the broker check every order without executing it
    DryRun,
    /// Compute the plan only
    PlanOnly,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }
}

/// An order accepted by the executor.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: OrderRequest,
    pub confirmation: String,
}

/// Summary of one run.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub mode: RunMode,
    pub cash: Decimal,
    pub investable_cash: Decimal,
    pub plan: AllocationResult,
    /// Targets left out because their data was unavailable
    pub skipped: Vec<AutobuyError>,
    pub placed: Vec<PlacedOrder>,
    pub failed: Vec<AutobuyError>,
}

/// Runs the buy cycle against a broker.
pub struct AutoBuyer<B> {
    broker: Arc<B>,
    config: Config,
}

impl<B> AutoBuyer<B>
where
    B: BrokerProvider + OrderExecutor,
{
    pub fn new(broker: Arc<B>, config: Config) -> Self {
        Self { broker, config }
    }

    /// Execute one run.
    ///
    /// Ends early with a benign error when cash is below the minimum, open
    /// orders block buying, or nothing can be bought. Rejected orders do not
    /// stop the batch; they are collected in the report.
    pub async fn run(&self, mode: RunMode) -> Result<RunReport> {
        let started_at = Utc::now();
        let investment = &self.config.investment;
        let execution = &self.config.execution;

        let targets = self.config.normalized_portfolio();
        for t in &targets {
            info!(
                symbol = %t.symbol,
                isin = %t.isin,
                exchange = t.exchange,
                ratio = %round_to_precision(t.ratio, 4),
                "Desired position"
            );
        }

        self.broker.login().await?;

        let cash = self.broker.cash_funds(&investment.cash_currency).await?;
        if cash < investment.min_cash_invest {
            return Err(AutobuyError::InsufficientCash {
                cash,
                minimum: investment.min_cash_invest,
                currency: investment.cash_currency.clone(),
            });
        }
        let investable_cash = cash.min(investment.max_cash_invest);
        info!(
            %cash,
            %investable_cash,
            currency = %investment.cash_currency,
            "Cash available"
        );

        if !execution.allow_open_orders && self.broker.has_open_orders().await? {
            return Err(AutobuyError::OpenOrders);
        }

        let owned = self.broker.owned_positions().await?;
        let assembly = assemble_candidates(
            self.broker.as_ref(),
            &targets,
            &owned,
            execution.price_buffer,
        )
        .await;

        if assembly.candidates.is_empty() {
            return Err(AutobuyError::AllocationInfeasible(
                "no configured instrument could be priced".to_string(),
            ));
        }

        let plan = allocation::plan(
            &assembly.candidates,
            investable_cash,
            investment.max_fee_percentage,
        );
        log_plan(&plan);

        if plan.is_empty() {
            return Err(AutobuyError::AllocationInfeasible(format!(
                "nothing affordable with {investable_cash} {}",
                investment.cash_currency
            )));
        }

        let mut report = RunReport {
            started_at,
            mode,
            cash,
            investable_cash,
            plan,
            skipped: assembly.skipped,
            placed: Vec::new(),
            failed: Vec::new(),
        };

        if mode != RunMode::PlanOnly {
            self.place_orders(&mut report).await;
        }

        info!(
            mode = ?report.mode,
            orders = report.placed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            cost = %report.plan.cost,
            leftover = %report.plan.leftover,
            "Run complete"
        );
        Ok(report)
    }

    async fn place_orders(&self, report: &mut RunReport) {
        let execution = &self.config.execution;
        let dry_run = report.mode == RunMode::DryRun;
        let interval = Duration::from_millis(execution.order_interval_ms);

        for (i, candidate) in report.plan.orders.iter().enumerate() {
            if i > 0 && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }

            let order = OrderRequest {
                product_id: candidate.product_id.clone(),
                symbol: candidate.symbol.clone(),
                quantity: candidate.quantity,
                limit_price: execution.use_limit_order.then_some(candidate.price),
            };

            match self.broker.place_order(&order, dry_run).await {
                Ok(confirmation) => {
                    info!(order = %order, %confirmation, dry_run, "Order accepted");
                    report.placed.push(PlacedOrder {
                        order,
                        confirmation,
                    });
                }
                Err(e) => {
                    let failure = AutobuyError::OrderPlacement {
                        symbol: order.symbol.clone(),
                        quantity: order.quantity,
                        reason: e.to_string(),
                    };
                    error!(error = %failure, "Order failed");
                    report.failed.push(failure);
                }
            }
        }
    }
}

fn log_plan(plan: &AllocationResult) {
    for c in &plan.orders {
        info!(
            symbol = %c.symbol,
            quantity = c.quantity,
            price = %c.price,
            fee = %c.fee,
            achieved_ratio = %round_to_precision(c.achieved_ratio, 4),
            fee_pct = %c.fee_percentage().map(|p| round_to_precision(p, 2)).unwrap_or_default(),
            "Planned purchase"
        );
    }
    for c in &plan.fee_excluded {
        info!(symbol = %c.symbol, "Left out for its fee");
    }
    info!(
        order_value = %plan.order_value,
        fees = %plan.fees,
        leftover = %plan.leftover,
        passes = plan.passes,
        "Allocation plan"
    );
}
