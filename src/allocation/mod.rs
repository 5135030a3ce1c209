//! Allocation engine: candidates, the ratio-matching allocator and the
//! fee-threshold filter.

mod allocator;
mod assembler;
mod candidate;
mod fee_filter;

pub use allocator::allocate;
pub use assembler::{assemble_candidates, Assembly};
pub use candidate::{total_cost, Candidate};
pub use fee_filter::{allocate_within_fee_limit, FilterOutcome};

use crate::utils::sum_by;
use rust_decimal::Decimal;

/// Final purchase plan of one run.
#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// Candidates with a positive quantity, in configuration order
    pub orders: Vec<Candidate>,
    /// Candidates dropped by the fee threshold
    pub fee_excluded: Vec<Candidate>,
    pub investable_cash: Decimal,
    /// Sum of quantity x price
    pub order_value: Decimal,
    /// Sum of fees over the orders
    pub fees: Decimal,
    /// `order_value + fees`
    pub cost: Decimal,
    /// Investable cash left unused
    pub leftover: Decimal,
    /// Allocator runs needed by the fee filter
    pub passes: usize,
}

impl AllocationResult {
    fn finalize(outcome: FilterOutcome, investable_cash: Decimal) -> Self {
        let orders: Vec<Candidate> = outcome
            .allocation
            .into_iter()
            .filter(|c| c.quantity > 0)
            .collect();

        let order_value = sum_by(&orders, Candidate::order_value);
        let fees = sum_by(&orders, |c| c.fee);
        let cost = order_value + fees;

        Self {
            orders,
            fee_excluded: outcome.excluded,
            investable_cash,
            order_value,
            fees,
            cost,
            leftover: investable_cash - cost,
            passes: outcome.passes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Allocate the investable cash over `candidates`, apply the fee threshold
/// and keep only the candidates that buy something.
pub fn plan(
    candidates: &[Candidate],
    investable_cash: Decimal,
    max_fee_percentage: Option<Decimal>,
) -> AllocationResult {
    let outcome = allocate_within_fee_limit(candidates, investable_cash, max_fee_percentage);
    AllocationResult::finalize(outcome, investable_cash)
}
