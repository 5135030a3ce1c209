//! Allocation candidates.

use crate::utils::{percentage_of, safe_div, sum_by};
use rust_decimal::Decimal;

/// One instrument considered for purchase in a run.
///
/// `target_ratio` is fixed for the run. `quantity`, `achieved_ratio` and
/// `ratio_error` change while the allocator works.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub isin: String,
    pub product_id: String,
    /// Market value already held
    pub owned_value: Decimal,
    /// Normalized target share of the portfolio
    pub target_ratio: Decimal,
    /// Unit price including the buffer
    pub price: Decimal,
    /// Fixed fee for one order
    pub fee: Decimal,
    /// Units to buy
    pub quantity: u64,
    /// Share of the portfolio after buying `quantity`
    pub achieved_ratio: Decimal,
    /// `target_ratio - achieved_ratio`; positive when underweight
    pub ratio_error: Decimal,
}

impl Candidate {
    pub fn new(
        symbol: impl Into<String>,
        isin: impl Into<String>,
        product_id: impl Into<String>,
        owned_value: Decimal,
        target_ratio: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            isin: isin.into(),
            product_id: product_id.into(),
            owned_value,
            target_ratio,
            price,
            fee,
            quantity: 0,
            achieved_ratio: Decimal::ZERO,
            ratio_error: target_ratio,
        }
    }

    /// Value of the units to buy, without fee.
    pub fn order_value(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// Cash needed for this candidate; nothing when no units are bought.
    pub fn cost(&self) -> Decimal {
        if self.quantity == 0 {
            Decimal::ZERO
        } else {
            self.order_value() + self.fee
        }
    }

    /// Fee as a percentage of the order value, `None` when nothing is bought.
    pub fn fee_percentage(&self) -> Option<Decimal> {
        (self.quantity > 0).then(|| percentage_of(self.fee, self.order_value()))
    }

    pub fn update_ratio(&mut self, total_value: Decimal) {
        self.achieved_ratio = safe_div(self.owned_value + self.order_value(), total_value);
        self.ratio_error = self.target_ratio - self.achieved_ratio;
    }
}

/// Cash needed for all candidates with a positive quantity.
pub fn total_cost(candidates: &[Candidate]) -> Decimal {
    sum_by(candidates, Candidate::cost)
}
