//! Fee-threshold filter around the allocator.

use super::allocator::allocate;
use super::candidate::Candidate;
use rust_decimal::Decimal;
use tracing::info;

/// Result of allocating with fee exclusion.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Allocation of the surviving candidates, same order as the input
    pub allocation: Vec<Candidate>,
    /// Candidates dropped for their fee, with the quantity that was rejected
    pub excluded: Vec<Candidate>,
    /// Number of allocator runs
    pub passes: usize,
}

/// Allocate, dropping the candidate with the highest fee percentage and
/// allocating again while it exceeds `max_fee_percentage`.
///
/// Each pass removes one candidate, so there are at most as many passes as
/// candidates.
pub fn allocate_within_fee_limit(
    candidates: &[Candidate],
    investable_cash: Decimal,
    max_fee_percentage: Option<Decimal>,
) -> FilterOutcome {
    let mut remaining = candidates.to_vec();
    let mut outcome = FilterOutcome::default();

    while !remaining.is_empty() {
        let allocation = allocate(&remaining, investable_cash);
        outcome.passes += 1;

        let Some(threshold) = max_fee_percentage else {
            outcome.allocation = allocation;
            break;
        };

        match worst_fee(&allocation) {
            Some((index, fee_pct)) if fee_pct > threshold => {
                let dropped = &allocation[index];
                info!(
                    symbol = %dropped.symbol,
                    quantity = dropped.quantity,
                    fee_pct = %fee_pct.round_dp(2),
                    max_fee_pct = %threshold,
                    "Fee too high relative to order value, dropping"
                );
                outcome.excluded.push(dropped.clone());
                remaining = remaining
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, c)| c)
                    .collect();
            }
            _ => {
                outcome.allocation = allocation;
                break;
            }
        }
    }

    outcome
}

/// Funded candidate with the highest fee percentage; first one on ties.
fn worst_fee(allocation: &[Candidate]) -> Option<(usize, Decimal)> {
    allocation
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.fee_percentage().map(|pct| (i, pct)))
        .fold(None, |worst, (i, pct)| match worst {
            Some((_, w)) if w >= pct => worst,
            _ => Some((i, pct)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::candidate::total_cost;
    use rust_decimal_macros::dec;

    fn candidate(symbol: &str, ratio: Decimal, price: Decimal, fee: Decimal) -> Candidate {
        Candidate::new(symbol, format!("ISIN{symbol}"), symbol, Decimal::ZERO, ratio, price, fee)
    }

    #[test]
    fn test_no_threshold_single_pass() {
        let candidates = vec![
            candidate("A", dec!(0.5), dec!(10), dec!(5)),
            candidate("B", dec!(0.5), dec!(10), dec!(5)),
        ];

        let outcome = allocate_within_fee_limit(&candidates, dec!(100), None);

        assert_eq!(outcome.passes, 1);
        assert!(outcome.excluded.is_empty());
        assert_eq!(outcome.allocation.len(), 2);
    }

    #[test]
    fn test_expensive_candidate_dropped_and_cash_reallocated() {
        // First pass funds B with 1 unit of 50 and a 10 fee (20%); A is fee free
        let candidates = vec![
            candidate("A", dec!(0.5), dec!(10), dec!(0)),
            candidate("B", dec!(0.5), dec!(50), dec!(10)),
        ];

        let outcome = allocate_within_fee_limit(&candidates, dec!(200), Some(dec!(1)));

        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.excluded.len(), 1);
        assert_eq!(outcome.excluded[0].symbol, "B");
        assert_eq!(outcome.allocation.len(), 1);
        assert_eq!(outcome.allocation[0].symbol, "A");
        assert_eq!(outcome.allocation[0].quantity, 20);
    }

    #[test]
    fn test_all_above_threshold_terminates_empty() {
        let candidates = vec![
            candidate("A", dec!(0.4), dec!(10), dec!(5)),
            candidate("B", dec!(0.3), dec!(10), dec!(5)),
            candidate("C", dec!(0.3), dec!(10), dec!(5)),
        ];

        let outcome = allocate_within_fee_limit(&candidates, dec!(60), Some(dec!(0.5)));

        assert!(outcome.allocation.is_empty());
        assert_eq!(outcome.excluded.len(), 3);
        assert!(outcome.passes <= candidates.len());
    }

    #[test]
    fn test_survivors_respect_threshold_and_budget() {
        let candidates = vec![
            candidate("A", dec!(0.6), dec!(20), dec!(1)),
            candidate("B", dec!(0.3), dec!(15), dec!(1)),
            candidate("C", dec!(0.1), dec!(90), dec!(4)),
        ];
        let threshold = dec!(3);

        let outcome = allocate_within_fee_limit(&candidates, dec!(250), Some(threshold));

        assert!(total_cost(&outcome.allocation) <= dec!(250));
        for c in outcome.allocation.iter().filter(|c| c.quantity > 0) {
            assert!(c.fee_percentage().unwrap() <= threshold);
        }
    }

    #[test]
    fn test_empty_input_makes_no_pass() {
        let outcome = allocate_within_fee_limit(&[], dec!(100), Some(dec!(1)));
        assert_eq!(outcome.passes, 0);
        assert!(outcome.allocation.is_empty());
    }
}
