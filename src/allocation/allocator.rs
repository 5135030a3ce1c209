//! Ratio-matching allocator.
//!
//! Assigns whole-unit quantities to candidates so the resulting portfolio
//! weights approach the target ratios while the total cost (order values
//! plus one fee per funded candidate) stays within the investable cash.
//!
//! Phases:
//! 1. Initial guess: the units needed to close each candidate's gap to target.
//! 2. Trim: while over budget, remove a unit from the most overweight funded
//!    candidate.
//! 3. Greedy: add units to the most underweight candidate until one no longer
//!    fits.
//! 4. Round robin: sweep the candidates from most to least underweight and
//!    keep every unit that still fits; repeat until a sweep adds nothing.
//!
//! Ties go to the candidate listed first when adding units and to the one
//! listed last when trimming.

use super::candidate::{total_cost, Candidate};
use crate::utils::sum_by;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::trace;

/// Run the allocation on a copy of `candidates`.
///
/// The returned list has the same length and order as the input; candidates
/// that receive nothing keep quantity 0.
pub fn allocate(candidates: &[Candidate], investable_cash: Decimal) -> Vec<Candidate> {
    let mut candidates = candidates.to_vec();
    if candidates.is_empty() {
        return candidates;
    }

    let total_value = sum_by(&candidates, |c| c.owned_value) + investable_cash;

    for c in candidates.iter_mut() {
        c.quantity = initial_quantity(c, total_value);
        c.update_ratio(total_value);
    }

    let mut spent = total_cost(&candidates);
    trim_to_budget(&mut candidates, &mut spent, investable_cash, total_value);
    greedy_top_up(&mut candidates, &mut spent, investable_cash, total_value);
    round_robin(&mut candidates, &mut spent, investable_cash, total_value);

    trace!(%spent, %investable_cash, "Allocation complete");
    candidates
}

/// Units needed to lift the candidate to its target, rounded down.
fn initial_quantity(candidate: &Candidate, total_value: Decimal) -> u64 {
    if candidate.price <= Decimal::ZERO {
        return 0;
    }
    let gap = candidate.target_ratio * total_value - candidate.owned_value;
    if gap <= Decimal::ZERO {
        return 0;
    }
    (gap / candidate.price).floor().to_u64().unwrap_or(0)
}

/// Add one unit and return the extra cash it needs.
fn add_unit(candidate: &mut Candidate, total_value: Decimal) -> Decimal {
    let extra = if candidate.quantity == 0 {
        candidate.price + candidate.fee
    } else {
        candidate.price
    };
    candidate.quantity += 1;
    candidate.update_ratio(total_value);
    extra
}

/// Remove one unit and return the cash it frees.
fn remove_unit(candidate: &mut Candidate, total_value: Decimal) -> Decimal {
    debug_assert!(candidate.quantity > 0);
    candidate.quantity -= 1;
    candidate.update_ratio(total_value);
    if candidate.quantity == 0 {
        candidate.price + candidate.fee
    } else {
        candidate.price
    }
}

/// Index of the buyable candidate with the largest ratio error, skipping
/// those marked in `skip`.
fn most_underweight(candidates: &[Candidate], skip: &[bool]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        if skip[i] || c.price <= Decimal::ZERO {
            continue;
        }
        match best {
            Some(b) if candidates[b].ratio_error >= c.ratio_error => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Index of the funded candidate with the smallest ratio error.
///
/// Ties go to the candidate listed last, so earlier ones keep their units.
fn most_overweight_funded(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        if c.quantity == 0 {
            continue;
        }
        match best {
            Some(b) if candidates[b].ratio_error < c.ratio_error => {}
            _ => best = Some(i),
        }
    }
    best
}

fn trim_to_budget(
    candidates: &mut [Candidate],
    spent: &mut Decimal,
    cash: Decimal,
    total_value: Decimal,
) {
    while *spent > cash {
        let Some(i) = most_overweight_funded(candidates) else {
            break;
        };
        *spent -= remove_unit(&mut candidates[i], total_value);
    }
}

fn greedy_top_up(
    candidates: &mut [Candidate],
    spent: &mut Decimal,
    cash: Decimal,
    total_value: Decimal,
) {
    let none = vec![false; candidates.len()];
    while let Some(i) = most_underweight(candidates, &none) {
        let extra = add_unit(&mut candidates[i], total_value);
        if *spent + extra > cash {
            remove_unit(&mut candidates[i], total_value);
            break;
        }
        *spent += extra;
    }
}

fn round_robin(
    candidates: &mut [Candidate],
    spent: &mut Decimal,
    cash: Decimal,
    total_value: Decimal,
) {
    loop {
        let mut tried = vec![false; candidates.len()];
        let mut accepted = false;

        while let Some(i) = most_underweight(candidates, &tried) {
            tried[i] = true;
            let extra = add_unit(&mut candidates[i], total_value);
            if *spent + extra > cash {
                remove_unit(&mut candidates[i], total_value);
            } else {
                *spent += extra;
                accepted = true;
            }
        }

        if !accepted {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn candidate(symbol: &str, owned: Decimal, ratio: Decimal, price: Decimal, fee: Decimal) -> Candidate {
        Candidate::new(symbol, format!("ISIN{symbol}"), symbol, owned, ratio, price, fee)
    }

    fn quantities(candidates: &[Candidate]) -> Vec<u64> {
        candidates.iter().map(|c| c.quantity).collect()
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[test]
    fn test_even_split_leaves_less_than_one_unit() {
        let candidates = vec![
            candidate("A", dec!(0), dec!(0.5), dec!(10), dec!(0)),
            candidate("B", dec!(0), dec!(0.5), dec!(10), dec!(0)),
        ];

        let result = allocate(&candidates, dec!(95));

        assert_eq!(quantities(&result), vec![5, 4]);
        let spent = total_cost(&result);
        assert_eq!(spent, dec!(90));
        assert!(dec!(95) - spent <= dec!(5));
    }

    #[test]
    fn test_overweight_instrument_gets_nothing() {
        let candidates = vec![
            candidate("A", dec!(900), dec!(0.5), dec!(10), dec!(1)),
            candidate("B", dec!(0), dec!(0.5), dec!(10), dec!(1)),
        ];

        let result = allocate(&candidates, dec!(200));

        assert_eq!(result[0].quantity, 0);
        // All cash goes to B: 19 x 10 + 1 fee
        assert_eq!(result[1].quantity, 19);
        assert!(total_cost(&result) <= dec!(200));
    }

    #[test]
    fn test_zero_cash_buys_nothing() {
        let candidates = vec![
            candidate("A", dec!(0), dec!(0.7), dec!(10), dec!(1)),
            candidate("B", dec!(100), dec!(0.3), dec!(25), dec!(0)),
        ];

        let result = allocate(&candidates, Decimal::ZERO);

        assert!(result.iter().all(|c| c.quantity == 0));
    }

    #[test]
    fn test_fees_force_trim() {
        // Initial guesses 5 + 5 units cost 100 + 2 x 3 in fees
        let candidates = vec![
            candidate("A", dec!(0), dec!(0.5), dec!(10), dec!(3)),
            candidate("B", dec!(0), dec!(0.5), dec!(10), dec!(3)),
        ];

        let result = allocate(&candidates, dec!(100));

        assert!(total_cost(&result) <= dec!(100));
        assert_eq!(quantities(&result), vec![5, 4]);
    }

    #[test]
    fn test_ties_follow_configuration_order() {
        let candidates = vec![
            candidate("A", dec!(0), dec!(0.25), dec!(10), dec!(0)),
            candidate("B", dec!(0), dec!(0.25), dec!(10), dec!(0)),
            candidate("C", dec!(0), dec!(0.25), dec!(10), dec!(0)),
            candidate("D", dec!(0), dec!(0.25), dec!(10), dec!(0)),
        ];

        let result = allocate(&candidates, dec!(60));

        assert_eq!(quantities(&result), vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_round_robin_continues_after_greedy_stops() {
        // B never fits, so greedy stops at once and the sweeps fill up A
        let candidates = vec![
            candidate("A", dec!(0), dec!(0.5), dec!(7), dec!(0)),
            candidate("B", dec!(0), dec!(0.5), dec!(60), dec!(0)),
        ];

        let result = allocate(&candidates, dec!(100));

        assert_eq!(quantities(&result), vec![14, 0]);
        assert_eq!(total_cost(&result), dec!(98));
    }

    #[test]
    fn test_target_ratio_unchanged() {
        let candidates = vec![
            candidate("A", dec!(0), dec!(0.6), dec!(10), dec!(0)),
            candidate("B", dec!(0), dec!(0.4), dec!(10), dec!(0)),
        ];

        let result = allocate(&candidates, dec!(100));

        assert_eq!(result[0].target_ratio, dec!(0.6));
        assert_eq!(result[1].target_ratio, dec!(0.4));
        assert_eq!(result[0].achieved_ratio, dec!(0.6));
        assert_eq!(result[1].ratio_error, Decimal::ZERO);
    }

    #[test]
    fn test_empty_input() {
        assert!(allocate(&[], dec!(1000)).is_empty());
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    fn arb_candidates() -> impl Strategy<Value = Vec<Candidate>> {
        prop::collection::vec((0u32..5_000, 1u32..100, 100u32..50_000, 0u32..10), 1..6).prop_map(
            |rows| {
                let total: u32 = rows.iter().map(|r| r.1).sum();
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (owned, ratio, price_cents, fee))| {
                        candidate(
                            &format!("C{i}"),
                            Decimal::from(owned),
                            Decimal::from(ratio) / Decimal::from(total),
                            Decimal::new(price_cents as i64, 2),
                            Decimal::from(fee),
                        )
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_budget(candidates in arb_candidates(), cash in 0u32..5_000) {
            let cash = Decimal::from(cash);
            let result = allocate(&candidates, cash);
            prop_assert!(total_cost(&result) <= cash);
            prop_assert_eq!(result.len(), candidates.len());
        }

        #[test]
        fn prop_deterministic(candidates in arb_candidates(), cash in 0u32..5_000) {
            let cash = Decimal::from(cash);
            prop_assert_eq!(allocate(&candidates, cash), allocate(&candidates, cash));
        }

        #[test]
        fn prop_no_further_unit_fits(candidates in arb_candidates(), cash in 0u32..5_000) {
            let cash = Decimal::from(cash);
            let result = allocate(&candidates, cash);
            let spent = total_cost(&result);
            for c in &result {
                let extra = if c.quantity == 0 { c.price + c.fee } else { c.price };
                prop_assert!(spent + extra > cash);
            }
        }
    }
}
