//! Decimal arithmetic utilities for money and ratio calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round a decimal to a specific number of decimal places.
pub fn round_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Round up to the next multiple of the tick size (e.g., 0.01 for cents).
pub fn round_up_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Express `part` as a percentage of `whole`; zero when `whole` is zero.
pub fn percentage_of(part: Decimal, whole: Decimal) -> Decimal {
    safe_div(part, whole) * dec!(100)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Sum a decimal property over a slice.
pub fn sum_by<T>(items: &[T], property: impl Fn(&T) -> Decimal) -> Decimal {
    items.iter().map(property).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to_tick() {
        assert_eq!(round_up_to_tick(dec!(50.123), dec!(0.01)), dec!(50.13));
        assert_eq!(round_up_to_tick(dec!(50.12), dec!(0.01)), dec!(50.12));
        assert_eq!(round_up_to_tick(dec!(50.12), Decimal::ZERO), dec!(50.12));
    }

    #[test]
    fn test_percentage_of() {
        assert_eq!(percentage_of(dec!(2), dec!(200)), dec!(1));
        assert_eq!(percentage_of(dec!(2), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(1), dec!(4)), dec!(0.25));
        assert_eq!(safe_div(dec!(1), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_sum_by() {
        let values = vec![(1, dec!(1.5)), (2, dec!(2.25))];
        assert_eq!(sum_by(&values, |v| v.1), dec!(3.75));
    }

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to_precision(dec!(0.123456), 4), dec!(0.1235));
    }
}
