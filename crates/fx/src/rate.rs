//! Validated exchange rates and base-currency conversion.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use majolica_core::{DomainError, DomainResult};

/// An exchange rate from an original currency into the base currency.
///
/// Always strictly positive. Base-currency operations implicitly use
/// [`ExchangeRate::UNIT`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRate(Decimal);

impl ExchangeRate {
    /// Rate `1`, the implicit rate of base-currency amounts.
    pub const UNIT: ExchangeRate = ExchangeRate(Decimal::ONE);

    pub fn new(rate: Decimal) -> DomainResult<Self> {
        if rate <= Decimal::ZERO {
            return Err(DomainError::invalid_argument(format!(
                "exchange rate must be positive, got {rate}"
            )));
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_unit(&self) -> bool {
        self.0 == Decimal::ONE
    }
}

impl core::fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Convert an original-currency amount into base currency at `rate`.
///
/// Exact decimal multiplication; the caller decides rounding policy (the
/// settlement engine stores base amounts unrounded).
pub fn to_base(amount: Decimal, rate: ExchangeRate) -> Decimal {
    amount * rate.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive_rates() {
        assert!(ExchangeRate::new(dec!(0)).is_err());
        assert!(ExchangeRate::new(dec!(-5.1)).is_err());
        assert!(ExchangeRate::new(dec!(0.0001)).is_ok());
    }

    #[test]
    fn converts_at_the_given_rate() {
        let rate = ExchangeRate::new(dec!(5.2)).unwrap();
        assert_eq!(to_base(dec!(100), rate), dec!(520.0));
    }

    #[test]
    fn unit_rate_is_identity() {
        assert_eq!(to_base(dec!(123.45), ExchangeRate::UNIT), dec!(123.45));
        assert!(ExchangeRate::UNIT.is_unit());
    }

    proptest! {
        /// Conversion is linear: converting a sum equals summing conversions.
        #[test]
        fn conversion_is_linear(
            a in -1_000_000_00i64..1_000_000_00i64,
            b in -1_000_000_00i64..1_000_000_00i64,
            r in 1i64..100_000i64,
        ) {
            let a = Decimal::new(a, 2);
            let b = Decimal::new(b, 2);
            let rate = ExchangeRate::new(Decimal::new(r, 4)).unwrap();
            prop_assert_eq!(to_base(a + b, rate), to_base(a, rate) + to_base(b, rate));
        }
    }
}
