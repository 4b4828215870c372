use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::ServiceError;

/// Largest amount a `Decimal(16, 4)` money column holds.
pub const MAX_AMOUNT: Decimal = dec!(999_999_999_999.9999);

pub fn fits_amount(amount: Decimal) -> bool {
    amount.abs() <= MAX_AMOUNT
}

/// `unit_cost * quantity`, rejected when the result cannot be stored.
pub fn extended_value(unit_cost: Decimal, quantity: i32) -> Result<Decimal, ServiceError> {
    unit_cost
        .checked_mul(Decimal::from(quantity))
        .filter(|value| fits_amount(*value))
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Value of {} units at {} exceeds the largest storable amount {}",
                quantity, unit_cost, MAX_AMOUNT
            ))
        })
}

/// Running total that stays storable.
pub fn add_value(total: Decimal, value: Decimal) -> Result<Decimal, ServiceError> {
    total
        .checked_add(value)
        .filter(|sum| fits_amount(*sum))
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Total {} + {} exceeds the largest storable amount {}",
                total, value, MAX_AMOUNT
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn extends_ordinary_values() {
        assert_eq!(extended_value(dec!(7.25), 4).unwrap(), dec!(29));
        assert_eq!(extended_value(dec!(10), -8).unwrap(), dec!(-80));
    }

    #[test]
    fn max_amount_is_the_column_limit() {
        assert_eq!(MAX_AMOUNT.to_string(), "999999999999.9999");
        assert!(fits_amount(MAX_AMOUNT));
        assert!(!fits_amount(MAX_AMOUNT + dec!(0.0001)));
    }

    #[test]
    fn overflow_is_a_validation_error() {
        assert_matches!(
            extended_value(Decimal::MAX, 2),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            extended_value(MAX_AMOUNT, 2),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            add_value(Decimal::MAX, Decimal::MAX),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            add_value(MAX_AMOUNT, dec!(1)),
            Err(ServiceError::ValidationError(_))
        );
    }
}
