//! Fixed-width integer helpers.
//!
//! All amounts are `u128` smallest units. Products are formed in 256 bits
//! and divided before narrowing back, so `a * b / c` only truncates once.

use uint::construct_uint;

use crate::{error::ExchangeError, Amount};

construct_uint! {
    /// 256-bit unsigned integer for intermediate products.
    pub struct U256(4);
}

/// Widen an amount into the intermediate representation.
pub fn wide(value: Amount) -> U256 {
    U256::from(value)
}

/// Narrow an intermediate value back to an amount.
pub fn narrow(value: U256, context: &'static str) -> Result<Amount, ExchangeError> {
    if value > U256::from(u128::MAX) {
        return Err(ExchangeError::Overflow(context));
    }
    Ok(value.low_u128())
}

/// `a * b / denominator`, truncating toward zero.
pub fn mul_div(
    a: Amount,
    b: Amount,
    denominator: Amount,
    context: &'static str,
) -> Result<Amount, ExchangeError> {
    // Callers guard empty reserves / supply before dividing.
    if denominator == 0 {
        return Err(ExchangeError::Overflow(context));
    }
    narrow(wide(a) * wide(b) / wide(denominator), context)
}

/// Floor of the square root of `a * b`. Always fits an amount.
pub fn sqrt_product(a: Amount, b: Amount) -> Amount {
    (wide(a) * wide(b)).integer_sqrt().low_u128()
}

pub fn checked_add(a: Amount, b: Amount, context: &'static str) -> Result<Amount, ExchangeError> {
    a.checked_add(b).ok_or(ExchangeError::Overflow(context))
}
