//! # Fixed-Point Conversion Math
//!
//! Converts between asset denominations and the accounting unit using an
//! integer price with its own decimal count. Every function rounds toward
//! zero, so the bank never credits or pays out more than the price
//! justifies, and every multiplication is checked.
//!
//! With `a` = asset decimals, `p` = price decimals and `u` = accounting
//! decimals:
//!
//! ```text
//! units  = amount × price / 10^(a + p − u)
//! amount = units × 10^(a + p − u) / price
//! ```
//!
//! When the exponent is negative the division becomes a multiplication.

use strongbox_protocol::config::BPS_DENOMINATOR;
use strongbox_protocol::Amount;

/// `10^exp`, or `None` if it does not fit in `u128`.
pub fn pow10(exp: u32) -> Option<Amount> {
    Amount::from(10u8).checked_pow(exp)
}

/// Value of `amount` (in an asset with `asset_decimals`) in accounting units.
pub fn to_accounting(
    amount: Amount,
    asset_decimals: u8,
    price: Amount,
    price_decimals: u8,
    unit_decimals: u8,
) -> Option<Amount> {
    let numerator = amount.checked_mul(price)?;
    let shift = i32::from(asset_decimals) + i32::from(price_decimals) - i32::from(unit_decimals);
    if shift >= 0 {
        Some(numerator / pow10(shift.unsigned_abs())?)
    } else {
        numerator.checked_mul(pow10(shift.unsigned_abs())?)
    }
}

/// Amount of an asset with `asset_decimals` worth `units` accounting units.
pub fn from_accounting(
    units: Amount,
    asset_decimals: u8,
    price: Amount,
    price_decimals: u8,
    unit_decimals: u8,
) -> Option<Amount> {
    if price == 0 {
        return None;
    }
    let shift = i32::from(asset_decimals) + i32::from(price_decimals) - i32::from(unit_decimals);
    if shift >= 0 {
        Some(units.checked_mul(pow10(shift.unsigned_abs())?)? / price)
    } else {
        Some(units / price.checked_mul(pow10(shift.unsigned_abs())?)?)
    }
}

/// `expected × (1 − bps / 10_000)`, rounded down. Never overflows.
pub fn apply_slippage(expected: Amount, slippage_bps: u32) -> Amount {
    let denominator = Amount::from(BPS_DENOMINATOR);
    let keep = Amount::from(BPS_DENOMINATOR.saturating_sub(slippage_bps));
    (expected / denominator) * keep + (expected % denominator) * keep / denominator
}

/// `amount × numerator / denominator`, rounded down.
pub fn mul_div(amount: Amount, numerator: Amount, denominator: Amount) -> Option<Amount> {
    if denominator == 0 {
        return None;
    }
    amount.checked_mul(numerator).map(|n| n / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow10_bounds() {
        assert_eq!(pow10(0), Some(1));
        assert_eq!(pow10(6), Some(1_000_000));
        assert!(pow10(38).is_some());
        assert!(pow10(39).is_none());
    }

    #[test]
    fn native_deposit_normalization() {
        // 1.5 native (18 dp) at 2_000.00000000 (8 dp) = 3_000 units (6 dp).
        let amount = 1_500_000_000_000_000_000;
        let price = 2_000_0000_0000;
        let units = to_accounting(amount, 18, price, 8, 6).unwrap();
        assert_eq!(units, 3_000_000_000);
    }

    #[test]
    fn low_precision_asset_scales_up() {
        // 3 whole units of a 2-dp asset at 1.0 (2 dp) into 6 dp units.
        let units = to_accounting(300, 2, 100, 2, 6).unwrap();
        assert_eq!(units, 3_000_000);
    }

    #[test]
    fn conversion_rounds_down() {
        // 1 wei at 2_000 is far below one accounting unit.
        assert_eq!(to_accounting(1, 18, 2_000_0000_0000, 8, 6), Some(0));
    }

    #[test]
    fn from_accounting_inverts_within_rounding() {
        let price = 3_141_5926_5358;
        let amount = 2_718_281_828_459_045_235;
        let units = to_accounting(amount, 18, price, 8, 6).unwrap();
        let back = from_accounting(units, 18, price, 8, 6).unwrap();
        assert!(back <= amount);
        // One accounting unit is worth far less than this tolerance.
        assert!(amount - back < 1_000_000_000_000);
    }

    #[test]
    fn from_accounting_rejects_zero_price() {
        assert_eq!(from_accounting(1, 18, 0, 8, 6), None);
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(to_accounting(Amount::MAX, 18, 2, 8, 6), None);
    }

    #[test]
    fn slippage_is_exact_for_round_values() {
        assert_eq!(apply_slippage(200_000_000, 500), 190_000_000);
        assert_eq!(apply_slippage(200_000_000, 0), 200_000_000);
        assert_eq!(apply_slippage(200_000_000, 10_000), 0);
    }

    #[test]
    fn slippage_never_overflows() {
        let min = apply_slippage(Amount::MAX, 500);
        assert!(min < Amount::MAX);
        assert!(min > Amount::MAX / 100 * 94);
    }

    #[test]
    fn mul_div_floor() {
        assert_eq!(mul_div(10, 1, 3), Some(3));
        assert_eq!(mul_div(10, 1, 0), None);
    }
}
