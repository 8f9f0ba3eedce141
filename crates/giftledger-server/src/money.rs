//! Integer minor-unit arithmetic.
//!
//! Every amount in this crate is an `i64` count of cents. Arithmetic is
//! checked; an overflow is reported as `None` and treated as invalid input by
//! callers.

/// Total for a line of `qty` units at `unit_price_cents` each.
pub fn line_total(unit_price_cents: i64, qty: i32) -> Option<i64> {
    if unit_price_cents < 0 || qty <= 0 {
        return None;
    }
    unit_price_cents.checked_mul(i64::from(qty))
}

/// Checked sum of non-negative amounts.
pub fn sum_cents<I>(amounts: I) -> Option<i64>
where
    I: IntoIterator<Item = i64>,
{
    amounts.into_iter().try_fold(0i64, |acc, amount| {
        if amount < 0 {
            None
        } else {
            acc.checked_add(amount)
        }
    })
}

/// Discount a gift card can cover for a cart: `min(available, subtotal)`,
/// never negative.
pub fn discount_for(available_cents: i64, subtotal_cents: i64) -> i64 {
    available_cents.min(subtotal_cents).max(0)
}

/// Amount left to pay after a discount: `max(0, subtotal - discount)`.
pub fn total_after_discount(subtotal_cents: i64, discount_cents: i64) -> i64 {
    subtotal_cents.saturating_sub(discount_cents).max(0)
}

/// Formats cents for humans, e.g. `12.50 EUR`.
pub fn format_cents(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!(
        "{}{}.{:02} {}",
        sign,
        abs / 100,
        abs % 100,
        currency.to_uppercase()
    )
}
