use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Rounds a monetary figure to cents, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// True when the value carries no more precision than whole cents.
pub fn has_cent_precision(value: Decimal) -> bool {
    value.normalize().scale() <= 2
}

/// True when the magnitude is at most the accepted input ceiling of one
/// trillion. Keeps every stored figure far enough from `Decimal`'s range
/// that balance arithmetic cannot overflow.
pub fn within_amount_limit(value: Decimal) -> bool {
    value.abs() <= Decimal::new(1_000_000_000_000, 0)
}
