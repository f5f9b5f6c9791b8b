//! Per-token prices for known models.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (model prefix, input price per token, output price per token).
///
/// Longer prefixes must come before shorter ones sharing a stem.
const PRICES: &[(&str, Decimal, Decimal)] = &[
    ("gpt-4o-mini", dec!(0.00000015), dec!(0.0000006)),
    ("gpt-4o", dec!(0.0000025), dec!(0.00001)),
    ("gpt-4.1-nano", dec!(0.0000001), dec!(0.0000004)),
    ("gpt-4.1-mini", dec!(0.0000004), dec!(0.0000016)),
    ("gpt-4.1", dec!(0.000002), dec!(0.000008)),
    ("gpt-3.5-turbo", dec!(0.0000005), dec!(0.0000015)),
];

/// Look up (input, output) per-token prices. Unknown models cost zero.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    PRICES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((Decimal::ZERO, Decimal::ZERO))
}
