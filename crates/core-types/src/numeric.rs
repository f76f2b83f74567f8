//! Floor-to-tick / floor-to-step rounding with decimal-precision repair.
//!
//! The exchange rejects prices and quantities whose decimal expansion carries
//! excess digits (e.g. `1.10000000003` where `0.01` ticks are expected). A
//! naive `(v / tick).floor() * tick` leaves that binary-float residue behind,
//! so every result is reformatted through a fixed-precision string round trip
//! derived from the tick/step's own textual precision.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Number of fractional digits in the textual form of `v` (e.g. `0.01` -> 2,
/// `1` -> 0). Trailing zeros introduced by `Decimal`'s internal scale are
/// trimmed first so that `dec!(1.100)` still reports precision 1, matching
/// what a human would write for a tick size.
fn precision_of(v: Decimal) -> u32 {
    v.normalize().scale()
}

fn floor_to_increment(v: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return v;
    }

    let steps = (v / increment).floor();
    let raw = steps * increment;

    let precision = precision_of(increment);
    let reformatted = format!("{:.*}", precision as usize, raw);
    Decimal::from_str(&reformatted).unwrap_or(raw)
}

/// Rounds `price` downward to the nearest multiple of `tick_size`, repairing
/// binary floating-point drift via a fixed-precision reformat. Returns `price`
/// unchanged when `tick_size <= 0`.
pub fn floor_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    floor_to_increment(price, tick_size)
}

/// Rounds `qty` downward to the nearest multiple of `step_size`, with the
/// same precision-repair discipline as [`floor_tick`].
pub fn floor_step(qty: Decimal, step_size: Decimal) -> Decimal {
    floor_to_increment(qty, step_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn floor_tick_repairs_binary_drift() {
        assert_eq!(floor_tick(dec!(10.005), dec!(0.01)), dec!(10.00));
        assert_eq!(floor_tick(dec!(1.10000000003), dec!(0.01)), dec!(1.10));
    }

    #[test]
    fn floor_tick_rounds_toward_zero_increments() {
        assert_eq!(floor_tick(dec!(30000.00) - dec!(10), dec!(0.01)), dec!(29990.00));
        assert_eq!(floor_tick(dec!(30000.00) + dec!(20), dec!(0.01)), dec!(30020.00));
    }

    #[test]
    fn floor_tick_passthrough_for_non_positive_tick() {
        assert_eq!(floor_tick(dec!(10.005), Decimal::ZERO), dec!(10.005));
        assert_eq!(floor_tick(dec!(10.005), dec!(-1)), dec!(10.005));
    }

    #[test]
    fn floor_step_rounds_down_quantities() {
        assert_eq!(floor_step(dec!(0.0000349), dec!(0.00001)), dec!(0.00003));
    }

    #[test]
    fn grid_level_prices_stay_on_tick() {
        let price = dec!(30000.00);
        let tick = dec!(0.01);
        let spread = dec!(10);
        assert_eq!(floor_tick(price - spread, tick), dec!(29990.00));
        assert_eq!(floor_tick(price - dec!(2) * spread, tick), dec!(29980.00));
        assert_eq!(floor_tick(price + spread, tick), dec!(30010.00));
        assert_eq!(floor_tick(price + dec!(2) * spread, tick), dec!(30020.00));
    }
}
