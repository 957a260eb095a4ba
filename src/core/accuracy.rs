//! Fixed-point temporal arithmetic
//!
//! Times live on a 3 decimal place clock. An action occupying `[start, start + duration)`
//! ends half a tick before the next representable start, so an action ending at `T`
//! and one starting at `T` never share an event time.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept for every simulated time
pub const PRECISION: u32 = 3;

/// One clock tick (0.001)
pub const TICK: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Half a tick (0.0005), the gap between an end time and the next start time
pub const INCREMENT: Decimal = Decimal::from_parts(5, 0, 0, false, 4);

/// Duration given to bookkeeping actions that take no simulated time
pub const INSTANTANEOUS_ACTION_DURATION: Decimal = INCREMENT;

/// Round down to clock precision. Used on externally reported times.
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRECISION, RoundingStrategy::ToNegativeInfinity)
}

/// Round up to the next representable start instant
pub fn as_start_time(time: Decimal) -> Decimal {
    time.round_dp_with_strategy(PRECISION, RoundingStrategy::ToPositiveInfinity)
}

/// Last instant strictly before the tick at or after `time`
pub fn as_end_time(time: Decimal) -> Decimal {
    as_start_time(time) - INCREMENT
}

/// The start instant one tick before `time`
pub fn to_prev_start_time(time: Decimal) -> Decimal {
    as_start_time(time) - TICK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_quantize_rounds_down() {
        assert_eq!(quantize(d("1.23456")), d("1.234"));
        assert_eq!(quantize(d("2")), d("2"));
        assert_eq!(quantize(d("0.0009")), d("0"));
    }

    #[test]
    fn test_as_start_time_rounds_up() {
        assert_eq!(as_start_time(d("2.9995")), d("3"));
        assert_eq!(as_start_time(d("3")), d("3"));
        assert_eq!(as_start_time(d("1.2341")), d("1.235"));
    }

    #[test]
    fn test_as_end_time_is_before_next_start() {
        assert_eq!(as_end_time(d("3")), d("2.9995"));
        assert_eq!(as_end_time(d("2.9995")), d("2.9995"));
        assert!(as_end_time(d("3")) < as_start_time(d("3")));
    }

    #[test]
    fn test_end_and_start_round_trip() {
        for raw in ["0", "0.5", "1.001", "17.25", "99.9999"] {
            let t = d(raw);
            assert_eq!(as_start_time(as_end_time(t)), as_start_time(t));
        }
    }

    #[test]
    fn test_to_prev_start_time() {
        assert_eq!(to_prev_start_time(d("3")), d("2.999"));
        assert_eq!(to_prev_start_time(d("2.9995")), d("2.999"));
    }

    #[test]
    fn test_instantaneous_action_has_distinct_end() {
        let start = d("4");
        let end = as_end_time(start + INSTANTANEOUS_ACTION_DURATION);
        assert!(end > start);
        assert_eq!(as_start_time(end), d("4.001"));
    }
}
