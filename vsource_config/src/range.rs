//! Range clamping shared by harvester and source validation.

use crate::error::ConfigError;

/// Upper bound used where a kernel field is a plain `u32`.
pub(crate) const U32_LIMIT: f64 = 4_294_967_295.0;

/// Clamp `value` into `[min, max]`, logging every adjustment.
///
/// Negative or non-finite values are rejected instead of clamped. When
/// `max < min` the upper bound wins.
pub(crate) fn check_num(
    preset: &str,
    key: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> eyre::Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(eyre::Report::new(ConfigError::NotPositive { key, value }));
    }
    let mut adjusted = value;
    if adjusted < min {
        tracing::debug!(preset, key, value, min, "value below minimum, adjusted");
        adjusted = min;
    }
    if adjusted > max {
        tracing::debug!(preset, key, value, max, "value above maximum, adjusted");
        adjusted = max;
    }
    Ok(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_into_range() {
        assert_eq!(check_num("t", "k", 5.0, 0.0, 3.0).unwrap(), 3.0);
        assert_eq!(check_num("t", "k", 0.5, 1.0, 3.0).unwrap(), 1.0);
        assert_eq!(check_num("t", "k", 2.0, 1.0, 3.0).unwrap(), 2.0);
    }

    #[test]
    fn upper_bound_wins_on_inverted_range() {
        assert_eq!(check_num("t", "k", 0.0, 4.0, 2.0).unwrap(), 2.0);
    }

    #[test]
    fn rejects_negative_and_nan() {
        assert!(check_num("t", "k", -1.0, 0.0, 3.0).is_err());
        assert!(check_num("t", "k", f64::NAN, 0.0, 3.0).is_err());
    }
}
