//! Fixed-point helpers for the converter state.
//!
//! Suffix convention: `_n8` is a value scaled by 2^8, `_n32` by 2^32. Every
//! conversion back to a plain integer rounds half away from zero; table
//! indices truncate.

/// Shift `x` right by `shift` bits, rounding half up.
#[inline]
pub fn round_shift_u64(x: u64, shift: u32) -> u64 {
    round_shift_u128(u128::from(x), shift)
}

/// Shift a wide intermediate right, rounding half up and saturating to `u64`.
#[inline]
pub fn round_shift_u128(x: u128, shift: u32) -> u64 {
    let shifted = if shift == 0 {
        x
    } else if shift >= 128 {
        0
    } else {
        let half = 1u128 << (shift - 1);
        (x >> shift) + u128::from(x & ((half << 1) - 1) >= half)
    };
    u64::try_from(shifted).unwrap_or(u64::MAX)
}

/// Saturating narrowing of a `u64` into `u32`.
#[inline]
pub fn saturate_u32(x: u64) -> u32 {
    u32::try_from(x).unwrap_or(u32::MAX)
}

/// Clamp a signed input sample into `0..=u32::MAX`.
#[inline]
pub fn clamp_i64_to_u32(x: i64) -> u32 {
    u32::try_from(x.max(0)).unwrap_or(u32::MAX)
}

/// `floor(log2(x))`, with 0 for an input of 0.
#[inline]
pub const fn log2_floor(x: u32) -> u32 {
    if x == 0 { 0 } else { 31 - x.leading_zeros() }
}

/// Round a float to the nearest `u32`, ties away from zero, clamped to the
/// type range. Non-finite values map to 0.
#[inline]
pub fn round_f64_to_u32(x: f64) -> u32 {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    let r = x.round();
    if r >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        r as u32
    }
}

/// Round a float to the nearest `i64`, ties away from zero, saturating.
#[inline]
pub fn round_f64_to_i64(x: f64) -> i64 {
    if !x.is_finite() {
        return 0;
    }
    let r = x.round();
    if r >= i64::MAX as f64 {
        i64::MAX
    } else if r <= i64::MIN as f64 {
        i64::MIN
    } else {
        r as i64
    }
}
