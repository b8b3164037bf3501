//! Utilities to approximate equality of floating point values.

use crate::tensors::TensorFloat;

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The expected minimum epsilon accepted on `f32`s.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// How closely two values agree.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`F32_MIN_ERROR`].
    Precise = 0,

    /// Within [`F32_AVG_ERROR`].
    Partial = 1,

    /// Within [`F32_MAX_ERROR`].
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

/// Rates the distance between two values.
#[must_use]
pub fn rate(a: TensorFloat, b: TensorFloat) -> ApproxEquality {
    let dif = (a - b).abs();
    if dif < F32_MIN_ERROR {
        ApproxEquality::Precise
    } else if dif < F32_AVG_ERROR {
        ApproxEquality::Partial
    } else if dif < F32_MAX_ERROR {
        ApproxEquality::Relative
    } else {
        ApproxEquality::Scarce
    }
}

/// Worst rating over two equally long slices; slices of different lengths are [`ApproxEquality::Scarce`].
#[must_use]
pub fn rate_slices(a: &[TensorFloat], b: &[TensorFloat]) -> ApproxEquality {
    if a.len() != b.len() {
        return ApproxEquality::Scarce;
    }
    a.iter()
        .zip(b)
        .map(|(&x, &y)| rate(x, y))
        .max()
        .unwrap_or(ApproxEquality::Precise)
}

/// Whether every pair of values differs by at most `epsilon`.
#[must_use]
pub fn slices_within(a: &[TensorFloat], b: &[TensorFloat], epsilon: TensorFloat) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= epsilon)
}
