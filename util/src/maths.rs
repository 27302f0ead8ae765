//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Limit the value to the closed range `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    value.max(min).min(max)
}

/// Fraction of the way `value` lies between `start` and `end`, clamped to `[0, 1]`.
///
/// If `start` and `end` are equal the fraction is zero.
pub fn interp_fraction<T>(start: T, end: T, value: T) -> T
where
    T: Float
{
    if end == start {
        return T::zero()
    }

    clamp(lin_map((start, end), (T::zero(), T::one()), value), T::zero(), T::one())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 10f64), (0f64, 1f64), 5f64), 0.5);
        assert_eq!(lin_map((-1f64, 1f64), (10f64, 20f64), 1f64), 20f64);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(-0.5f64, 0f64, 1f64), 0f64);
        assert_eq!(clamp(0.25f64, 0f64, 1f64), 0.25);
        assert_eq!(clamp(3f64, 0f64, 1f64), 1f64);
    }

    #[test]
    fn test_interp_fraction() {
        assert_eq!(interp_fraction(2f64, 4f64, 3f64), 0.5);
        assert_eq!(interp_fraction(2f64, 4f64, 5f64), 1f64);
        assert_eq!(interp_fraction(2f64, 2f64, 2f64), 0f64);
    }
}
