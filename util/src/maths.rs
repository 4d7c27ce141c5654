//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the signed shortest angular distance from `a` to `b`, in radians.
///
/// The result is in the range [-pi, pi] and accounts for wrapping, so the distance between
/// 0.1 and 2pi - 0.1 is -0.2, not 2pi - 0.2.
pub fn shortest_ang_dist<T>(a: T, b: T) -> T
where
    T: Float,
{
    let pi_t: T = T::from(std::f64::consts::PI).unwrap();
    let tau_t: T = T::from(std::f64::consts::TAU).unwrap();

    rem_euclid(b - a + pi_t, tau_t) - pi_t
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// Equivalent to the std `f64::rem_euclid`, generalised over `Float` as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::from(0.0).unwrap() {
        r + rhs.abs()
    } else {
        r
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const PI: f64 = std::f64::consts::PI;
    const TAU: f64 = std::f64::consts::TAU;

    #[test]
    fn test_shortest_ang_dist() {
        assert!((shortest_ang_dist(1f64, 2f64) - 1f64).abs() < 1e-12);
        assert!((shortest_ang_dist(2f64, 1f64) + 1f64).abs() < 1e-12);
        assert!(shortest_ang_dist(0f64, TAU).abs() < 1e-12);
        assert!((shortest_ang_dist(0.1f64, TAU - 0.1) + 0.2).abs() < 1e-12);
        assert!((shortest_ang_dist(TAU - 0.1, 0.1f64) - 0.2).abs() < 1e-12);
        // Antipodal angles are exactly pi apart in magnitude
        assert!((shortest_ang_dist(0f64, PI).abs() - PI).abs() < 1e-12);
    }
}
