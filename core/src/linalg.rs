//! Fixed-size linear algebra helpers
//!
//! Small utilities shared by the prediction and measurement-update engines:
//! symmetrization, symmetry/definiteness checks used by the filter's
//! invariant assertions, and a robust inverse for the 3×3 innovation
//! covariance used by the batch measurement update.
//!
//! Everything here operates on stack-allocated `nalgebra` types of fixed
//! dimension. The filter state is 12-dimensional and the measurement is
//! 3-dimensional, so there is no reason to pay for dynamic sizing, and
//! keeping the allocations off the heap preserves the deterministic per-call
//! cost the filter is designed around.

use nalgebra::{Matrix3, SMatrix};
use nalgebra::linalg::Cholesky;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Reduces the round-off asymmetry that accumulates in covariance arithmetic.
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    0.5 * (m + m.transpose())
}

/// Check that a matrix equals its own transpose to within `tol` per entry.
pub fn is_symmetric<const N: usize>(m: &SMatrix<f64, N, N>, tol: f64) -> bool {
    for i in 0..N {
        for j in (i + 1)..N {
            if (m[(i, j)] - m[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}

/// Check that every entry of a matrix is finite.
pub fn is_finite<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> bool {
    m.iter().all(|x| x.is_finite())
}

/// Check that every diagonal entry is at least `-tol`.
///
/// A cheap necessary condition for positive semi-definiteness; the filter
/// uses it as its per-call invariant check rather than a full eigenvalue
/// decomposition.
pub fn diagonal_nonnegative<const N: usize>(m: &SMatrix<f64, N, N>, tol: f64) -> bool {
    for i in 0..N {
        if m[(i, i)] < -tol {
            return false;
        }
    }
    true
}

/// Invert a symmetric positive-definite 3×3 matrix.
///
/// Attempts a Cholesky factorization of the symmetrized input first and falls
/// back to a direct inverse if that fails. A matrix that cannot be inverted
/// either way means the innovation covariance has collapsed, which is a
/// contract violation, so this panics rather than returning an error.
///
/// # Panics
/// If the matrix is singular.
pub fn spd_inverse(a: &Matrix3<f64>) -> Matrix3<f64> {
    let a_sym = symmetrize(a);
    if let Some(ch) = Cholesky::new(a_sym) {
        return ch.inverse();
    }
    match a_sym.try_inverse() {
        Some(inv) => inv,
        None => panic!("spd_inverse: innovation covariance is singular"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Matrix3;

    #[test]
    fn symmetrize_averages_off_diagonal() {
        let m = SMatrix::<f64, 2, 2>::new(1.0, 2.0, 0.0, 3.0);
        let s = symmetrize(&m);
        assert_eq!(s, SMatrix::<f64, 2, 2>::new(1.0, 1.0, 1.0, 3.0));
        assert!(is_symmetric(&s, 1e-15));
    }

    #[test]
    fn symmetry_check_tolerance() {
        let mut m = SMatrix::<f64, 3, 3>::identity();
        m[(0, 1)] = 1e-12;
        assert!(is_symmetric(&m, 1e-10));
        assert!(!is_symmetric(&m, 1e-14));
    }

    #[test]
    fn finiteness_check() {
        let mut m = SMatrix::<f64, 3, 3>::identity();
        assert!(is_finite(&m));
        m[(1, 2)] = f64::NAN;
        assert!(!is_finite(&m));
        m[(1, 2)] = f64::INFINITY;
        assert!(!is_finite(&m));
    }

    #[test]
    fn diagonal_check() {
        let mut m = SMatrix::<f64, 3, 3>::identity();
        assert!(diagonal_nonnegative(&m, 1e-9));
        m[(2, 2)] = -1e-12;
        assert!(diagonal_nonnegative(&m, 1e-9));
        m[(2, 2)] = -1.0;
        assert!(!diagonal_nonnegative(&m, 1e-9));
    }

    #[test]
    fn spd_inverse_recovers_identity() {
        let a = Matrix3::new(4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0);
        let inv = spd_inverse(&a);
        let product = a * inv;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_approx_eq!(product[(i, j)], expected, 1e-12);
            }
        }
    }

    #[test]
    #[should_panic(expected = "singular")]
    fn spd_inverse_panics_on_singular() {
        let _ = spd_inverse(&Matrix3::zeros());
    }
}
