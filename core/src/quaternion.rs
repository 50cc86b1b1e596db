//! Unit-quaternion manifold algebra
//!
//! This module contains the exponential map, logarithm map, and incremental
//! renormalization primitives that the quaternion Kalman filter is built on.
//! The filter keeps its mean orientation on the unit-quaternion manifold while
//! the orientation *error* lives in the locally linear tangent space of
//! rotation vectors (axis scaled by angle). These maps convert between the two
//! representations.
//!
//! Two tangent parameterizations are provided:
//! - [exp] / [log]: the angle-axis form, $v = \theta \hat{v}$ with
//!   $\theta \in [0, 2\pi]$. This is the parameterization used for the error
//!   covariance and for Kalman updates.
//! - [exp_r] / [log_r]: the modified Rodrigues parameter form,
//!   $v = \tan(\theta/4) \hat{v}$, which stays finite as $\theta \to \pi$ and
//!   has no $2\pi$ periodicity. Useful where the angle-axis form's
//!   wrap-around would be a hazard.
//!
//! Both forms flush inputs below machine epsilon to the identity rotation
//! (respectively the zero vector) rather than dividing by a near-zero angle.
//! This is deliberate, silent behavior, not an error condition.
//!
//! Renormalization is handled incrementally: the filter composes many small
//! rotations per second, and each composition lets the quaternion norm drift
//! by a few ulps. [incremental_normalized] applies one Newton iteration of the
//! inverse square root, which fully renormalizes any quaternion whose norm is
//! already within $\sqrt{\epsilon}$ of unity. The filter applies it on every
//! measurement update, so the drift never accumulates far enough for the
//! precondition to fail.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

/// Map a rotation vector (axis scaled by angle) to a unit quaternion.
///
/// The rotation angle is the norm of `v` and must not exceed $2\pi$; a larger
/// magnitude indicates a corrupted input or an impossibly large correction and
/// is a contract violation. Inputs with magnitude at or below machine epsilon
/// are flushed to the identity quaternion to avoid dividing by a vanishing
/// angle.
///
/// The direct half-angle sine/cosine form is used here. A reformulation via
/// the tangent of the quarter angle needs fewer transcendental calls but
/// measured slower in practice, so it was not kept.
///
/// # Arguments
/// * `v` - Rotation vector, axis scaled by angle in radians, $|v| \le 2\pi$.
///
/// # Returns
/// The unit quaternion representing the same rotation.
///
/// # Panics
/// If $|v| > 2\pi$.
///
/// # Example
/// ```rust
/// use ins_qkf::quaternion;
/// use nalgebra::Vector3;
/// let q = quaternion::exp(&Vector3::new(std::f64::consts::FRAC_PI_2, 0.0, 0.0));
/// ```
pub fn exp(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = v.norm();
    if angle <= f64::EPSILON {
        // Flush to zero for very small rotations
        return UnitQuaternion::identity();
    }
    assert!(
        angle <= 2.0 * std::f64::consts::PI,
        "quaternion::exp: rotation angle {angle} exceeds 2*pi"
    );
    let half = 0.5 * angle;
    UnitQuaternion::new_unchecked(Quaternion::from_parts(
        half.cos(),
        v * (half.sin() / angle),
    ))
}

/// Map a unit quaternion to a rotation vector (axis scaled by angle).
///
/// Inverse of [exp]. The quaternion's norm should be close to unity but may
/// be slightly too large or small. When the magnitude of the vector part is
/// at or below machine epsilon the result is flushed to the zero vector,
/// which avoids division by zero near the identity.
///
/// # Arguments
/// * `q` - A (nearly) unit quaternion.
///
/// # Returns
/// The rotation vector in the tangent space at the identity.
pub fn log(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let vec = q.imag();
    let mag = vec.norm();
    if mag <= f64::EPSILON {
        return Vector3::zeros();
    }
    let angle = 2.0 * mag.atan2(q.scalar());
    vec * (angle / mag)
}

/// Map a modified Rodrigues parameter vector to a unit quaternion.
///
/// The input is the rotation axis scaled by $\tan(\theta/4)$. Using the
/// half-angle identities
/// $\sin(\theta/2) = 2\tan(\theta/4) / (1 + \tan^2(\theta/4))$ and
/// $\cos(\theta/2) = (1 - \tan^2(\theta/4)) / (1 + \tan^2(\theta/4))$,
/// the quaternion follows without any transcendental calls.
///
/// # Arguments
/// * `v` - Rotation axis scaled by $\tan(\theta/4)$.
///
/// # Returns
/// The unit quaternion representing the same rotation.
pub fn exp_r(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    // a2 = tan^2(theta/4)
    let a2 = v.norm_squared();
    UnitQuaternion::new_unchecked(Quaternion::from_parts(
        (1.0 - a2) / (1.0 + a2),
        v * (2.0 / (1.0 + a2)),
    ))
}

/// Map a unit quaternion to modified Rodrigues parameters.
///
/// Inverse of [exp_r]. With $w = \cos(\theta/2)$ and the vector part equal to
/// $\sin(\theta/2)\hat{v}$, the identity
/// $\tan(\theta/4) = \sin(\theta/2)/(1 + \cos(\theta/2))$ gives the result as
/// a single division. Unlike the plain Rodrigues parameterization
/// ($\tan(\theta/2)\hat{v}$) this form pulls away from infinity at
/// $\theta = \pi$. Reasonably safe to within about 1e-10 in double precision;
/// not safe in single precision.
///
/// # Arguments
/// * `q` - A unit quaternion.
///
/// # Returns
/// The rotation axis scaled by $\tan(\theta/4)$.
pub fn log_r(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    q.imag() / (1.0 + q.scalar())
}

/// Completely normalize a nearly normalized quaternion.
///
/// One Newton iteration of $1/\sqrt{x}$, given a refinement step of
/// `est * 0.5 * (3 - x * est * est)` and an initial estimate of 1.0. If the
/// true norm is within $\sqrt{\epsilon}$ of unity this single step brings it
/// to within machine epsilon, at a fraction of the cost of a full
/// normalization.
///
/// # Preconditions
/// $1 - |q| < \sqrt{\epsilon}$
///
/// # Postconditions
/// $1 - |q'| \le \epsilon$
///
/// # Arguments
/// * `q` - A nearly normalized quaternion.
///
/// # Returns
/// The completely normalized quaternion.
pub fn incremental_normalized(q: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let norm2 = q.as_ref().norm_squared();
    let inv_sqrt_mag = 0.5 * (3.0 - norm2);
    UnitQuaternion::new_unchecked(q.into_inner() * inv_sqrt_mag)
}

/// Compute the cross-product matrix of a 3-vector.
///
/// Returns the skew-symmetric matrix satisfying the identity
/// `cross(v) * x == v.cross(&x)` for all `x`.
///
/// $$
/// v = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow
/// \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// # Example
/// ```rust
/// use ins_qkf::quaternion::cross;
/// use nalgebra::Vector3;
/// let v = Vector3::new(1.0, 2.0, 3.0);
/// let x = Vector3::new(-0.5, 0.25, 4.0);
/// assert_eq!(cross(&v) * x, v.cross(&x));
/// ```
pub fn cross(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v[2], v[1], //
        v[2], 0.0, -v[0], //
        -v[1], v[0], 0.0,
    )
}
