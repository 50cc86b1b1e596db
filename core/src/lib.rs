//! Quaternion-manifold Kalman filter core for inertial navigation
//!
//! This crate provides the estimation core of a basic inertial navigation
//! system: a Kalman filter that fuses angular-rate and specific-force
//! measurements from an IMU with intermittent absolute position fixes (e.g.
//! GNSS) to maintain a running estimate of vehicle orientation, position,
//! velocity, and gyroscope bias, together with the uncertainty of that
//! estimate. It is not a sensor driver and performs no calibration,
//! timestamp alignment, or measurement queuing; the caller owns the sensor
//! acquisition loop and calls into the filter strictly in time order.
//!
//! This crate is primarily built off of one dependency:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the fixed-size
//!   linear algebra types (vectors, matrices, unit quaternions) for the
//!   filter core.
//!
//! The simulation scaffolding additionally uses
//! [`nav-types`](https://crates.io/crates/nav-types) for geodetic-to-ECEF
//! seeding and [`rand`](https://crates.io/crates/rand) /
//! [`rand_distr`](https://crates.io/crates/rand_distr) for sensor noise.
//!
//! # State representation
//!
//! The mean state is manifold-valued: orientation lives on the unit
//! quaternion manifold while bias, position, and velocity are ordinary
//! Euclidean 3-vectors. The error covariance, by contrast, is a flat 12×12
//! matrix over a *tangent-space* error state,
//!
//! $$
//! \delta x = [\delta b_g, \delta\theta, \delta p, \delta v]
//! $$
//!
//! where $\delta\theta$ is a rotation vector in the tangent space of the
//! current mean orientation, not a difference of quaternion coefficients.
//! The block ordering above (gyro bias, orientation, position, velocity,
//! three states each) is fixed for the lifetime of the filter.
//!
//! Because the orientation-error tangent space is anchored to the mean
//! orientation, every change to the mean orientation during a measurement
//! update must be matched by a "counter-rotation" of the orientation-related
//! covariance blocks into the new tangent frame. See
//! [kalman::QuaternionKalmanFilter::observe_position].
//!
//! # Crate overview
//!
//! - [quaternion]: Exponential/logarithm maps between rotation vectors and
//!   unit quaternions, incremental renormalization, cross-product matrix.
//! - [kalman]: The [kalman::QuaternionKalmanFilter] itself: time propagation
//!   from IMU samples and sequential rank-one position updates.
//! - [linalg]: Fixed-size symmetrization, symmetry/definiteness checks, and
//!   a robust 3×3 SPD inverse.
//! - [earth]: Gravity model constants for the ECEF frame.
//! - [sim]: Synthetic trajectory simulation and CSV output used by the
//!   `ins-qkf-sim` binary and the integration tests.
//!
//! # Units and frames
//!
//! Positions and velocities are meters and meters per second in an
//! Earth-centered Earth-fixed (ECEF) frame. Angular rates are rad/s and
//! specific force is m/s² in the sensor body frame. The orientation
//! quaternion relates the two: its inverse carries body-frame measurements
//! into the reference frame, and measured body rates compose onto it from
//! the left, `exp(omega * dt) * q`.
//!
//! # Error handling
//!
//! This is a correctness-critical numerical core with no recoverable-error
//! concept. Non-finite state, a covariance that loses symmetry or develops a
//! negative diagonal, or a rotation-vector input larger than $2\pi$ are all
//! programming-contract violations and abort via `assert!`. The only
//! locally absorbed edge cases are the flush-to-zero guards in
//! [quaternion::exp] and [quaternion::log].

pub mod earth;
pub mod kalman;
pub mod linalg;
pub mod quaternion;
pub mod sim;

use std::fmt::{Debug, Display};

use nalgebra::{SVector, UnitQuaternion, Vector3};

/// One pre-filtered inertial sample: specific force and angular rate.
///
/// Both vectors are in the body frame of the vehicle. This struct is plain
/// transport; the library is not an IMU driver and assumes the sample has
/// already been validated by the acquisition layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImuSample {
    /// Specific force in m/s^2, body frame x, y, z axis
    pub accel: Vector3<f64>,
    /// Angular rate in rad/s, body frame x, y, z axis
    pub gyro: Vector3<f64>,
}

impl Display for ImuSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImuSample {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}

impl ImuSample {
    /// Create a new sample from specific force and angular rate vectors.
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> ImuSample {
        ImuSample { accel, gyro }
    }
}

/// The filter's mean state: best point estimate of the vehicle.
///
/// Orientation is kept on the unit-quaternion manifold; the remaining states
/// are Euclidean 3-vectors in the ECEF frame (bias is in the body frame).
/// The quaternion's norm is maintained within one incremental-normalization
/// step of unity at all times: every measurement update renormalizes via
/// [quaternion::incremental_normalized], so coefficient drift from repeated
/// composition never accumulates.
#[derive(Clone, Copy)]
pub struct StateVector {
    /// Attitude quaternion; its inverse rotates body-frame vectors into the
    /// ECEF reference frame
    pub orientation: UnitQuaternion<f64>,
    /// Slowly varying gyroscope bias in rad/s, body frame
    pub gyro_bias: Vector3<f64>,
    /// ECEF position in meters
    pub position: Vector3<f64>,
    /// ECEF velocity in m/s
    pub velocity: Vector3<f64>,
}

impl Debug for StateVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StateVector {{ q: [{:.6}, {:.6}, {:.6}, {:.6}], bias: [{:.2e}, {:.2e}, {:.2e}], pos: [{:.2}, {:.2}, {:.2}] m, vel: [{:.3}, {:.3}, {:.3}] m/s }}",
            self.orientation.w,
            self.orientation.i,
            self.orientation.j,
            self.orientation.k,
            self.gyro_bias[0],
            self.gyro_bias[1],
            self.gyro_bias[2],
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2]
        )
    }
}

impl Default for StateVector {
    fn default() -> Self {
        StateVector {
            orientation: UnitQuaternion::identity(),
            gyro_bias: Vector3::zeros(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }
}

impl StateVector {
    /// Create a new mean state from its components.
    ///
    /// # Arguments
    /// * `orientation` - Attitude quaternion (unit norm).
    /// * `gyro_bias` - Gyroscope bias in rad/s, body frame.
    /// * `position` - ECEF position in meters.
    /// * `velocity` - ECEF velocity in m/s.
    pub fn new(
        orientation: UnitQuaternion<f64>,
        gyro_bias: Vector3<f64>,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> StateVector {
        StateVector {
            orientation,
            gyro_bias,
            position,
            velocity,
        }
    }

    /// Apply a 12-vector tangent-space Kalman update to the mean state.
    ///
    /// The bias, position, and velocity sub-blocks are applied additively.
    /// The orientation sub-block is a rotation vector; it is mapped through
    /// the exponential map to a small rotation "rotor" that is composed onto
    /// the current orientation, followed by incremental renormalization.
    ///
    /// The returned rotor is exactly the rotation by which the mean
    /// orientation just changed. The caller must counter-rotate the
    /// orientation-related covariance blocks by its inverse, because the
    /// tangent frame in which the covariance expresses orientation error has
    /// moved with the mean.
    ///
    /// # Arguments
    /// * `update` - Tangent-space correction in the fixed block order
    ///   [gyro bias, orientation, position, velocity].
    ///
    /// # Returns
    /// The rotor applied to the orientation.
    pub fn apply_kalman_vec_update(&mut self, update: &SVector<f64, 12>) -> UnitQuaternion<f64> {
        self.gyro_bias += update.fixed_rows::<3>(0).into_owned();
        let rotor = quaternion::exp(&update.fixed_rows::<3>(3).into_owned());
        self.orientation = quaternion::incremental_normalized(&(rotor * self.orientation));
        self.position += update.fixed_rows::<3>(6).into_owned();
        self.velocity += update.fixed_rows::<3>(9).into_owned();
        rotor
    }

    /// True when every component of the mean state is finite.
    pub fn is_real(&self) -> bool {
        self.orientation.as_ref().coords.iter().all(|x| x.is_finite())
            && linalg::is_finite(&self.gyro_bias)
            && linalg::is_finite(&self.position)
            && linalg::is_finite(&self.velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::SVector;

    #[test]
    fn kalman_vec_update_applies_blocks() {
        let mut state = StateVector::default();
        let mut update = SVector::<f64, 12>::zeros();
        update[0] = 1e-4; // bias x
        update[4] = 0.1; // orientation y
        update[6] = 5.0; // position x
        update[11] = -0.2; // velocity z

        let rotor = state.apply_kalman_vec_update(&update);

        assert_approx_eq!(state.gyro_bias[0], 1e-4, 1e-15);
        assert_approx_eq!(state.position[0], 5.0, 1e-12);
        assert_approx_eq!(state.velocity[2], -0.2, 1e-12);
        // Orientation moved by exactly the rotor
        let expected = quaternion::exp(&Vector3::new(0.0, 0.1, 0.0));
        assert_approx_eq!(rotor.w, expected.w, 1e-15);
        assert_approx_eq!(state.orientation.j, expected.j, 1e-12);
    }

    #[test]
    fn zero_update_is_identity_rotor() {
        let mut state = StateVector::new(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1e-4, 0.0, 0.0),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(0.1, 0.2, 0.3),
        );
        let before = state;
        let rotor = state.apply_kalman_vec_update(&SVector::<f64, 12>::zeros());
        assert_eq!(rotor, UnitQuaternion::identity());
        assert_eq!(state.gyro_bias, before.gyro_bias);
        assert_eq!(state.position, before.position);
        assert_eq!(state.velocity, before.velocity);
        // Renormalization still ran, orientation may differ by <= eps
        assert!((state.orientation.as_ref().norm() - 1.0).abs() <= f64::EPSILON);
    }

    #[test]
    fn update_keeps_orientation_normalized() {
        let mut state = StateVector::default();
        let mut update = SVector::<f64, 12>::zeros();
        for _ in 0..1000 {
            update[3] = 1e-3;
            update[4] = -2e-3;
            state.apply_kalman_vec_update(&update);
        }
        assert!((state.orientation.as_ref().norm() - 1.0).abs() <= 4.0 * f64::EPSILON);
    }

    #[test]
    fn is_real_detects_nan() {
        let mut state = StateVector::default();
        assert!(state.is_real());
        state.velocity[1] = f64::NAN;
        assert!(!state.is_real());
    }
}
