//! Quaternion-manifold Kalman filter (QKF)
//!
//! This module contains the navigation filter itself: time propagation from
//! inertial samples and measurement updates from absolute position fixes.
//! The mean state lives in [crate::StateVector]; the uncertainty is a 12×12
//! covariance over the tangent error state
//! $[\delta b_g, \delta\theta, \delta p, \delta v]$ (three states per block,
//! in that fixed order).
//!
//! # Prediction
//!
//! The mean is propagated with the exact nonlinear kinematics under a
//! constant-rate, constant-acceleration assumption over the step. The
//! covariance is propagated with the usual linearized sandwich
//! $P \leftarrow A P A^T + Q$, where the state transition matrix has the
//! sparse block structure
//!
//! $$
//! A = \begin{bmatrix}
//! I & 0 & 0 & 0 \\\\
//! -R^T t & I & 0 & 0 \\\\
//! 0 & 0 & I & I t \\\\
//! 0 & -S t & 0 & I
//! \end{bmatrix}
//! $$
//!
//! with $R^T$ the body-to-reference rotation of the current attitude and
//! $S$ the cross-product matrix of the negated body-frame specific force.
//! Attitude error couples into position only through the velocity row: the
//! direct $O(t^2)$ attitude-to-position term is truncated, consistent with
//! a first-order discretization of the error dynamics. Because $A$ is
//! mostly zeros, the product $A P A^T$ can be expanded by hand into a
//! closed-form recursion over the ten independent 3×3 blocks of the
//! symmetric $P$, which avoids materializing $A$ and the two 12×12
//! multiplies. Both forms are implemented ([PredictForm]); they are
//! algebraically identical and the tests hold them to agreement at
//! round-off level. The block recursion avoids two dense 12×12 multiplies
//! and is the default.
//!
//! # Measurement update
//!
//! A position fix with a diagonal noise model is applied one axis at a time
//! as three rank-one updates ([UpdateForm::RankOneSequential]), trading the
//! 3×3 innovation inverse of the batch form for three scalar divisions. The
//! sequential form is exactly equivalent to the batch form only when the
//! innovation covariance is diagonal; the residual error grows with the
//! off-diagonal correlation of the position block. That approximation is a
//! deliberate performance trade-off and is the default, with the batch form
//! ([UpdateForm::Batch]) kept for cross-validation.
//!
//! After the mean orientation moves, the covariance's orientation-error
//! tangent frame has moved with it, so the orientation-related blocks are
//! counter-rotated by the inverse of the applied rotor. Skipping this step
//! leaves later linearizations operating in a stale basis and shows up as a
//! slow attitude-covariance inconsistency.

use nalgebra::{Matrix3, SMatrix, SVector, UnitQuaternion, Vector3};

use crate::quaternion;
use crate::{ImuSample, StateVector, earth, linalg};

/// Tangent-state index of the gyro-bias error block
pub const BIAS: usize = 0;
/// Tangent-state index of the orientation error block
pub const ORIENTATION: usize = 3;
/// Tangent-state index of the position error block
pub const POSITION: usize = 6;
/// Tangent-state index of the velocity error block
pub const VELOCITY: usize = 9;

/// Tolerance for the covariance symmetry and diagonal-positivity invariants
const COVARIANCE_TOLERANCE: f64 = 1e-6;

/// Continuous-time process noise densities, diagonal per block.
///
/// Configured once at construction and immutable afterwards. During
/// prediction each density is integrated over the step according to its
/// order: bias random walk and white-noise rates scale with `dt`, while the
/// accelerometer noise enters the position block with `0.5 * dt^2` (one more
/// integration) and the velocity block with `dt`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessNoise {
    /// Gyro bias random-walk rate, (rad/s)^2 per second
    pub gyro_bias_random_walk: Vector3<f64>,
    /// Gyro white-noise rate, rad^2 per second
    pub gyro_white_noise: Vector3<f64>,
    /// Accelerometer white-noise rate, (m/s)^2 per second
    pub accel_white_noise: Vector3<f64>,
}

impl ProcessNoise {
    /// Create process noise densities from per-block diagonal vectors.
    pub fn new(
        gyro_bias_random_walk: Vector3<f64>,
        gyro_white_noise: Vector3<f64>,
        accel_white_noise: Vector3<f64>,
    ) -> ProcessNoise {
        ProcessNoise {
            gyro_bias_random_walk,
            gyro_white_noise,
            accel_white_noise,
        }
    }
}

/// Covariance propagation strategy for [QuaternionKalmanFilter::predict].
///
/// Both forms compute the same $A P A^T$; see the module documentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredictForm {
    /// Closed-form recursion over the ten independent 3×3 blocks (default)
    #[default]
    BlockRecursion,
    /// Explicit 12×12 transition-matrix sandwich product
    FullTransition,
}

/// Measurement-update strategy for
/// [QuaternionKalmanFilter::observe_position].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateForm {
    /// Three sequential rank-one updates, one per measurement axis (default)
    #[default]
    RankOneSequential,
    /// Single batch update with a 3×3 innovation inverse
    Batch,
}

/// Quaternion-manifold Kalman filter for orientation, gyro bias, position,
/// and velocity.
///
/// The filter owns its mean state and covariance exclusively; both are
/// mutated in place by [predict](Self::predict) and
/// [observe_position](Self::observe_position) and read through the
/// accessors. All arithmetic is over fixed-size stack-allocated types, so
/// every call is a bounded, deterministic computation with no per-call heap
/// allocation.
///
/// Single-threaded by design: there is no internal locking and the filter
/// assumes one logical driver issuing calls in strictly increasing timestamp
/// order. Callers needing shared access must serialize externally.
///
/// # Example
/// ```rust
/// use ins_qkf::kalman::{ProcessNoise, QuaternionKalmanFilter};
/// use ins_qkf::{StateVector, earth};
/// use nalgebra::{SMatrix, Vector3};
///
/// let mean = StateVector {
///     position: Vector3::new(earth::MEAN_RADIUS, 0.0, 0.0),
///     ..StateVector::default()
/// };
/// let covariance = SMatrix::<f64, 12, 12>::identity() * 1e-4;
/// let noise = ProcessNoise::new(
///     Vector3::repeat(1e-12),
///     Vector3::repeat(1e-8),
///     Vector3::repeat(1e-4),
/// );
/// let mut filter = QuaternionKalmanFilter::new(mean, covariance, noise);
///
/// // Resting on the x axis: specific force exactly cancels gravity
/// let accel = Vector3::new(earth::STANDARD_GRAVITY, 0.0, 0.0);
/// filter.predict(&Vector3::zeros(), &accel, 0.01);
/// filter.observe_position(
///     &Vector3::new(earth::MEAN_RADIUS, 0.0, 0.0),
///     &Vector3::repeat(25.0),
/// );
/// ```
#[derive(Clone, Debug)]
pub struct QuaternionKalmanFilter {
    avg_state: StateVector,
    cov: SMatrix<f64, 12, 12>,
    process_noise: ProcessNoise,
    predict_form: PredictForm,
    update_form: UpdateForm,
}

impl QuaternionKalmanFilter {
    /// Create a filter with the default strategies (block recursion,
    /// sequential rank-one updates).
    ///
    /// # Arguments
    /// * `initial_state` - Mean state prior, from an external alignment or
    ///   initialization source.
    /// * `initial_covariance` - 12×12 covariance prior over the tangent
    ///   error state; must be symmetric positive semi-definite.
    /// * `process_noise` - Noise densities, fixed for the filter's lifetime.
    pub fn new(
        initial_state: StateVector,
        initial_covariance: SMatrix<f64, 12, 12>,
        process_noise: ProcessNoise,
    ) -> QuaternionKalmanFilter {
        Self::with_forms(
            initial_state,
            initial_covariance,
            process_noise,
            PredictForm::default(),
            UpdateForm::default(),
        )
    }

    /// Create a filter with explicit propagation and update strategies.
    ///
    /// The non-default forms exist for cross-validation and regression
    /// testing; production use is expected to stick with the defaults.
    pub fn with_forms(
        initial_state: StateVector,
        initial_covariance: SMatrix<f64, 12, 12>,
        process_noise: ProcessNoise,
        predict_form: PredictForm,
        update_form: UpdateForm,
    ) -> QuaternionKalmanFilter {
        let filter = QuaternionKalmanFilter {
            avg_state: initial_state,
            cov: initial_covariance,
            process_noise,
            predict_form,
            update_form,
        };
        assert!(
            filter.invariants_met(),
            "QuaternionKalmanFilter::new: initial state or covariance violates invariants"
        );
        filter
    }

    /// Current mean orientation (attitude quaternion).
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.avg_state.orientation
    }
    /// Current mean gyroscope bias in rad/s.
    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.avg_state.gyro_bias
    }
    /// Current mean ECEF position in meters.
    pub fn position(&self) -> Vector3<f64> {
        self.avg_state.position
    }
    /// Current mean ECEF velocity in m/s.
    pub fn velocity(&self) -> Vector3<f64> {
        self.avg_state.velocity
    }
    /// Current mean state.
    pub fn state(&self) -> StateVector {
        self.avg_state
    }
    /// Current 12×12 tangent-space error covariance.
    pub fn covariance(&self) -> SMatrix<f64, 12, 12> {
        self.cov
    }

    /// Advance the mean state and covariance by `dt` seconds given one
    /// inertial sample.
    ///
    /// # Arguments
    /// * `gyro` - Measured angular rate in rad/s, body frame. The in-state
    ///   gyro bias is subtracted before integration.
    /// * `accel` - Measured specific force in m/s^2, body frame.
    /// * `dt` - Step length in seconds, strictly positive.
    ///
    /// # Panics
    /// If `dt` is not strictly positive, or if the post-update state fails
    /// the numerical sanity invariants (non-finite values, covariance
    /// asymmetry or negative diagonal beyond tolerance).
    pub fn predict(&mut self, gyro: &Vector3<f64>, accel: &Vector3<f64>, dt: f64) {
        assert!(dt > 0.0, "predict: dt must be strictly positive");
        self.linear_predict(gyro, accel, dt);
        assert!(self.invariants_met(), "predict: post-state invariants violated");
    }

    /// Convenience wrapper over [predict](Self::predict) taking an
    /// [ImuSample].
    pub fn predict_sample(&mut self, sample: &ImuSample, dt: f64) {
        self.predict(&sample.gyro, &sample.accel, dt);
    }

    fn linear_predict(&mut self, gyro: &Vector3<f64>, accel: &Vector3<f64>, dt: f64) {
        // The measured specific force, brought into the reference frame
        // through the current attitude.
        let accel_body = self.avg_state.orientation.inverse() * accel;
        // The acceleration due to gravity as observed by the sensor (a force
        // away from the earth).
        let accel_gravity = earth::gravity(&self.avg_state.position);
        // The net acceleration acting on the body of the vehicle in the ECEF
        // frame.
        let net_accel = accel_body - accel_gravity;

        // Only the two components of orientation error that do not spin
        // about the gravity vector couple into position and velocity error:
        // for an error axis r and gravity axis z, growing r produces error
        // proportional to |r||z| perpendicular to both, and none (to first
        // order) along z itself. The cross-product matrix of the negated
        // body-frame specific force captures exactly that coupling.
        let accel_cov = quaternion::cross(&(-accel_body));

        match self.predict_form {
            PredictForm::BlockRecursion => self.propagate_blockwise(&accel_cov, dt),
            PredictForm::FullTransition => self.propagate_full(&accel_cov, dt),
        }

        // Per-block process noise, scaled by the integration order of each
        // block.
        for i in 0..3 {
            self.cov[(BIAS + i, BIAS + i)] += self.process_noise.gyro_bias_random_walk[i] * dt;
            self.cov[(ORIENTATION + i, ORIENTATION + i)] +=
                self.process_noise.gyro_white_noise[i] * dt;
            self.cov[(POSITION + i, POSITION + i)] +=
                self.process_noise.accel_white_noise[i] * 0.5 * dt * dt;
            self.cov[(VELOCITY + i, VELOCITY + i)] += self.process_noise.accel_white_noise[i] * dt;
        }

        // Mean propagation: exact kinematics under constant rate and
        // constant acceleration over the step.
        let orientation =
            quaternion::exp(&((gyro - self.avg_state.gyro_bias) * dt)) * self.avg_state.orientation;
        let position =
            self.avg_state.position + self.avg_state.velocity * dt + 0.5 * net_accel * dt * dt;
        let velocity = self.avg_state.velocity + net_accel * dt;

        self.avg_state.position = position;
        self.avg_state.velocity = velocity;
        // Note: renormalization occurs during all measurement updates.
        self.avg_state.orientation = orientation;
    }

    /// Closed-form block recursion equivalent to `A * P * A^T`.
    ///
    /// Every block of the new covariance depends on *pre-update* values of
    /// other blocks, so the whole matrix is snapshotted before any block is
    /// written. Only the ten upper blocks are computed; the six below the
    /// diagonal are refreshed by transposing their mirrors instead of being
    /// recomputed, so the two triangles cannot drift apart.
    fn propagate_blockwise(&mut self, accel_cov: &Matrix3<f64>, dt: f64) {
        let cov = self.cov;
        let block = |r: usize, c: usize| cov.fixed_view::<3, 3>(r, c).into_owned();

        let dt_r = self.avg_state.orientation.inverse().to_rotation_matrix().into_inner() * dt;
        let dt_q = accel_cov * dt;

        let bias_bias = block(BIAS, BIAS);
        let bias_att = block(BIAS, ORIENTATION);
        let bias_pos = block(BIAS, POSITION);
        let bias_vel = block(BIAS, VELOCITY);
        let att_att = block(ORIENTATION, ORIENTATION);
        let att_pos = block(ORIENTATION, POSITION);
        let att_vel = block(ORIENTATION, VELOCITY);
        let pos_pos = block(POSITION, POSITION);
        let pos_vel = block(POSITION, VELOCITY);
        let vel_vel = block(VELOCITY, VELOCITY);

        let mut set = |r: usize, c: usize, m: Matrix3<f64>| {
            self.cov.fixed_view_mut::<3, 3>(r, c).copy_from(&m);
        };

        // Bias row: the bias block itself is driven only by process noise.
        set(BIAS, ORIENTATION, bias_att - bias_bias * dt_r.transpose());
        set(BIAS, POSITION, bias_pos + bias_vel * dt);
        set(BIAS, VELOCITY, bias_vel - bias_att * dt_q.transpose());
        // Orientation row
        set(
            ORIENTATION,
            ORIENTATION,
            att_att + dt_r * bias_bias * dt_r.transpose()
                - dt_r * bias_att
                - bias_att.transpose() * dt_r.transpose(),
        );
        set(
            ORIENTATION,
            POSITION,
            att_pos - dt_r * (bias_pos + bias_vel * dt) + att_vel * dt,
        );
        set(
            ORIENTATION,
            VELOCITY,
            att_vel - dt_r * (bias_vel - bias_att * dt_q.transpose()) - att_att * dt_q.transpose(),
        );
        // Position row
        set(
            POSITION,
            POSITION,
            pos_pos + pos_vel * dt + vel_vel * dt * dt + pos_vel.transpose() * dt,
        );
        set(
            POSITION,
            VELOCITY,
            pos_vel - att_pos.transpose() * dt_q.transpose() + vel_vel * dt
                - att_vel.transpose() * dt_q.transpose() * dt,
        );
        // Velocity row
        set(
            VELOCITY,
            VELOCITY,
            vel_vel + dt_q * att_att * dt_q.transpose()
                - dt_q * att_vel
                - att_vel.transpose() * dt_q.transpose(),
        );

        // Mirror the lower triangle to preserve exact symmetry.
        for (r, c) in [
            (ORIENTATION, BIAS),
            (POSITION, BIAS),
            (POSITION, ORIENTATION),
            (VELOCITY, BIAS),
            (VELOCITY, ORIENTATION),
            (VELOCITY, POSITION),
        ] {
            let upper = self.cov.fixed_view::<3, 3>(c, r).transpose();
            self.cov.fixed_view_mut::<3, 3>(r, c).copy_from(&upper);
        }
    }

    /// Generic transition-matrix sandwich `A * P * A^T`.
    ///
    /// Materializes the full 12×12 transition matrix; retained for
    /// cross-validation against [propagate_blockwise](Self::propagate_blockwise).
    /// The matrix here is exactly the generator of the block recursion: the
    /// position row carries no direct attitude coupling (see the module
    /// documentation), so the two forms differ only by round-off.
    fn propagate_full(&mut self, accel_cov: &Matrix3<f64>, dt: f64) {
        let mut a = SMatrix::<f64, 12, 12>::identity();
        let rot =
            self.avg_state.orientation.inverse().to_rotation_matrix().into_inner() * (-dt);
        a.fixed_view_mut::<3, 3>(ORIENTATION, BIAS).copy_from(&rot);
        a.fixed_view_mut::<3, 3>(POSITION, VELOCITY)
            .copy_from(&(Matrix3::identity() * dt));
        a.fixed_view_mut::<3, 3>(VELOCITY, ORIENTATION)
            .copy_from(&(-accel_cov * dt));
        self.cov = linalg::symmetrize(&(a * self.cov * a.transpose()));
    }

    /// Apply one absolute-position observation with a diagonal noise model.
    ///
    /// # Arguments
    /// * `pos` - Position fix in meters, same ECEF frame as the filter
    ///   position.
    /// * `p_error` - Diagonal of the measurement noise variance in m^2;
    ///   componentwise non-negative.
    ///
    /// # Panics
    /// If any variance component is negative, or if the post-update state
    /// fails the numerical sanity invariants.
    pub fn observe_position(&mut self, pos: &Vector3<f64>, p_error: &Vector3<f64>) {
        assert!(
            p_error.iter().all(|v| *v >= 0.0),
            "observe_position: measurement variance must be non-negative"
        );
        let residual = pos - self.avg_state.position;
        let innovation_cov = self.cov.fixed_view::<3, 3>(POSITION, POSITION).into_owned()
            + Matrix3::from_diagonal(p_error);

        let update = match self.update_form {
            UpdateForm::RankOneSequential => self.rank_one_update(&residual, &innovation_cov),
            UpdateForm::Batch => self.batch_update(&residual, &innovation_cov),
        };

        let rotor = self.avg_state.apply_kalman_vec_update(&update);
        self.counter_rotate_cov(&rotor);
        assert!(
            self.invariants_met(),
            "observe_position: post-state invariants violated"
        );
    }

    /// Sequential per-axis rank-one correction.
    ///
    /// Each axis divides the covariance column for that position state by
    /// the corresponding innovation diagonal to form a 12-vector gain, folds
    /// the *remaining* residual into the accumulated tangent update, and
    /// downdates the covariance by the rank-one outer product. Subtracting
    /// the already-applied component `update[POSITION + i]` is what lets
    /// three scalar updates stand in for the batch update when the
    /// innovation covariance is (approximately) diagonal after the earlier
    /// axes' corrections.
    fn rank_one_update(
        &mut self,
        residual: &Vector3<f64>,
        innovation_cov: &Matrix3<f64>,
    ) -> SVector<f64, 12> {
        let mut update = SVector::<f64, 12>::zeros();
        for i in 0..3 {
            let gain: SVector<f64, 12> =
                self.cov.fixed_view::<12, 1>(0, POSITION + i).into_owned()
                    / innovation_cov[(i, i)];
            update += &gain * (residual[i] - update[POSITION + i]);
            let row = self.cov.fixed_view::<1, 12>(POSITION + i, 0).into_owned();
            self.cov -= gain * row;
        }
        update
    }

    /// Batch 3×3 correction; exact, at the cost of an SPD inverse.
    fn batch_update(
        &mut self,
        residual: &Vector3<f64>,
        innovation_cov: &Matrix3<f64>,
    ) -> SVector<f64, 12> {
        let kalman_gain = self.cov.fixed_view::<12, 3>(0, POSITION).into_owned()
            * linalg::spd_inverse(innovation_cov);
        let update = kalman_gain * residual;
        let rows = self.cov.fixed_view::<3, 12>(POSITION, 0).into_owned();
        self.cov = linalg::symmetrize(&(self.cov - kalman_gain * rows));
        update
    }

    /// Re-express the orientation-error covariance in the tangent frame of
    /// the newly updated mean orientation.
    ///
    /// The tangent update rotated the mean by `rotor`; the stored
    /// orientation-error blocks were expressed relative to the *old* mean,
    /// so they are rotated by the inverse rotor. Equivalent to the sandwich
    /// $J P J^T$ with $J = \mathrm{diag}(I, R_{rotor}^{-1}, I, I)$.
    fn counter_rotate_cov(&mut self, rotor: &UnitQuaternion<f64>) {
        let r = rotor.inverse().to_rotation_matrix().into_inner();
        let cols = self.cov.fixed_view::<12, 3>(0, ORIENTATION).into_owned() * r.transpose();
        self.cov.fixed_view_mut::<12, 3>(0, ORIENTATION).copy_from(&cols);
        let rows = r * self.cov.fixed_view::<3, 12>(ORIENTATION, 0).into_owned();
        self.cov.fixed_view_mut::<3, 12>(ORIENTATION, 0).copy_from(&rows);
    }

    /// True when every component of the mean is finite.
    pub fn is_real(&self) -> bool {
        self.avg_state.is_real() && linalg::is_finite(&self.cov)
    }

    /// Numerical sanity invariants checked after every mutation: finite
    /// mean and covariance, quaternion norm within one normalization step of
    /// unity, covariance symmetric with non-negative diagonal (within
    /// tolerance).
    pub fn invariants_met(&self) -> bool {
        self.is_real()
            && (1.0 - self.avg_state.orientation.as_ref().norm()).abs() < f64::EPSILON.sqrt()
            && linalg::is_symmetric(&self.cov, COVARIANCE_TOLERANCE)
            && linalg::diagonal_nonnegative(&self.cov, COVARIANCE_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn resting_filter(covariance: SMatrix<f64, 12, 12>, noise: ProcessNoise) -> QuaternionKalmanFilter {
        let mean = StateVector {
            position: Vector3::new(earth::MEAN_RADIUS, 0.0, 0.0),
            ..StateVector::default()
        };
        QuaternionKalmanFilter::new(mean, covariance, noise)
    }

    fn gravity_canceling_accel() -> Vector3<f64> {
        Vector3::new(earth::STANDARD_GRAVITY, 0.0, 0.0)
    }

    #[test]
    fn zero_motion_leaves_mean_unchanged() {
        let mut filter = resting_filter(
            SMatrix::<f64, 12, 12>::identity() * 1e-4,
            ProcessNoise::default(),
        );
        let trace_before = filter.covariance().trace();
        filter.predict(&Vector3::zeros(), &gravity_canceling_accel(), 0.1);

        assert_eq!(filter.orientation(), UnitQuaternion::identity());
        assert_approx_eq!(filter.position()[0], earth::MEAN_RADIUS, 1e-9);
        assert_approx_eq!(filter.velocity().norm(), 0.0, 1e-12);
        // Covariance must not shrink under prediction
        assert!(filter.covariance().trace() >= trace_before);
    }

    #[test]
    fn bias_exactly_cancels_sensed_rotation() {
        let bias = Vector3::new(0.02, -0.01, 0.005);
        let mean = StateVector {
            gyro_bias: bias,
            position: Vector3::new(earth::MEAN_RADIUS, 0.0, 0.0),
            ..StateVector::default()
        };
        let mut filter = QuaternionKalmanFilter::new(
            mean,
            SMatrix::<f64, 12, 12>::identity() * 1e-6,
            ProcessNoise::default(),
        );
        filter.predict(&bias, &gravity_canceling_accel(), 0.5);
        assert_eq!(filter.orientation(), UnitQuaternion::identity());
    }

    #[test]
    fn gravity_canceling_prediction_grows_only_process_noise() {
        let noise = ProcessNoise::new(
            Vector3::repeat(1e-12),
            Vector3::repeat(1e-8),
            Vector3::repeat(1e-4),
        );
        let mut filter = resting_filter(SMatrix::<f64, 12, 12>::zeros(), noise);
        filter.predict(&Vector3::zeros(), &gravity_canceling_accel(), 1.0);

        assert_approx_eq!(filter.velocity().norm(), 0.0, 1e-12);
        assert_approx_eq!(filter.position()[0], earth::MEAN_RADIUS, 1e-9);

        let cov = filter.covariance();
        // Diagonal blocks carry exactly the integrated noise terms
        for i in 0..3 {
            assert_approx_eq!(cov[(BIAS + i, BIAS + i)], 1e-12, 1e-20);
            assert_approx_eq!(cov[(ORIENTATION + i, ORIENTATION + i)], 1e-8, 1e-16);
            assert_approx_eq!(cov[(POSITION + i, POSITION + i)], 0.5e-4, 1e-12);
            assert_approx_eq!(cov[(VELOCITY + i, VELOCITY + i)], 1e-4, 1e-12);
        }
        // No coupling growth from a zero prior
        for i in 0..12 {
            for j in 0..12 {
                if i != j {
                    assert_approx_eq!(cov[(i, j)], 0.0, 1e-15);
                }
            }
        }
    }

    #[test]
    fn covariance_stays_symmetric_under_prediction() {
        let mut filter = resting_filter(
            SMatrix::<f64, 12, 12>::identity() * 0.5,
            ProcessNoise::new(
                Vector3::repeat(1e-10),
                Vector3::repeat(1e-7),
                Vector3::repeat(1e-3),
            ),
        );
        let gyro = Vector3::new(0.01, -0.02, 0.03);
        let accel = Vector3::new(9.0, 0.5, -0.3);
        for _ in 0..200 {
            filter.predict(&gyro, &accel, 0.01);
        }
        let cov = filter.covariance();
        // Off-diagonal blocks are mirrored exactly; the diagonal blocks are
        // symmetric up to round-off in the triple products
        assert!(linalg::is_symmetric(&cov, 1e-10));
        assert!(linalg::diagonal_nonnegative(&cov, 0.0));
    }

    #[test]
    fn single_fix_pulls_position_toward_measurement() {
        let mut covariance = SMatrix::<f64, 12, 12>::identity() * 1e-6;
        for i in 0..3 {
            covariance[(POSITION + i, POSITION + i)] = 100.0;
        }
        let mut filter = QuaternionKalmanFilter::new(
            StateVector::default(),
            covariance,
            ProcessNoise::default(),
        );
        let trace_before = filter
            .covariance()
            .fixed_view::<3, 3>(POSITION, POSITION)
            .trace();

        filter.observe_position(&Vector3::new(10.0, 0.0, 0.0), &Vector3::repeat(1.0));

        // 100:1 prior-to-measurement variance ratio pulls ~99% of the way
        let x = filter.position()[0];
        assert!(x > 0.0 && x < 10.0);
        assert!(x > 5.0, "expected update to favor the measurement, got {x}");
        assert_approx_eq!(x, 10.0 * 100.0 / 101.0, 1e-6);

        let trace_after = filter
            .covariance()
            .fixed_view::<3, 3>(POSITION, POSITION)
            .trace();
        assert!(trace_after < trace_before);
    }

    #[test]
    fn counter_rotation_rebases_orientation_block() {
        // Build a filter with an anisotropic orientation block and a strong
        // position-orientation correlation, then force a large orientation
        // update through a position fix.
        let mut covariance = SMatrix::<f64, 12, 12>::identity() * 1e-4;
        covariance[(ORIENTATION, ORIENTATION)] = 0.04;
        covariance[(ORIENTATION + 1, ORIENTATION + 1)] = 0.01;
        covariance[(ORIENTATION + 2, ORIENTATION + 2)] = 0.02;
        for i in 0..3 {
            covariance[(POSITION + i, POSITION + i)] = 50.0;
            covariance[(ORIENTATION + i, POSITION + i)] = 0.5;
            covariance[(POSITION + i, ORIENTATION + i)] = 0.5;
        }
        let mut filter = QuaternionKalmanFilter::new(
            StateVector::default(),
            covariance,
            ProcessNoise::default(),
        );
        filter.observe_position(&Vector3::new(3.0, -2.0, 1.0), &Vector3::repeat(0.5));

        // The mean orientation moved, and the covariance stayed well formed
        assert!(filter.orientation() != UnitQuaternion::identity());
        let cov = filter.covariance();
        assert!(linalg::is_symmetric(&cov, 1e-9));
        assert!(linalg::diagonal_nonnegative(&cov, 1e-9));
    }

    #[test]
    #[should_panic(expected = "dt must be strictly positive")]
    fn predict_rejects_zero_dt() {
        let mut filter = resting_filter(
            SMatrix::<f64, 12, 12>::identity() * 1e-6,
            ProcessNoise::default(),
        );
        filter.predict(&Vector3::zeros(), &gravity_canceling_accel(), 0.0);
    }

    #[test]
    #[should_panic(expected = "variance must be non-negative")]
    fn observe_rejects_negative_variance() {
        let mut filter = resting_filter(
            SMatrix::<f64, 12, 12>::identity() * 1e-6,
            ProcessNoise::default(),
        );
        filter.observe_position(&Vector3::zeros(), &Vector3::new(1.0, -1.0, 1.0));
    }
}
