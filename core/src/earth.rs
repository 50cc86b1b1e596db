//! Earth constants and the radial gravity model
//!
//! The filter navigates in an Earth-centered Earth-fixed (ECEF) Cartesian
//! frame, so the only geophysical model the core needs is the direction and
//! magnitude of gravitational acceleration at the vehicle's position. A
//! spherical model is used: gravity acts along the line from the Earth's
//! center through the vehicle with a fixed standard magnitude. Ellipsoidal
//! corrections (Somigliana and friends) are well below the noise floor of the
//! MEMS-grade sensors this filter targets and are deliberately left out.
//!
//! Geodetic seeding of simulations (WGS84 latitude/longitude/altitude to
//! ECEF) is handled by the [`nav-types`](https://crates.io/crates/nav-types)
//! crate; see [crate::sim].

use nalgebra::Vector3;

/// Standard gravitational acceleration magnitude in $m/s^2$
pub const STANDARD_GRAVITY: f64 = 9.81;
/// Earth's mean radius in meters
pub const MEAN_RADIUS: f64 = 6371000.0;
/// Earth's rotation rate in rad/s ($\omega_{ie}$)
pub const RATE: f64 = 7.2921159e-5;

/// The gravitational acceleration observed by an accelerometer at `position`.
///
/// This is the specific force *away* from the Earth that a resting sensor
/// reports, i.e. the reaction to gravity: a unit vector from the Earth's
/// center through `position`, scaled by [STANDARD_GRAVITY]. Subtracting it
/// from the reference-frame specific force yields the net acceleration acting
/// on the vehicle.
///
/// # Arguments
/// * `position` - ECEF position in meters. Must not be the exact origin.
///
/// # Returns
/// The sensed gravitational reaction vector in $m/s^2$, ECEF frame.
///
/// # Example
/// ```rust
/// use ins_qkf::earth;
/// use nalgebra::Vector3;
/// let g = earth::gravity(&Vector3::new(earth::MEAN_RADIUS, 0.0, 0.0));
/// assert!((g[0] - earth::STANDARD_GRAVITY).abs() < 1e-12);
/// ```
pub fn gravity(position: &Vector3<f64>) -> Vector3<f64> {
    position.normalize() * STANDARD_GRAVITY
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn gravity_points_radially_outward() {
        let position = Vector3::new(0.0, 0.0, MEAN_RADIUS + 1000.0);
        let g = gravity(&position);
        assert_approx_eq!(g[0], 0.0, 1e-12);
        assert_approx_eq!(g[1], 0.0, 1e-12);
        assert_approx_eq!(g[2], STANDARD_GRAVITY, 1e-12);
    }

    #[test]
    fn gravity_magnitude_is_standard() {
        let position = Vector3::new(1.2e6, -3.4e6, 5.1e6);
        assert_approx_eq!(gravity(&position).norm(), STANDARD_GRAVITY, 1e-12);
    }
}
