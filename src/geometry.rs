//! Rowland-circle geometry engine.
//!
//! Stateless functions mapping `(radius, Bragg angle)` to detector and
//! analyser-crystal poses. Everything here is pure `f64` math; no hardware,
//! no async.
//!
//! # Conventions
//!
//! - All angles in the public API are in **degrees**; lengths are in mm.
//! - Rotations are positive in the same sense as increasing Bragg angle.
//! - The detector arm rotation is measured from the incident-beam axis, so
//!   `detector_rotation(theta) = 2·theta` and the crystal rotation is
//!   `crystal_rotation(theta) = theta`: the detector always turns through
//!   twice the crystal angle.
//! - Detector position on the Rowland circle of radius `R`:
//!   `x = R·sin²θ`, `y = R·sinθ·cosθ` (equivalently `R·sin 2θ / 2`).
//!
//! # Domain errors
//!
//! Any inverse-trig argument with magnitude above 1 means the requested pose
//! is geometrically unreachable (for example a yaw correction for a crystal
//! too close to the source). These fail with
//! [`XesError::GeometryDomain`] instead of returning NaN; nothing in this
//! module clamps.

use crate::error::{XesError, XesResult};
use serde::{Deserialize, Serialize};

/// Rowland-circle parameters for one spectrometer.
///
/// The radius is re-read from the radius actuator before every coordinated
/// move; the value held here is the most recently observed one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowlandGeometry {
    /// Rowland-circle radius in mm. Always > 0.
    pub radius_mm: f64,
    /// Lower Bragg-angle bound in degrees.
    pub min_theta_deg: f64,
    /// Upper Bragg-angle bound in degrees.
    pub max_theta_deg: f64,
}

impl RowlandGeometry {
    /// Build a geometry, rejecting non-positive radius and inverted or
    /// out-of-range angle bounds.
    pub fn new(radius_mm: f64, min_theta_deg: f64, max_theta_deg: f64) -> XesResult<Self> {
        if !(radius_mm.is_finite() && radius_mm > 0.0) {
            return Err(XesError::Configuration(format!(
                "Rowland radius must be positive, got {radius_mm}"
            )));
        }
        if !(min_theta_deg < max_theta_deg) {
            return Err(XesError::Configuration(format!(
                "theta bounds inverted: [{min_theta_deg}, {max_theta_deg}]"
            )));
        }
        if min_theta_deg <= 0.0 || max_theta_deg >= 90.0 {
            return Err(XesError::Configuration(format!(
                "theta bounds must lie strictly inside (0, 90), got [{min_theta_deg}, {max_theta_deg}]"
            )));
        }
        Ok(Self {
            radius_mm,
            min_theta_deg,
            max_theta_deg,
        })
    }

    /// Whether a Bragg angle lies inside the configured bounds.
    pub fn contains(&self, theta_deg: f64) -> bool {
        theta_deg.is_finite()
            && theta_deg >= self.min_theta_deg
            && theta_deg <= self.max_theta_deg
    }

    /// Same bounds with a freshly read radius.
    pub fn with_radius(&self, radius_mm: f64) -> XesResult<Self> {
        Self::new(radius_mm, self.min_theta_deg, self.max_theta_deg)
    }
}

/// Full pose of one analyser crystal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrystalPose {
    /// Position along the beam axis, mm.
    pub x: f64,
    /// Vertical position, mm.
    pub y: f64,
    /// In-plane rotation, degrees.
    pub rotation: f64,
    /// Pitch correction, degrees (0 for the central crystal).
    pub pitch: f64,
}

/// `asin` with an explicit domain check.
///
/// Returns degrees. Non-finite or out-of-range arguments fail with
/// [`XesError::GeometryDomain`].
pub fn checked_asin_deg(value: f64, context: &'static str) -> XesResult<f64> {
    if !value.is_finite() || value.abs() > 1.0 {
        return Err(XesError::GeometryDomain { context, value });
    }
    Ok(value.asin().to_degrees())
}

/// Detector position `(x, y)` on the Rowland circle, mm.
pub fn detector_position(radius_mm: f64, theta_deg: f64) -> (f64, f64) {
    let theta = theta_deg.to_radians();
    let sin = theta.sin();
    let cos = theta.cos();
    (radius_mm * sin * sin, radius_mm * sin * cos)
}

/// Detector arm rotation, degrees: twice the Bragg angle.
pub fn detector_rotation(theta_deg: f64) -> f64 {
    2.0 * theta_deg
}

/// Central crystal rotation, degrees: equal to the Bragg angle, so the
/// detector rotation is exactly twice the crystal rotation.
pub fn crystal_rotation(theta_deg: f64) -> f64 {
    theta_deg
}

/// Recover the Bragg angle from raw detector-x and radius readbacks.
///
/// Inverse of [`detector_position`]: `theta = asin(sqrt(x / R))`. Used as a
/// diagnostic fallback when the committed axis position disagrees with the
/// rig; the result carries no stated accuracy bound.
pub fn bragg_from_detector_x(radius_mm: f64, detector_x: f64) -> XesResult<f64> {
    if !(radius_mm.is_finite() && radius_mm > 0.0) {
        return Err(XesError::GeometryDomain {
            context: "bragg from detector readback (radius)",
            value: radius_mm,
        });
    }
    let ratio = detector_x / radius_mm;
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return Err(XesError::GeometryDomain {
            context: "bragg from detector readback",
            value: ratio,
        });
    }
    checked_asin_deg(ratio.sqrt(), "bragg from detector readback")
}

/// Pose of a crystal displaced horizontally by `offset_mm` from the central
/// column.
///
/// The x/y position equals the central crystal's position; only rotation and
/// pitch pick up corrections:
///
/// - rotation correction: `atan(offset / chord)` where
///   `chord = 2R·sinθ` is the source-crystal distance, signed by the offset;
/// - pitch correction: the displaced crystal sits `hypot(chord, offset)` from
///   the source, so its effective Bragg angle shrinks to
///   `asin(sinθ · chord / hypot(chord, offset))`; the pitch tips the crystal
///   by the difference.
///
/// With `offset_mm = 0` this reduces to the central pose
/// `(x, y, theta, 0)`.
pub fn crystal_position(radius_mm: f64, theta_deg: f64, offset_mm: f64) -> XesResult<CrystalPose> {
    let (x, y) = detector_position(radius_mm, theta_deg);
    let theta = theta_deg.to_radians();
    let chord = 2.0 * radius_mm * theta.sin();
    if !(chord.is_finite() && chord > 0.0) {
        return Err(XesError::GeometryDomain {
            context: "crystal position (chord)",
            value: chord,
        });
    }
    let rotation = crystal_rotation(theta_deg) + (offset_mm / chord).atan().to_degrees();
    let reach = chord.hypot(offset_mm);
    let effective = checked_asin_deg(theta.sin() * chord / reach, "crystal pitch")?;
    Ok(CrystalPose {
        x,
        y,
        rotation,
        pitch: theta_deg - effective,
    })
}

/// Extra crystal rotation compensating for an off-centre source.
///
/// `asin(displacement · sin(separation) / x) × sign(horizontal_index)`.
/// Only yaw-corrected spectrometer variants use this term.
///
/// The `sign(horizontal_index)` multiplier is taken from the rig this engine
/// was commissioned on; re-verify the convention before reusing it on a
/// different spectrometer geometry.
pub fn yaw_correction(
    source_displacement_mm: f64,
    separation_angle_deg: f64,
    crystal_x_mm: f64,
    horizontal_index: i32,
) -> XesResult<f64> {
    let arg = source_displacement_mm * separation_angle_deg.to_radians().sin() / crystal_x_mm;
    let yaw = checked_asin_deg(arg, "yaw correction")?;
    Ok(yaw * f64::from(horizontal_index.signum()))
}
