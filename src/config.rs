//! Spectrometer settings.
//!
//! Deserializable with serde (TOML in practice, matching the beamline
//! configuration files), with per-field defaults and a semantic `validate`
//! pass run once at construction. Settings problems are fatal before the
//! first move.

use crate::error::{XesError, XesResult};
use serde::{Deserialize, Serialize};

/// Parameters of the optional yaw correction for off-centre sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YawSettings {
    /// Horizontal displacement of the source from the spectrometer axis, mm.
    pub source_displacement_mm: f64,
    /// Angular separation between source points, degrees.
    pub separation_angle_deg: f64,
}

/// Static settings for one spectrometer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrometerSettings {
    /// Identity recorded in calibration files and checked on load.
    pub name: String,

    /// Lower Bragg-angle bound, degrees.
    #[serde(default = "default_min_theta")]
    pub min_theta_deg: f64,

    /// Upper Bragg-angle bound, degrees.
    #[serde(default = "default_max_theta")]
    pub max_theta_deg: f64,

    /// Angle change above which the detector is walked through intermediate
    /// waypoints instead of jumping directly, degrees.
    #[serde(default = "default_trajectory_threshold")]
    pub trajectory_threshold_deg: f64,

    /// Waypoint spacing for trajectory moves, degrees.
    #[serde(default = "default_trajectory_step")]
    pub trajectory_step_deg: f64,

    /// Maximum disagreement between the committed Bragg angle and the
    /// readback-derived estimate before `get_position` falls back to the
    /// estimate, degrees.
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance_deg: f64,

    /// Horizontal pitch between analyser-crystal columns, mm. A crystal at
    /// horizontal index `i` sits at offset `i × crystal_spacing_mm`.
    #[serde(default = "default_crystal_spacing")]
    pub crystal_spacing_mm: f64,

    /// Yaw correction parameters; `None` disables the yaw term.
    #[serde(default)]
    pub yaw: Option<YawSettings>,
}

fn default_min_theta() -> f64 {
    55.0
}

fn default_max_theta() -> f64 {
    86.0
}

fn default_trajectory_threshold() -> f64 {
    1.0
}

fn default_trajectory_step() -> f64 {
    0.5
}

fn default_position_tolerance() -> f64 {
    0.05
}

fn default_crystal_spacing() -> f64 {
    137.0
}

impl SpectrometerSettings {
    /// Settings with all defaults for a named spectrometer.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_theta_deg: default_min_theta(),
            max_theta_deg: default_max_theta(),
            trajectory_threshold_deg: default_trajectory_threshold(),
            trajectory_step_deg: default_trajectory_step(),
            position_tolerance_deg: default_position_tolerance(),
            crystal_spacing_mm: default_crystal_spacing(),
            yaw: None,
        }
    }

    /// Parse settings from a TOML string and validate them.
    pub fn from_toml(source: &str) -> XesResult<Self> {
        let settings: Self = toml::from_str(source)
            .map_err(|e| XesError::Configuration(format!("settings parse error: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what deserialization can catch.
    pub fn validate(&self) -> XesResult<()> {
        if self.name.trim().is_empty() {
            return Err(XesError::Configuration(
                "spectrometer name must not be empty".into(),
            ));
        }
        // Bound checks are shared with RowlandGeometry; a placeholder radius
        // exercises them here, the coordinator rebuilds the geometry with the
        // live radius before each move.
        crate::geometry::RowlandGeometry::new(1.0, self.min_theta_deg, self.max_theta_deg)?;
        for (label, value) in [
            ("trajectory_threshold_deg", self.trajectory_threshold_deg),
            ("trajectory_step_deg", self.trajectory_step_deg),
            ("position_tolerance_deg", self.position_tolerance_deg),
            ("crystal_spacing_mm", self.crystal_spacing_mm),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(XesError::Configuration(format!(
                    "{label} must be positive, got {value}"
                )));
            }
        }
        if let Some(yaw) = &self.yaw {
            if !yaw.source_displacement_mm.is_finite() || !yaw.separation_angle_deg.is_finite() {
                return Err(XesError::Configuration(
                    "yaw settings must be finite".into(),
                ));
            }
        }
        Ok(())
    }
}
