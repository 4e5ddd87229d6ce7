//! Custom error types for the spectrometer motion core.
//!
//! This module defines the primary error type, [`XesError`], using the
//! `thiserror` crate. Every fallible operation in the crate reports through
//! it, which keeps recovery decisions in one place.
//!
//! ## Error Categories
//!
//! Errors fall into a few broad categories with distinct recovery stories:
//!
//! 1. **`Configuration`** - a required collaborator is unwired or a settings
//!    value is semantically invalid. Caught at construction time, fatal before
//!    the first move. Recovery: fix the wiring or settings and rebuild.
//!
//! 2. **`Validation`** - a computed target is outside an actuator's limits or
//!    non-finite. The move is aborted before any actuator is touched, so the
//!    rig is untouched and the error is fully recoverable: pick a new target.
//!
//! 3. **`GeometryDomain`** - an inverse-trig argument fell outside [-1, 1],
//!    meaning the requested pose is geometrically unreachable. Never clamped,
//!    never NaN; the offending value is carried for diagnostics.
//!
//! 4. **`Concurrency`** - actuators failed to settle while `stop()` waited
//!    for them. Fatal to the move in flight; the rig may still be moving.
//!
//! 5. **`Calibration`** - calibration record I/O: missing file, malformed or
//!    incomplete metadata, or an identity mismatch. Always raised before any
//!    actuator offset is mutated.
//!
//! Actuator-level failures from the hardware seam (`anyhow::Error`) convert
//! via `#[from]` so driver errors propagate with `?`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type XesResult<T> = std::result::Result<T, XesError>;

/// Primary error type for the spectrometer motion core.
#[derive(Error, Debug)]
pub enum XesError {
    /// A required collaborator is missing or a settings value is invalid.
    ///
    /// Raised at construction/wiring time, before the first move.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A computed target failed limit or finiteness validation.
    ///
    /// No actuator command was issued for the offending move.
    #[error("validation failed for '{actuator}': {reason}")]
    Validation {
        /// Name of the actuator whose target failed validation.
        actuator: String,
        /// Human-readable description of the violation.
        reason: String,
    },

    /// An inverse-trig argument was outside [-1, 1] (or otherwise not a
    /// usable number): the requested pose is geometrically unreachable.
    #[error("geometry domain error in {context}: argument {value} outside [-1, 1]")]
    GeometryDomain {
        /// Which geometric computation rejected the argument.
        context: &'static str,
        /// The offending inverse-trig argument.
        value: f64,
    },

    /// Actuators failed to settle while being waited on (e.g. during
    /// `stop()`), or a background motion task could not be joined.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Calibration record I/O failure: missing file, malformed record,
    /// missing metadata, or spectrometer identity mismatch.
    ///
    /// Always raised before any actuator offset is mutated.
    #[error("calibration record error: {0}")]
    Calibration(String),

    /// An actuator-level failure surfaced from the hardware seam.
    #[error("actuator error: {0}")]
    Actuator(#[from] anyhow::Error),
}

impl XesError {
    /// Shorthand for a [`XesError::Validation`] with formatted reason.
    pub fn validation(actuator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            actuator: actuator.into(),
            reason: reason.into(),
        }
    }
}
