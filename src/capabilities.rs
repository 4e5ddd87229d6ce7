//! Actuator capability traits.
//!
//! The motion core never talks to hardware directly; it consumes small,
//! focused capability traits and receives the concrete handles at
//! construction time. A beamline wiring layer (EPICS, Tango, simulation)
//! implements them however it likes:
//!
//! - A motor implements [`Actuator`].
//! - A motor whose controller supports a user/dial offset additionally
//!   implements [`OffsettableActuator`]. Absence of the trait means no
//!   offset support; there is no runtime type inspection.
//! - A soft positioner holding a crystal's in/out-of-service state
//!   implements [`EnablePositioner`].
//!
//! Each trait:
//! - is async (`#[async_trait]`) and thread-safe (`Send + Sync`),
//! - uses `anyhow::Result` for errors (the hardware seam is untyped; the
//!   motion core wraps failures into its own error type),
//! - focuses on one concern.
//!
//! # Contract
//!
//! - Positions are in device-native units (mm for translations, degrees for
//!   rotations).
//! - [`Actuator::move_async`] initiates motion and returns once the command
//!   is accepted; it must not block until completion.
//! - [`Actuator::position`] may be approximate while the device is moving.
//! - [`Actuator::stop`] issues the halt command; callers poll
//!   [`Actuator::is_busy`] to observe settling.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A positionable device: one physical axis of the spectrometer.
///
/// # Thread Safety
///
/// All methods take `&self`; implementations use interior mutability.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Stable identifier for this axis, used in validation errors and as the
    /// key in calibration records.
    fn name(&self) -> &str;

    /// Initiate a move to an absolute position.
    ///
    /// Returns once the command is accepted by the device; motion continues
    /// in the background. Errors if the device rejects the command.
    async fn move_async(&self, target: f64) -> Result<()>;

    /// Current position readback, in device-native units.
    async fn position(&self) -> Result<f64>;

    /// Whether the device reports motion in progress.
    async fn is_busy(&self) -> Result<bool>;

    /// Issue a halt command for any motion in progress.
    async fn stop(&self) -> Result<()>;

    /// Lower soft limit, if the device publishes one.
    async fn lower_limit(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Upper soft limit, if the device publishes one.
    async fn upper_limit(&self) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// An [`Actuator`] whose controller supports a user/dial offset.
///
/// Convention (EPICS motor record style): the reported position is
/// `dial + offset`, where `dial` is the raw encoder reading. The offset is
/// the additive correction reconciling the raw reading with the
/// geometrically expected position.
#[async_trait]
pub trait OffsettableActuator: Actuator {
    /// Current offset. `None` means the offset has never been set and is
    /// treated as 0 by the calibration store.
    async fn offset(&self) -> Result<Option<f64>>;

    /// Replace the offset. Takes effect on the next position readback.
    async fn set_offset(&self, offset: f64) -> Result<()>;
}

/// Readback for a crystal's in/out-of-service state.
///
/// Lets an operator exclude a damaged or disconnected crystal from motion
/// while keeping it in the logical model.
#[async_trait]
pub trait EnablePositioner: Send + Sync {
    /// Whether the associated stage group is allowed to move.
    async fn is_enabled(&self) -> Result<bool>;
}

/// Shared handle to an actuator.
pub type ActuatorHandle = Arc<dyn Actuator>;

/// Shared handle to an offset-capable actuator.
pub type OffsettableHandle = Arc<dyn OffsettableActuator>;

/// Shared handle to an enable positioner.
pub type EnableHandle = Arc<dyn EnablePositioner>;
