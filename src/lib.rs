//! Motion core for a Rowland-circle X-ray emission spectrometer.
//!
//! A single logical Bragg-angle coordinate drives a detector arm and a row
//! of analyser-crystal stages: this crate turns that coordinate into
//! validated, coordinated, asynchronous actuator commands, and keeps the
//! per-actuator offset calibration that reconciles raw readings with the
//! geometry.
//!
//! ## Modules
//!
//! - [`capabilities`]: the async actuator traits the crate consumes;
//!   hardware adapters implement them and hand in `Arc<dyn _>` handles.
//! - [`geometry`]: pure Rowland-circle math mapping `(radius, theta)` to
//!   detector and crystal poses.
//! - [`energy`]: Bragg-law energy↔angle conversion and the layered
//!   [`energy::EnergyAxis`].
//! - [`group`]: actuator groups moved and limit-checked as one unit, with a
//!   movable gate for out-of-service crystals.
//! - [`spectrometer`]: the coordinator virtual axis with atomic
//!   validate-then-commit moves.
//! - [`trajectory`]: waypoint generation and the background detector
//!   stepper.
//! - [`calibration`]: the offset store and its JSON record format.
//! - [`config`]: deserializable settings.
//! - [`mock`]: recording mock actuators for tests and offline wiring.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xes_spectrometer::config::SpectrometerSettings;
//! use xes_spectrometer::group::{ActuatorGroup, AnalyserCrystal};
//! use xes_spectrometer::mock::MockActuator;
//! use xes_spectrometer::spectrometer::XesSpectrometer;
//!
//! # async fn example() -> xes_spectrometer::XesResult<()> {
//! let actuator =
//!     |name: &str| Arc::new(MockActuator::new(name)) as xes_spectrometer::ActuatorHandle;
//! let detector = ActuatorGroup::new(
//!     "detector",
//!     vec![actuator("det_x"), actuator("det_y"), actuator("det_rot")],
//! )?;
//! let crystal = AnalyserCrystal::new(
//!     0,
//!     actuator("xtal0_x"),
//!     actuator("xtal0_y"),
//!     actuator("xtal0_rot"),
//!     actuator("xtal0_pitch"),
//! )?;
//! let radius = Arc::new(MockActuator::new("radius").at_position(1000.0));
//!
//! let axis = XesSpectrometer::new(
//!     SpectrometerSettings::named("xes-1"),
//!     radius,
//!     detector,
//!     vec![crystal],
//! )?;
//! axis.set_position(75.0).await?;
//! while axis.is_busy().await? {
//!     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod capabilities;
pub mod config;
pub mod energy;
pub mod error;
pub mod geometry;
pub mod group;
pub mod mock;
pub mod spectrometer;
pub mod trajectory;

pub use calibration::{CalibrationMetadata, CalibrationRecord, OffsetStore};
pub use capabilities::{
    Actuator, ActuatorHandle, EnableHandle, EnablePositioner, OffsettableActuator,
    OffsettableHandle,
};
pub use config::{SpectrometerSettings, YawSettings};
pub use energy::{CrystalCut, CrystalMaterial, EnergyAxis};
pub use error::{XesError, XesResult};
pub use geometry::RowlandGeometry;
pub use group::{ActuatorGroup, AnalyserCrystal};
pub use spectrometer::{AxisStatus, XesSpectrometer};
pub use trajectory::Trajectory;
