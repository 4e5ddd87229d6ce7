//! Detector trajectory generation and the background stepper.
//!
//! The detector's path across a large Bragg-angle change is strongly
//! nonlinear, so it is walked through intermediate waypoints; the crystals
//! jump directly to their final poses. Waypoints are computed up front and
//! checked for finiteness before the first command: an invalid trajectory is
//! never partially executed.

use crate::error::{XesError, XesResult};
use crate::geometry;
use crate::group::{ActuatorGroup, SETTLE_TIMEOUT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One detector waypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    /// Bragg angle this waypoint corresponds to, degrees.
    pub bragg_deg: f64,
    /// Detector x target, mm.
    pub x: f64,
    /// Detector y target, mm.
    pub y: f64,
    /// Detector arm rotation target (2θ), degrees.
    pub two_theta: f64,
}

/// An ordered waypoint sequence from the current to the target angle.
#[derive(Debug, Clone)]
pub struct Trajectory {
    waypoints: Vec<Waypoint>,
}

impl Trajectory {
    /// Build a trajectory from `current_deg` to `target_deg` with the given
    /// waypoint spacing.
    ///
    /// Generates `N = round(|Δ|/step)` angles starting at the current angle
    /// and stepping by the signed step, then appends the exact target, so the
    /// sequence is monotonic, starts at the current angle and ends exactly on
    /// target. Every waypoint's detector pose must be finite or the whole
    /// trajectory is rejected.
    pub fn build(
        radius_mm: f64,
        current_deg: f64,
        target_deg: f64,
        step_deg: f64,
    ) -> XesResult<Self> {
        if !(step_deg.is_finite() && step_deg > 0.0) {
            return Err(XesError::validation(
                "trajectory",
                format!("step must be positive, got {step_deg}"),
            ));
        }
        let delta = target_deg - current_deg;
        if !delta.is_finite() {
            return Err(XesError::validation(
                "trajectory",
                format!("angle span {current_deg} -> {target_deg} is not finite"),
            ));
        }
        let count = (delta.abs() / step_deg).round() as usize;
        let signed_step = step_deg.copysign(delta);

        let mut waypoints = Vec::with_capacity(count + 1);
        for k in 0..count {
            waypoints.push(Self::waypoint(radius_mm, current_deg + k as f64 * signed_step)?);
        }
        waypoints.push(Self::waypoint(radius_mm, target_deg)?);
        Ok(Self { waypoints })
    }

    fn waypoint(radius_mm: f64, bragg_deg: f64) -> XesResult<Waypoint> {
        let (x, y) = geometry::detector_position(radius_mm, bragg_deg);
        let two_theta = geometry::detector_rotation(bragg_deg);
        if !(x.is_finite() && y.is_finite() && two_theta.is_finite()) {
            return Err(XesError::GeometryDomain {
                context: "trajectory waypoint",
                value: bragg_deg,
            });
        }
        Ok(Waypoint {
            bragg_deg,
            x,
            y,
            two_theta,
        })
    }

    /// The waypoint sequence, in execution order.
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }
}

/// Walk the detector through a trajectory on a background task.
///
/// Before each waypoint the task waits for the detector group to report
/// idle, then checks the shared cancellation flag, then issues the next
/// move. Cancellation is best-effort: it is observed only between waypoints
/// and does not roll back the actuator move already in flight. `running` is
/// cleared when the walk ends for any reason.
pub(crate) fn spawn_stepper(
    trajectory: Trajectory,
    detector: Arc<ActuatorGroup>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    running.store(true, Ordering::Release);
    tokio::spawn(async move {
        let total = trajectory.waypoints().len();
        for (index, waypoint) in trajectory.waypoints().iter().enumerate() {
            if let Err(err) = detector.settle(SETTLE_TIMEOUT).await {
                warn!(%err, "trajectory aborted waiting for detector");
                break;
            }
            if cancel.load(Ordering::Acquire) {
                info!(completed = index, total, "trajectory cancelled");
                break;
            }
            debug!(
                index,
                total,
                bragg = waypoint.bragg_deg,
                "issuing trajectory waypoint"
            );
            if let Err(err) = detector
                .move_async(&[waypoint.x, waypoint.y, waypoint.two_theta])
                .await
            {
                warn!(%err, index, "trajectory aborted on actuator error");
                break;
            }
        }
        running.store(false, Ordering::Release);
    })
}
