//! The spectrometer coordinator: a virtual Bragg-angle axis.
//!
//! One logical coordinate drives the radial positioner, the detector arm and
//! every analyser-crystal stage. A move is computed and validated in full
//! before any actuator is commanded (atomic validate-then-commit); commands
//! are then issued asynchronously and the call returns without blocking.
//! Callers poll [`XesSpectrometer::is_busy`] or subscribe to the status
//! channel.
//!
//! # Position readback
//!
//! `get_position` normally returns the last committed angle. When the live
//! detector/radius readbacks disagree with it beyond the configured
//! tolerance (manual motion, restart, or a partially failed move), it
//! instead derives an estimate from the raw readbacks via
//! `theta = asin(sqrt(det_x / R))`, warning once per inconsistency episode.
//! The estimate is diagnostic: no accuracy bound is claimed, and the
//! committed state is never overwritten by it.
//!
//! # Concurrency
//!
//! The coordinator is a singleton virtual axis with a single logical writer.
//! Concurrent `set_position` calls from multiple callers are not supported
//! and need external serialization.

use crate::capabilities::ActuatorHandle;
use crate::config::SpectrometerSettings;
use crate::error::{XesError, XesResult};
use crate::geometry::{self, RowlandGeometry};
use crate::group::{ActuatorGroup, AnalyserCrystal, SETTLE_POLL, SETTLE_TIMEOUT};
use crate::trajectory::{spawn_stepper, Trajectory};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Coarse motion state published on the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisStatus {
    /// No coordinated move in progress.
    Idle,
    /// A coordinated move has been issued and the rig is settling.
    Moving,
}

impl std::fmt::Display for AxisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisStatus::Idle => write!(f, "idle"),
            AxisStatus::Moving => write!(f, "moving"),
        }
    }
}

/// Per-move mutable state, serialized behind one lock.
struct AxisState {
    committed_bragg: Option<f64>,
    warned_inconsistent: bool,
}

/// Complete, validated target set for one coordinated move.
struct MoveTargets {
    radius: f64,
    detector: [f64; 3],
    crystals: Vec<[f64; 4]>,
}

/// The coordinated spectrometer axis.
pub struct XesSpectrometer {
    settings: SpectrometerSettings,
    radius_actuator: ActuatorHandle,
    detector: Arc<ActuatorGroup>,
    crystals: Vec<Arc<AnalyserCrystal>>,
    state: Mutex<AxisState>,
    cancel: Arc<AtomicBool>,
    trajectory_running: Arc<AtomicBool>,
    stepper: Mutex<Option<JoinHandle<()>>>,
    status_tx: watch::Sender<AxisStatus>,
}

impl XesSpectrometer {
    /// Wire a spectrometer from its collaborators.
    ///
    /// The detector group must have exactly three axes (x, y, rotation) and
    /// at least one crystal must be present; anything else is a
    /// configuration error, fatal before the first move.
    pub fn new(
        settings: SpectrometerSettings,
        radius_actuator: ActuatorHandle,
        detector: ActuatorGroup,
        crystals: Vec<AnalyserCrystal>,
    ) -> XesResult<Self> {
        settings.validate()?;
        if detector.len() != 3 {
            return Err(XesError::Configuration(format!(
                "detector group needs 3 axes (x, y, rotation), got {}",
                detector.len()
            )));
        }
        if crystals.is_empty() {
            return Err(XesError::Configuration(
                "spectrometer needs at least one analyser crystal".into(),
            ));
        }
        let (status_tx, _) = watch::channel(AxisStatus::Idle);
        Ok(Self {
            settings,
            radius_actuator,
            detector: Arc::new(detector),
            crystals: crystals.into_iter().map(Arc::new).collect(),
            state: Mutex::new(AxisState {
                committed_bragg: None,
                warned_inconsistent: false,
            }),
            cancel: Arc::new(AtomicBool::new(false)),
            trajectory_running: Arc::new(AtomicBool::new(false)),
            stepper: Mutex::new(None),
            status_tx,
        })
    }

    /// The settings this axis was wired with.
    pub fn settings(&self) -> &SpectrometerSettings {
        &self.settings
    }

    /// Subscribe to status changes. The receiver sees the current value
    /// immediately and every transition thereafter.
    pub fn subscribe(&self) -> watch::Receiver<AxisStatus> {
        self.status_tx.subscribe()
    }

    /// Fresh Rowland radius from the radius actuator.
    pub async fn current_radius(&self) -> XesResult<f64> {
        let radius = self.radius_actuator.position().await?;
        if !(radius.is_finite() && radius > 0.0) {
            return Err(XesError::validation(
                self.radius_actuator.name(),
                format!("Rowland radius readback must be positive, got {radius}"),
            ));
        }
        Ok(radius)
    }

    /// Rowland geometry with the configured angle bounds and a freshly read
    /// radius. Refreshed before every coordinated move.
    pub async fn current_geometry(&self) -> XesResult<RowlandGeometry> {
        let radius = self.current_radius().await?;
        RowlandGeometry::new(
            radius,
            self.settings.min_theta_deg,
            self.settings.max_theta_deg,
        )
    }

    /// Last committed Bragg angle, or a readback-derived estimate when the
    /// rig disagrees with it (see module docs).
    pub async fn get_position(&self) -> XesResult<f64> {
        let mut state = self.state.lock().await;
        let derived = self.derive_bragg().await;
        match (state.committed_bragg, derived) {
            (Some(committed), Ok(estimate)) => {
                if (estimate - committed).abs() <= self.settings.position_tolerance_deg {
                    state.warned_inconsistent = false;
                    Ok(committed)
                } else {
                    if !state.warned_inconsistent {
                        warn!(
                            committed,
                            estimate,
                            "readbacks disagree with committed Bragg angle; \
                             reporting readback-derived estimate"
                        );
                        state.warned_inconsistent = true;
                    }
                    Ok(estimate)
                }
            }
            (Some(committed), Err(err)) => {
                if !state.warned_inconsistent {
                    warn!(
                        %err,
                        committed,
                        "detector readbacks unusable; reporting last committed angle"
                    );
                    state.warned_inconsistent = true;
                }
                Ok(committed)
            }
            (None, Ok(estimate)) => Ok(estimate),
            (None, Err(err)) => Err(err),
        }
    }

    /// Schedule a coordinated move to `target_deg` and return once all
    /// commands are issued.
    ///
    /// Runs the full move algorithm: refresh crystal gates, re-read the
    /// radius, pick direct-vs-trajectory for the detector, compute every
    /// target, validate every scalar, then commit and issue. Any validation
    /// failure aborts with zero actuator commands issued. A trajectory still
    /// walking to a previous target is cancelled and joined before the new
    /// commands go out, so a retarget always wins.
    pub async fn set_position(&self, target_deg: f64) -> XesResult<()> {
        let mut state = self.state.lock().await;

        // 1. refresh each crystal's movable gate from its enable positioner
        for crystal in &self.crystals {
            let allowed = crystal.refresh_movable().await?;
            if !allowed {
                debug!(crystal = crystal.group().name(), "crystal gated out of this move");
            }
        }

        // 2. fresh geometry (configured bounds, live radius)
        let geometry = self.current_geometry().await?;
        if !geometry.contains(target_deg) {
            return Err(XesError::validation(
                "bragg",
                format!(
                    "target {target_deg} outside [{}, {}]",
                    geometry.min_theta_deg, geometry.max_theta_deg
                ),
            ));
        }

        // 3. cheap inverse for the current angle; fall back to committed
        // state when readbacks are unusable (e.g. cold start)
        let current = match self.derive_bragg().await {
            Ok(estimate) => Some(estimate),
            Err(_) => state.committed_bragg,
        };

        // 4. compute and validate everything before touching any actuator
        let targets = self.compute_targets(&geometry, target_deg)?;
        crate::group::validate_target(&self.radius_actuator, targets.radius).await?;
        self.detector.validate_targets(&targets.detector).await?;
        for (crystal, crystal_targets) in self.crystals.iter().zip(&targets.crystals) {
            crystal.group().validate_targets(crystal_targets).await?;
        }
        let trajectory = match current {
            Some(current)
                if (target_deg - current).abs() > self.settings.trajectory_threshold_deg =>
            {
                Some(Trajectory::build(
                    geometry.radius_mm,
                    current,
                    target_deg,
                    self.settings.trajectory_step_deg,
                )?)
            }
            _ => None,
        };

        // 5. commit, then issue: radius, crystals, detector
        state.committed_bragg = Some(target_deg);
        state.warned_inconsistent = false;
        drop(state);

        info!(
            bragg = target_deg,
            radius = geometry.radius_mm,
            via_trajectory = trajectory.is_some(),
            "issuing coordinated move"
        );
        // A retarget supersedes a trajectory still walking to the previous
        // angle: cancel and join it before issuing anything new.
        self.join_stepper().await?;
        self.cancel.store(false, Ordering::Release);
        self.status_tx.send_replace(AxisStatus::Moving);

        if let Err(err) = self.issue(&targets, trajectory).await {
            self.status_tx.send_replace(AxisStatus::Idle);
            return Err(err);
        }
        self.spawn_status_watcher();
        Ok(())
    }

    /// Issue the committed move: radius, crystals, then the detector either
    /// directly or through a background trajectory walk.
    async fn issue(&self, targets: &MoveTargets, trajectory: Option<Trajectory>) -> XesResult<()> {
        self.radius_actuator.move_async(targets.radius).await?;
        for (crystal, crystal_targets) in self.crystals.iter().zip(&targets.crystals) {
            crystal.group().move_async(crystal_targets).await?;
        }
        match trajectory {
            Some(trajectory) => {
                let handle = spawn_stepper(
                    trajectory,
                    self.detector.clone(),
                    self.cancel.clone(),
                    self.trajectory_running.clone(),
                );
                *self.stepper.lock().await = Some(handle);
            }
            None => self.detector.move_async(&targets.detector).await?,
        }
        Ok(())
    }

    /// Cancel a still-running trajectory stepper and wait for it to exit.
    /// No-op when no stepper is stored.
    async fn join_stepper(&self) -> XesResult<()> {
        let handle = self.stepper.lock().await.take();
        let Some(handle) = handle else {
            return Ok(());
        };
        self.cancel.store(true, Ordering::Release);
        match timeout(SETTLE_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(XesError::Concurrency(format!(
                    "trajectory task failed: {err}"
                )))
            }
            Err(_) => {
                return Err(XesError::Concurrency(
                    "trajectory task did not finish after cancellation".into(),
                ))
            }
        }
        self.trajectory_running.store(false, Ordering::Release);
        Ok(())
    }

    /// OR of all constituent groups, the radial positioner and the
    /// trajectory-running flag.
    pub async fn is_busy(&self) -> XesResult<bool> {
        any_busy(
            &self.radius_actuator,
            &self.detector,
            &self.crystals,
            &self.trajectory_running,
        )
        .await
    }

    /// Cancel any trajectory, stop every group and block until the rig is
    /// idle.
    ///
    /// Cancellation is best-effort: the actuator moves already in flight are
    /// halted but not rolled back. Failure to settle surfaces as
    /// [`XesError::Concurrency`].
    pub async fn stop(&self) -> XesResult<()> {
        self.cancel.store(true, Ordering::Release);
        self.radius_actuator.stop().await?;
        settle_actuator(&self.radius_actuator, SETTLE_TIMEOUT).await?;
        for crystal in &self.crystals {
            crystal.group().stop().await?;
        }
        self.detector.stop().await?;
        self.join_stepper().await?;
        // The stepper may have issued one last waypoint before it observed
        // the cancellation flag; halt the detector again now that it is gone.
        self.detector.stop().await?;
        self.status_tx.send_replace(AxisStatus::Idle);
        Ok(())
    }

    /// Geometrically expected position for every actuator at a Bragg angle,
    /// keyed by actuator name. Reads the radius live; used by the
    /// calibration store.
    pub async fn expected_positions(&self, bragg_deg: f64) -> XesResult<BTreeMap<String, f64>> {
        let geometry = self.current_geometry().await?;
        let targets = self.compute_targets(&geometry, bragg_deg)?;
        let mut expected = BTreeMap::new();
        expected.insert(self.radius_actuator.name().to_owned(), targets.radius);
        for (member, value) in self.detector.members().iter().zip(targets.detector) {
            expected.insert(member.name().to_owned(), value);
        }
        for (crystal, crystal_targets) in self.crystals.iter().zip(&targets.crystals) {
            for (member, value) in crystal.group().members().iter().zip(crystal_targets) {
                expected.insert(member.name().to_owned(), *value);
            }
        }
        Ok(expected)
    }

    fn compute_targets(
        &self,
        rowland: &RowlandGeometry,
        bragg_deg: f64,
    ) -> XesResult<MoveTargets> {
        let (det_x, det_y) = geometry::detector_position(rowland.radius_mm, bragg_deg);
        let detector = [det_x, det_y, geometry::detector_rotation(bragg_deg)];
        let mut crystals = Vec::with_capacity(self.crystals.len());
        for crystal in &self.crystals {
            let index = crystal.horizontal_index();
            let offset = f64::from(index) * self.settings.crystal_spacing_mm;
            let pose = geometry::crystal_position(rowland.radius_mm, bragg_deg, offset)?;
            let mut rotation = pose.rotation;
            if let Some(yaw) = &self.settings.yaw {
                rotation += geometry::yaw_correction(
                    yaw.source_displacement_mm,
                    yaw.separation_angle_deg,
                    pose.x,
                    index,
                )?;
            }
            crystals.push([pose.x, pose.y, rotation, pose.pitch]);
        }
        Ok(MoveTargets {
            radius: rowland.radius_mm,
            detector,
            crystals,
        })
    }

    async fn derive_bragg(&self) -> XesResult<f64> {
        let radius = self.radius_actuator.position().await?;
        let det_x = self.detector.members()[0].position().await?;
        geometry::bragg_from_detector_x(radius, det_x)
    }

    fn spawn_status_watcher(&self) {
        let radius_actuator = self.radius_actuator.clone();
        let detector = self.detector.clone();
        let crystals = self.crystals.clone();
        let trajectory_running = self.trajectory_running.clone();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            loop {
                match any_busy(&radius_actuator, &detector, &crystals, &trajectory_running).await
                {
                    Ok(true) => sleep(SETTLE_POLL).await,
                    Ok(false) => {
                        status_tx.send_replace(AxisStatus::Idle);
                        break;
                    }
                    Err(err) => {
                        warn!(%err, "status watcher stopping on readback error");
                        status_tx.send_replace(AxisStatus::Idle);
                        break;
                    }
                }
            }
        });
    }
}

async fn any_busy(
    radius_actuator: &ActuatorHandle,
    detector: &ActuatorGroup,
    crystals: &[Arc<AnalyserCrystal>],
    trajectory_running: &AtomicBool,
) -> XesResult<bool> {
    if trajectory_running.load(Ordering::Acquire) {
        return Ok(true);
    }
    if radius_actuator.is_busy().await? {
        return Ok(true);
    }
    if detector.is_busy().await? {
        return Ok(true);
    }
    for crystal in crystals {
        if crystal.group().is_busy().await? {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn settle_actuator(actuator: &ActuatorHandle, limit: Duration) -> XesResult<()> {
    let deadline = Instant::now() + limit;
    while actuator.is_busy().await? {
        if Instant::now() >= deadline {
            return Err(XesError::Concurrency(format!(
                "actuator '{}' did not settle within {limit:?}",
                actuator.name()
            )));
        }
        sleep(SETTLE_POLL).await;
    }
    Ok(())
}
