//! Actuator groups: sets of axes positioned and limit-checked as one unit.
//!
//! The detector arm is a 3-axis group (x, y, rotation); each analyser crystal
//! is a 4-axis group (x, y, rotation, pitch). Groups carry a movable gate so
//! an operator can take a damaged crystal out of service without removing it
//! from the logical model: a gated-off group reports idle and treats move and
//! stop as no-ops.

use crate::capabilities::{ActuatorHandle, EnableHandle};
use crate::error::{XesError, XesResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// How long `stop()` waits for a group to report idle before giving up.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for actuators to settle.
pub const SETTLE_POLL: Duration = Duration::from_millis(20);

/// Validate a single scalar target against one actuator's limits.
///
/// Checks finiteness, then the optional lower/upper soft limits. Pure
/// check: never issues a command.
pub async fn validate_target(actuator: &ActuatorHandle, target: f64) -> XesResult<()> {
    if !target.is_finite() {
        return Err(XesError::validation(
            actuator.name(),
            format!("target {target} is not finite"),
        ));
    }
    if let Some(lower) = actuator.lower_limit().await? {
        if target < lower {
            return Err(XesError::validation(
                actuator.name(),
                format!("target {target} below lower limit {lower}"),
            ));
        }
    }
    if let Some(upper) = actuator.upper_limit().await? {
        if target > upper {
            return Err(XesError::validation(
                actuator.name(),
                format!("target {target} above upper limit {upper}"),
            ));
        }
    }
    Ok(())
}

/// An ordered set of actuators treated as one positioning unit.
pub struct ActuatorGroup {
    name: String,
    members: Vec<ActuatorHandle>,
    allowed_to_move: AtomicBool,
}

impl ActuatorGroup {
    /// Build a group over an ordered member list. The member order fixes the
    /// meaning of target vectors passed to [`ActuatorGroup::move_async`].
    pub fn new(name: impl Into<String>, members: Vec<ActuatorHandle>) -> XesResult<Self> {
        let name = name.into();
        if members.is_empty() {
            return Err(XesError::Configuration(format!(
                "actuator group '{name}' has no members"
            )));
        }
        Ok(Self {
            name,
            members,
            allowed_to_move: AtomicBool::new(true),
        })
    }

    /// Group name (used in logs and errors).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered member handles.
    pub fn members(&self) -> &[ActuatorHandle] {
        &self.members
    }

    /// Number of axes in the group.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current movable gate.
    pub fn allowed_to_move(&self) -> bool {
        self.allowed_to_move.load(Ordering::Acquire)
    }

    /// Set the movable gate. While false, moves and stops are no-ops and the
    /// group always reports idle.
    pub fn set_allowed_to_move(&self, allowed: bool) {
        self.allowed_to_move.store(allowed, Ordering::Release);
    }

    /// Validate a full target vector against member limits without issuing
    /// any command. Validation applies even to gated-off groups: targets are
    /// checked for the whole rig before any axis is commanded.
    pub async fn validate_targets(&self, targets: &[f64]) -> XesResult<()> {
        self.check_arity(targets)?;
        for (member, &target) in self.members.iter().zip(targets) {
            validate_target(member, target).await?;
        }
        Ok(())
    }

    /// Issue async moves for every member. No-op when gated off.
    ///
    /// Commands are issued to all members before returning; physical
    /// completion is concurrent and unordered.
    pub async fn move_async(&self, targets: &[f64]) -> XesResult<()> {
        if !self.allowed_to_move() {
            debug!(group = %self.name, "move ignored: group not allowed to move");
            return Ok(());
        }
        self.check_arity(targets)?;
        let commands = self
            .members
            .iter()
            .zip(targets)
            .map(|(member, &target)| member.move_async(target));
        futures::future::try_join_all(commands).await?;
        Ok(())
    }

    /// OR of member busy states; always false when gated off.
    pub async fn is_busy(&self) -> XesResult<bool> {
        if !self.allowed_to_move() {
            return Ok(false);
        }
        for member in &self.members {
            if member.is_busy().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stop every member, then block until the group reports idle.
    ///
    /// No-op when gated off. Failure to settle within [`SETTLE_TIMEOUT`]
    /// surfaces as [`XesError::Concurrency`].
    pub async fn stop(&self) -> XesResult<()> {
        if !self.allowed_to_move() {
            return Ok(());
        }
        for member in &self.members {
            member.stop().await?;
        }
        self.settle(SETTLE_TIMEOUT).await
    }

    /// Block until the group reports idle or the deadline passes.
    pub async fn settle(&self, timeout: Duration) -> XesResult<()> {
        let deadline = Instant::now() + timeout;
        while self.is_busy().await? {
            if Instant::now() >= deadline {
                return Err(XesError::Concurrency(format!(
                    "group '{}' did not settle within {timeout:?}",
                    self.name
                )));
            }
            sleep(SETTLE_POLL).await;
        }
        Ok(())
    }

    fn check_arity(&self, targets: &[f64]) -> XesResult<()> {
        if targets.len() != self.members.len() {
            return Err(XesError::validation(
                &self.name,
                format!(
                    "target vector has {} elements, group has {} members",
                    targets.len(),
                    self.members.len()
                ),
            ));
        }
        Ok(())
    }
}

/// One analyser crystal: a 4-axis stage group plus its place in the
/// horizontal crystal row.
pub struct AnalyserCrystal {
    horizontal_index: i32,
    group: ActuatorGroup,
    enable: Option<EnableHandle>,
}

impl AnalyserCrystal {
    /// Build a crystal from its four stage actuators, ordered
    /// (x, y, rotation, pitch).
    pub fn new(
        horizontal_index: i32,
        x: ActuatorHandle,
        y: ActuatorHandle,
        rotation: ActuatorHandle,
        pitch: ActuatorHandle,
    ) -> XesResult<Self> {
        let group = ActuatorGroup::new(
            format!("crystal[{horizontal_index:+}]"),
            vec![x, y, rotation, pitch],
        )?;
        Ok(Self {
            horizontal_index,
            group,
            enable: None,
        })
    }

    /// Attach the external enable positioner gating this crystal.
    pub fn with_enable(mut self, enable: EnableHandle) -> Self {
        self.enable = Some(enable);
        self
    }

    /// Signed column index: 0 for the central crystal, ±1 for its
    /// neighbours, and so on.
    pub fn horizontal_index(&self) -> i32 {
        self.horizontal_index
    }

    /// The underlying 4-axis stage group.
    pub fn group(&self) -> &ActuatorGroup {
        &self.group
    }

    /// Refresh the movable gate from the enable positioner.
    ///
    /// Defaults to movable when no positioner is wired. Returns the
    /// refreshed state.
    pub async fn refresh_movable(&self) -> XesResult<bool> {
        let allowed = match &self.enable {
            Some(enable) => enable.is_enabled().await?,
            None => true,
        };
        self.group.set_allowed_to_move(allowed);
        Ok(allowed)
    }
}
