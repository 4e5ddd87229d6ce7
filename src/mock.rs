//! Mock actuators for tests and offline wiring.
//!
//! [`MockActuator`] records every command it receives, simulates settling
//! time, enforces optional soft limits, and supports error injection, so the
//! atomic validate-then-commit behaviour of the coordinator can be verified
//! by asserting zero recorded calls.

use crate::capabilities::{Actuator, EnablePositioner, OffsettableActuator};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct MockState {
    dial: f64,
    offset: Option<f64>,
    busy_until: Option<Instant>,
    move_calls: Vec<f64>,
    stop_calls: u32,
    fail_next_move: bool,
}

/// In-memory actuator with call recording and error injection.
///
/// Reported position follows the user/dial convention:
/// `position() = dial + offset`. Moves are instantaneous unless a settle
/// time is configured, in which case `is_busy` stays true for that long
/// after each move.
pub struct MockActuator {
    name: String,
    limits: Option<(f64, f64)>,
    settle_time: Duration,
    state: Mutex<MockState>,
}

impl MockActuator {
    /// New mock at position 0 with no limits and instant moves.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limits: None,
            settle_time: Duration::ZERO,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Set soft limits reported via the limit accessors.
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.limits = Some((lower, upper));
        self
    }

    /// Simulated settling time per move.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle_time = settle;
        self
    }

    /// Start at a given reported position.
    pub fn at_position(self, position: f64) -> Self {
        {
            let mut state = self.state.lock();
            let offset = state.offset.unwrap_or(0.0);
            state.dial = position - offset;
        }
        self
    }

    /// Overwrite the raw (dial) reading, e.g. to simulate manual motion or
    /// a mechanical disturbance the logical model does not know about.
    pub fn set_dial(&self, dial: f64) {
        self.state.lock().dial = dial;
    }

    /// Raw (dial) reading.
    pub fn dial(&self) -> f64 {
        self.state.lock().dial
    }

    /// Every target passed to `move_async`, in order.
    pub fn move_calls(&self) -> Vec<f64> {
        self.state.lock().move_calls.clone()
    }

    /// Number of `stop` commands received.
    pub fn stop_calls(&self) -> u32 {
        self.state.lock().stop_calls
    }

    /// Make the next `move_async` fail with a simulated hardware error.
    pub fn fail_next_move(&self) {
        self.state.lock().fail_next_move = true;
    }
}

#[async_trait]
impl Actuator for MockActuator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_async(&self, target: f64) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_next_move {
            state.fail_next_move = false;
            bail!("injected failure on '{}'", self.name);
        }
        state.move_calls.push(target);
        let offset = state.offset.unwrap_or(0.0);
        state.dial = target - offset;
        if !self.settle_time.is_zero() {
            state.busy_until = Some(Instant::now() + self.settle_time);
        }
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        let state = self.state.lock();
        Ok(state.dial + state.offset.unwrap_or(0.0))
    }

    async fn is_busy(&self) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .busy_until
            .is_some_and(|until| Instant::now() < until))
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        state.busy_until = None;
        Ok(())
    }

    async fn lower_limit(&self) -> Result<Option<f64>> {
        Ok(self.limits.map(|(lower, _)| lower))
    }

    async fn upper_limit(&self) -> Result<Option<f64>> {
        Ok(self.limits.map(|(_, upper)| upper))
    }
}

#[async_trait]
impl OffsettableActuator for MockActuator {
    async fn offset(&self) -> Result<Option<f64>> {
        Ok(self.state.lock().offset)
    }

    async fn set_offset(&self, offset: f64) -> Result<()> {
        self.state.lock().offset = Some(offset);
        Ok(())
    }
}

/// Settable enable positioner for tests.
pub struct MockEnable {
    enabled: AtomicBool,
}

impl MockEnable {
    /// New positioner in the given state.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Flip the state.
    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

#[async_trait]
impl EnablePositioner for MockEnable {
    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled.load(Ordering::Acquire))
    }
}
