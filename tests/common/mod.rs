//! Shared mock rig for integration tests: one radius positioner, a 3-axis
//! detector arm and three analyser crystals at horizontal indices -1, 0, +1.
#![allow(dead_code)] // each test binary uses a different slice of the rig

use std::sync::Arc;
use std::time::Duration;
use xes_spectrometer::config::SpectrometerSettings;
use xes_spectrometer::group::{ActuatorGroup, AnalyserCrystal};
use xes_spectrometer::mock::{MockActuator, MockEnable};
use xes_spectrometer::spectrometer::XesSpectrometer;
use xes_spectrometer::{ActuatorHandle, OffsettableHandle};

pub const RADIUS: f64 = 1000.0;

/// Route coordinator tracing to the test writer. Safe to call from every
/// test; only the first initialization sticks.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub struct RigOptions {
    pub det_y_limits: Option<(f64, f64)>,
    pub minus_crystal_enabled: bool,
    pub detector_settle: Duration,
    pub settings: SpectrometerSettings,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            det_y_limits: None,
            minus_crystal_enabled: true,
            detector_settle: Duration::ZERO,
            settings: SpectrometerSettings::named("xes-1"),
        }
    }
}

pub struct TestRig {
    pub axis: Arc<XesSpectrometer>,
    pub radius: Arc<MockActuator>,
    pub detector: Vec<Arc<MockActuator>>,
    /// Outer index: crystal (-1, 0, +1); inner: x, y, rotation, pitch.
    pub crystals: Vec<Vec<Arc<MockActuator>>>,
    pub minus_enable: Arc<MockEnable>,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with(RigOptions::default())
    }

    pub fn with(options: RigOptions) -> Self {
        init_tracing();
        let radius = Arc::new(MockActuator::new("radius").at_position(RADIUS));

        let det_x = Arc::new(MockActuator::new("det_x").with_settle_time(options.detector_settle));
        let det_y = {
            let mut mock = MockActuator::new("det_y").with_settle_time(options.detector_settle);
            if let Some((lower, upper)) = options.det_y_limits {
                mock = mock.with_limits(lower, upper);
            }
            Arc::new(mock)
        };
        let det_rot =
            Arc::new(MockActuator::new("det_rot").with_settle_time(options.detector_settle));
        let detector = vec![det_x, det_y, det_rot];
        let detector_group = ActuatorGroup::new(
            "detector",
            detector
                .iter()
                .map(|m| m.clone() as ActuatorHandle)
                .collect(),
        )
        .unwrap();

        let minus_enable = Arc::new(MockEnable::new(options.minus_crystal_enabled));
        let mut crystals = Vec::new();
        let mut crystal_stages = Vec::new();
        for index in [-1i32, 0, 1] {
            let tag = match index {
                -1 => "m1",
                0 => "0",
                _ => "p1",
            };
            let axes: Vec<Arc<MockActuator>> = ["x", "y", "rot", "pitch"]
                .iter()
                .map(|axis| Arc::new(MockActuator::new(format!("xtal{tag}_{axis}"))))
                .collect();
            let mut crystal = AnalyserCrystal::new(
                index,
                axes[0].clone(),
                axes[1].clone(),
                axes[2].clone(),
                axes[3].clone(),
            )
            .unwrap();
            if index == -1 {
                crystal = crystal.with_enable(minus_enable.clone());
            }
            crystal_stages.push(crystal);
            crystals.push(axes);
        }

        let axis = Arc::new(
            XesSpectrometer::new(
                options.settings,
                radius.clone(),
                detector_group,
                crystal_stages,
            )
            .unwrap(),
        );

        Self {
            axis,
            radius,
            detector,
            crystals,
            minus_enable,
        }
    }

    /// Place the raw detector readbacks at the pose for a Bragg angle so the
    /// coordinator's cheap inverse sees the rig there.
    pub fn place_detector_at(&self, theta_deg: f64) {
        let theta = theta_deg.to_radians();
        self.detector[0].set_dial(RADIUS * theta.sin() * theta.sin());
        self.detector[1].set_dial(RADIUS * theta.sin() * theta.cos());
        self.detector[2].set_dial(2.0 * theta_deg);
    }

    /// Every mock in the rig, for zero-commands assertions.
    pub fn all_mocks(&self) -> Vec<Arc<MockActuator>> {
        let mut mocks = vec![self.radius.clone()];
        mocks.extend(self.detector.iter().cloned());
        for crystal in &self.crystals {
            mocks.extend(crystal.iter().cloned());
        }
        mocks
    }

    /// The same mocks as offsettable handles, for the calibration store.
    pub fn offsettable_handles(&self) -> Vec<OffsettableHandle> {
        self.all_mocks()
            .into_iter()
            .map(|m| m as OffsettableHandle)
            .collect()
    }

    pub async fn wait_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.axis.is_busy().await.unwrap() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "rig did not settle within 5s"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
