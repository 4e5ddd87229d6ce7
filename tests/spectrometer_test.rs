//! Coordinator behaviour: atomic validation, readback fallback, gating,
//! status fan-out and stop.

mod common;

use common::{RigOptions, TestRig, RADIUS};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use xes_spectrometer::spectrometer::AxisStatus;
use xes_spectrometer::{Actuator, XesError};

#[tokio::test]
async fn commanded_angle_reads_back_within_tolerance() {
    let rig = TestRig::new();
    rig.place_detector_at(74.5);

    rig.axis.set_position(75.0).await.unwrap();
    rig.wait_idle().await;

    let position = rig.axis.get_position().await.unwrap();
    assert!((position - 75.0).abs() < 1e-9, "got {position}");

    // Ideal actuators: the detector really is where the geometry says.
    let expected_x = RADIUS * 75f64.to_radians().sin().powi(2);
    let actual_x = rig.detector[0].move_calls().last().copied().unwrap();
    assert!((actual_x - expected_x).abs() < 1e-9);
    assert!((rig.detector[2].move_calls().last().unwrap() - 150.0).abs() < 1e-12);
}

#[tokio::test]
async fn small_moves_go_direct_and_large_moves_walk_waypoints() {
    let rig = TestRig::new();
    rig.place_detector_at(74.5);
    rig.axis.set_position(75.0).await.unwrap();
    rig.wait_idle().await;
    assert_eq!(rig.detector[2].move_calls().len(), 1);

    let rig = TestRig::new();
    rig.place_detector_at(70.0);
    rig.axis.set_position(75.0).await.unwrap();
    rig.wait_idle().await;

    // 5 degrees at the default 0.5-degree step: 11 monotonic waypoints,
    // ending exactly on target.
    let rotations = rig.detector[2].move_calls();
    assert_eq!(rotations.len(), 11);
    assert_eq!(*rotations.last().unwrap(), 150.0);
    for pair in rotations.windows(2) {
        assert!(pair[1] > pair[0]);
    }

    // Crystals jump directly: one command per axis.
    for crystal in &rig.crystals {
        for actuator in crystal {
            assert_eq!(actuator.move_calls().len(), 1, "{}", actuator.name());
        }
    }
}

#[tokio::test]
async fn one_limit_violation_prevents_every_command() {
    let rig = TestRig::with(RigOptions {
        // det_y target at 75 degrees is ~250mm; this limit makes it invalid
        det_y_limits: Some((0.0, 1.0)),
        ..Default::default()
    });
    rig.place_detector_at(74.5);

    let err = rig.axis.set_position(75.0).await.unwrap_err();
    assert!(matches!(err, XesError::Validation { .. }), "{err}");

    for mock in rig.all_mocks() {
        assert!(
            mock.move_calls().is_empty(),
            "'{}' was commanded despite the aborted move",
            mock.name()
        );
    }
}

#[tokio::test]
async fn target_outside_theta_bounds_is_rejected() {
    let rig = TestRig::new();
    rig.place_detector_at(74.5);
    assert!(rig.axis.set_position(90.0).await.is_err());
    assert!(rig.axis.set_position(f64::NAN).await.is_err());
    for mock in rig.all_mocks() {
        assert!(mock.move_calls().is_empty());
    }
}

#[tokio::test]
async fn gated_crystal_is_skipped_but_validated_rig_still_moves() {
    let rig = TestRig::with(RigOptions {
        minus_crystal_enabled: false,
        ..Default::default()
    });
    rig.place_detector_at(74.5);
    rig.axis.set_position(75.0).await.unwrap();
    rig.wait_idle().await;

    // crystal[-1] received nothing
    for actuator in &rig.crystals[0] {
        assert!(actuator.move_calls().is_empty(), "{}", actuator.name());
    }
    // the central crystal moved
    for actuator in &rig.crystals[1] {
        assert_eq!(actuator.move_calls().len(), 1);
    }

    // re-enabling brings it back on the next move
    rig.minus_enable.set(true);
    rig.axis.set_position(75.5).await.unwrap();
    rig.wait_idle().await;
    for actuator in &rig.crystals[0] {
        assert_eq!(actuator.move_calls().len(), 1);
    }
}

#[tokio::test]
async fn manual_displacement_switches_to_readback_estimate() {
    let rig = TestRig::new();
    rig.place_detector_at(74.5);
    rig.axis.set_position(75.0).await.unwrap();
    rig.wait_idle().await;
    assert_eq!(rig.axis.get_position().await.unwrap(), 75.0);

    // Someone moved the detector by hand: readbacks now say 72 degrees.
    rig.place_detector_at(72.0);
    let estimate = rig.axis.get_position().await.unwrap();
    assert!((estimate - 72.0).abs() < 1e-9, "got {estimate}");

    // Back in agreement: the committed angle is authoritative again.
    rig.place_detector_at(75.0);
    assert_eq!(rig.axis.get_position().await.unwrap(), 75.0);
}

#[tokio::test]
async fn cold_start_position_is_derived_from_readbacks() {
    let rig = TestRig::new();
    rig.place_detector_at(70.0);
    let position = rig.axis.get_position().await.unwrap();
    assert!((position - 70.0).abs() < 1e-9);
}

#[tokio::test]
async fn status_channel_reports_moving_then_idle() {
    let rig = TestRig::with(RigOptions {
        detector_settle: Duration::from_millis(150),
        ..Default::default()
    });
    rig.place_detector_at(74.5);
    let mut status = rig.axis.subscribe();
    assert_eq!(*status.borrow(), AxisStatus::Idle);

    rig.axis.set_position(75.0).await.unwrap();
    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), AxisStatus::Moving);
    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), AxisStatus::Idle);
    assert!(!rig.axis.is_busy().await.unwrap());
}

#[tokio::test]
async fn retarget_supersedes_a_running_trajectory() {
    let rig = TestRig::with(RigOptions {
        detector_settle: Duration::from_millis(50),
        ..Default::default()
    });
    rig.place_detector_at(70.0);
    rig.axis.set_position(75.0).await.unwrap();
    // let the stepper issue a few waypoints toward 75 degrees
    tokio::time::sleep(Duration::from_millis(120)).await;

    tokio_test::assert_ok!(rig.axis.set_position(71.0).await);
    rig.wait_idle().await;

    // The superseded walk never finishes: the last detector command belongs
    // to the new target, not the old one (2x71 = 142, not 150).
    let rotations = rig.detector[2].move_calls();
    let last = *rotations.last().unwrap();
    assert!((last - 142.0).abs() < 1e-9, "final rotation {last}");
    let position = rig.axis.get_position().await.unwrap();
    assert!((position - 71.0).abs() < 1e-9, "got {position}");
}

#[tokio::test]
async fn failed_issue_returns_the_status_channel_to_idle() {
    let rig = TestRig::new();
    rig.place_detector_at(74.5);
    let mut status = rig.axis.subscribe();

    rig.radius.fail_next_move();
    tokio_test::assert_err!(rig.axis.set_position(75.0).await);
    assert_eq!(*status.borrow_and_update(), AxisStatus::Idle);
    assert!(!rig.axis.is_busy().await.unwrap());

    // the axis recovers on the next good command
    rig.axis.set_position(75.0).await.unwrap();
    while *status.borrow_and_update() != AxisStatus::Idle {
        status.changed().await.unwrap();
    }
}

#[tokio::test]
async fn move_targets_follow_the_live_radius_readback() {
    let rig = TestRig::new();
    rig.radius.set_dial(900.0);
    rig.detector[0].set_dial(900.0 * 74.5f64.to_radians().sin().powi(2));

    rig.axis.set_position(75.0).await.unwrap();
    rig.wait_idle().await;

    let expected_x = 900.0 * 75f64.to_radians().sin().powi(2);
    let actual_x = rig.detector[0].move_calls().last().copied().unwrap();
    assert!((actual_x - expected_x).abs() < 1e-9, "got {actual_x}");
    assert_eq!(rig.radius.move_calls(), vec![900.0]);
}

#[tokio::test]
async fn stop_cancels_a_running_trajectory() {
    let rig = TestRig::with(RigOptions {
        detector_settle: Duration::from_millis(100),
        ..Default::default()
    });
    rig.place_detector_at(70.0);
    rig.axis.set_position(75.0).await.unwrap();
    assert!(rig.axis.is_busy().await.unwrap());
    tokio::time::sleep(Duration::from_millis(150)).await;

    rig.axis.stop().await.unwrap();
    assert!(!rig.axis.is_busy().await.unwrap());

    // The walk never completed: fewer than the 11 planned waypoints.
    assert!(rig.detector[2].move_calls().len() < 11);
    assert!(rig.radius.stop_calls() >= 1);
}
