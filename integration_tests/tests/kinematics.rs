mod common;

use bevy::math::Vec3;
use bridge_core::frames::{orientation_from_peer_angle, world_velocity};
use bridge_core::{MotionBranch, PhysicalBody};
use common::{approx_vec, test_bridge, vehicle, vehicles_payload, TestBridge};
use sync_proto::VehicleRecord;

fn push(bridge: &mut TestBridge, record: VehicleRecord) {
    bridge.handle_payload(&vehicles_payload(vec![record]));
}

#[test]
fn straight_motion_uses_decomposed_speeds() {
    let mut bridge = test_bridge();
    let mut record = vehicle("v1", [0.0, 0.0, 0.0], 30.0, "car", 5.0);
    record.vert_speed = 1.0;
    push(&mut bridge, record.clone());
    bridge.advance_clock();
    record.position = [0.25, 0.43, 0.0];
    push(&mut bridge, record);

    let summary = bridge.reconcile();
    assert_eq!(summary.straight, 1);

    let expected = world_velocity(orientation_from_peer_angle(30.0), 5.0, 1.0, 0.0);
    let body = bridge.registry().get("v1").unwrap().body();
    assert!(approx_vec(body.linear_velocity(), expected));
    assert_eq!(body.angular_velocity(), Vec3::ZERO);
}

#[test]
fn zero_interval_zeroes_motion_and_snaps_orientation() {
    let mut bridge = test_bridge();
    push(&mut bridge, vehicle("v1", [0.0, 0.0, 0.0], 0.0, "car", 5.0));
    // Same clock: the two samples share an arrival time.
    push(&mut bridge, vehicle("v1", [1.0, 0.0, 0.0], 120.0, "car", 5.0));

    let summary = bridge.reconcile();
    assert_eq!(summary.degenerate, 1);

    let proxy = bridge.registry().get("v1").unwrap();
    let body = proxy.body();
    assert_eq!(body.linear_velocity(), Vec3::ZERO);
    assert_eq!(body.angular_velocity(), Vec3::ZERO);
    assert_eq!(body.orientation(), proxy.motion().unwrap().current().orientation);
}

#[test]
fn quarter_turn_between_samples_is_classified_as_turning() {
    let mut bridge = test_bridge();
    bridge.handle_payload(
        r#"{"type":"vehicles","vehicles":[{"vehicle_id":"v1","position":[0,0,0],"angle":0,"type":"car","long_speed":5,"vert_speed":0,"lat_speed":0}]}"#,
    );
    bridge.advance_clock();
    bridge.handle_payload(
        r#"{"type":"vehicles","vehicles":[{"vehicle_id":"v1","position":[0.05,0.05,0],"angle":90,"type":"car","long_speed":5,"vert_speed":0,"lat_speed":0}]}"#,
    );

    assert!(90.0 >= bridge.reconciler().turn_threshold_deg());
    let proxy = bridge.registry().get("v1").unwrap();
    let motion = proxy.motion().unwrap();
    assert_eq!(bridge.reconciler().classify(motion), MotionBranch::Turning);

    let summary = bridge.reconcile();
    assert_eq!(summary.turning, 1);
    let body = bridge.registry().get("v1").unwrap().body();
    assert!(body.angular_velocity().length() > 0.0);
    // Position derivative over the 0.02 s interval, peer (x, y) -> local (x, z).
    assert!(approx_vec(body.linear_velocity(), Vec3::new(2.5, 0.0, 2.5)));
}

#[test]
fn residual_spin_fades_monotonically_then_snaps() {
    let mut bridge = test_bridge();
    push(&mut bridge, vehicle("v1", [0.0, 0.0, 0.0], 0.0, "car", 5.0));
    bridge.advance_clock();
    push(&mut bridge, vehicle("v1", [0.1, 0.1, 0.0], 45.0, "car", 5.0));
    assert_eq!(bridge.reconcile().turning, 1);
    let initial = bridge
        .registry()
        .get("v1")
        .unwrap()
        .body()
        .angular_velocity()
        .length();
    assert!(initial > 0.0);

    bridge.advance_clock();
    push(&mut bridge, vehicle("v1", [0.2, 0.2, 0.0], 45.0, "car", 5.0));

    let window_ticks = (bridge.reconciler().decay_window() / bridge.tick_seconds()).ceil() as usize;
    let mut previous = initial;
    for _ in 0..window_ticks + 2 {
        assert_eq!(bridge.reconcile().straight, 1);
        let speed = bridge
            .registry()
            .get("v1")
            .unwrap()
            .body()
            .angular_velocity()
            .length();
        assert!(speed <= previous, "{speed} > {previous}");
        previous = speed;
    }

    let proxy = bridge.registry().get("v1").unwrap();
    assert_eq!(proxy.body().angular_velocity(), Vec3::ZERO);
    assert_eq!(
        proxy.body().orientation(),
        proxy.motion().unwrap().current().orientation
    );
    assert_eq!(proxy.motion().unwrap().residual_remaining(), 0.0);
}

#[test]
fn position_is_blended_toward_latest_sample() {
    let mut bridge = test_bridge();
    push(&mut bridge, vehicle("v1", [0.0, 0.0, 0.0], 90.0, "car", 0.0));
    bridge.advance_clock();
    push(&mut bridge, vehicle("v1", [10.0, 0.0, 0.0], 90.0, "car", 0.0));

    bridge.reconcile();
    let x = bridge.registry().get("v1").unwrap().body().position().x;
    assert!((x - 0.2).abs() < 1e-4, "blend moved body to {x}");
}
