//! Pathfinder binding against an in-process MPM controller simulator.
//! These tests exercise the real HTTP sub-protocol end to end: discovery,
//! polled movement, insertion, stop, and the broker-level registry checks.

use std::sync::Arc;

use ephys_link_server::bindings::pathfinder::PathfinderBinding;
use ephys_link_server::bindings::PlatformBinding;
use ephys_link_server::platform::Platform;
use link_types::Vec4;
use mpm_simulator::{router, shared, Simulator};
use tokio::sync::mpsc;

async fn start_simulator(probes: usize, posterior_angle: f64) -> String {
    let simulator = shared(Simulator::new(probes, posterior_angle));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(simulator)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn discovers_the_probe_array() {
    let url = start_simulator(3, 0.0).await;
    let binding = PathfinderBinding::with_url(url);

    assert_eq!(binding.get_manipulators().await.unwrap(), vec!["A", "B", "C"]);
    assert_eq!(binding.get_axes_count().await.unwrap(), 3);
    assert_eq!(binding.get_shank_count("B").await.unwrap(), 1);

    // The depth axis mirrors the stage axis parallel to the probe.
    let position = binding.get_position("A").await.unwrap();
    assert_eq!(position.w, position.z);
}

#[tokio::test]
async fn angles_fold_in_the_posterior_offset() {
    let url = start_simulator(1, 15.0).await;
    let binding = PathfinderBinding::with_url(url);

    let angles = binding.get_angles("A").await.unwrap();
    // Polar 0 minus posterior 15, folded into [0, 360).
    assert_eq!(angles.yaw, 345.0);
    assert_eq!(angles.pitch, 30.0);
}

#[tokio::test]
async fn polled_move_converges_on_the_target() {
    let url = start_simulator(1, 0.0).await;
    let binding = PathfinderBinding::with_url(url);

    let start = binding.get_position("A").await.unwrap();
    let target = Vec4::new(start.x + 0.5, start.y, start.z, start.w);
    let finish = binding.set_position("A", target, 1.0).await.unwrap();
    assert!(finish.within_xyz(target, binding.movement_tolerance()));
}

#[tokio::test]
async fn stop_freezes_the_stage_short_of_the_target() {
    let url = start_simulator(1, 0.0).await;
    let binding = Arc::new(PathfinderBinding::with_url(url));

    let start = binding.get_position("A").await.unwrap();
    let target = Vec4::new(start.x + 5.0, start.y, start.z, start.w);

    let mover = {
        let binding = binding.clone();
        tokio::spawn(async move { binding.set_position("A", target, 1.0).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    binding.stop("A").await.unwrap();

    let finish = mover.await.unwrap().unwrap();
    assert!(
        finish.x < target.x - binding.movement_tolerance(),
        "stage should stop short of the target, got {finish:?}"
    );

    // The stage holds position after the stop.
    let later = binding.get_position("A").await.unwrap();
    assert!((later.x - finish.x).abs() <= binding.movement_tolerance());
}

#[tokio::test]
async fn insertion_respects_the_depth_protocol() {
    let url = start_simulator(1, 0.0).await;
    let binding = PathfinderBinding::with_url(url);

    let start_depth = binding.get_position("A").await.unwrap().w;
    let target_depth = start_depth - 0.2;
    // The insertion rate cap (9000 µm/min) applies regardless of speed.
    let finish = binding.set_depth("A", target_depth, 5.0).await.unwrap();
    assert!((finish - target_depth).abs() <= binding.movement_tolerance());
}

#[tokio::test]
async fn registry_distinguishes_invalid_from_unattached_ids() {
    let url = start_simulator(2, 0.0).await;
    let (events, _rx) = mpsc::unbounded_channel();
    let platform = Platform::new(Arc::new(PathfinderBinding::with_url(url)), events);

    // "1" is not in the Pathfinder id alphabet at all.
    assert_eq!(
        platform.register_manipulator("1").await,
        "Invalid manipulator ID: 1"
    );
    // "D" is a legal id but no such probe is attached.
    assert_eq!(
        platform.register_manipulator("D").await,
        "Manipulator D is not connected"
    );
    assert_eq!(platform.register_manipulator("B").await, "");
}
