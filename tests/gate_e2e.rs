//! End-to-end tests for the viewfinder surface gate.
//!
//! The gate is the structural fix for the session-wide stall caused by a
//! zero-sized viewfinder surface: an unready viewfinder must never reach the
//! multiplexer's registry in an active state.

use std::sync::Arc;
use std::time::Duration;

use capture_mux::session::simulated::SimulatedDeviceProvider;
use capture_mux::session::{
    ConsumerKind, DeviceContextResolver, SessionEvent, SessionMultiplexer, TargetDescriptor,
    ViewfinderGate,
};

fn setup() -> (SessionMultiplexer, Arc<SimulatedDeviceProvider>) {
    let local = Arc::new(SimulatedDeviceProvider::local());
    let resolver = DeviceContextResolver::new(local.clone(), None);
    (SessionMultiplexer::spawn(resolver), local)
}

/// Scenario 3: activating a zero-sized viewfinder and deactivating it again
/// leaves zero trace in the multiplexer.
#[tokio::test]
async fn test_unready_activation_never_reaches_multiplexer() {
    let (multiplexer, local) = setup();
    let provider = local.capture_provider();

    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview");
    gate.set_active(true);
    assert!(gate.is_pending());
    assert!(!gate.is_registered());

    gate.set_active(false);
    assert!(!gate.is_pending());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = multiplexer.snapshot().await.unwrap();
    assert_eq!(snapshot.refcount(ConsumerKind::Viewfinder), 0);
    assert!(
        provider.bind_attempts().is_empty(),
        "no bind attempt may reference a viewfinder that never became ready"
    );
}

/// Scenario 4: a deferred activation fires on the first valid layout and the
/// rebind then includes all active kinds.
#[tokio::test]
async fn test_deferred_acquire_fires_on_valid_layout() {
    let (multiplexer, local) = setup();
    let provider = local.capture_provider();
    let mut events = multiplexer.subscribe();

    let _photo = multiplexer.acquire(
        ConsumerKind::SnapshotCapture,
        TargetDescriptor::sink("photo"),
    );
    let _analysis = multiplexer.acquire(
        ConsumerKind::FrameAnalysis,
        TargetDescriptor::sink("analysis"),
    );

    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview");
    gate.set_active(true);
    assert!(gate.is_pending());

    // Zero-width layout is still not valid.
    gate.on_layout_changed(0, 240);
    assert!(gate.is_pending());

    gate.on_layout_changed(320, 240);
    assert!(!gate.is_pending());
    assert!(gate.is_registered());

    for kind in ConsumerKind::ALL {
        wait_for_ready(&mut events, kind).await;
    }
    let last = provider.bind_attempts().pop().unwrap();
    assert_eq!(
        last.kinds,
        vec![
            ConsumerKind::Viewfinder,
            ConsumerKind::SnapshotCapture,
            ConsumerKind::FrameAnalysis
        ]
    );
}

/// A viewfinder activated after layout acquires immediately.
#[tokio::test]
async fn test_activation_after_layout_acquires_immediately() {
    let (multiplexer, _local) = setup();
    let mut events = multiplexer.subscribe();

    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview");
    gate.on_layout_changed(640, 480);
    gate.set_active(true);
    assert!(gate.is_registered());
    assert!(!gate.is_pending());

    wait_for_ready(&mut events, ConsumerKind::Viewfinder).await;
}

/// Deactivating a registered viewfinder releases its registration.
#[tokio::test]
async fn test_deactivation_releases_registration() {
    let (multiplexer, _local) = setup();
    let mut events = multiplexer.subscribe();

    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview");
    gate.on_layout_changed(640, 480);
    gate.set_active(true);
    wait_for_ready(&mut events, ConsumerKind::Viewfinder).await;

    gate.set_active(false);
    assert!(!gate.is_registered());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = multiplexer.snapshot().await.unwrap();
    assert_eq!(snapshot.refcount(ConsumerKind::Viewfinder), 0);
}

/// A registered surface that collapses to zero dimensions is released and
/// re-acquired only when it lays out again.
#[tokio::test]
async fn test_surface_collapse_releases_until_next_layout() {
    let (multiplexer, local) = setup();
    let provider = local.capture_provider();
    let mut events = multiplexer.subscribe();

    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview");
    gate.on_layout_changed(320, 240);
    gate.set_active(true);
    wait_for_ready(&mut events, ConsumerKind::Viewfinder).await;

    gate.on_layout_changed(0, 240);
    assert!(!gate.is_registered());
    assert!(gate.is_pending());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = multiplexer.snapshot().await.unwrap();
    assert_eq!(
        snapshot.refcount(ConsumerKind::Viewfinder),
        0,
        "a collapsed surface must not stay registered with a stale target"
    );

    gate.on_layout_changed(640, 480);
    assert!(gate.is_registered());
    assert!(!gate.is_pending());
    wait_for_ready(&mut events, ConsumerKind::Viewfinder).await;
    let last = provider.bind_attempts().pop().unwrap();
    assert!(last.kinds.contains(&ConsumerKind::Viewfinder));
}

/// Repeated activation while already active or pending is a no-op.
#[tokio::test]
async fn test_double_activation_is_idempotent() {
    let (multiplexer, _local) = setup();

    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview");
    gate.set_active(true);
    gate.set_active(true);
    assert!(gate.is_pending());

    gate.on_layout_changed(320, 240);
    gate.set_active(true);
    assert!(gate.is_registered());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = multiplexer.snapshot().await.unwrap();
    assert_eq!(
        snapshot.refcount(ConsumerKind::Viewfinder),
        1,
        "double activation must not double-register"
    );
}

async fn wait_for_ready(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    kind: ConsumerKind,
) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Ready { kind: k }) if k == kind => return,
                Ok(_) => continue,
                Err(err) => panic!("event channel failed: {}", err),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} ready", kind));
}
