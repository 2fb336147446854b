mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use capture_mux::config::Config;
use capture_mux::session::simulated::SimulatedDeviceProvider;
use capture_mux::session::{
    ConsumerKind, DeviceContextResolver, SessionEvent, SessionMultiplexer, TargetDescriptor,
    ViewfinderGate,
};
use cli::{Args, Command, ConfigAction};

/// Global flag for handling Ctrl+C across the demo loop.
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, shutting down...");
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Config {
            action: ConfigAction::Show,
        } => {
            println!("{:#?}", config);
            Ok(())
        }
        Command::Demo { frame_interval_ms } => {
            run_demo(config, Duration::from_millis(frame_interval_ms)).await
        }
    }
}

/// Drive the session core through the full consumer lifecycle against the
/// simulated provider: coalesced startup, deferred viewfinder acquire, a
/// single-shot capture, then teardown on Ctrl+C.
async fn run_demo(
    config: Config,
    frame_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    setup_ctrlc_handler()?;

    let local = SimulatedDeviceProvider::local().resolve_delay(Duration::from_millis(50));
    local
        .capture_provider()
        .set_frame_interval(Some(frame_interval));
    let remote = config
        .device
        .remote_peripheral
        .as_deref()
        .map(|peripheral| Arc::new(SimulatedDeviceProvider::remote(peripheral)));

    let resolver = DeviceContextResolver::new(
        Arc::new(local),
        remote.map(|r| r as Arc<dyn capture_mux::session::DeviceContextProvider>),
    );
    let multiplexer = SessionMultiplexer::spawn(resolver);
    multiplexer.set_device_mode(config.device.mode);

    // Print every session event as it arrives.
    let mut events = multiplexer.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Frame { kind, frame }) => {
                    println!("frame     {} ({}x{})", kind, frame.width, frame.height);
                }
                Ok(event) => println!("event     {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let photo = multiplexer.acquire(
        ConsumerKind::SnapshotCapture,
        TargetDescriptor::sink("photo-pipeline"),
    );
    let analysis = multiplexer.acquire(
        ConsumerKind::FrameAnalysis,
        TargetDescriptor::sink("stream-analysis"),
    );

    // Viewfinder goes through the gate: activated before layout, so the
    // acquire is deferred until dimensions arrive.
    let mut gate = ViewfinderGate::new(multiplexer.clone(), "preview-surface");
    gate.set_active(true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    gate.on_layout_changed(320, 240);

    tokio::time::sleep(Duration::from_millis(500)).await;
    match multiplexer
        .request_capture_with_timeout(config.capture.timeout())
        .await
    {
        Ok(image) => println!(
            "captured  {}x{} ({} bytes)",
            image.width,
            image.height,
            image.data.len()
        ),
        Err(err) => eprintln!("capture failed: {}", err),
    }

    println!("running, press Ctrl+C to stop");
    while !CTRLC_RECEIVED.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    gate.set_active(false);
    multiplexer.release(photo);
    multiplexer.release(analysis);

    let snapshot = multiplexer.snapshot().await?;
    println!(
        "final state: {} (generation {})",
        snapshot.state, snapshot.generation
    );
    Ok(())
}
