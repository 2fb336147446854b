//! In-process simulated capture provider.
//!
//! Stands in for real camera hardware so the session core can be exercised
//! deterministically: resolution latency, bind latency, bind rejection, and
//! frame pumping are all scriptable. Used by the integration tests and the
//! `demo` CLI command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::sleep;

use super::provider::{
    BindRequest, CaptureProvider, DeviceContextProvider, ProviderAvailability, ProviderEventTx,
};
use super::types::{CapturedImage, ConsumerKind, DeviceContext, Frame, Generation};

/// Record of one bind attempt the simulated hardware received.
#[derive(Debug, Clone)]
pub struct BindRecord {
    pub generation: Generation,
    pub kinds: Vec<ConsumerKind>,
    pub context: DeviceContext,
}

#[derive(Clone)]
struct SimConfig {
    bind_delay: Duration,
    capture_delay: Duration,
    reject_bind: Option<String>,
    frame_interval: Option<Duration>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind_delay: Duration::ZERO,
            capture_delay: Duration::ZERO,
            reject_bind: None,
            frame_interval: None,
        }
    }
}

struct BoundSession {
    generation: Generation,
    kinds: Vec<ConsumerKind>,
    stop: Arc<AtomicBool>,
}

#[derive(Default)]
struct SimState {
    bound: Option<BoundSession>,
    bind_log: Vec<BindRecord>,
    /// Event channel of the most recent bind; kept so tests can inject
    /// late/stale events by hand.
    last_events: Option<ProviderEventTx>,
}

/// Simulated single hardware session.
#[derive(Default)]
pub struct SimulatedCaptureProvider {
    config: Mutex<SimConfig>,
    state: Mutex<SimState>,
}

impl SimulatedCaptureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay between a bind call and its confirmation.
    pub fn set_bind_delay(&self, delay: Duration) {
        self.config.lock().unwrap().bind_delay = delay;
    }

    /// Delay between a capture call and its result.
    pub fn set_capture_delay(&self, delay: Duration) {
        self.config.lock().unwrap().capture_delay = delay;
    }

    /// Make subsequent bind attempts fail with the given reason.
    pub fn set_bind_rejection(&self, reason: Option<&str>) {
        self.config.lock().unwrap().reject_bind = reason.map(str::to_string);
    }

    /// Pump a synthetic frame to every bound frame consumer at this interval.
    pub fn set_frame_interval(&self, interval: Option<Duration>) {
        self.config.lock().unwrap().frame_interval = interval;
    }

    /// All bind attempts received so far, oldest first.
    pub fn bind_attempts(&self) -> Vec<BindRecord> {
        self.state.lock().unwrap().bind_log.clone()
    }

    /// Whether a session is currently held open.
    pub fn is_bound(&self) -> bool {
        self.state.lock().unwrap().bound.is_some()
    }

    /// Kinds of the currently bound session.
    pub fn bound_kinds(&self) -> Vec<ConsumerKind> {
        self.state
            .lock()
            .unwrap()
            .bound
            .as_ref()
            .map(|bound| bound.kinds.clone())
            .unwrap_or_default()
    }

    /// Inject a bind completion by hand, regardless of what is bound.
    ///
    /// Lets tests reproduce a slow confirmation arriving after a newer
    /// rebind has superseded its generation.
    pub fn inject_bind_complete(&self, generation: Generation, result: Result<(), String>) {
        if let Some(events) = &self.state.lock().unwrap().last_events {
            events.bind_complete(generation, result);
        }
    }

    /// Inject a frame by hand, tagged with an arbitrary generation.
    pub fn inject_frame(&self, generation: Generation, kind: ConsumerKind) {
        if let Some(events) = &self.state.lock().unwrap().last_events {
            events.frame(generation, kind, test_frame(0));
        }
    }

    /// Inject a session fault by hand.
    pub fn inject_fault(&self, generation: Generation, reason: &str) {
        if let Some(events) = &self.state.lock().unwrap().last_events {
            events.fault(generation, reason.to_string());
        }
    }
}

impl CaptureProvider for SimulatedCaptureProvider {
    fn bind(&self, request: BindRequest) {
        let config = self.config.lock().unwrap().clone();
        let kinds = request.kinds();
        {
            let mut state = self.state.lock().unwrap();
            state.bind_log.push(BindRecord {
                generation: request.generation,
                kinds: kinds.clone(),
                context: request.context.clone(),
            });
            state.last_events = Some(request.events.clone());
        }

        if let Some(reason) = config.reject_bind {
            let events = request.events;
            let generation = request.generation;
            tokio::spawn(async move {
                if !config.bind_delay.is_zero() {
                    sleep(config.bind_delay).await;
                }
                events.bind_complete(generation, Err(reason));
            });
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.state.lock().unwrap().bound = Some(BoundSession {
            generation: request.generation,
            kinds: kinds.clone(),
            stop: stop.clone(),
        });

        let events = request.events;
        let generation = request.generation;
        let frame_kinds: Vec<ConsumerKind> = kinds
            .into_iter()
            .filter(|kind| kind.receives_frames())
            .collect();
        tokio::spawn(async move {
            if !config.bind_delay.is_zero() {
                sleep(config.bind_delay).await;
            }
            if stop.load(Ordering::Relaxed) {
                return;
            }
            events.bind_complete(generation, Ok(()));
            let Some(interval) = config.frame_interval else {
                return;
            };
            let mut sequence: u8 = 0;
            while !stop.load(Ordering::Relaxed) {
                sleep(interval).await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                for kind in &frame_kinds {
                    events.frame(generation, *kind, test_frame(sequence));
                }
                sequence = sequence.wrapping_add(1);
            }
        });
    }

    fn unbind(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(bound) = state.bound.take() {
            bound.stop.store(true, Ordering::Relaxed);
        }
    }

    fn capture(&self, generation: Generation, events: ProviderEventTx) {
        let delay = self.config.lock().unwrap().capture_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            events.capture_complete(generation, Ok(test_image()));
        });
    }
}

/// Simulated resolvable device context (local camera or paired peripheral).
pub struct SimulatedDeviceProvider {
    context: DeviceContext,
    resolve_delay: Duration,
    unavailable: Option<String>,
    provider: Arc<SimulatedCaptureProvider>,
    resolve_calls: std::sync::atomic::AtomicUsize,
}

impl SimulatedDeviceProvider {
    /// A local camera context.
    pub fn local() -> Self {
        Self::with_context(DeviceContext::Local)
    }

    /// A remote peripheral context.
    pub fn remote(peripheral: &str) -> Self {
        Self::with_context(DeviceContext::Remote(peripheral.to_string()))
    }

    fn with_context(context: DeviceContext) -> Self {
        Self {
            context,
            resolve_delay: Duration::ZERO,
            unavailable: None,
            provider: Arc::new(SimulatedCaptureProvider::new()),
            resolve_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Make resolution take this long.
    pub fn resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    /// Make resolution fail with the given reason.
    pub fn unavailable(mut self, reason: &str) -> Self {
        self.unavailable = Some(reason.to_string());
        self
    }

    /// The capture provider behind this context, for scripting and asserts.
    pub fn capture_provider(&self) -> Arc<SimulatedCaptureProvider> {
        self.provider.clone()
    }

    /// How many times resolution was started against this context.
    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.load(Ordering::Relaxed)
    }
}

impl DeviceContextProvider for SimulatedDeviceProvider {
    fn context(&self) -> DeviceContext {
        self.context.clone()
    }

    fn resolve(&self) -> oneshot::Receiver<ProviderAvailability> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let delay = self.resolve_delay;
        let outcome = match &self.unavailable {
            Some(reason) => ProviderAvailability::Unavailable(reason.clone()),
            None => ProviderAvailability::Available(self.provider.clone()),
        };
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let _ = tx.send(outcome);
        });
        rx
    }
}

fn test_frame(sequence: u8) -> Frame {
    Frame {
        data: vec![sequence; 48],
        width: 4,
        height: 4,
    }
}

fn test_image() -> CapturedImage {
    CapturedImage {
        data: vec![0xFF, 0xD8, 0xFF, 0xD9],
        width: 1280,
        height: 720,
    }
}
