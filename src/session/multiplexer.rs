//! Public handle to the capture session multiplexer.
//!
//! The handle is cheap to clone and hands every mutation to the single
//! session actor over an unbounded channel, so callers never block. One
//! multiplexer is constructed at process start and passed to all call sites;
//! it owns the only path to the hardware session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::actor::{Command, SessionActor};
use super::errors::SessionError;
use super::provider::ProviderEventTx;
use super::resolver::DeviceContextResolver;
use super::types::{
    CapturedImage, ConsumerKind, DeviceMode, MultiplexerSnapshot, RegistrationHandle,
    SessionEvent, TargetDescriptor,
};

/// Buffered events per subscriber; a slow subscriber lags rather than
/// back-pressuring the actor.
const EVENT_BUFFER: usize = 64;

/// Handle to the singleton capture session.
#[derive(Clone)]
pub struct SessionMultiplexer {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    next_id: Arc<AtomicU64>,
}

impl SessionMultiplexer {
    /// Spawn the session actor and return the handle to it.
    ///
    /// Must be called from within a tokio runtime. The provider handle is
    /// not resolved here; resolution is deferred to the first acquire.
    pub fn spawn(resolver: DeviceContextResolver) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (provider_tx, provider_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let actor = SessionActor::new(
            command_rx,
            command_tx.downgrade(),
            provider_rx,
            ProviderEventTx::new(provider_tx),
            event_tx.clone(),
            resolver,
        );
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            events: event_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register one holder of `kind`, delivering to `target`.
    ///
    /// Never blocks; the rebind this may imply is asynchronous. The returned
    /// handle must be passed back to [`release`](Self::release).
    pub fn acquire(&self, kind: ConsumerKind, target: TargetDescriptor) -> RegistrationHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Acquire { kind, target, id });
        RegistrationHandle { kind, id }
    }

    /// Drop one holder of the handle's kind.
    ///
    /// Consumes the handle; when the kind's last holder releases, the kind
    /// leaves the active set and a rebind is scheduled.
    pub fn release(&self, handle: RegistrationHandle) {
        self.send(Command::Release {
            kind: handle.kind,
            id: handle.id,
        });
    }

    /// Select the camera family for the next rebind.
    ///
    /// Does not rebind an already-bound session by itself.
    pub fn set_device_mode(&self, mode: DeviceMode) {
        self.send(Command::SetDeviceMode(mode));
    }

    /// Request a single-shot capture.
    ///
    /// Valid only while a SnapshotCapture registration is active and bound;
    /// rejected with `ConsumerMisuse` otherwise. This waits indefinitely for
    /// the hardware; see
    /// [`request_capture_with_timeout`](Self::request_capture_with_timeout)
    /// for the bounded variant.
    pub async fn request_capture(&self) -> Result<CapturedImage, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::RequestCapture { reply: reply_tx })
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Capture with a caller-side deadline.
    ///
    /// The multiplexer has no notion of per-request deadlines; a timeout here
    /// despite the surface gate indicates a deeper hardware fault and is
    /// surfaced as `CaptureTimeout`, not retried.
    pub async fn request_capture_with_timeout(
        &self,
        deadline: Duration,
    ) -> Result<CapturedImage, SessionError> {
        match tokio::time::timeout(deadline, self.request_capture()).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::CaptureTimeout),
        }
    }

    /// Subscribe to session events (ready, frames, errors, diagnostics).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Point-in-time state view, for diagnostics and tests.
    pub async fn snapshot(&self) -> Result<MultiplexerSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply: reply_tx })
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    fn send(&self, command: Command) {
        // Only fails when the actor is gone at process shutdown.
        if self.commands.send(command).is_err() {
            log::warn!("session actor is gone, command dropped");
        }
    }
}

impl std::fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}
