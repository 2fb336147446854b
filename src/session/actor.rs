//! The serialized owner of all capture session state.
//!
//! One tokio task drains one command channel; registry mutation, generation
//! bumps, and bind issuance happen strictly one-at-a-time in call order.
//! Provider resolution and bind confirmation re-enter the same task through
//! channels, so no continuation ever touches state from an arbitrary thread.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::{broadcast, mpsc, oneshot};

use super::errors::SessionError;
use super::provider::{BindRequest, ProviderEvent, ProviderEventTx};
use super::resolver::{DeviceContextResolver, ResolvedContext};
use super::types::{
    CapturedImage, ConsumerKind, DeviceContext, DeviceMode, Generation, MultiplexerSnapshot,
    SessionEvent, SessionState, TargetDescriptor,
};

/// Commands enqueued by the public handle.
pub(crate) enum Command {
    Acquire {
        kind: ConsumerKind,
        target: TargetDescriptor,
        id: u64,
    },
    Release {
        kind: ConsumerKind,
        id: u64,
    },
    SetDeviceMode(DeviceMode),
    RequestCapture {
        reply: oneshot::Sender<Result<CapturedImage, SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<MultiplexerSnapshot>,
    },
    ResolutionComplete {
        mode: DeviceMode,
        result: Result<ResolvedContext, SessionError>,
    },
}

/// One consumer kind's registration entry.
struct Registration {
    /// Target recorded by the first holder; refcount is `live_ids.len()`.
    target: TargetDescriptor,
    /// Outstanding handle ids. Release of an id not in this set is misuse.
    live_ids: HashSet<u64>,
}

/// Provider handle cached after resolution, with the mode it was resolved
/// for. A mode change invalidates the cache on the next rebind only.
struct ResolvedProvider {
    mode: DeviceMode,
    context: DeviceContext,
    provider: std::sync::Arc<dyn super::provider::CaptureProvider>,
}

pub(crate) struct SessionActor {
    commands: mpsc::UnboundedReceiver<Command>,
    provider_events: mpsc::UnboundedReceiver<ProviderEvent>,
    provider_tx: ProviderEventTx,
    /// Continuation channel back into this task (resolution completions).
    /// Weak so the actor's own reference does not keep the channel alive
    /// after every public handle is dropped.
    self_tx: mpsc::WeakUnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    resolver: DeviceContextResolver,

    registry: HashMap<ConsumerKind, Registration>,
    state: SessionState,
    generation: Generation,
    mode: DeviceMode,
    resolved: Option<ResolvedProvider>,
    /// Exactly one resolution continuation may be outstanding; registry
    /// changes that arrive meanwhile coalesce into its single rebind.
    resolving: bool,
    bind_in_flight: bool,
    /// Registry changed while a bind was in flight; one follow-up rebind
    /// runs when the in-flight one completes.
    dirty: bool,
    /// Kinds included in the most recent bind attempt.
    last_bound: Vec<ConsumerKind>,
    pending_captures: VecDeque<oneshot::Sender<Result<CapturedImage, SessionError>>>,
}

impl SessionActor {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        self_tx: mpsc::WeakUnboundedSender<Command>,
        provider_events: mpsc::UnboundedReceiver<ProviderEvent>,
        provider_tx: ProviderEventTx,
        events: broadcast::Sender<SessionEvent>,
        resolver: DeviceContextResolver,
    ) -> Self {
        Self {
            commands,
            provider_events,
            provider_tx,
            self_tx,
            events,
            resolver,
            registry: HashMap::new(),
            state: SessionState::Uninitialized,
            generation: 0,
            mode: DeviceMode::Local,
            resolved: None,
            resolving: false,
            bind_in_flight: false,
            dirty: false,
            last_bound: Vec::new(),
            pending_captures: VecDeque::new(),
        }
    }

    /// Drain commands and provider events until every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.provider_events.recv() => {
                    self.handle_provider_event(event);
                }
            }
        }
        // Process shutdown: tear down the hardware session if one exists.
        if let Some(resolved) = &self.resolved {
            resolved.provider.unbind();
        }
        log::debug!("session actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Acquire { kind, target, id } => self.handle_acquire(kind, target, id),
            Command::Release { kind, id } => self.handle_release(kind, id),
            Command::SetDeviceMode(mode) => self.handle_set_device_mode(mode),
            Command::RequestCapture { reply } => self.handle_request_capture(reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::ResolutionComplete { mode, result } => {
                self.handle_resolution_complete(mode, result)
            }
        }
    }

    fn handle_acquire(&mut self, kind: ConsumerKind, target: TargetDescriptor, id: u64) {
        match self.registry.get_mut(&kind) {
            Some(registration) => {
                // Additional holder; the first holder's target stays recorded.
                registration.live_ids.insert(id);
                log::debug!(
                    "acquire {} (id {}), refcount now {}",
                    kind,
                    id,
                    registration.live_ids.len()
                );
            }
            None => {
                log::info!("acquire {} (id {}), target '{}'", kind, id, target.label());
                let mut live_ids = HashSet::new();
                live_ids.insert(id);
                self.registry.insert(kind, Registration { target, live_ids });
                self.maybe_rebind();
            }
        }
    }

    fn handle_release(&mut self, kind: ConsumerKind, id: u64) {
        if let Some(registration) = self.registry.get_mut(&kind) {
            if registration.live_ids.remove(&id) {
                let remaining = registration.live_ids.len();
                log::debug!("release {} (id {}), refcount now {}", kind, id, remaining);
                if remaining == 0 {
                    self.registry.remove(&kind);
                    self.maybe_rebind();
                }
                return;
            }
        }
        // Usage error, never an underflow: the registry is untouched.
        log::warn!(
            "release without matching acquire for {} (id {}), ignoring",
            kind,
            id
        );
    }

    fn handle_set_device_mode(&mut self, mode: DeviceMode) {
        if self.mode != mode {
            log::info!("device mode set to {}", mode);
        }
        // Takes effect on the next rebind; an already-bound session is not
        // retroactively rebound.
        self.mode = mode;
    }

    fn handle_request_capture(
        &mut self,
        reply: oneshot::Sender<Result<CapturedImage, SessionError>>,
    ) {
        if self.refcount(ConsumerKind::SnapshotCapture) == 0 {
            log::warn!("capture requested while snapshot-capture is not active");
            let _ = reply.send(Err(SessionError::ConsumerMisuse(
                "capture requested while snapshot-capture is not active".to_string(),
            )));
            return;
        }
        if self.state != SessionState::Bound
            || !self.last_bound.contains(&ConsumerKind::SnapshotCapture)
        {
            let _ = reply.send(Err(SessionError::ConsumerMisuse(
                "capture requested before the session is bound".to_string(),
            )));
            return;
        }
        let Some(resolved) = &self.resolved else {
            let _ = reply.send(Err(SessionError::Closed));
            return;
        };
        resolved
            .provider
            .capture(self.generation, self.provider_tx.clone());
        self.pending_captures.push_back(reply);
    }

    fn handle_resolution_complete(
        &mut self,
        mode: DeviceMode,
        result: Result<ResolvedContext, SessionError>,
    ) {
        self.resolving = false;
        match result {
            Ok(resolved) => {
                log::info!("device context resolved: {}", resolved.context);
                // A provider superseded by a mode switch may still hold its
                // hardware session open; only one session may exist at a time.
                if let Some(previous) = self.resolved.take() {
                    previous.provider.unbind();
                    self.last_bound.clear();
                }
                self.resolved = Some(ResolvedProvider {
                    mode,
                    context: resolved.context,
                    provider: resolved.provider,
                });
                self.state = SessionState::Unbound;
                // Exactly one rebind for however many registry changes
                // accumulated while resolution was pending.
                self.maybe_rebind();
            }
            Err(err) => {
                log::error!("device context resolution failed: {}", err);
                self.state = SessionState::Uninitialized;
                let kinds = self.active_kinds();
                self.fail_pending_captures(&err);
                self.broadcast(SessionEvent::BindError {
                    kinds,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn handle_provider_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::BindComplete { generation, result } => {
                if generation != self.generation {
                    log::debug!(
                        "discarding stale bind completion (generation {} < {})",
                        generation,
                        self.generation
                    );
                    return;
                }
                self.bind_in_flight = false;
                match result {
                    Ok(()) => {
                        log::info!(
                            "bind confirmed (generation {}, kinds {:?})",
                            generation,
                            self.last_bound
                        );
                        self.state = SessionState::Bound;
                        for kind in self.last_bound.clone() {
                            self.broadcast(SessionEvent::Ready { kind });
                        }
                    }
                    Err(reason) => {
                        log::warn!("bind failed (generation {}): {}", generation, reason);
                        self.state = SessionState::Unbound;
                        let kinds = self.last_bound.clone();
                        self.fail_pending_captures(&SessionError::BindFailure(reason.clone()));
                        self.broadcast(SessionEvent::BindError { kinds, reason });
                    }
                }
                if self.dirty {
                    self.dirty = false;
                    self.maybe_rebind();
                }
            }
            ProviderEvent::Frame {
                generation,
                kind,
                frame,
            } => {
                // Frames are delivered only to currently-registered consumers
                // of the current generation.
                if generation == self.generation && self.refcount(kind) > 0 {
                    self.broadcast(SessionEvent::Frame { kind, frame });
                }
            }
            ProviderEvent::CaptureComplete { generation, result } => {
                if generation != self.generation {
                    log::debug!("discarding stale capture completion (generation {})", generation);
                    return;
                }
                let waiter = self.pending_captures.pop_front();
                match result {
                    Ok(image) => {
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(Ok(image.clone()));
                        }
                        self.broadcast(SessionEvent::CaptureResult { image });
                    }
                    Err(reason) => {
                        log::warn!("capture failed: {}", reason);
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(Err(SessionError::CaptureFailed(reason.clone())));
                        }
                        self.broadcast(SessionEvent::SessionError { reason });
                    }
                }
            }
            ProviderEvent::Fault { generation, reason } => {
                if generation != self.generation {
                    return;
                }
                log::error!("hardware session fault: {}", reason);
                self.broadcast(SessionEvent::SessionError { reason });
            }
        }
    }

    /// Schedule the work a registry change implies. Exactly one of: nothing
    /// (a continuation is already registered), resolution, or a bind.
    fn maybe_rebind(&mut self) {
        if self.resolving {
            // Coalesce: the single resolution continuation will rebind with
            // whatever the active set has become by then.
            return;
        }
        if self.bind_in_flight {
            self.dirty = true;
            return;
        }
        let needs_resolution = match &self.resolved {
            Some(resolved) => resolved.mode != self.mode,
            None => true,
        };
        if needs_resolution {
            if self.registry.is_empty() {
                return;
            }
            self.start_resolution();
        } else {
            self.issue_bind();
        }
    }

    fn start_resolution(&mut self) {
        // Shutdown already in progress; nobody is left to bind for.
        let Some(continuation) = self.self_tx.upgrade() else {
            return;
        };
        self.resolving = true;
        self.state = SessionState::Resolving;
        let resolver = self.resolver.clone();
        let mode = self.mode;
        log::info!("resolving device context (mode {})", mode);
        tokio::spawn(async move {
            let result = resolver.resolve(mode).await;
            let _ = continuation.send(Command::ResolutionComplete { mode, result });
        });
    }

    /// Unbind the previous session, compute the active-and-ready set, bump
    /// the generation, and issue one bind carrying the full set.
    fn issue_bind(&mut self) {
        let (provider, context) = match &self.resolved {
            Some(resolved) => (resolved.provider.clone(), resolved.context.clone()),
            None => return,
        };
        provider.unbind();
        self.generation += 1;
        // A capture still pending against the torn-down session can no
        // longer complete under its generation.
        self.fail_pending_captures(&SessionError::BindFailure(
            "session rebound before capture completed".to_string(),
        ));

        // Active-but-unready kinds are excluded from this cycle but keep
        // their registration; they are picked up on the next rebind.
        let targets: Vec<(ConsumerKind, TargetDescriptor)> = ConsumerKind::ALL
            .iter()
            .filter_map(|kind| {
                self.registry
                    .get(kind)
                    .filter(|registration| registration.target.is_ready())
                    .map(|registration| (*kind, registration.target.clone()))
            })
            .collect();

        self.last_bound = targets.iter().map(|(kind, _)| *kind).collect();
        self.state = SessionState::Unbound;

        self.broadcast(SessionEvent::Diagnostic {
            generation: self.generation,
            active_kinds: self.last_bound.clone(),
            device_context: context.clone(),
        });

        if targets.is_empty() {
            log::info!(
                "no ready consumers, session unbound (generation {})",
                self.generation
            );
            return;
        }

        log::info!(
            "bind attempt (generation {}, kinds {:?}, context {})",
            self.generation,
            self.last_bound,
            context
        );
        self.bind_in_flight = true;
        provider.bind(BindRequest {
            generation: self.generation,
            context,
            targets,
            events: self.provider_tx.clone(),
        });
    }

    fn refcount(&self, kind: ConsumerKind) -> u32 {
        self.registry
            .get(&kind)
            .map(|registration| registration.live_ids.len() as u32)
            .unwrap_or(0)
    }

    fn active_kinds(&self) -> Vec<ConsumerKind> {
        ConsumerKind::ALL
            .iter()
            .filter(|kind| self.registry.contains_key(*kind))
            .copied()
            .collect()
    }

    fn fail_pending_captures(&mut self, err: &SessionError) {
        for waiter in self.pending_captures.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    fn snapshot(&self) -> MultiplexerSnapshot {
        MultiplexerSnapshot {
            state: self.state,
            generation: self.generation,
            refcounts: ConsumerKind::ALL
                .iter()
                .map(|kind| (*kind, self.refcount(*kind)))
                .collect(),
            device_context: self.resolved.as_ref().map(|r| r.context.clone()),
        }
    }

    fn broadcast(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::simulated::SimulatedDeviceProvider;
    use std::sync::Arc;

    fn spawn_actor() -> mpsc::UnboundedSender<Command> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (provider_tx, provider_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        let resolver =
            DeviceContextResolver::new(Arc::new(SimulatedDeviceProvider::local()), None);
        let actor = SessionActor::new(
            command_rx,
            command_tx.downgrade(),
            provider_rx,
            ProviderEventTx::new(provider_tx),
            event_tx,
            resolver,
        );
        tokio::spawn(actor.run());
        command_tx
    }

    async fn snapshot(commands: &mpsc::UnboundedSender<Command>) -> MultiplexerSnapshot {
        let (reply, rx) = oneshot::channel();
        commands.send(Command::Snapshot { reply }).unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_a_noop() {
        let commands = spawn_actor();
        commands
            .send(Command::Release {
                kind: ConsumerKind::SnapshotCapture,
                id: 42,
            })
            .unwrap();
        let snap = snapshot(&commands).await;
        assert_eq!(snap.refcount(ConsumerKind::SnapshotCapture), 0);
        assert_eq!(snap.state, SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_extra_release_never_underflows() {
        let commands = spawn_actor();
        commands
            .send(Command::Acquire {
                kind: ConsumerKind::FrameAnalysis,
                target: TargetDescriptor::sink("analysis"),
                id: 1,
            })
            .unwrap();
        commands
            .send(Command::Release {
                kind: ConsumerKind::FrameAnalysis,
                id: 1,
            })
            .unwrap();
        // Same id again, plus an id that never existed: both are misuse,
        // neither may drive the count below zero.
        commands
            .send(Command::Release {
                kind: ConsumerKind::FrameAnalysis,
                id: 1,
            })
            .unwrap();
        commands
            .send(Command::Release {
                kind: ConsumerKind::FrameAnalysis,
                id: 99,
            })
            .unwrap();
        let snap = snapshot(&commands).await;
        assert_eq!(snap.refcount(ConsumerKind::FrameAnalysis), 0);
    }

    #[tokio::test]
    async fn test_second_holder_does_not_replace_target() {
        let commands = spawn_actor();
        commands
            .send(Command::Acquire {
                kind: ConsumerKind::SnapshotCapture,
                target: TargetDescriptor::sink("first"),
                id: 1,
            })
            .unwrap();
        commands
            .send(Command::Acquire {
                kind: ConsumerKind::SnapshotCapture,
                target: TargetDescriptor::sink("second"),
                id: 2,
            })
            .unwrap();
        let snap = snapshot(&commands).await;
        assert_eq!(snap.refcount(ConsumerKind::SnapshotCapture), 2);
    }
}
