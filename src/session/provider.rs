//! Provider seams between the multiplexer and the capture hardware.
//!
//! Two traits: `DeviceContextProvider` resolves one physical camera family
//! into a usable provider handle, and `CaptureProvider` is the single
//! hardware session behind it. Both are asynchronous in the channel style:
//! completions are delivered over channels that re-enter the multiplexer's
//! serialized execution context, never via direct callback from an arbitrary
//! thread.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::types::{
    CapturedImage, ConsumerKind, DeviceContext, Frame, Generation, TargetDescriptor,
};

/// One rebind call: the full set of active, ready consumers at the moment of
/// the call, the generation it was issued under, and the channel completions
/// must be delivered on.
#[derive(Debug, Clone)]
pub struct BindRequest {
    /// Generation this attempt was issued under; every completion the
    /// provider emits for this session must carry it.
    pub generation: Generation,
    /// Resolved device context the attempt targets.
    pub context: DeviceContext,
    /// Destination for every included consumer, simultaneously. The hardware
    /// requires all of them to be valid before any can receive frames.
    pub targets: Vec<(ConsumerKind, TargetDescriptor)>,
    /// Completion / frame channel back into the multiplexer.
    pub events: ProviderEventTx,
}

impl BindRequest {
    /// Kinds included in this attempt.
    pub fn kinds(&self) -> Vec<ConsumerKind> {
        self.targets.iter().map(|(k, _)| *k).collect()
    }
}

/// Completions and frames flowing from the hardware session back to the
/// multiplexer. Everything is tagged with the generation of the bind attempt
/// that produced it so stale arrivals can be discarded.
#[derive(Debug)]
pub enum ProviderEvent {
    /// The bind attempt settled.
    BindComplete {
        generation: Generation,
        result: Result<(), String>,
    },
    /// A frame for one bound consumer kind.
    Frame {
        generation: Generation,
        kind: ConsumerKind,
        frame: Frame,
    },
    /// A single-shot capture settled.
    CaptureComplete {
        generation: Generation,
        result: Result<CapturedImage, String>,
    },
    /// A fault on the live session (device lost, stream broke).
    Fault {
        generation: Generation,
        reason: String,
    },
}

/// Sending half of the provider event channel.
///
/// Send failures are ignored: they only occur when the multiplexer is gone,
/// at which point there is nobody left to inform.
#[derive(Debug, Clone)]
pub struct ProviderEventTx(mpsc::UnboundedSender<ProviderEvent>);

impl ProviderEventTx {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ProviderEvent>) -> Self {
        Self(tx)
    }

    pub fn bind_complete(&self, generation: Generation, result: Result<(), String>) {
        let _ = self.0.send(ProviderEvent::BindComplete { generation, result });
    }

    pub fn frame(&self, generation: Generation, kind: ConsumerKind, frame: Frame) {
        let _ = self.0.send(ProviderEvent::Frame {
            generation,
            kind,
            frame,
        });
    }

    pub fn capture_complete(
        &self,
        generation: Generation,
        result: Result<CapturedImage, String>,
    ) {
        let _ = self
            .0
            .send(ProviderEvent::CaptureComplete { generation, result });
    }

    pub fn fault(&self, generation: Generation, reason: String) {
        let _ = self.0.send(ProviderEvent::Fault { generation, reason });
    }
}

/// The single hardware session for one resolved device context.
///
/// Implementations must be cheap to call: `bind` and `capture` start the
/// operation and return immediately, reporting completion through the event
/// channel. `unbind` tears down the previous session and is idempotent.
pub trait CaptureProvider: Send + Sync {
    /// Begin a bind attempt carrying the full active set. All-or-nothing:
    /// either every included target starts receiving, or the attempt fails
    /// for all of them.
    fn bind(&self, request: BindRequest);

    /// Tear down the current hardware session, if any.
    fn unbind(&self);

    /// Begin a single-shot capture against the bound session.
    fn capture(&self, generation: Generation, events: ProviderEventTx);
}

/// Outcome of resolving one device context.
pub enum ProviderAvailability {
    /// The context is usable; the handle is cached by the session for all
    /// subsequent rebinds.
    Available(Arc<dyn CaptureProvider>),
    /// The context cannot be obtained (peripheral unpaired, SDK missing).
    Unavailable(String),
}

impl std::fmt::Debug for ProviderAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderAvailability::Available(_) => write!(f, "Available(..)"),
            ProviderAvailability::Unavailable(reason) => {
                write!(f, "Unavailable({:?})", reason)
            }
        }
    }
}

/// Resolves one physical camera family into a provider handle.
///
/// Resolution may take non-trivial time (pairing handshake, SDK init), so it
/// is started here and completed on the returned channel.
pub trait DeviceContextProvider: Send + Sync {
    /// The device context this provider serves.
    fn context(&self) -> DeviceContext;

    /// Begin resolution; the outcome arrives on the returned channel.
    fn resolve(&self) -> oneshot::Receiver<ProviderAvailability>;
}
