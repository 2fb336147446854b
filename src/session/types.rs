//! Shared types for the capture session core.

use std::fmt;

use serde::Deserialize;

/// Monotonic version counter for bind attempts.
///
/// Bumped on every rebind; asynchronous confirmations carry the generation
/// they were issued under and are discarded when it no longer matches.
pub type Generation = u64;

/// A logical reason to hold the capture device open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerKind {
    /// Live preview surface.
    Viewfinder,
    /// Single-shot high-resolution capture.
    SnapshotCapture,
    /// Continuous frame analysis / streaming.
    FrameAnalysis,
}

impl ConsumerKind {
    /// All consumer kinds, in registry order.
    pub const ALL: [ConsumerKind; 3] = [
        ConsumerKind::Viewfinder,
        ConsumerKind::SnapshotCapture,
        ConsumerKind::FrameAnalysis,
    ];

    /// Whether this kind receives a continuous frame stream (as opposed to
    /// one-shot capture results).
    pub fn receives_frames(self) -> bool {
        matches!(self, ConsumerKind::Viewfinder | ConsumerKind::FrameAnalysis)
    }
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerKind::Viewfinder => write!(f, "viewfinder"),
            ConsumerKind::SnapshotCapture => write!(f, "snapshot-capture"),
            ConsumerKind::FrameAnalysis => write!(f, "frame-analysis"),
        }
    }
}

/// Which physical camera family the resolver should target.
///
/// Selected by the application layer; takes effect on the next rebind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// The device's own camera.
    Local,
    /// A paired peripheral's camera.
    Remote,
}

impl Default for DeviceMode {
    fn default() -> Self {
        DeviceMode::Local
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Local => write!(f, "local"),
            DeviceMode::Remote => write!(f, "remote"),
        }
    }
}

/// The resolved camera target for one bind attempt.
///
/// Remote resolution can fail, in which case the session falls back to
/// `Local` and the fallback is observable in the diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceContext {
    Local,
    Remote(String),
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceContext::Local => write!(f, "local"),
            DeviceContext::Remote(id) => write!(f, "remote({})", id),
        }
    }
}

/// Opaque delivery destination for one consumer kind.
///
/// Snapshot and analysis targets are always ready. A viewfinder target is
/// only ready once its surface reports non-zero dimensions; a zero-sized
/// surface must never be included in a bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    label: String,
    surface: Option<(u32, u32)>,
}

impl TargetDescriptor {
    /// A destination with no surface readiness condition (snapshot pipeline,
    /// analysis sink).
    pub fn sink(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            surface: None,
        }
    }

    /// A display surface destination with the given on-screen dimensions.
    pub fn surface(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            surface: Some((width, height)),
        }
    }

    /// The readiness predicate: true unless this is a surface target with a
    /// zero dimension.
    pub fn is_ready(&self) -> bool {
        match self.surface {
            Some((w, h)) => w > 0 && h > 0,
            None => true,
        }
    }

    /// Destination label, for logging.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Surface dimensions, if this is a surface target.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.surface
    }
}

/// A single frame delivered to viewfinder or analysis consumers.
///
/// Payloads are opaque to the session core; interpretation belongs to the
/// external sink.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, format negotiated out of band.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

/// Result of a single-shot capture request.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

/// Proof of a registration, passed back to `release`.
///
/// Deliberately not `Clone`: `release` consumes the handle, so a double
/// release of the same registration does not compile.
#[derive(Debug)]
pub struct RegistrationHandle {
    pub(crate) kind: ConsumerKind,
    pub(crate) id: u64,
}

impl RegistrationHandle {
    /// The consumer kind this handle registered.
    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }
}

/// Lifecycle state of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No provider resolved yet.
    Uninitialized,
    /// Provider resolution in flight.
    Resolving,
    /// Hardware session bound and confirmed.
    Bound,
    /// Provider resolved but no confirmed hardware session.
    Unbound,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Resolving => write!(f, "resolving"),
            SessionState::Bound => write!(f, "bound"),
            SessionState::Unbound => write!(f, "unbound"),
        }
    }
}

/// Events delivered to subscribers of the multiplexer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The kind's target is now receiving frames / ready for capture.
    Ready { kind: ConsumerKind },
    /// A bind attempt that included `kinds` failed; not retried automatically.
    BindError {
        kinds: Vec<ConsumerKind>,
        reason: String,
    },
    /// A frame for a currently-registered consumer.
    Frame { kind: ConsumerKind, frame: Frame },
    /// A completed single-shot capture.
    CaptureResult { image: CapturedImage },
    /// A hardware fault on the live session.
    SessionError { reason: String },
    /// Telemetry for one bind attempt; not intended for control flow.
    Diagnostic {
        generation: Generation,
        active_kinds: Vec<ConsumerKind>,
        device_context: DeviceContext,
    },
}

/// Point-in-time view of multiplexer state, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct MultiplexerSnapshot {
    pub state: SessionState,
    pub generation: Generation,
    /// Reference count per kind, in `ConsumerKind::ALL` order.
    pub refcounts: Vec<(ConsumerKind, u32)>,
    /// Device context of the cached provider, if resolved.
    pub device_context: Option<DeviceContext>,
}

impl MultiplexerSnapshot {
    /// Reference count for one kind.
    pub fn refcount(&self, kind: ConsumerKind) -> u32 {
        self.refcounts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_kind_display() {
        assert_eq!(format!("{}", ConsumerKind::Viewfinder), "viewfinder");
        assert_eq!(
            format!("{}", ConsumerKind::SnapshotCapture),
            "snapshot-capture"
        );
        assert_eq!(format!("{}", ConsumerKind::FrameAnalysis), "frame-analysis");
    }

    #[test]
    fn test_consumer_kind_receives_frames() {
        assert!(ConsumerKind::Viewfinder.receives_frames());
        assert!(ConsumerKind::FrameAnalysis.receives_frames());
        assert!(!ConsumerKind::SnapshotCapture.receives_frames());
    }

    #[test]
    fn test_device_context_display() {
        assert_eq!(format!("{}", DeviceContext::Local), "local");
        assert_eq!(
            format!("{}", DeviceContext::Remote("watch-1".to_string())),
            "remote(watch-1)"
        );
    }

    #[test]
    fn test_sink_target_is_always_ready() {
        assert!(TargetDescriptor::sink("upload").is_ready());
    }

    #[test]
    fn test_surface_target_readiness() {
        assert!(!TargetDescriptor::surface("preview", 0, 0).is_ready());
        assert!(!TargetDescriptor::surface("preview", 320, 0).is_ready());
        assert!(!TargetDescriptor::surface("preview", 0, 240).is_ready());
        assert!(TargetDescriptor::surface("preview", 320, 240).is_ready());
    }

    #[test]
    fn test_snapshot_refcount_lookup() {
        let snapshot = MultiplexerSnapshot {
            state: SessionState::Uninitialized,
            generation: 0,
            refcounts: vec![
                (ConsumerKind::Viewfinder, 1),
                (ConsumerKind::SnapshotCapture, 2),
                (ConsumerKind::FrameAnalysis, 0),
            ],
            device_context: None,
        };
        assert_eq!(snapshot.refcount(ConsumerKind::Viewfinder), 1);
        assert_eq!(snapshot.refcount(ConsumerKind::SnapshotCapture), 2);
        assert_eq!(snapshot.refcount(ConsumerKind::FrameAnalysis), 0);
    }

    #[test]
    fn test_device_mode_default_is_local() {
        assert_eq!(DeviceMode::default(), DeviceMode::Local);
    }
}
