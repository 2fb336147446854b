//! Viewfinder surface gate.
//!
//! The viewfinder is the only consumer whose destination has a racy
//! readiness condition: its surface may be activated before it has valid
//! on-screen dimensions. A zero-sized surface passed into a bind request can
//! neither be filled with frames nor dropped mid-session without disrupting
//! the whole bind, so the gate guarantees the multiplexer is never even
//! asked to include an unready viewfinder.

use super::multiplexer::SessionMultiplexer;
use super::types::{ConsumerKind, RegistrationHandle, TargetDescriptor};

/// Defensive layer in front of the multiplexer for the viewfinder consumer.
///
/// Owned by the layer that tracks surface layout; not shared across threads.
pub struct ViewfinderGate {
    multiplexer: SessionMultiplexer,
    label: String,
    width: u32,
    height: u32,
    /// Activation requested while the surface was zero-sized; the acquire
    /// fires on the first valid layout instead.
    pending_acquire: bool,
    registration: Option<RegistrationHandle>,
}

impl ViewfinderGate {
    /// Gate for one viewfinder surface. Dimensions start at zero until the
    /// first layout notification.
    pub fn new(multiplexer: SessionMultiplexer, label: impl Into<String>) -> Self {
        Self {
            multiplexer,
            label: label.into(),
            width: 0,
            height: 0,
            pending_acquire: false,
            registration: None,
        }
    }

    /// Activate or deactivate the viewfinder.
    ///
    /// Activation with a zero-sized surface only sets the pending flag; no
    /// acquire happens until the surface reports valid dimensions.
    /// Deactivating a pending gate just clears the flag, leaving zero trace
    /// in the multiplexer.
    pub fn set_active(&mut self, active: bool) {
        if active {
            if self.registration.is_some() || self.pending_acquire {
                log::debug!("viewfinder '{}' already active", self.label);
                return;
            }
            if self.surface_valid() {
                self.do_acquire();
            } else {
                log::debug!(
                    "viewfinder '{}' surface not laid out yet, deferring acquire",
                    self.label
                );
                self.pending_acquire = true;
            }
        } else {
            self.pending_acquire = false;
            if let Some(handle) = self.registration.take() {
                self.multiplexer.release(handle);
            }
        }
    }

    /// Surface layout notification from the UI layer.
    ///
    /// Fires the deferred acquire once the surface becomes valid. A
    /// registered surface that collapses to a zero dimension releases its
    /// registration and re-arms the deferred acquire, so the multiplexer
    /// never holds an active viewfinder whose real surface is zero-sized.
    pub fn on_layout_changed(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        if self.surface_valid() {
            if self.pending_acquire {
                self.pending_acquire = false;
                self.do_acquire();
            }
        } else if let Some(handle) = self.registration.take() {
            log::debug!(
                "viewfinder '{}' surface collapsed, releasing until next layout",
                self.label
            );
            self.multiplexer.release(handle);
            self.pending_acquire = true;
        }
    }

    /// Whether an acquire fired and is currently registered.
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Whether an activation is waiting for a valid layout.
    pub fn is_pending(&self) -> bool {
        self.pending_acquire
    }

    fn do_acquire(&mut self) {
        let target = TargetDescriptor::surface(self.label.clone(), self.width, self.height);
        let handle = self.multiplexer.acquire(ConsumerKind::Viewfinder, target);
        self.registration = Some(handle);
    }

    fn surface_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Drop for ViewfinderGate {
    fn drop(&mut self) {
        if let Some(handle) = self.registration.take() {
            self.multiplexer.release(handle);
        }
    }
}
