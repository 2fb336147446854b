//! Capture session core: multiplexes the single hardware camera session
//! across independently registering consumers.

mod actor;

pub mod errors;
pub mod gate;
pub mod multiplexer;
pub mod provider;
pub mod resolver;
pub mod simulated;
pub mod types;

pub use errors::SessionError;
pub use gate::ViewfinderGate;
pub use multiplexer::SessionMultiplexer;
pub use provider::{BindRequest, CaptureProvider, DeviceContextProvider, ProviderAvailability};
pub use resolver::DeviceContextResolver;
pub use types::{
    CapturedImage, ConsumerKind, DeviceContext, DeviceMode, Frame, Generation,
    MultiplexerSnapshot, RegistrationHandle, SessionEvent, SessionState, TargetDescriptor,
};
