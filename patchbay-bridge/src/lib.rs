//! The control bridge: translates OSC control messages into audio graph
//! parameter updates and mirrors commands outward to an external mixing
//! console, without ever holding a reference to the graph itself.

pub mod bridge;
pub mod registry;

pub use bridge::ControlBridge;
pub use registry::{ControlTarget, Registry};
