//! Shared types used by both the OSC core and the audio graph core: the
//! error taxonomy, audio format descriptors, and arena-index ids.

mod error;
mod format;
mod ids;

pub use error::{ErrorEvent, ErrorHandler, ErrorKind, PatchbayError};
pub use format::{AudioFormat, ChannelLayout, SampleFormat};
pub use ids::{MethodId, NodeId, NodeIdAllocator};
