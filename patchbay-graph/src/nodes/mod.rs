//! Concrete node variants: hardware source/sink, file source/sink, and the
//! filter processor.

pub mod file;
pub mod filter;
pub mod hardware;

pub use file::{FileSinkNode, FileSourceNode};
pub use filter::{FilterChainCollaborator, FilterNode, GainFilterChain};
pub use hardware::{HardwareSinkNode, HardwareSourceNode};
