//! The audio graph core: planar/interleaved buffers, the node state
//! machine and its hardware/file/filter variants, the graph runtime, the
//! lock-free parameter queue, and the hardware/device-state boundary.

pub mod buffer;
pub mod device;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod param_queue;
pub mod triple_buffer;

pub use buffer::{AudioBuffer, BufferStorage, PlaneData};
pub use device::{CpalHardware, DeviceInfo, DeviceState, HardwareIoCollaborator, NullHardware};
pub use graph::Graph;
pub use node::{Node, NodeHandle, NodeKind, NodeLifecycle, NodeState};
pub use nodes::{
    FileSinkNode, FileSourceNode, FilterChainCollaborator, FilterNode, GainFilterChain, HardwareSinkNode,
    HardwareSourceNode,
};
pub use param_queue::{param_queue, ParamQueueReader, ParamQueueWriter};
