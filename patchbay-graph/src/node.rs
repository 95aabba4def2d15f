//! Node state machine and pad contract.
//!
//! Every node variant shares the same five-state lifecycle and the same
//! `configure`/`start`/`process`/`stop` verb set, reading and writing
//! `AudioBuffer` pads regardless of what it connects to on the other side.

use patchbay_types::{AudioFormat, NodeId, PatchbayError};

use crate::buffer::AudioBuffer;

/// Where a node sits in the processing topology; pad counts are fixed per
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    HardwareSource,
    HardwareSink,
    FileSource,
    FileSink,
    Filter,
}

impl NodeKind {
    pub fn input_pad_count(self) -> usize {
        match self {
            NodeKind::HardwareSource | NodeKind::FileSource => 0,
            NodeKind::HardwareSink | NodeKind::FileSink | NodeKind::Filter => 1,
        }
    }

    pub fn output_pad_count(self) -> usize {
        match self {
            NodeKind::HardwareSource | NodeKind::FileSource | NodeKind::Filter => 1,
            NodeKind::HardwareSink | NodeKind::FileSink => 0,
        }
    }
}

/// Node lifecycle state. `configure` is the only transition legal from
/// `Faulted` (terminal until reconfigure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
    Faulted,
}

/// Common behavior every node variant implements; the graph runtime only
/// ever speaks to nodes through this trait.
pub trait Node: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> NodeKind;
    fn state(&self) -> NodeState;

    /// Validate parameters and acquire external resources. Legal from
    /// `Unconfigured`, `Stopped`, or `Faulted` (reconfigure clears a fault).
    fn configure(&mut self, format: AudioFormat) -> Result<(), PatchbayError>;

    /// Reset internal state and move to `Running`. Legal only from
    /// `Configured` or `Stopped`.
    fn start(&mut self) -> Result<(), PatchbayError>;

    /// Release transient state, preserve configuration. Legal only from
    /// `Running`; must be idempotent-stoppable, so calling `stop` again
    /// from `Stopped` is a no-op success.
    fn stop(&mut self) -> Result<(), PatchbayError>;

    /// Read input pads (empty for source nodes), write output pads (empty
    /// for sink nodes) into `output`. Only called while `Running`, and only
    /// ever from the graph's single tick-driven call chain — there is no
    /// separate off-thread path for file or filter nodes, so the
    /// zero-allocation rule binds every node's `process`, not just the
    /// hardware-driven ones. `output` is cleared by the caller before each
    /// call and reused tick over tick so a node can grow it once during
    /// warm-up and push into existing capacity afterward, the same way a
    /// node should reuse its own internal scratch buffers.
    fn process(&mut self, inputs: &[AudioBuffer], output: &mut Vec<AudioBuffer>) -> Result<(), PatchbayError>;

    /// Apply one coalesced parameter update drained from this node's queue
    /// slice at the top of `process`. Default no-op; only the filter
    /// processor variant overrides it.
    fn apply_param(&mut self, _filter_name: &str, _key: &str, _value: f64) {}
}

/// Shared bookkeeping every concrete node embeds: the part of the state
/// machine that isn't variant-specific. Concrete nodes hold one of these and
/// delegate `state()`/transition validation to it.
#[derive(Debug)]
pub struct NodeLifecycle {
    state: NodeState,
}

impl NodeLifecycle {
    pub fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Validate and perform a `configure` transition.
    pub fn begin_configure(&mut self) -> Result<(), PatchbayError> {
        match self.state {
            NodeState::Unconfigured | NodeState::Stopped | NodeState::Faulted | NodeState::Configured => {
                Ok(())
            }
            NodeState::Running => Err(PatchbayError::new(
                patchbay_types::ErrorKind::RuntimeError,
                "configuration is forbidden while a node is Running",
            )),
        }
    }

    pub fn finish_configure(&mut self) {
        self.state = NodeState::Configured;
    }

    pub fn begin_start(&mut self) -> Result<(), PatchbayError> {
        match self.state {
            NodeState::Configured | NodeState::Stopped => Ok(()),
            other => Err(PatchbayError::new(
                patchbay_types::ErrorKind::RuntimeError,
                format!("start is only legal from Configured or Stopped, node is {other:?}"),
            )),
        }
    }

    pub fn finish_start(&mut self) {
        self.state = NodeState::Running;
    }

    pub fn begin_stop(&mut self) -> Result<(), PatchbayError> {
        match self.state {
            NodeState::Running | NodeState::Stopped => Ok(()),
            other => Err(PatchbayError::new(
                patchbay_types::ErrorKind::RuntimeError,
                format!("stop is only legal from Running, node is {other:?}"),
            )),
        }
    }

    pub fn finish_stop(&mut self) {
        self.state = NodeState::Stopped;
    }

    pub fn assert_running(&self) -> Result<(), PatchbayError> {
        if self.state == NodeState::Running {
            Ok(())
        } else {
            Err(PatchbayError::new(
                patchbay_types::ErrorKind::RuntimeError,
                format!("process is only legal while Running, node is {:?}", self.state),
            ))
        }
    }

    pub fn fault(&mut self) {
        self.state = NodeState::Faulted;
    }
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a node within a graph plus its declared name, used by the
/// control bridge's registry to address parameter updates without
/// holding a reference into the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub id: NodeId,
}
