//! Hardware source/sink node variants. Each wraps a
//! [`HardwareIoCollaborator`] and exchanges one `AudioBuffer` per tick with
//! the device callback through a preallocated slot, and writes into the
//! caller-owned `output` vector instead of returning a fresh one, so
//! `process` itself does not allocate in steady state.

use std::sync::{Arc, Mutex};

use patchbay_types::{AudioFormat, ChannelLayout, ErrorKind, NodeId, PatchbayError};

use crate::buffer::{AudioBuffer, BufferStorage, PlaneData};
use crate::device::HardwareIoCollaborator;
use crate::node::{Node, NodeKind, NodeLifecycle, NodeState};

/// Shared slot the device callback writes into (source) or reads from
/// (sink) on its own real-time thread, and the node reads/writes from the
/// graph's tick. Both sides only ever hold the mutex for a short critical
/// section swapping one buffer, never for unbounded work.
type Slot = Arc<Mutex<Option<AudioBuffer>>>;

/// Reads captured audio from a hardware input device and emits it as this
/// tick's output buffer.
pub struct HardwareSourceNode {
    name: String,
    lifecycle: NodeLifecycle,
    format: Option<AudioFormat>,
    captured: Slot,
    collaborator: Box<dyn HardwareIoCollaborator>,
}

impl HardwareSourceNode {
    pub fn new(name: impl Into<String>, collaborator: Box<dyn HardwareIoCollaborator>) -> Self {
        Self {
            name: name.into(),
            lifecycle: NodeLifecycle::new(),
            format: None,
            captured: Arc::new(Mutex::new(None)),
            collaborator,
        }
    }

    /// Handle given to the device callback glue so it can deposit the
    /// frame captured for this tick before the graph runs.
    pub fn capture_handle(&self) -> Slot {
        self.captured.clone()
    }
}

impl Node for HardwareSourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::HardwareSource
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn configure(&mut self, format: AudioFormat) -> Result<(), PatchbayError> {
        self.lifecycle.begin_configure()?;
        self.collaborator.open(None)?;
        self.format = Some(format);
        self.lifecycle.finish_configure();
        Ok(())
    }

    fn start(&mut self) -> Result<(), PatchbayError> {
        self.lifecycle.begin_start()?;
        *self.captured.lock().unwrap() = None;
        self.lifecycle.finish_start();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PatchbayError> {
        self.lifecycle.begin_stop()?;
        self.lifecycle.finish_stop();
        Ok(())
    }

    fn process(&mut self, _inputs: &[AudioBuffer], output: &mut Vec<AudioBuffer>) -> Result<(), PatchbayError> {
        self.lifecycle.assert_running()?;
        let format = self.format.ok_or_else(|| {
            PatchbayError::new(ErrorKind::ConfigError, "hardware source processed before configure")
        })?;
        let buffer = self.captured.lock().unwrap().take().unwrap_or_else(|| {
            AudioBuffer::silence(format.buffer_size, format.sample_rate, format.channel_layout)
        });
        output.clear();
        output.push(buffer);
        Ok(())
    }
}

/// Drains its input buffer into a hardware output device.
pub struct HardwareSinkNode {
    name: String,
    lifecycle: NodeLifecycle,
    format: Option<AudioFormat>,
    rendered: Slot,
    collaborator: Box<dyn HardwareIoCollaborator>,
}

impl HardwareSinkNode {
    pub fn new(name: impl Into<String>, collaborator: Box<dyn HardwareIoCollaborator>) -> Self {
        Self {
            name: name.into(),
            lifecycle: NodeLifecycle::new(),
            format: None,
            rendered: Arc::new(Mutex::new(None)),
            collaborator,
        }
    }

    /// Handle the device callback glue reads from after the tick to obtain
    /// the frame this node rendered.
    pub fn rendered_handle(&self) -> Slot {
        self.rendered.clone()
    }
}

impl Node for HardwareSinkNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::HardwareSink
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn configure(&mut self, format: AudioFormat) -> Result<(), PatchbayError> {
        self.lifecycle.begin_configure()?;
        self.collaborator.open(None)?;
        self.format = Some(format);
        self.lifecycle.finish_configure();
        Ok(())
    }

    fn start(&mut self) -> Result<(), PatchbayError> {
        self.lifecycle.begin_start()?;
        *self.rendered.lock().unwrap() = None;
        self.lifecycle.finish_start();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PatchbayError> {
        self.lifecycle.begin_stop()?;
        self.lifecycle.finish_stop();
        Ok(())
    }

    fn process(&mut self, inputs: &[AudioBuffer], output: &mut Vec<AudioBuffer>) -> Result<(), PatchbayError> {
        self.lifecycle.assert_running()?;
        let format = self.format.ok_or_else(|| {
            PatchbayError::new(ErrorKind::ConfigError, "hardware sink processed before configure")
        })?;
        let buffer = inputs.first().cloned().unwrap_or_else(|| {
            AudioBuffer::silence(format.buffer_size, format.sample_rate, format.channel_layout)
        });
        *self.rendered.lock().unwrap() = Some(buffer);
        output.clear();
        Ok(())
    }
}

/// Build a silent planar buffer of `channels` channels, used by test
/// doubles that feed a [`HardwareSourceNode`] without a real device.
pub fn planar_silence(frames: usize, sample_rate: u32, channels: u16) -> AudioBuffer {
    let layout = ChannelLayout::from_channel_count(channels);
    let planes = (0..channels)
        .map(|_| PlaneData::F32(vec![0.0f32; frames].into()))
        .collect();
    AudioBuffer::new_planar(
        frames,
        sample_rate,
        patchbay_types::SampleFormat::F32,
        layout,
        planes,
    )
}

pub fn is_planar(buffer: &AudioBuffer) -> bool {
    matches!(buffer.storage(), BufferStorage::Planar(_))
}

/// Stable id newtype re-export convenience so callers building a graph
/// don't need to import `patchbay_types::NodeId` separately for hardware
/// node construction helpers.
pub type HardwareNodeId = NodeId;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullHardware;
    use patchbay_types::SampleFormat;

    fn fmt() -> AudioFormat {
        AudioFormat::new(48_000, SampleFormat::F32, ChannelLayout::Stereo, 64)
    }

    #[test]
    fn source_emits_silence_when_nothing_captured() {
        let mut node = HardwareSourceNode::new("in", Box::new(NullHardware::new(48_000, 64, 2, 0)));
        node.configure(fmt()).unwrap();
        node.start().unwrap();
        let mut out = Vec::new();
        node.process(&[], &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].to_f32_interleaved().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn source_emits_deposited_capture() {
        let mut node = HardwareSourceNode::new("in", Box::new(NullHardware::new(48_000, 64, 2, 0)));
        node.configure(fmt()).unwrap();
        node.start().unwrap();
        let captured = planar_silence(64, 48_000, 2);
        *node.capture_handle().lock().unwrap() = Some(captured);
        let mut out = Vec::new();
        node.process(&[], &mut out).unwrap();
        assert_eq!(out[0].frames(), 64);
    }

    #[test]
    fn sink_deposits_rendered_frame_for_device_callback() {
        let mut node = HardwareSinkNode::new("out", Box::new(NullHardware::new(48_000, 64, 0, 2)));
        node.configure(fmt()).unwrap();
        node.start().unwrap();
        let input = planar_silence(64, 48_000, 2);
        let handle = node.rendered_handle();
        let mut out = Vec::new();
        node.process(&[input], &mut out).unwrap();
        assert!(handle.lock().unwrap().is_some());
    }
}
