//! Filter processor node variant.
//!
//! Owns an opaque handle to an external filter chain (the DSP library
//! itself stays out of this crate) described by a textual chain spec.
//! Parameter updates never block the audio thread here: they're coalesced
//! in the node's [`crate::param_queue::ParamQueueReader`] and applied at
//! the top of the next `process`.

use std::sync::Arc;

use patchbay_types::{AudioFormat, ErrorKind, PatchbayError};

use crate::buffer::{AudioBuffer, BufferStorage, PlaneData};
use crate::node::{Node, NodeKind, NodeLifecycle, NodeState};
use crate::param_queue::ParamQueueReader;

/// The external DSP collaborator contract. One real implementation would
/// wrap a native filter graph library; this crate ships only the trait
/// boundary plus [`GainFilterChain`], a deterministic in-process test
/// double, so the graph runtime is testable without linking one in.
pub trait FilterChainCollaborator: Send {
    /// Build (or rebuild) the filter graph from a textual chain spec,
    /// passed through unmodified.
    fn build_graph(
        &mut self,
        spec: &str,
        sample_rate: u32,
        channels: u16,
        buffer_size: usize,
    ) -> Result<(), PatchbayError>;

    /// Process one interleaved f32 frame, writing the filtered frame into
    /// `output` (cleared by the caller first) instead of returning a fresh
    /// `Vec`, so a chain can grow its own working storage once and reuse it
    /// every subsequent call.
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PatchbayError>;

    /// Apply a named parameter to a named sub-filter.
    fn send_command(&mut self, filter_name: &str, key: &str, value: f64) -> Result<(), PatchbayError>;

    /// List the named sub-filters this chain introspected out of its chain spec string.
    fn introspect(&self) -> Vec<(String, String)>;
}

/// A single-gain identity-or-scale chain: the deterministic test double
/// for [`FilterChainCollaborator`]. `build_graph`'s spec string is parsed
/// as `"gain=<name>:g=<db>"`; any other spec is accepted as a pass-through
/// identity chain named `"identity"`.
#[derive(Default)]
pub struct GainFilterChain {
    filter_name: String,
    gain_linear: f32,
}

impl GainFilterChain {
    pub fn new() -> Self {
        Self {
            filter_name: "identity".to_string(),
            gain_linear: 1.0,
        }
    }

    fn db_to_linear(db: f64) -> f32 {
        10f32.powf((db as f32) / 20.0)
    }
}

impl FilterChainCollaborator for GainFilterChain {
    fn build_graph(
        &mut self,
        spec: &str,
        _sample_rate: u32,
        _channels: u16,
        _buffer_size: usize,
    ) -> Result<(), PatchbayError> {
        if let Some((name, rest)) = spec.split_once('=') {
            self.filter_name = name.to_string();
            for kv in rest.split(':') {
                if let Some((k, v)) = kv.split_once('=') {
                    if k == "g" {
                        let db: f64 = v.parse().map_err(|_| {
                            PatchbayError::new(ErrorKind::ConfigError, format!("invalid gain value '{v}'"))
                        })?;
                        self.gain_linear = Self::db_to_linear(db);
                    }
                }
            }
        } else {
            self.filter_name = "identity".to_string();
            self.gain_linear = 1.0;
        }
        Ok(())
    }

    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PatchbayError> {
        output.clear();
        output.extend(input.iter().map(|s| s * self.gain_linear));
        Ok(())
    }

    fn send_command(&mut self, filter_name: &str, key: &str, value: f64) -> Result<(), PatchbayError> {
        if filter_name != self.filter_name {
            return Err(PatchbayError::new(
                ErrorKind::ConfigError,
                format!("unknown filter '{filter_name}', chain only exposes '{}'", self.filter_name),
            ));
        }
        match key {
            "gain" | "g" => {
                self.gain_linear = Self::db_to_linear(value);
                Ok(())
            }
            other => Err(PatchbayError::new(
                ErrorKind::ConfigError,
                format!("unknown parameter key '{other}' for filter '{filter_name}'"),
            )),
        }
    }

    fn introspect(&self) -> Vec<(String, String)> {
        vec![(self.filter_name.clone(), "gain".to_string())]
    }
}

/// Transforms one input buffer into one output buffer through an external
/// filter chain.
pub struct FilterNode {
    name: String,
    lifecycle: NodeLifecycle,
    chain: Box<dyn FilterChainCollaborator>,
    chain_spec: String,
    format: Option<AudioFormat>,
    params: Option<ParamQueueReader>,
    // Scratch storage reused tick over tick so steady-state `process` only
    // ever copies into existing allocations instead of growing new ones.
    flat_in: Vec<f32>,
    flat_out: Vec<f32>,
    channel_scratch: Vec<f32>,
    out_interleaved: PlaneData,
    out_planes: Vec<PlaneData>,
}

impl FilterNode {
    pub fn new(name: impl Into<String>, chain_spec: impl Into<String>, chain: Box<dyn FilterChainCollaborator>) -> Self {
        Self {
            name: name.into(),
            lifecycle: NodeLifecycle::new(),
            chain,
            chain_spec: chain_spec.into(),
            format: None,
            params: None,
            flat_in: Vec::new(),
            flat_out: Vec::new(),
            channel_scratch: Vec::new(),
            out_interleaved: PlaneData::F32(Arc::from(Vec::<f32>::new())),
            out_planes: Vec::new(),
        }
    }

    /// Attach the reader half of this node's parameter queue, drained at
    /// the top of `process`, wired up by the graph when the node is added.
    pub fn attach_param_queue(&mut self, reader: ParamQueueReader) {
        self.params = Some(reader);
    }

    /// Introspect the built chain's named sub-filters, used by the control
    /// bridge to validate `/filter/<name>/<key>` addresses at registration
    /// time.
    pub fn introspect(&self) -> Vec<(String, String)> {
        self.chain.introspect()
    }
}

impl Node for FilterNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn configure(&mut self, format: AudioFormat) -> Result<(), PatchbayError> {
        self.lifecycle.begin_configure()?;
        self.chain.build_graph(
            &self.chain_spec,
            format.sample_rate,
            format.channel_layout.channel_count(),
            format.buffer_size,
        )?;
        self.format = Some(format);
        self.lifecycle.finish_configure();
        Ok(())
    }

    fn start(&mut self) -> Result<(), PatchbayError> {
        self.lifecycle.begin_start()?;
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
            PatchbayError::new(ErrorKind::ConfigError, "filter processed before configure")
        })?;

        if let Some(reader) = self.params.as_mut() {
            for (filter_name, key, value) in reader.drain() {
                if let Err(e) = self.chain.send_command(&filter_name, &key, value) {
                    log::warn!("filter '{}' rejected parameter update: {e}", self.name);
                }
            }
        }

        let input = inputs
            .first()
            .ok_or_else(|| PatchbayError::new(ErrorKind::RuntimeError, "filter node has no input buffer"))?;
        let planar_in = matches!(input.storage(), BufferStorage::Planar(_));
        input.write_f32_interleaved(&mut self.flat_in);
        self.chain.process(&self.flat_in, &mut self.flat_out)?;

        let channels = input.channels();
        let frames = input.frames();
        output.clear();
        if planar_in {
            if self.out_planes.len() != channels {
                self.out_planes = (0..channels).map(|_| PlaneData::F32(Arc::from(Vec::<f32>::new()))).collect();
            }
            for (ch, plane) in self.out_planes.iter_mut().enumerate() {
                self.channel_scratch.clear();
                self.channel_scratch.extend((0..frames).map(|f| self.flat_out[f * channels + ch]));
                plane.overwrite_f32(&self.channel_scratch);
            }
            // `new_planar` takes the plane list by value, so this clones the
            // (small, channel-count-sized) `Vec<PlaneData>` wrapper every
            // tick even though each plane's own sample storage is reused in
            // place above.
            output.push(AudioBuffer::new_planar(
                frames,
                format.sample_rate,
                format.sample_format,
                format.channel_layout,
                self.out_planes.clone(),
            ));
        } else {
            self.out_interleaved.overwrite_f32(&self.flat_out);
            output.push(AudioBuffer::new_interleaved(
                frames,
                format.sample_rate,
                format.sample_format,
                format.channel_layout,
                self.out_interleaved.clone(),
            ));
        }

        Ok(())
    }

    fn apply_param(&mut self, filter_name: &str, key: &str, value: f64) {
        if let Err(e) = self.chain.send_command(filter_name, key, value) {
            log::warn!("filter '{}' rejected direct parameter update: {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_queue::param_queue;
    use patchbay_types::{ChannelLayout, SampleFormat};

    fn fmt() -> AudioFormat {
        AudioFormat::new(48_000, SampleFormat::F32, ChannelLayout::Mono, 4)
    }

    fn silence_input() -> AudioBuffer {
        AudioBuffer::new_interleaved(
            4,
            48_000,
            SampleFormat::F32,
            ChannelLayout::Mono,
            PlaneData::F32(vec![1.0, 1.0, 1.0, 1.0].into()),
        )
    }

    #[test]
    fn applies_configured_gain() {
        let mut node = FilterNode::new("eq", "eq=f=1000:g=6", Box::new(GainFilterChain::new()));
        node.configure(fmt()).unwrap();
        node.start().unwrap();
        let mut out = Vec::new();
        node.process(&[silence_input()], &mut out).unwrap();
        let samples = out[0].to_f32_interleaved();
        let expected = 10f32.powf(6.0 / 20.0);
        assert!((samples[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn param_update_applied_at_next_process_boundary() {
        let mut node = FilterNode::new("eq", "eq=f=1000:g=0", Box::new(GainFilterChain::new()));
        node.configure(fmt()).unwrap();
        node.start().unwrap();
        let (writer, reader) = param_queue();
        node.attach_param_queue(reader);

        let mut first = Vec::new();
        node.process(&[silence_input()], &mut first).unwrap();
        assert!((first[0].to_f32_interleaved()[0] - 1.0).abs() < 1e-4);

        writer.submit("eq", "gain", -6.0);
        let mut second = Vec::new();
        node.process(&[silence_input()], &mut second).unwrap();
        let expected = 10f32.powf(-6.0 / 20.0);
        assert!((second[0].to_f32_interleaved()[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn missing_input_is_a_runtime_error_not_a_panic() {
        let mut node = FilterNode::new("eq", "eq=g=0", Box::new(GainFilterChain::new()));
        node.configure(fmt()).unwrap();
        node.start().unwrap();
        let mut out = Vec::new();
        let err = node.process(&[], &mut out).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RuntimeError);
    }
}
