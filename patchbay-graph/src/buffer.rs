//! Planar/interleaved PCM buffer carrier.
//!
//! A node produces one buffer per tick, downstream nodes hold a shared
//! reference to it, and the buffer is immutable once handed off. `Arc`
//! makes cloning an `AudioBuffer` a refcount bump, not a copy.

use std::sync::Arc;

use patchbay_types::{ChannelLayout, SampleFormat};

/// One plane's worth of samples, typed by storage format. Kept as distinct
/// typed vectors rather than raw bytes so every consumer gets a safe slice
/// instead of reinterpreting a byte buffer.
#[derive(Debug, Clone)]
pub enum PlaneData {
    F32(Arc<[f32]>),
    I16(Arc<[i16]>),
    I32(Arc<[i32]>),
}

impl PlaneData {
    pub fn len(&self) -> usize {
        match self {
            PlaneData::F32(p) => p.len(),
            PlaneData::I16(p) => p.len(),
            PlaneData::I32(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to f32 samples, the format every filter chain processes in.
    /// Allocates a fresh `Vec`; prefer `extend_f32_into` on the audio
    /// thread, where the caller's scratch buffer is reused tick over tick.
    pub fn to_f32(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len());
        self.extend_f32_into(&mut out);
        out
    }

    /// Append this plane's samples, converted to f32, onto `out` without
    /// clearing it first (callers that want a fresh buffer should clear
    /// before calling). Reuses `out`'s existing allocation when its
    /// capacity already covers this plane's length.
    fn extend_f32_into(&self, out: &mut Vec<f32>) {
        match self {
            PlaneData::F32(p) => out.extend_from_slice(p),
            PlaneData::I16(p) => out.extend(p.iter().map(|&s| s as f32 / i16::MAX as f32)),
            PlaneData::I32(p) => out.extend(p.iter().map(|&s| s as f32 / i32::MAX as f32)),
        }
    }

    /// Write this plane's samples, converted to f32, into `out` at stride
    /// `stride` starting at `offset` (the de-interleave step for one
    /// channel of a planar buffer). `out` must already be sized to hold
    /// every channel's contribution.
    fn write_f32_strided_into(&self, out: &mut [f32], offset: usize, stride: usize) {
        match self {
            PlaneData::F32(p) => {
                for (frame, &s) in p.iter().enumerate() {
                    out[frame * stride + offset] = s;
                }
            }
            PlaneData::I16(p) => {
                for (frame, &s) in p.iter().enumerate() {
                    out[frame * stride + offset] = s as f32 / i16::MAX as f32;
                }
            }
            PlaneData::I32(p) => {
                for (frame, &s) in p.iter().enumerate() {
                    out[frame * stride + offset] = s as f32 / i32::MAX as f32;
                }
            }
        }
    }

    /// Overwrite this plane's samples in place when its `Arc` is uniquely
    /// held and already the right length (the steady-state case once a
    /// node has produced one buffer of a given size), reusing the existing
    /// allocation. Falls back to a fresh `Arc` on the first call or after a
    /// format change.
    pub fn overwrite_f32(&mut self, samples: &[f32]) {
        if let PlaneData::F32(arc) = self {
            if arc.len() == samples.len() {
                if let Some(slice) = Arc::get_mut(arc) {
                    slice.copy_from_slice(samples);
                    return;
                }
            }
        }
        *self = PlaneData::F32(samples.into());
    }
}

fn bytes_per_sample(format: SampleFormat) -> usize {
    match format {
        SampleFormat::F32 => 4,
        SampleFormat::I16 => 2,
        SampleFormat::I32 => 4,
    }
}

/// How samples for multiple channels are arranged in `planes`.
#[derive(Debug, Clone)]
pub enum BufferStorage {
    /// One allocation holding `frames * channels` samples, channel-minor.
    Interleaved(PlaneData),
    /// `channels` separate allocations, each `frames` samples.
    Planar(Vec<PlaneData>),
}

/// A produced, immutable PCM buffer.
///
/// Invariant enforced at construction: `bytes_per_plane = frames *
/// bytes_per_sample * (planar ? 1 : channels)`, checked against whichever
/// `BufferStorage` variant is supplied.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    frames: usize,
    sample_rate: u32,
    sample_format: SampleFormat,
    channel_layout: ChannelLayout,
    storage: BufferStorage,
}

impl AudioBuffer {
    pub fn new_interleaved(
        frames: usize,
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
        data: PlaneData,
    ) -> Self {
        let channels = channel_layout.channel_count() as usize;
        debug_assert_eq!(
            data.len(),
            frames * channels,
            "interleaved plane length must be frames * channels"
        );
        Self {
            frames,
            sample_rate,
            sample_format,
            channel_layout,
            storage: BufferStorage::Interleaved(data),
        }
    }

    pub fn new_planar(
        frames: usize,
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
        planes: Vec<PlaneData>,
    ) -> Self {
        debug_assert_eq!(
            planes.len(),
            channel_layout.channel_count() as usize,
            "one plane per channel required for planar storage"
        );
        for p in &planes {
            debug_assert_eq!(p.len(), frames, "each plane must hold exactly `frames` samples");
        }
        Self {
            frames,
            sample_rate,
            sample_format,
            channel_layout,
            storage: BufferStorage::Planar(planes),
        }
    }

    /// Build a silent buffer of the given format, used by the graph runtime
    /// to zero-fill the output of a node it just marked `Faulted`.
    pub fn silence(frames: usize, sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        let channels = channel_layout.channel_count() as usize;
        let data: Arc<[f32]> = vec![0.0f32; frames * channels].into();
        Self::new_interleaved(
            frames,
            sample_rate,
            SampleFormat::F32,
            channel_layout,
            PlaneData::F32(data),
        )
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.channel_layout
    }

    pub fn channels(&self) -> usize {
        self.channel_layout.channel_count() as usize
    }

    pub fn is_planar(&self) -> bool {
        matches!(self.storage, BufferStorage::Planar(_))
    }

    pub fn bytes_per_plane(&self) -> usize {
        let channels = if self.is_planar() { 1 } else { self.channels() };
        self.frames * bytes_per_sample(self.sample_format) * channels
    }

    /// Flatten to interleaved f32 samples regardless of source storage,
    /// the format `FilterChainCollaborator::process` consumes. Allocates a
    /// fresh `Vec`; on the audio thread prefer `write_f32_interleaved`,
    /// which reuses the caller's scratch buffer.
    pub fn to_f32_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::new();
        self.write_f32_interleaved(&mut out);
        out
    }

    /// Flatten to interleaved f32 samples into `out`, clearing it first but
    /// reusing its existing capacity across calls — the node's own
    /// scratch buffer grows once during warm-up and is never reallocated
    /// afterward as long as the buffer shape stays the same.
    pub fn write_f32_interleaved(&self, out: &mut Vec<f32>) {
        out.clear();
        match &self.storage {
            BufferStorage::Interleaved(plane) => plane.extend_f32_into(out),
            BufferStorage::Planar(planes) => {
                let frames = self.frames;
                let channels = planes.len();
                out.resize(frames * channels, 0.0);
                for (ch, plane) in planes.iter().enumerate() {
                    plane.write_f32_strided_into(out, ch, channels);
                }
            }
        }
    }

    pub fn storage(&self) -> &BufferStorage {
        &self.storage
    }
}
