//! File source/sink node variants, reading and writing WAV with `hound`.

use std::path::PathBuf;
use std::sync::Arc;

use hound::{SampleFormat as HoundSampleFormat, WavReader, WavSpec, WavWriter};
use patchbay_types::{AudioFormat, ChannelLayout, ErrorKind, PatchbayError, SampleFormat};

use crate::buffer::{AudioBuffer, PlaneData};
use crate::node::{Node, NodeKind, NodeLifecycle, NodeState};

fn io_err(context: &str, e: hound::Error) -> PatchbayError {
    PatchbayError::with_source(ErrorKind::ConfigError, context, std::io::Error::other(e.to_string()))
}

/// Reads interleaved PCM frames from a WAV file and emits one buffer's
/// worth per tick until exhausted, then emits silence.
pub struct FileSourceNode {
    name: String,
    lifecycle: NodeLifecycle,
    path: PathBuf,
    format: Option<AudioFormat>,
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    cursor: usize,
    // Reused tick over tick so steady-state `process` only overwrites an
    // existing allocation instead of growing a new one.
    chunk: Vec<f32>,
    out_data: PlaneData,
}

impl FileSourceNode {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            lifecycle: NodeLifecycle::new(),
            path: path.into(),
            format: None,
            samples: Vec::new(),
            channels: 0,
            sample_rate: 0,
            cursor: 0,
            chunk: Vec::new(),
            out_data: PlaneData::F32(Arc::from(Vec::<f32>::new())),
        }
    }
}

impl Node for FileSourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::FileSource
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn configure(&mut self, format: AudioFormat) -> Result<(), PatchbayError> {
        self.lifecycle.begin_configure()?;
        let mut reader = WavReader::open(&self.path)
            .map_err(|e| io_err(&format!("failed to open {}", self.path.display()), e))?;
        let spec = reader.spec();
        self.channels = spec.channels;
        self.sample_rate = spec.sample_rate;
        self.samples = match spec.sample_format {
            HoundSampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| io_err("failed to read float samples", e))?,
            HoundSampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| io_err("failed to read int samples", e))?
            }
        };
        self.cursor = 0;
        self.format = Some(format);
        self.lifecycle.finish_configure();
        Ok(())
    }

    fn start(&mut self) -> Result<(), PatchbayError> {
        self.lifecycle.begin_start()?;
        self.cursor = 0;
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
            PatchbayError::new(ErrorKind::ConfigError, "file source processed before configure")
        })?;
        let channels = self.channels.max(1) as usize;
        let frames = format.buffer_size;
        let want = frames * channels;
        self.chunk.clear();
        self.chunk.resize(want, 0.0);
        let available = self.samples.len().saturating_sub(self.cursor);
        let take = available.min(want);
        self.chunk[..take].copy_from_slice(&self.samples[self.cursor..self.cursor + take]);
        self.cursor += take;
        self.out_data.overwrite_f32(&self.chunk);
        output.clear();
        output.push(AudioBuffer::new_interleaved(
            frames,
            self.sample_rate,
            SampleFormat::F32,
            ChannelLayout::from_channel_count(self.channels),
            self.out_data.clone(),
        ));
        Ok(())
    }
}

/// Writes each tick's input buffer to a WAV file, opened on `configure` and
/// finalized on `stop`.
pub struct FileSinkNode {
    name: String,
    lifecycle: NodeLifecycle,
    path: PathBuf,
    writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>>,
    scratch: Vec<f32>,
}

impl FileSinkNode {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            lifecycle: NodeLifecycle::new(),
            path: path.into(),
            writer: None,
            scratch: Vec::new(),
        }
    }
}

impl Node for FileSinkNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::FileSink
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn configure(&mut self, format: AudioFormat) -> Result<(), PatchbayError> {
        self.lifecycle.begin_configure()?;
        let spec = WavSpec {
            channels: format.channel_layout.channel_count(),
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: HoundSampleFormat::Float,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| io_err(&format!("failed to create {}", self.path.display()), e))?;
        self.writer = Some(writer);
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
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| io_err("failed to finalize WAV file", e))?;
        }
        self.lifecycle.finish_stop();
        Ok(())
    }

    fn process(&mut self, inputs: &[AudioBuffer], output: &mut Vec<AudioBuffer>) -> Result<(), PatchbayError> {
        self.lifecycle.assert_running()?;
        let writer = self.writer.as_mut().ok_or_else(|| {
            PatchbayError::new(ErrorKind::ConfigError, "file sink processed before configure")
        })?;
        if let Some(buffer) = inputs.first() {
            self.scratch.clear();
            buffer.write_f32_interleaved(&mut self.scratch);
            for &sample in &self.scratch {
                writer
                    .write_sample(sample)
                    .map_err(|e| io_err("failed to write WAV sample", e))?;
            }
        }
        output.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_short_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let format = AudioFormat::new(48_000, SampleFormat::F32, ChannelLayout::Mono, 4);

        let mut sink = FileSinkNode::new("sink", &path);
        sink.configure(format).unwrap();
        sink.start().unwrap();
        let buf = AudioBuffer::new_interleaved(
            4,
            48_000,
            SampleFormat::F32,
            ChannelLayout::Mono,
            PlaneData::F32(vec![0.1, 0.2, -0.3, 0.4].into()),
        );
        let mut sink_out = Vec::new();
        sink.process(&[buf], &mut sink_out).unwrap();
        sink.stop().unwrap();

        let mut source = FileSourceNode::new("source", &path);
        source.configure(format).unwrap();
        source.start().unwrap();
        let mut out = Vec::new();
        source.process(&[], &mut out).unwrap();
        let samples = out[0].to_f32_interleaved();
        assert!((samples[0] - 0.1).abs() < 1e-4);
        assert!((samples[2] - (-0.3)).abs() < 1e-4);
    }

    #[test]
    fn exhausted_source_emits_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let format = AudioFormat::new(48_000, SampleFormat::F32, ChannelLayout::Mono, 4);
        let mut sink = FileSinkNode::new("sink", &path);
        sink.configure(format).unwrap();
        sink.start().unwrap();
        let buf = AudioBuffer::new_interleaved(
            4,
            48_000,
            SampleFormat::F32,
            ChannelLayout::Mono,
            PlaneData::F32(vec![1.0, 1.0, 1.0, 1.0].into()),
        );
        let mut sink_out = Vec::new();
        sink.process(&[buf], &mut sink_out).unwrap();
        sink.stop().unwrap();

        let mut source = FileSourceNode::new("source", &path);
        source.configure(format).unwrap();
        source.start().unwrap();
        let mut first = Vec::new();
        source.process(&[], &mut first).unwrap();
        let mut second = Vec::new();
        source.process(&[], &mut second).unwrap();
        assert!(second[0].to_f32_interleaved().iter().all(|&s| s == 0.0));
    }
}
