//! Hardware driver collaborator and the persisted device-state JSON file.
//!
//! Device enumeration beyond the collaborator trait is out of scope for
//! this crate; this module defines the boundary the engine talks to and
//! ships one real implementation (`CpalHardware`) plus a deterministic
//! test double so graph tests don't need a real device.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use cpal::traits::{DeviceTrait, HostTrait};
use regex::Regex;
use serde::{Deserialize, Serialize};

use patchbay_types::{ChannelLayout, ErrorKind, PatchbayError, SampleFormat};

/// One callback invocation worth of device I/O: planar f32 input and output
/// slices, `frames` samples each.
pub type DeviceCallback = Box<dyn FnMut(&[&[f32]], &mut [&mut [f32]], usize) + Send>;

/// A device the collaborator can open, named and counted but otherwise
/// opaque (device enumeration internals are a Non-goal).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub input_count: u16,
    pub output_count: u16,
}

/// The hardware driver collaborator contract: list devices, open one,
/// report its negotiated format, register the real-time callback, and
/// start/stop the stream. The driver runs `set_callback`'s closure on a
/// real-time thread it owns.
pub trait HardwareIoCollaborator: Send {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PatchbayError>;
    fn open(&mut self, name: Option<&str>) -> Result<(), PatchbayError>;
    fn sample_rate(&self) -> u32;
    fn buffer_size(&self) -> usize;
    fn sample_format(&self) -> SampleFormat;
    fn input_count(&self) -> u16;
    fn output_count(&self) -> u16;
    fn set_callback(&mut self, callback: DeviceCallback);
    fn start(&mut self) -> Result<(), PatchbayError>;
    fn stop(&mut self) -> Result<(), PatchbayError>;
}

/// `cpal`-backed implementation of the hardware collaborator, the one real
/// collaborator this crate ships (an ASIO shim stays an external,
/// hardware-specific concern outside this crate).
pub struct CpalHardware {
    host: cpal::Host,
    device: Option<cpal::Device>,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    buffer_size: usize,
    input_count: u16,
    output_count: u16,
}

impl CpalHardware {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            device: None,
            stream: None,
            sample_rate: 48_000,
            buffer_size: 128,
            input_count: 0,
            output_count: 2,
        }
    }
}

impl Default for CpalHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareIoCollaborator for CpalHardware {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PatchbayError> {
        let devices = self.host.devices().map_err(|e| {
            PatchbayError::with_source(ErrorKind::ConfigError, "failed to enumerate cpal devices", e)
        })?;
        let mut out = Vec::new();
        for device in devices {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let input_count = device
                .supported_input_configs()
                .ok()
                .and_then(|mut c| c.next())
                .map(|c| c.channels())
                .unwrap_or(0);
            let output_count = device
                .supported_output_configs()
                .ok()
                .and_then(|mut c| c.next())
                .map(|c| c.channels())
                .unwrap_or(0);
            out.push(DeviceInfo {
                name,
                input_count,
                output_count,
            });
        }
        Ok(out)
    }

    fn open(&mut self, name: Option<&str>) -> Result<(), PatchbayError> {
        let device = match name {
            Some(search) => self
                .host
                .devices()
                .map_err(|e| PatchbayError::with_source(ErrorKind::ConfigError, "cpal enumeration failed", e))?
                .find(|d| d.name().map(|n| n.contains(search)).unwrap_or(false))
                .ok_or_else(|| {
                    PatchbayError::new(ErrorKind::ConfigError, format!("no device matching '{search}'"))
                })?,
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| PatchbayError::new(ErrorKind::ConfigError, "no default output device"))?,
        };
        self.device = Some(device);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::F32
    }

    fn input_count(&self) -> u16 {
        self.input_count
    }

    fn output_count(&self) -> u16 {
        self.output_count
    }

    fn set_callback(&mut self, mut callback: DeviceCallback) {
        let device = match &self.device {
            Some(d) => d,
            None => return,
        };
        let config = match device.default_output_config() {
            Ok(c) => c,
            Err(_) => return,
        };
        let channels = config.channels() as usize;
        let stream = device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _info| {
                let frames = data.len() / channels.max(1);
                let mut out_channel_bufs: Vec<Vec<f32>> = vec![vec![0.0; frames]; channels];
                {
                    let mut refs: Vec<&mut [f32]> = out_channel_bufs.iter_mut().map(|v| v.as_mut_slice()).collect();
                    callback(&[], &mut refs, frames);
                }
                for (frame, chunk) in data.chunks_mut(channels).enumerate() {
                    for (ch, sample) in chunk.iter_mut().enumerate() {
                        *sample = out_channel_bufs[ch][frame];
                    }
                }
            },
            |err| log::error!("cpal stream error: {err}"),
            None,
        );
        if let Ok(stream) = stream {
            self.stream = Some(stream);
        }
    }

    fn start(&mut self) -> Result<(), PatchbayError> {
        use cpal::traits::StreamTrait;
        match &self.stream {
            Some(stream) => stream
                .play()
                .map_err(|e| PatchbayError::with_source(ErrorKind::RuntimeError, "failed to start stream", e)),
            None => Err(PatchbayError::new(ErrorKind::ConfigError, "no stream configured")),
        }
    }

    fn stop(&mut self) -> Result<(), PatchbayError> {
        use cpal::traits::StreamTrait;
        match &self.stream {
            Some(stream) => stream
                .pause()
                .map_err(|e| PatchbayError::with_source(ErrorKind::RuntimeError, "failed to stop stream", e)),
            None => Ok(()),
        }
    }
}

/// A deterministic test double: no real device, just format bookkeeping and
/// a callback the test can drive manually by calling `tick`.
#[derive(Default)]
pub struct NullHardware {
    sample_rate: u32,
    buffer_size: usize,
    input_count: u16,
    output_count: u16,
    callback: Option<DeviceCallback>,
    running: bool,
}

impl NullHardware {
    pub fn new(sample_rate: u32, buffer_size: usize, input_count: u16, output_count: u16) -> Self {
        Self {
            sample_rate,
            buffer_size,
            input_count,
            output_count,
            callback: None,
            running: false,
        }
    }

    /// Drive the callback exactly once, as the real-time thread would.
    pub fn tick(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        if let Some(cb) = self.callback.as_mut() {
            cb(inputs, outputs, frames);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl HardwareIoCollaborator for NullHardware {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PatchbayError> {
        Ok(vec![DeviceInfo {
            name: "null".to_string(),
            input_count: self.input_count,
            output_count: self.output_count,
        }])
    }

    fn open(&mut self, _name: Option<&str>) -> Result<(), PatchbayError> {
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::F32
    }

    fn input_count(&self) -> u16 {
        self.input_count
    }

    fn output_count(&self) -> u16 {
        self.output_count
    }

    fn set_callback(&mut self, callback: DeviceCallback) {
        self.callback = Some(callback);
    }

    fn start(&mut self) -> Result<(), PatchbayError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PatchbayError> {
        self.running = false;
        Ok(())
    }
}

/// Persisted device configuration: the object serialized to the
/// device-state JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: i32,
    pub device_name: String,
    pub supported_sample_rates: Vec<f64>,
    pub supported_input_channels: Vec<u16>,
    pub supported_output_channels: Vec<u16>,
    pub current_sample_rate: f64,
    pub current_input_channels: u16,
    pub current_output_channels: u16,
    pub is_active: bool,
}

impl DeviceState {
    pub fn new(device_id: i32, device_name: impl Into<String>) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            supported_sample_rates: Vec::new(),
            supported_input_channels: Vec::new(),
            supported_output_channels: Vec::new(),
            current_sample_rate: 44_100.0,
            current_input_channels: 0,
            current_output_channels: 0,
            is_active: false,
        }
    }
}

/// `[A-Za-z0-9_-]` with spaces mapped to `_`, everything else dropped.
fn sanitize_device_name(name: &str) -> String {
    let spaces_mapped = name.replace(' ', "_");
    let re = Regex::new(r"[^A-Za-z0-9_-]").expect("static sanitize regex is valid");
    re.replace_all(&spaces_mapped, "").to_string()
}

fn device_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("device_config")
}

/// Build the filename `audio-device_<sanitized-name>_date-time_<YYYY-MM-DD_HH-MM-SS>.json`,
/// given a Unix timestamp so callers (and tests) control the clock.
fn device_state_filename(device_name: &str, unix_secs: u64) -> String {
    let datetime = format_unix_timestamp(unix_secs);
    format!(
        "audio-device_{}_date-time_{}.json",
        sanitize_device_name(device_name),
        datetime
    )
}

/// Minimal UTC `YYYY-MM-DD_HH-MM-SS` formatter so this crate doesn't need a
/// `chrono`/`time` dependency just for one filename component.
fn format_unix_timestamp(unix_secs: u64) -> String {
    const SECS_PER_DAY: u64 = 86_400;
    let days = unix_secs / SECS_PER_DAY;
    let secs_of_day = unix_secs % SECS_PER_DAY;
    let (hour, minute, second) = (secs_of_day / 3600, (secs_of_day / 60) % 60, secs_of_day % 60);

    // Civil-from-days algorithm (Howard Hinnant's public-domain date algorithms).
    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!(
        "{year:04}-{month:02}-{day:02}_{hour:02}-{minute:02}-{second:02}"
    )
}

/// Write `state` to `~/device_config/audio-device_<...>.json`. Creates
/// the directory if it doesn't exist.
pub fn save_device_state(state: &DeviceState) -> Result<PathBuf, PatchbayError> {
    let dir = device_config_dir();
    std::fs::create_dir_all(&dir)?;
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(device_state_filename(&state.device_name, unix_secs));
    let json = serde_json::to_string_pretty(state).map_err(|e| {
        PatchbayError::with_source(ErrorKind::ConfigError, "failed to serialize device state", e)
    })?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Load a previously persisted device state from an explicit path. There is
/// no load-on-boot scan: this is write-oriented telemetry of the last known
/// state, not save/restore across restarts.
pub fn load_device_state(path: &std::path::Path) -> Result<DeviceState, PatchbayError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| PatchbayError::with_source(ErrorKind::ConfigError, "failed to parse device state", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_spaces_and_drops_punctuation() {
        assert_eq!(sanitize_device_name("Focusrite 18i20 (USB)"), "Focusrite_18i20_USB");
    }

    #[test]
    fn filename_matches_expected_shape() {
        let name = device_state_filename("My Device", 1_700_000_000);
        assert!(name.starts_with("audio-device_My_Device_date-time_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let state = DeviceState::new(0, "Test Device");
        let json = serde_json::to_string(&state).unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, json).unwrap();
        let loaded = load_device_state(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn null_hardware_drives_callback_manually() {
        let mut hw = NullHardware::new(48_000, 128, 0, 2);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(0usize));
        let seen2 = seen.clone();
        hw.set_callback(Box::new(move |_in, out, frames| {
            *seen2.lock().unwrap() = frames;
            for ch in out.iter_mut() {
                ch.fill(0.5);
            }
        }));
        hw.start().unwrap();
        let mut l = vec![0.0f32; 128];
        let mut r = vec![0.0f32; 128];
        {
            let mut outs: Vec<&mut [f32]> = vec![&mut l, &mut r];
            hw.tick(&[], &mut outs, 128);
        }
        assert_eq!(*seen.lock().unwrap(), 128);
        assert!(l.iter().all(|&s| s == 0.5));
    }
}
