//! Runtime configuration read from environment variables. No config
//! *file* format is implemented — JSON/TOML config loading is out of
//! scope — this is the narrow env-var surface the process needs in order
//! to boot.

use patchbay_types::{ChannelLayout, SampleFormat};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// The handful of values a headless run of the engine needs before it can
/// open a device, bind a socket, and build its default graph.
pub struct RuntimeConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
    /// UDP port the OSC server listens on (`PATCHBAY_OSC_LISTEN_PORT`).
    pub osc_listen_port: u16,
    /// Outbound console address as an `osc.<scheme>://host:port/` URL, if
    /// command mirroring is enabled (`PATCHBAY_CONSOLE_URL`).
    pub console_url: Option<String>,
    /// `gain=<db>` the default filter node starts with
    /// (`PATCHBAY_DEFAULT_GAIN_DB`).
    pub default_gain_db: f64,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let channels: u16 = env_parse("PATCHBAY_CHANNELS", 2);
        Self {
            sample_rate: env_parse("PATCHBAY_SAMPLE_RATE", 48_000),
            buffer_size: env_parse("PATCHBAY_BUFFER_SIZE", 256),
            channel_layout: ChannelLayout::from_channel_count(channels),
            sample_format: SampleFormat::F32,
            osc_listen_port: env_parse("PATCHBAY_OSC_LISTEN_PORT", 9000),
            console_url: std::env::var("PATCHBAY_CONSOLE_URL").ok(),
            default_gain_db: env_parse("PATCHBAY_DEFAULT_GAIN_DB", 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_missing_or_invalid_value() {
        std::env::remove_var("PATCHBAY_TEST_PARSE_KEY");
        assert_eq!(env_parse::<u32>("PATCHBAY_TEST_PARSE_KEY", 7), 7);
    }
}
