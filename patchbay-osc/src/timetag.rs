//! OSC time tags: 64-bit NTP-format fixed point (seconds since 1900-01-01,
//! plus a fractional-second counter).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch
/// (1970-01-01).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// "Immediate" sentinel per the OSC spec: a time tag with seconds = 0 and
/// fraction = 1 means "execute as soon as possible".
const IMMEDIATE: Timetag = Timetag {
    seconds: 0,
    fraction: 1,
};

/// A 64-bit NTP-format time tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timetag {
    pub seconds: u32,
    pub fraction: u32,
}

impl Timetag {
    /// The time tag meaning "execute immediately".
    pub fn immediate() -> Self {
        IMMEDIATE
    }

    pub fn is_immediate(&self) -> bool {
        *self == IMMEDIATE
    }

    /// Pack into the raw 64-bit big-endian wire value.
    pub fn to_u64(self) -> u64 {
        ((self.seconds as u64) << 32) | (self.fraction as u64)
    }

    /// Unpack from the raw 64-bit big-endian wire value.
    pub fn from_u64(raw: u64) -> Self {
        Self {
            seconds: (raw >> 32) as u32,
            fraction: (raw & 0xFFFF_FFFF) as u32,
        }
    }

    /// The current wall-clock time, expressed as an NTP time tag.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix_duration(since_epoch)
    }

    /// Convert a duration since the Unix epoch into an NTP time tag.
    pub fn from_unix_duration(d: Duration) -> Self {
        let seconds = d.as_secs() + NTP_UNIX_OFFSET;
        let frac_secs = d.subsec_nanos() as f64 / 1_000_000_000.0;
        let fraction = (frac_secs * (u32::MAX as f64 + 1.0)) as u64;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    /// Convert this time tag back to a duration since the Unix epoch, if it
    /// represents a time on or after 1970-01-01.
    pub fn to_unix_duration(self) -> Option<Duration> {
        if self.is_immediate() {
            return None;
        }
        let secs = (self.seconds as u64).checked_sub(NTP_UNIX_OFFSET)?;
        let nanos = (self.fraction as f64 / (u32::MAX as f64 + 1.0) * 1_000_000_000.0) as u32;
        Some(Duration::new(secs, nanos))
    }
}

impl Default for Timetag {
    fn default() -> Self {
        Self::immediate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_round_trips() {
        let raw = Timetag::immediate().to_u64();
        assert_eq!(Timetag::from_u64(raw), Timetag::immediate());
    }

    #[test]
    fn now_is_after_ntp_epoch() {
        let t = Timetag::now();
        assert!(t.seconds > NTP_UNIX_OFFSET as u32 - 1);
    }

    #[test]
    fn unix_duration_round_trip_is_approximate() {
        let d = Duration::new(1_700_000_000, 500_000_000);
        let tag = Timetag::from_unix_duration(d);
        let back = tag.to_unix_duration().unwrap();
        assert_eq!(back.as_secs(), d.as_secs());
        assert!((back.subsec_millis() as i64 - d.subsec_millis() as i64).abs() <= 1);
    }

    #[test]
    fn ordering_is_by_seconds_then_fraction() {
        let a = Timetag { seconds: 10, fraction: 5 };
        let b = Timetag { seconds: 10, fraction: 6 };
        let c = Timetag { seconds: 11, fraction: 0 };
        assert!(a < b);
        assert!(b < c);
    }
}
