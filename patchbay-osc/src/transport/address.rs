//! `Address` — a parsed `osc.(udp|tcp|unix)://host:port/` URL plus the
//! socket-level knobs transports expose: TTL, `TCP_NODELAY`, and receive
//! timeout.

use patchbay_types::{ErrorKind, PatchbayError};

/// Which socket family a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Udp,
    Tcp,
    Unix,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Udp => "udp",
            Scheme::Tcp => "tcp",
            Scheme::Unix => "unix",
        }
    }
}

/// A parsed OSC transport address.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub scheme: Scheme,
    pub host: String,
    /// Absent for `osc.unix://` addresses, where `host` is a socket path.
    pub port: Option<u16>,
}

impl Address {
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Udp,
            host: host.into(),
            port: Some(port),
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: host.into(),
            port: Some(port),
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Unix,
            host: path.into(),
            port: None,
        }
    }

    /// Parse `osc.udp://host:port/`, `osc.tcp://host:port/`, or
    /// `osc.unix://path/` into an `Address`.
    pub fn from_url(url: &str) -> Result<Self, PatchbayError> {
        let rest = url.strip_prefix("osc.").ok_or_else(|| {
            PatchbayError::new(ErrorKind::AddressError, format!("not an OSC url: {url}"))
        })?;

        let (scheme_str, rest) = rest.split_once("://").ok_or_else(|| {
            PatchbayError::new(ErrorKind::AddressError, format!("missing '://' in: {url}"))
        })?;

        let scheme = match scheme_str {
            "udp" => Scheme::Udp,
            "tcp" => Scheme::Tcp,
            "unix" => Scheme::Unix,
            other => {
                return Err(PatchbayError::new(
                    ErrorKind::AddressError,
                    format!("unknown OSC transport scheme '{other}'"),
                ))
            }
        };

        let rest = rest.trim_end_matches('/');

        match scheme {
            Scheme::Unix => Ok(Address::unix(rest.to_string())),
            _ => {
                let (host, port_str) = rest.rsplit_once(':').ok_or_else(|| {
                    PatchbayError::new(
                        ErrorKind::AddressError,
                        format!("missing port in: {url}"),
                    )
                })?;
                let port: u16 = port_str.parse().map_err(|_| {
                    PatchbayError::new(
                        ErrorKind::AddressError,
                        format!("invalid port '{port_str}' in: {url}"),
                    )
                })?;
                Ok(Self {
                    scheme,
                    host: host.to_string(),
                    port: Some(port),
                })
            }
        }
    }

    /// Reconstruct the canonical URL form of this address.
    pub fn url(&self) -> String {
        match self.scheme {
            Scheme::Unix => format!("osc.unix://{}/", self.host),
            _ => format!(
                "osc.{}://{}:{}/",
                self.scheme.as_str(),
                self.host,
                self.port.unwrap_or(0)
            ),
        }
    }
}

/// Multicast/unicast TTL clamp applied before `IP_MULTICAST_TTL`.
pub fn clamp_ttl(ttl: i32) -> u8 {
    ttl.clamp(1, 255) as u8
}
