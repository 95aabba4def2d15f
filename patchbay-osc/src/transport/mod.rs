//! Transports: UDP (whole-datagram framing), TCP and Unix domain
//! sockets (4-byte big-endian length-prefix framing applied to raw OSC
//! packet bytes).

mod address;
mod tcp;
mod udp;
mod unix;

pub use address::{clamp_ttl, Address, Scheme};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;
pub use unix::UnixTransport;

use std::io::{Read, Write};
use std::time::Duration;

use patchbay_types::{ErrorKind, PatchbayError};

/// Ceiling enforced before a send: the maximum accepted message size,
/// reported via `MessageTooLarge` past this point.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default read timeout applied to TCP/Unix connections so a blocking
/// `recv` periodically returns control to the server loop, which is how
/// `BackgroundServer::stop` unblocks an outstanding receive within one
/// tick without needing raw fd shutdown plumbing. Overridable
/// per-connection via `set_timeout`.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// A transport sends and receives whole OSC packets (already encoded to
/// bytes by the codec) without interpreting their contents.
pub trait Transport: Send {
    /// Send one encoded packet to the transport's configured peer.
    fn send(&mut self, bytes: &[u8]) -> Result<(), PatchbayError>;

    /// Block until the next whole packet arrives, or return `Ok(None)` if
    /// the transport was closed cooperatively.
    fn recv(&mut self) -> Result<Option<Vec<u8>>, PatchbayError>;

    /// The address this transport is bound to or connected to.
    fn local_url(&self) -> String;
}

pub(crate) fn check_size(bytes: &[u8]) -> Result<(), PatchbayError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(PatchbayError::new(
            patchbay_types::ErrorKind::MessageTooLarge,
            format!("packet of {} bytes exceeds {} byte limit", bytes.len(), MAX_MESSAGE_SIZE),
        ));
    }
    Ok(())
}

/// Write a 4-byte big-endian length prefix followed by `bytes`, the framing
/// used by both the TCP and Unix transports.
pub(crate) fn write_framed<W: std::io::Write>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<(), PatchbayError> {
    check_size(bytes)?;
    writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

/// Incrementally assembles 4-byte-length-prefixed frames across
/// however many partial reads the underlying stream delivers them in,
/// rather than relying on a single blocking `read_exact`, so a frame that
/// arrives in two halves across two `recv` calls still yields exactly one
/// dispatched message.
pub(crate) struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn take_ready(&mut self) -> Result<Option<Vec<u8>>, PatchbayError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(PatchbayError::new(
                ErrorKind::MessageTooLarge,
                format!("incoming frame of {len} bytes exceeds {MAX_MESSAGE_SIZE} byte limit"),
            ));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.buf[4..4 + len].to_vec();
        self.buf.drain(0..4 + len);
        Ok(Some(frame))
    }

    /// Pull whatever bytes are currently available from `reader` (one
    /// read, bounded by the socket's configured timeout) and return:
    /// `Ok(Some(frame))` once a full frame is assembled, `Ok(Some(vec![]))`
    /// if more bytes are needed and none (or an incomplete amount) arrived
    /// this pass, or `Ok(None)` on a clean EOF at a frame boundary.
    pub fn recv<R: Read>(&mut self, reader: &mut R) -> Result<Option<Vec<u8>>, PatchbayError> {
        if let Some(frame) = self.take_ready()? {
            return Ok(Some(frame));
        }
        let mut tmp = [0u8; 4096];
        match reader.read(&mut tmp) {
            Ok(0) => {
                if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(PatchbayError::new(
                        ErrorKind::SocketClosed,
                        "connection closed with a partial frame buffered",
                    ))
                }
            }
            Ok(n) => {
                self.buf.extend_from_slice(&tmp[..n]);
                Ok(Some(self.take_ready()?.unwrap_or_default()))
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(Some(Vec::new()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
