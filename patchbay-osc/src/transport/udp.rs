use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use patchbay_types::{ErrorKind, PatchbayError};

use super::{check_size, Address, Transport, DEFAULT_RECV_TIMEOUT};

/// Whole-datagram UDP transport. One datagram is exactly one OSC packet:
/// no framing needed, the kernel preserves message boundaries.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    local: Address,
    recv_buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind a local socket and target `peer` for sends; `recv` accepts any
    /// sender (matching a server's listen socket).
    pub fn bind(local_port: u16, peer: Address) -> Result<Self, PatchbayError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))?;
        socket.set_read_timeout(Some(DEFAULT_RECV_TIMEOUT))?;
        let peer_addr = resolve(&peer)?;
        Ok(Self {
            socket,
            peer: peer_addr,
            local: Address::udp("0.0.0.0", local_port),
            recv_buf: vec![0u8; super::MAX_MESSAGE_SIZE.min(1 << 20)],
        })
    }

    /// Set the multicast/unicast TTL, clamped to the valid range.
    pub fn set_ttl(&self, ttl: i32) -> Result<(), PatchbayError> {
        self.socket.set_ttl(super::clamp_ttl(ttl) as u32)?;
        Ok(())
    }

    /// Receive timeout for this socket.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), PatchbayError> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }
}

fn resolve(addr: &Address) -> Result<SocketAddr, PatchbayError> {
    let port = addr.port.ok_or_else(|| {
        PatchbayError::new(ErrorKind::AddressError, "UDP address requires a port")
    })?;
    (addr.host.as_str(), port)
        .to_socket_addrs()
        .map_err(PatchbayError::from)?
        .next()
        .ok_or_else(|| {
            PatchbayError::new(
                ErrorKind::AddressError,
                format!("could not resolve '{}:{}'", addr.host, port),
            )
        })
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), PatchbayError> {
        check_size(bytes)?;
        self.socket.send_to(bytes, self.peer)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, PatchbayError> {
        match self.socket.recv_from(&mut self.recv_buf) {
            Ok((n, _src)) => Ok(Some(self.recv_buf[..n].to_vec())),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Some(Vec::new())),
            Err(e) => Err(e.into()),
        }
    }

    fn local_url(&self) -> String {
        self.local.url()
    }
}
