use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use patchbay_types::{ErrorKind, PatchbayError};

use super::{write_framed, Address, FrameAssembler, Transport, DEFAULT_RECV_TIMEOUT};

/// TCP transport with 4-byte big-endian length-prefix framing applied to
/// raw OSC bytes.
pub struct TcpTransport {
    reader: TcpStream,
    writer: TcpStream,
    assembler: FrameAssembler,
    peer: Address,
}

impl TcpTransport {
    /// Connect to a remote OSC TCP server.
    pub fn connect(peer: Address) -> Result<Self, PatchbayError> {
        let port = peer.port.ok_or_else(|| {
            PatchbayError::new(ErrorKind::AddressError, "TCP address requires a port")
        })?;
        let addrs: Vec<_> = (peer.host.as_str(), port)
            .to_socket_addrs()
            .map_err(PatchbayError::from)?
            .collect();
        let stream = addrs
            .iter()
            .find_map(|a| TcpStream::connect(a).ok())
            .ok_or_else(|| {
                PatchbayError::new(
                    ErrorKind::Network,
                    format!("could not connect to {}:{}", peer.host, port),
                )
            })?;
        stream.set_read_timeout(Some(DEFAULT_RECV_TIMEOUT))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: stream,
            writer,
            assembler: FrameAssembler::new(),
            peer,
        })
    }

    /// Wrap an already-accepted server-side connection.
    pub fn from_stream(stream: TcpStream, peer: Address) -> Result<Self, PatchbayError> {
        stream.set_read_timeout(Some(DEFAULT_RECV_TIMEOUT))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: stream,
            writer,
            assembler: FrameAssembler::new(),
            peer,
        })
    }

    /// Enable or disable Nagle's algorithm on this connection's socket.
    /// Nagle is enabled (nodelay off) by default.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<(), PatchbayError> {
        self.reader.set_nodelay(nodelay)?;
        Ok(())
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), PatchbayError> {
        self.reader.set_read_timeout(timeout)?;
        Ok(())
    }
}

/// A bound TCP listener that accepts incoming OSC connections, one per
/// peer.
pub struct TcpServerSocket {
    listener: TcpListener,
}

impl TcpServerSocket {
    pub fn bind(port: u16) -> Result<Self, PatchbayError> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(Self { listener })
    }

    pub fn accept(&self) -> Result<TcpTransport, PatchbayError> {
        let (stream, peer_addr) = self.listener.accept()?;
        let peer = Address::tcp(peer_addr.ip().to_string(), peer_addr.port());
        TcpTransport::from_stream(stream, peer)
    }

    pub fn local_port(&self) -> Result<u16, PatchbayError> {
        Ok(self.listener.local_addr()?.port())
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), PatchbayError> {
        write_framed(&mut self.writer, bytes)
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>, PatchbayError> {
        self.assembler.recv(&mut self.reader)
    }

    fn local_url(&self) -> String {
        self.peer.url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn framed_message_round_trips_over_loopback() {
        let server = TcpServerSocket::bind(0).unwrap();
        let port = server.local_port().unwrap();

        let handle = thread::spawn(move || {
            let mut conn = server.accept().unwrap();
            conn.recv().unwrap().unwrap()
        });

        let mut client = TcpTransport::connect(Address::tcp("127.0.0.1", port)).unwrap();
        client.send(b"/ping\0\0\0,i\0\0").unwrap();

        let received = handle.join().unwrap();
        assert_eq!(received, b"/ping\0\0\0,i\0\0");
    }
}
