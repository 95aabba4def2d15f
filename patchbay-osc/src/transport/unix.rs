#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

use patchbay_types::PatchbayError;

#[cfg(unix)]
use super::{FrameAssembler, DEFAULT_RECV_TIMEOUT};
use super::{Address, Transport};

/// Unix domain socket transport, framed identically to TCP. Unix
/// sockets are unavailable on platforms without `AF_UNIX`, reported as
/// `NotImplemented` there.
pub struct UnixTransport {
    #[cfg(unix)]
    reader: UnixStream,
    #[cfg(unix)]
    writer: UnixStream,
    #[cfg(unix)]
    assembler: FrameAssembler,
    peer: Address,
}

impl UnixTransport {
    #[cfg(unix)]
    pub fn connect(path: impl Into<String>) -> Result<Self, PatchbayError> {
        let path = path.into();
        let stream = UnixStream::connect(&path)?;
        stream.set_read_timeout(Some(DEFAULT_RECV_TIMEOUT))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: stream,
            writer,
            assembler: FrameAssembler::new(),
            peer: Address::unix(path),
        })
    }

    #[cfg(not(unix))]
    pub fn connect(_path: impl Into<String>) -> Result<Self, PatchbayError> {
        Err(PatchbayError::new(
            patchbay_types::ErrorKind::NotImplemented,
            "Unix domain sockets are not available on this platform",
        ))
    }

    #[cfg(unix)]
    pub fn from_stream(stream: UnixStream, peer: Address) -> Result<Self, PatchbayError> {
        stream.set_read_timeout(Some(DEFAULT_RECV_TIMEOUT))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: stream,
            writer,
            assembler: FrameAssembler::new(),
            peer,
        })
    }
}

/// A bound Unix-domain listener, mirroring `TcpServerSocket`.
#[cfg(unix)]
pub struct UnixServerSocket {
    listener: UnixListener,
    path: String,
}

#[cfg(unix)]
impl UnixServerSocket {
    pub fn bind(path: impl Into<String>) -> Result<Self, PatchbayError> {
        let path = path.into();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    pub fn accept(&self) -> Result<UnixTransport, PatchbayError> {
        let (stream, _addr) = self.listener.accept()?;
        UnixTransport::from_stream(stream, Address::unix(self.path.clone()))
    }
}

impl Transport for UnixTransport {
    #[cfg(unix)]
    fn send(&mut self, bytes: &[u8]) -> Result<(), PatchbayError> {
        super::write_framed(&mut self.writer, bytes)
    }

    #[cfg(not(unix))]
    fn send(&mut self, _bytes: &[u8]) -> Result<(), PatchbayError> {
        unreachable!("UnixTransport cannot be constructed on non-unix platforms")
    }

    #[cfg(unix)]
    fn recv(&mut self) -> Result<Option<Vec<u8>>, PatchbayError> {
        self.assembler.recv(&mut self.reader)
    }

    #[cfg(not(unix))]
    fn recv(&mut self) -> Result<Option<Vec<u8>>, PatchbayError> {
        unreachable!("UnixTransport cannot be constructed on non-unix platforms")
    }

    fn local_url(&self) -> String {
        self.peer.url()
    }
}
