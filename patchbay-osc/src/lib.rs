//! The OSC protocol core: wire codec, address pattern matcher, transports,
//! method dispatcher, bundle scheduler, and server loop.

pub mod codec;
pub mod dispatcher;
pub mod pattern;
pub mod scheduler;
pub mod server;
pub mod timetag;
pub mod transport;
pub mod value;

pub use codec::{decode_packet, encode_packet};
pub use dispatcher::{Dispatcher, Handler, HandlerError};
pub use scheduler::Scheduler;
pub use server::{BackgroundServer, ServerLoop};
pub use timetag::Timetag;
pub use transport::{Address, Scheme, TcpTransport, Transport, UdpTransport, UnixTransport};
pub use value::{OscBundle, OscMessage, OscPacket, OscValue};
