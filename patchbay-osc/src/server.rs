//! Server loop: receive packets from a transport, dispatch immediate
//! messages/bundles directly, schedule future-dated bundles, and drain the
//! scheduler as time passes. Both a blocking single-call loop and a
//! background-thread variant are provided, each driven by a shared
//! stop flag that unblocks the listener thread cooperatively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use patchbay_types::{ErrorKind, PatchbayError};

use crate::codec::{decode_packet, encode_packet};
use crate::dispatcher::Dispatcher;
use crate::scheduler::Scheduler;
use crate::timetag::Timetag;
use crate::transport::Transport;
use crate::value::OscPacket;

/// How often the scheduler-poll loop wakes to drain due bundles when no
/// new packets are arriving.
const SCHEDULER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One blocking receive-and-dispatch server loop body, reusable by both the
/// foreground `run_once`/`run_forever` API and the background thread.
pub struct ServerLoop {
    transport: Box<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
}

impl ServerLoop {
    pub fn new(
        transport: Box<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            scheduler,
        }
    }

    /// Receive and process exactly one packet. Returns `Ok(false)` when the
    /// transport reported a cooperative close.
    pub fn run_once(&mut self) -> Result<bool, PatchbayError> {
        let bytes = match self.transport.recv()? {
            Some(bytes) if !bytes.is_empty() => bytes,
            Some(_) => return Ok(true), // timed-out poll with nothing to do
            None => return Ok(false),
        };
        let packet = decode_packet(&bytes)?;
        self.handle_packet(packet);
        Ok(true)
    }

    fn handle_packet(&self, packet: OscPacket) {
        match packet {
            OscPacket::Message(msg) => self.dispatcher.dispatch_message(&msg),
            OscPacket::Bundle(bundle) => {
                if bundle.time_tag.is_immediate() || bundle.time_tag <= Timetag::now() {
                    self.dispatcher
                        .dispatch_packet(&OscPacket::Bundle(bundle));
                } else if let Err(e) = self.scheduler.schedule(bundle) {
                    log::warn!("dropping bundle: {e}");
                }
            }
        }
    }

    /// Drain any bundles whose time has come; call periodically from the
    /// foreground loop or the scheduler-poll thread.
    pub fn drain_scheduler(&self) {
        for bundle in self.scheduler.drain_due(Timetag::now()) {
            self.dispatcher
                .dispatch_packet(&OscPacket::Bundle(bundle));
        }
    }

    /// Encode and send a packet through this loop's transport (used for
    /// replies and console mirroring).
    pub fn send(&mut self, packet: &OscPacket) -> Result<(), PatchbayError> {
        let bytes = encode_packet(packet)?;
        self.transport.send(&bytes)
    }
}

/// A background server: owns a receive thread and a scheduler-poll thread,
/// both cooperatively stopped via a shared flag, with optional one-shot
/// init/cleanup hooks.
pub struct BackgroundServer {
    running: Arc<AtomicBool>,
    recv_handle: Option<JoinHandle<()>>,
    poll_handle: Option<JoinHandle<()>>,
}

impl BackgroundServer {
    /// Start the background threads. `init` runs once before the receive
    /// loop begins; `cleanup` runs once after both threads have stopped.
    pub fn start(
        mut server: ServerLoop,
        scheduler: Arc<Scheduler>,
        dispatcher: Arc<Dispatcher>,
        init: Option<Box<dyn FnOnce() + Send>>,
        cleanup: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));

        let recv_running = running.clone();
        let recv_handle = thread::spawn(move || {
            if let Some(init) = init {
                init();
            }
            while recv_running.load(Ordering::Relaxed) {
                match server.run_once() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        log::error!("server loop error: {e}");
                        if e.kind == ErrorKind::SocketClosed {
                            break;
                        }
                    }
                }
            }
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        });

        let poll_running = running.clone();
        let poll_handle = thread::spawn(move || {
            while poll_running.load(Ordering::Relaxed) {
                for bundle in scheduler.drain_due(Timetag::now()) {
                    dispatcher.dispatch_packet(&OscPacket::Bundle(bundle));
                }
                thread::sleep(SCHEDULER_POLL_INTERVAL);
            }
        });

        Self {
            running,
            recv_handle: Some(recv_handle),
            poll_handle: Some(poll_handle),
        }
    }

    /// Signal both background threads to stop and join them.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.recv_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.poll_handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Address, UdpTransport};
    use crate::value::{OscMessage, OscValue};
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_once_dispatches_an_immediate_message() {
        let server_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_port = server_sock.local_addr().unwrap().port();
        drop(server_sock);

        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        dispatcher
            .add_method(
                "/ping",
                None,
                Box::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        let scheduler = Arc::new(Scheduler::new());

        let listen = UdpTransport::bind(server_port, Address::udp("127.0.0.1", 0)).unwrap();
        let mut server = ServerLoop::new(Box::new(listen), dispatcher, scheduler);

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        let packet = OscPacket::Message(OscMessage::new("/ping", vec![OscValue::Nil]));
        let bytes = encode_packet(&packet).unwrap();
        client.send_to(&bytes, ("127.0.0.1", server_port)).unwrap();

        server.run_once().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
