//! End-to-end scenario: a client encodes a bundle containing two messages,
//! sends it over UDP, and the server-side dispatcher routes each message to
//! its registered handler.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use patchbay_osc::transport::{Address, UdpTransport};
use patchbay_osc::{
    encode_packet, Dispatcher, OscBundle, OscMessage, OscPacket, OscValue, Scheduler, ServerLoop,
    Timetag,
};

#[test]
fn bundled_messages_dispatch_to_their_own_handlers() {
    let server_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server_port = server_sock.local_addr().unwrap().port();
    drop(server_sock);

    let dispatcher = Arc::new(Dispatcher::new());
    let gain_hits = Arc::new(AtomicUsize::new(0));
    let mute_hits = Arc::new(AtomicUsize::new(0));

    let g = gain_hits.clone();
    dispatcher
        .add_method(
            "/track/*/gain",
            None,
            Box::new(move |msg| {
                assert_eq!(msg.args.first().and_then(|v| v.as_float32()), Some(-6.0));
                g.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let m = mute_hits.clone();
    dispatcher
        .add_method(
            "/track/*/mute",
            None,
            Box::new(move |_msg| {
                m.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let scheduler = Arc::new(Scheduler::new());
    let listen = UdpTransport::bind(server_port, Address::udp("127.0.0.1", 0)).unwrap();
    let mut server = ServerLoop::new(Box::new(listen), dispatcher, scheduler);

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    let bundle = OscPacket::Bundle(OscBundle::new(
        Timetag::immediate(),
        vec![
            OscPacket::Message(OscMessage::new(
                "/track/3/gain",
                vec![OscValue::Float32(-6.0)],
            )),
            OscPacket::Message(OscMessage::new("/track/3/mute", vec![OscValue::True])),
        ],
    ));
    let bytes = encode_packet(&bundle).unwrap();
    client.send_to(&bytes, ("127.0.0.1", server_port)).unwrap();

    server.run_once().unwrap();

    assert_eq!(gain_hits.load(Ordering::SeqCst), 1);
    assert_eq!(mute_hits.load(Ordering::SeqCst), 1);
}
