//! The OSC wire codec: bit-exact encode/decode of messages, bundles,
//! and the type-tag string grammar, including nested arrays and bundles.
//!
//! Implemented from first principles rather than delegated to a
//! third-party OSC crate, since exact wire fidelity (4-byte string/blob
//! padding, int32 blob length prefix, bundle `#bundle\0` header,
//! nested-element int32 size prefix) is the point of this module.

mod decode;
mod encode;

pub use decode::decode_packet;
pub use encode::encode_packet;

pub(crate) const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Round a byte length up to the next multiple of 4, per the OSC padding
/// rule applied to strings and blobs.
pub(crate) fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetag::Timetag;
    use crate::value::{OscMessage, OscPacket, OscValue};

    #[test]
    fn padded_len_rounds_up_and_always_adds_a_terminator() {
        assert_eq!(padded_len(0), 4);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(3), 4);
        assert_eq!(padded_len(4), 8);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn message_round_trips_through_encode_decode() {
        let msg = OscPacket::Message(OscMessage::new(
            "/synth/1/gain",
            vec![
                OscValue::Float32(0.75),
                OscValue::String("ramp".into()),
                OscValue::Int32(-12),
            ],
        ));
        let bytes = encode_packet(&msg).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn nested_bundle_round_trips_recursively() {
        use crate::value::OscBundle;

        let inner = OscPacket::Bundle(OscBundle::new(
            Timetag::immediate(),
            vec![OscPacket::Message(OscMessage::new("/inner", vec![OscValue::Int32(1)]))],
        ));
        let outer = OscPacket::Bundle(OscBundle::new(
            Timetag::now(),
            vec![
                OscPacket::Message(OscMessage::new("/outer", vec![OscValue::True])),
                inner,
            ],
        ));
        let bytes = encode_packet(&outer).unwrap();
        let decoded = decode_packet(&bytes).unwrap();
        assert_eq!(decoded, outer);
    }
}
