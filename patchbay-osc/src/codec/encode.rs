use patchbay_types::{ErrorKind, PatchbayError};

use crate::codec::{padded_len, BUNDLE_TAG};
use crate::value::{OscBundle, OscMessage, OscPacket, OscValue};

/// Encode a top-level packet (message or bundle) to its OSC wire bytes.
pub fn encode_packet(packet: &OscPacket) -> Result<Vec<u8>, PatchbayError> {
    let mut out = Vec::new();
    write_packet(packet, &mut out)?;
    Ok(out)
}

fn write_packet(packet: &OscPacket, out: &mut Vec<u8>) -> Result<(), PatchbayError> {
    match packet {
        OscPacket::Message(msg) => write_message(msg, out),
        OscPacket::Bundle(bundle) => write_bundle(bundle, out),
    }
}

fn write_message(msg: &OscMessage, out: &mut Vec<u8>) -> Result<(), PatchbayError> {
    write_string(&msg.address, out)?;

    let mut type_tags = String::with_capacity(msg.args.len() + 1);
    type_tags.push(',');
    push_type_tags(&msg.args, &mut type_tags);
    write_string(&type_tags, out)?;

    for arg in &msg.args {
        write_value(arg, out)?;
    }
    Ok(())
}

fn push_type_tags(args: &[OscValue], tags: &mut String) {
    for arg in args {
        match arg {
            OscValue::Array(elements) => {
                tags.push('[');
                push_type_tags(elements, tags);
                tags.push(']');
            }
            other => tags.push(other.type_tag().expect("non-array values always have a tag")),
        }
    }
}

fn write_bundle(bundle: &OscBundle, out: &mut Vec<u8>) -> Result<(), PatchbayError> {
    out.extend_from_slice(BUNDLE_TAG);
    out.extend_from_slice(&bundle.time_tag.to_u64().to_be_bytes());

    for element in &bundle.elements {
        let encoded = {
            let mut buf = Vec::new();
            write_packet(element, &mut buf)?;
            buf
        };
        out.extend_from_slice(&(encoded.len() as i32).to_be_bytes());
        out.extend_from_slice(&encoded);
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> Result<(), PatchbayError> {
    if !s.is_ascii() {
        return Err(PatchbayError::new(
            ErrorKind::Malformed,
            format!("OSC strings must be ASCII, got {s:?}"),
        ));
    }
    let bytes = s.as_bytes();
    let target = padded_len(bytes.len());
    out.extend_from_slice(bytes);
    out.resize(out.len() + (target - bytes.len()), 0);
    Ok(())
}

fn write_value(value: &OscValue, out: &mut Vec<u8>) -> Result<(), PatchbayError> {
    match value {
        OscValue::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
        OscValue::Float32(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        OscValue::String(s) => write_string(s, out)?,
        OscValue::Blob(bytes) => {
            out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            out.extend_from_slice(bytes);
            let padded = padded_len_blob(bytes.len());
            out.resize(out.len() + (padded - bytes.len()), 0);
        }
        OscValue::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
        OscValue::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        OscValue::Time(t) => out.extend_from_slice(&t.to_u64().to_be_bytes()),
        OscValue::True | OscValue::False | OscValue::Nil | OscValue::Infinitum => {}
        OscValue::Char(c) => out.extend_from_slice(&(*c as u32).to_be_bytes()),
        OscValue::Color(bytes) => out.extend_from_slice(bytes),
        OscValue::Midi(bytes) => out.extend_from_slice(bytes),
        OscValue::Array(elements) => {
            for el in elements {
                write_value(el, out)?;
            }
        }
    }
    Ok(())
}

/// Blob padding is to the next 4-byte boundary counting only the payload
/// (the 4-byte length prefix is already aligned and not itself padded).
fn padded_len_blob(len: usize) -> usize {
    (len + 3) & !3
}
