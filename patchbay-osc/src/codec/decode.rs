use patchbay_types::{ErrorKind, PatchbayError};

use crate::codec::BUNDLE_TAG;
use crate::timetag::Timetag;
use crate::value::{OscBundle, OscMessage, OscPacket, OscValue};

/// Ceiling on a single packet's encoded size, reported via the
/// `MessageTooLarge` error.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Ceiling on a single blob argument's payload size.
pub const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PatchbayError> {
        if self.remaining() < n {
            return Err(malformed("unexpected end of packet"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, PatchbayError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, PatchbayError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Read a NUL-terminated, 4-byte-padded OSC string.
    fn read_string(&mut self) -> Result<String, PatchbayError> {
        let start = self.pos;
        let nul_offset = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed("string is not NUL-terminated"))?;
        let end = start + nul_offset;
        let s = std::str::from_utf8(&self.buf[start..end])
            .map_err(|_| malformed("string is not valid UTF-8/ASCII"))?
            .to_string();
        let padded = (nul_offset + 1 + 3) & !3;
        self.take(padded)?;
        Ok(s)
    }

    fn read_blob(&mut self) -> Result<Vec<u8>, PatchbayError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(malformed("negative blob length"));
        }
        let len = len as usize;
        if len > MAX_BLOB_SIZE {
            return Err(PatchbayError::new(
                ErrorKind::MessageTooLarge,
                format!("blob of {len} bytes exceeds {MAX_BLOB_SIZE} byte limit"),
            ));
        }
        let bytes = self.take(len)?.to_vec();
        let padded = (len + 3) & !3;
        self.take(padded - len)?;
        Ok(bytes)
    }
}

fn malformed(msg: &str) -> PatchbayError {
    PatchbayError::new(ErrorKind::Malformed, msg)
}

/// Decode a top-level OSC packet: a bundle if the buffer starts with
/// `#bundle\0`, a message otherwise.
pub fn decode_packet(buf: &[u8]) -> Result<OscPacket, PatchbayError> {
    if buf.len() > MAX_PACKET_SIZE {
        return Err(PatchbayError::new(
            ErrorKind::MessageTooLarge,
            format!("packet of {} bytes exceeds {} byte limit", buf.len(), MAX_PACKET_SIZE),
        ));
    }
    let mut reader = Reader::new(buf);
    read_packet(&mut reader)
}

fn read_packet(reader: &mut Reader) -> Result<OscPacket, PatchbayError> {
    if reader.buf[reader.pos..].starts_with(BUNDLE_TAG) {
        reader.take(BUNDLE_TAG.len())?;
        read_bundle_body(reader).map(OscPacket::Bundle)
    } else {
        read_message(reader).map(OscPacket::Message)
    }
}

fn read_bundle_body(reader: &mut Reader) -> Result<OscBundle, PatchbayError> {
    let time_tag = Timetag::from_u64(reader.read_u64()?);
    let mut elements = Vec::new();
    while reader.remaining() > 0 {
        let size = reader.read_i32()?;
        if size < 0 {
            return Err(malformed("negative nested element size"));
        }
        let body = reader.take(size as usize)?;
        // Nested bundles decode recursively rather than being skipped.
        elements.push(decode_packet(body)?);
    }
    Ok(OscBundle { time_tag, elements })
}

fn read_message(reader: &mut Reader) -> Result<OscMessage, PatchbayError> {
    let address = reader.read_string()?;
    if !address.starts_with('/') {
        return Err(malformed("address pattern must start with '/'"));
    }

    let type_tags = reader.read_string()?;
    let mut chars = type_tags.chars();
    let first = chars.next();
    if first != Some(',') {
        return Err(malformed("type tag string must start with ','"));
    }

    let mut tag_chars: Vec<char> = chars.collect();
    let mut iter = tag_chars.drain(..).peekable();
    let args = read_value_sequence(reader, &mut iter, None)?;
    Ok(OscMessage { address, args })
}

/// Read a sequence of values described by `iter`, stopping at `stop` (used
/// to terminate a nested array at its matching `]`) or at end of input.
fn read_value_sequence(
    reader: &mut Reader,
    iter: &mut std::iter::Peekable<std::vec::Drain<char>>,
    stop: Option<char>,
) -> Result<Vec<OscValue>, PatchbayError> {
    let mut values = Vec::new();
    loop {
        match iter.peek().copied() {
            None => break,
            Some(c) if Some(c) == stop => {
                iter.next();
                break;
            }
            Some('[') => {
                iter.next();
                let nested = read_value_sequence(reader, iter, Some(']'))?;
                values.push(OscValue::Array(nested));
            }
            Some(tag) => {
                iter.next();
                values.push(read_value(reader, tag)?);
            }
        }
    }
    Ok(values)
}

fn read_value(reader: &mut Reader, tag: char) -> Result<OscValue, PatchbayError> {
    Ok(match tag {
        'i' => OscValue::Int32(reader.read_i32()?),
        'f' => OscValue::Float32(f32::from_bits(reader.read_i32()? as u32)),
        's' => OscValue::String(reader.read_string()?),
        'b' => OscValue::Blob(reader.read_blob()?),
        'h' => OscValue::Int64(reader.read_u64()? as i64),
        'd' => OscValue::Double(f64::from_bits(reader.read_u64()?)),
        't' => OscValue::Time(Timetag::from_u64(reader.read_u64()?)),
        'T' => OscValue::True,
        'F' => OscValue::False,
        'N' => OscValue::Nil,
        'I' => OscValue::Infinitum,
        'c' => {
            let raw = reader.read_i32()? as u32;
            OscValue::Char(char::from_u32(raw).unwrap_or('\u{FFFD}'))
        }
        'r' => {
            let bytes = reader.take(4)?;
            OscValue::Color(bytes.try_into().unwrap())
        }
        'm' => {
            let bytes = reader.take(4)?;
            OscValue::Midi(bytes.try_into().unwrap())
        }
        other => {
            return Err(PatchbayError::new(
                ErrorKind::UnknownType,
                format!("unknown OSC type tag '{other}'"),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_packet_is_rejected() {
        let buf = vec![0u8; MAX_PACKET_SIZE + 4];
        let err = decode_packet(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MessageTooLarge);
    }

    #[test]
    fn truncated_message_is_malformed() {
        let buf = b"/a\0\0".to_vec();
        let err = decode_packet(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Malformed);
    }

    #[test]
    fn oversize_blob_is_rejected_as_too_large() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"/a\0\0");
        buf.extend_from_slice(b",b\0\0");
        buf.extend_from_slice(&((MAX_BLOB_SIZE as i32) + 1).to_be_bytes());
        let err = decode_packet(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MessageTooLarge);
    }

    #[test]
    fn unknown_type_tag_is_reported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"/a\0\0");
        buf.extend_from_slice(b",z\0\0");
        let err = decode_packet(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownType);
    }
}
