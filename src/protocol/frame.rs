//! Binary framing primitives (C1).
//!
//! Grounded on the teacher's `bytes::BytesMut`-based message builders
//! (`messages::protocol::scram_server_response`, `md5_challenge`): stage a
//! message body into a scratch buffer, then back-patch the length field once
//! the body is known. The read side is the mirror image: a bounds-checked
//! cursor over a received `BytesMut` slice that turns underflow into
//! [`BinaryProtocolError::FrameTruncated`] instead of panicking.

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::errors::{BinaryProtocolError, Error};

/// Writes one outbound message: `u8 tag, u32 total-length-including-length-field, body`.
///
/// The caller supplies the tag and a closure that fills in the body; the
/// length field is computed and patched in afterwards so callers never have
/// to precompute lengths by hand.
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Stages one framed message with tag `tag`, calling `body` to fill in
    /// everything after the length field.
    pub fn message(&mut self, tag: u8, body: impl FnOnce(&mut BytesMut)) {
        self.buf.put_u8(tag);
        let len_offset = self.buf.len();
        self.buf.put_u32(0); // placeholder, patched below
        let body_start = self.buf.len();
        body(&mut self.buf);
        let total_len = (self.buf.len() - len_offset) as u32;
        self.buf[len_offset..len_offset + 4].copy_from_slice(&total_len.to_be_bytes());
        debug_assert_eq!(self.buf.len() - body_start, (total_len as usize) - 4);
    }

    pub fn write_u8(buf: &mut BytesMut, v: u8) {
        buf.put_u8(v);
    }

    pub fn write_u16(buf: &mut BytesMut, v: u16) {
        buf.put_u16(v);
    }

    pub fn write_u32(buf: &mut BytesMut, v: u32) {
        buf.put_u32(v);
    }

    pub fn write_u64(buf: &mut BytesMut, v: u64) {
        buf.put_u64(v);
    }

    pub fn write_uuid(buf: &mut BytesMut, id: Uuid) {
        buf.put_slice(id.as_bytes());
    }

    pub fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(bytes);
    }

    pub fn write_str(buf: &mut BytesMut, s: &str) {
        Self::write_bytes(buf, s.as_bytes());
    }

    /// Header block: `u16 count, count×(u16 key, u32 length, bytes)` (§4.1).
    pub fn write_headers(buf: &mut BytesMut, headers: &[(u16, &[u8])]) {
        buf.put_u16(headers.len() as u16);
        for (key, value) in headers {
            buf.put_u16(*key);
            buf.put_u32(value.len() as u32);
            buf.put_slice(value);
        }
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds-checked cursor over one already-delimited inbound message body.
///
/// The reader loop (C2) is responsible for slicing out exactly one message's
/// bytes (tag + body, length field consumed); this type only ever sees that
/// slice, so every `read_*` that would cross the end is a truncation error
/// rather than a read into the next message.
pub struct FrameReader<'a> {
    tag: u8,
    cursor: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(tag: u8, body: &'a [u8]) -> Self {
        Self { tag, cursor: body }
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn remaining(&self) -> usize {
        self.cursor.len()
    }

    fn need(&self, n: usize) -> Result<(), Error> {
        if self.cursor.len() < n {
            Err(BinaryProtocolError::FrameTruncated {
                wanted: n,
                available: self.cursor.len(),
            }
            .into())
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        self.need(1)?;
        Ok(self.cursor.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        self.need(2)?;
        Ok(self.cursor.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        self.need(4)?;
        Ok(self.cursor.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        self.need(4)?;
        Ok(self.cursor.get_i32())
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        self.need(8)?;
        Ok(self.cursor.get_u64())
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, Error> {
        self.need(16)?;
        let mut bytes = [0u8; 16];
        self.cursor.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        self.need(len)?;
        let (slice, rest) = self.cursor.split_at(len);
        self.cursor = rest;
        Ok(slice)
    }

    pub fn read_str(&mut self) -> Result<&'a str, Error> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| BinaryProtocolError::InvalidUtf8.into())
    }

    /// Reads a header block: `u16 count, count×(u16 key, u32 length, bytes)`.
    pub fn read_headers(&mut self) -> Result<Vec<(u16, &'a [u8])>, Error> {
        let count = self.read_u16()?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = self.read_u16()?;
            let value = self.read_bytes()?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// Skips one header block without allocating.
    pub fn skip_headers(&mut self) -> Result<(), Error> {
        let count = self.read_u16()?;
        for _ in 0..count {
            self.read_u16()?;
            self.read_bytes()?;
        }
        Ok(())
    }

    /// Discards the remainder of the message (used when a caller only
    /// cares about a prefix, e.g. `ServerKeyData`).
    pub fn discard_rest(&mut self) {
        self.cursor = &[];
    }

    pub fn rest(&self) -> &'a [u8] {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut w = FrameWriter::new();
        w.message(b'X', |buf| {
            FrameWriter::write_u32(buf, 0xdead_beef);
            FrameWriter::write_str(buf, "hello");
            FrameWriter::write_uuid(buf, Uuid::nil());
        });
        let bytes = w.into_inner();
        assert_eq!(bytes[0], b'X');
        let total_len = u32::from_be_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(total_len as usize, bytes.len() - 1);

        let body = &bytes[5..];
        let mut r = FrameReader::new(b'X', body);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_str().unwrap(), "hello");
        assert_eq!(r.read_uuid().unwrap(), Uuid::nil());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncation_is_an_error_not_a_panic() {
        let mut r = FrameReader::new(b'X', &[0u8, 1]);
        assert!(matches!(
            r.read_u32(),
            Err(Error::BinaryProtocol(BinaryProtocolError::FrameTruncated { .. }))
        ));
    }

    #[test]
    fn header_block_round_trips_as_set() {
        let mut buf = BytesMut::new();
        let headers: Vec<(u16, &[u8])> = vec![(1, b"a"), (2, b"bb")];
        FrameWriter::write_headers(&mut buf, &headers);
        let mut r = FrameReader::new(0, &buf);
        let read_back = r.read_headers().unwrap();
        let mut expected: Vec<(u16, Vec<u8>)> =
            headers.iter().map(|(k, v)| (*k, v.to_vec())).collect();
        let mut actual: Vec<(u16, Vec<u8>)> =
            read_back.iter().map(|(k, v)| (*k, v.to_vec())).collect();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
    }
}
