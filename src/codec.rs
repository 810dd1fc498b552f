//! The codec contract (external collaborator, §3).
//!
//! The core never interprets a descriptor's bytes itself; it only asks a
//! [`CodecBuilder`] to turn one into an [`Encoder`]/[`Decoder`] pair and
//! caches the result by descriptor id. Production callers supply a builder
//! backed by a real value-codec library; the core ships only the
//! `Encoder`/`Decoder` contract plus the one built-in shape the wire
//! protocol itself guarantees (raw JSON bytes).

use std::any::{Any, TypeId};
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::errors::Error;
use crate::protocol::ProtocolVersion;

/// Writes argument values into the wire frame. Built from an input
/// descriptor; encodes exactly values conformant to that descriptor.
pub trait Encoder: Send + Sync + fmt::Debug {
    /// Encodes `args` (an opaque caller-provided argument bag) into `out`,
    /// appending the encoded bytes.
    fn encode(&self, args: &dyn Any, out: &mut BytesMut) -> Result<(), Error>;
}

/// Reads one row's worth of bytes into user memory. Built from an output
/// descriptor plus the caller's target Rust type.
pub trait Decoder: Send + Sync + fmt::Debug {
    /// Decodes one `Data` element's body into a boxed value of the decoder's
    /// target type. A row of the wrong shape is a hard error, never a
    /// silent truncation.
    fn decode(&self, row: &[u8]) -> Result<Box<dyn Any + Send>, Error>;

    /// The `TypeId` of the concrete Rust type this decoder produces;
    /// doubles as half of the out-codec cache key (§4.4).
    fn target_type(&self) -> TypeId;
}

/// Builds codecs from descriptor bytes. Implemented by the value-codec
/// library the core is paired with; the core only ever calls through this
/// trait, never inspects descriptor bytes itself.
pub trait CodecBuilder: Send + Sync {
    fn build_encoder(
        &self,
        descriptor: &[u8],
        protocol_version: ProtocolVersion,
    ) -> Result<Box<dyn Encoder>, Error>;

    fn build_decoder(
        &self,
        descriptor: &[u8],
        user_type: TypeId,
        protocol_version: ProtocolVersion,
    ) -> Result<Box<dyn Decoder>, Error>;
}

/// The one decoder the wire protocol itself guarantees regardless of the
/// paired value-codec library: a query run with `IoFormat::Json` returns
/// its single row as raw JSON bytes (§4.5.2 step 3).
#[derive(Debug)]
pub struct JsonBytesDecoder;

impl Decoder for JsonBytesDecoder {
    fn decode(&self, row: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        Ok(Box::new(Bytes::copy_from_slice(row)))
    }

    fn target_type(&self) -> TypeId {
        TypeId::of::<Bytes>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bytes_decoder_passes_rows_through_verbatim() {
        let decoder = JsonBytesDecoder;
        let out = decoder.decode(b"{\"a\":1}").unwrap();
        let bytes = out.downcast_ref::<Bytes>().unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}");
        assert_eq!(decoder.target_type(), TypeId::of::<Bytes>());
    }
}
