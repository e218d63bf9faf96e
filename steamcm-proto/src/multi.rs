//! Unwrapping `Multi` envelopes into their constituent packets.

use std::io::Read;

use crate::packet::{self, Packet};
use crate::protobuf::{self, Field};

const FIELD_SIZE_UNZIPPED: u32 = 1;
const FIELD_MESSAGE_BODY: u32 = 2;

/// Failure unwrapping a `Multi` packet's body.
#[derive(Debug)]
pub enum MultiError {
    /// The body wasn't a well-formed `CMsgMulti` protobuf.
    MalformedBody,
    /// Decompression (gzip or zip) failed.
    Decompress(std::io::Error),
    /// The decompressed or raw payload's length-prefixed sub-packets didn't
    /// add up: a length prefix ran past the end of the buffer.
    TruncatedSubPacket,
    /// A sub-packet failed to parse as a [`packet::Packet`].
    SubPacket(packet::DecodeError),
}

impl std::fmt::Display for MultiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedBody => write!(f, "Multi body is not a well-formed protobuf"),
            Self::Decompress(e) => write!(f, "Multi body decompression failed: {e}"),
            Self::TruncatedSubPacket => write!(f, "Multi sub-packet length prefix ran past buffer end"),
            Self::SubPacket(e) => write!(f, "Multi sub-packet failed to parse: {e}"),
        }
    }
}
impl std::error::Error for MultiError {}

impl From<packet::DecodeError> for MultiError {
    fn from(e: packet::DecodeError) -> Self {
        Self::SubPacket(e)
    }
}

/// Expand a `Multi` packet's body into the sequence of packets it carries,
/// in wire order. `packet.message_id` is expected to equal
/// [`crate::message_id::MULTI`]; callers are responsible for checking that
/// before calling this (it is not re-validated here).
pub fn unpack_multi(packet: &Packet) -> Result<Vec<Packet>, MultiError> {
    let fields = protobuf::parse_fields(&packet.body).ok_or(MultiError::MalformedBody)?;

    let size_unzipped = match protobuf::find(&fields, FIELD_SIZE_UNZIPPED) {
        Some(Field::Varint(_, value)) => *value as u32,
        _ => 0,
    };
    let message_body = match protobuf::find(&fields, FIELD_MESSAGE_BODY) {
        Some(Field::LengthDelimited(_, data)) => data.as_slice(),
        _ => return Err(MultiError::MalformedBody),
    };

    let concatenated = if size_unzipped == 0 {
        message_body.to_vec()
    } else {
        decompress(message_body)?
    };

    split_sub_packets(&concatenated)?
        .into_iter()
        .map(|frame| packet::parse(frame).map_err(MultiError::from))
        .collect()
}

fn decompress(body: &[u8]) -> Result<Vec<u8>, MultiError> {
    if body.starts_with(b"PK") {
        let reader = std::io::Cursor::new(body);
        let mut archive = zip::ZipArchive::new(reader).map_err(|_| MultiError::MalformedBody)?;
        let mut entry = archive.by_index(0).map_err(|_| MultiError::MalformedBody)?;
        let mut out = Vec::new();
        entry.read_to_end(&mut out).map_err(MultiError::Decompress)?;
        Ok(out)
    } else {
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(MultiError::Decompress)?;
        Ok(out)
    }
}

/// Split a `len:4 | frame` concatenation into its individual frame slices.
fn split_sub_packets(bytes: &[u8]) -> Result<Vec<&[u8]>, MultiError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let len_bytes = bytes.get(pos..pos + 4).ok_or(MultiError::TruncatedSubPacket)?;
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        pos += 4;
        let frame = bytes.get(pos..pos + len).ok_or(MultiError::TruncatedSubPacket)?;
        out.push(frame);
        pos += len;
    }
    Ok(out)
}
