//! Top-level packet parsing and encoding.

use crate::header::{LegacyHeader, ProtoHeader};
use crate::message_id;

/// Either header form a [`Packet`] can carry.
#[derive(Clone, Debug, PartialEq)]
pub enum Header {
    /// The 20-byte fixed header used by non-protobuf messages.
    Legacy(LegacyHeader),
    /// The protobuf header used by every message with the mask bit set.
    Protobuf(ProtoHeader),
}

/// A parsed CM packet: message id, header, and opaque body bytes.
///
/// Decoding the body into a concrete message type is left to callers who
/// know the schema for `message_id`; this crate only guarantees the header
/// and the body boundary are correct.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// The low 31 bits of the on-wire message id.
    pub message_id: u32,
    /// Whether the high bit was set on the wire (protobuf-carried).
    pub is_protobuf: bool,
    /// The decoded header.
    pub header: Header,
    /// Raw, undecoded message body.
    pub body: Vec<u8>,
}

/// Failure while parsing a raw frame into a [`Packet`].
#[derive(Debug)]
pub enum DecodeError {
    /// Frame too short to contain even a message id.
    Truncated,
    /// `header_len` claimed more bytes than the frame actually has.
    HeaderOutOfBounds,
    /// The protobuf header bytes were not well-formed.
    MalformedHeader,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame too short to contain a message id"),
            Self::HeaderOutOfBounds => write!(f, "header_len exceeds frame length"),
            Self::MalformedHeader => write!(f, "protobuf header failed to parse"),
        }
    }
}
impl std::error::Error for DecodeError {}

/// Encode a protobuf-carried packet: sets the mask bit on `message_id`,
/// prepends `header_len`, then the header and body bytes in order.
pub fn encode_protobuf(message_id: u32, header: &ProtoHeader, body: &[u8]) -> Vec<u8> {
    let header_bytes = header.to_bytes();
    let mut out = Vec::with_capacity(4 + 4 + header_bytes.len() + body.len());
    out.extend(message_id::add_mask(message_id).to_le_bytes());
    out.extend((header_bytes.len() as u32).to_le_bytes());
    out.extend(&header_bytes);
    out.extend(body);
    out
}

/// Encode a legacy-header packet: `message_id || target_job_id || source_job_id || body`.
pub fn encode_legacy(header: LegacyHeader, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + body.len());
    out.extend(header.to_bytes());
    out.extend(body);
    out
}

/// Parse a raw frame payload (post decryption, pre-decompression) into a
/// [`Packet`]. Unknown message ids are preserved as raw integers; the body
/// is left undecoded either way.
pub fn parse(frame: &[u8]) -> Result<Packet, DecodeError> {
    if frame.len() < 4 {
        return Err(DecodeError::Truncated);
    }
    let raw_id = u32::from_le_bytes(frame[0..4].try_into().unwrap());
    let is_protobuf = message_id::is_protobuf(raw_id);
    let message_id = message_id::remove_mask(raw_id);

    if is_protobuf {
        if frame.len() < 8 {
            return Err(DecodeError::Truncated);
        }
        let header_len = u32::from_le_bytes(frame[4..8].try_into().unwrap()) as usize;
        let header_start: usize = 8;
        let header_end = header_start.checked_add(header_len).ok_or(DecodeError::HeaderOutOfBounds)?;
        if header_end > frame.len() {
            return Err(DecodeError::HeaderOutOfBounds);
        }
        let header = ProtoHeader::from_bytes(&frame[header_start..header_end])
            .ok_or(DecodeError::MalformedHeader)?;
        let body = frame[header_end..].to_vec();
        Ok(Packet { message_id, is_protobuf, header: Header::Protobuf(header), body })
    } else {
        if frame.len() < 20 {
            return Err(DecodeError::Truncated);
        }
        let header_bytes: [u8; 20] = frame[0..20].try_into().unwrap();
        let header = LegacyHeader::from_bytes(&header_bytes);
        let body = frame[20..].to_vec();
        Ok(Packet { message_id, is_protobuf, header: Header::Legacy(header), body })
    }
}

/// Re-encode a parsed [`Packet`] back into wire bytes.
///
/// Byte-identical to the bytes [`parse`] produced it from, since both the
/// legacy header and [`ProtoHeader`] round trip their fields exactly.
pub fn encode(packet: &Packet) -> Vec<u8> {
    match &packet.header {
        Header::Protobuf(header) => encode_protobuf(packet.message_id, header, &packet.body),
        Header::Legacy(header) => encode_legacy(*header, &packet.body),
    }
}
