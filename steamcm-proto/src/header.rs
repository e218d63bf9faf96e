//! The two packet header forms: the legacy fixed 20-byte header, and the
//! protobuf-carried header used by every message with the mask bit set.

use crate::protobuf::{self, Field};

/// Both job ids default to this sentinel when a message is not part of a
/// request/response pair.
pub const NO_JOB_ID: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// The 20-byte legacy header: `emsg:u32 | target_job_id:u64 | source_job_id:u64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyHeader {
    /// Message id with the protobuf bit guaranteed clear.
    pub emsg: u32,
    /// Job id this message is replying to, or [`NO_JOB_ID`].
    pub target_job_id: u64,
    /// Job id this message originates from, or [`NO_JOB_ID`].
    pub source_job_id: u64,
}

impl LegacyHeader {
    /// A header with no job ids set, for fire-and-forget messages.
    pub fn new(emsg: u32) -> Self {
        Self { emsg, target_job_id: NO_JOB_ID, source_job_id: NO_JOB_ID }
    }

    pub(crate) fn to_bytes(self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[0..4].copy_from_slice(&self.emsg.to_le_bytes());
        out[4..12].copy_from_slice(&self.target_job_id.to_le_bytes());
        out[12..20].copy_from_slice(&self.source_job_id.to_le_bytes());
        out
    }

    pub(crate) fn from_bytes(bytes: &[u8; 20]) -> Self {
        Self {
            emsg: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            target_job_id: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            source_job_id: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
        }
    }
}

const FIELD_STEAM_ID: u32 = 1;
const FIELD_CLIENT_SESSIONID: u32 = 2;

/// The protobuf-carried header. `steamid` and `client_sessionid` are the
/// only fields the core reads or writes; every other field (job ids,
/// routing, jobname, target-job-name, eresult, ...) rides along in `other`
/// untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtoHeader {
    fields: Vec<Field>,
}

impl ProtoHeader {
    /// Build an empty header with just `steamid` and `client_sessionid` set.
    pub fn new(steam_id: u64, client_sessionid: i32) -> Self {
        let mut header = Self { fields: Vec::new() };
        header.set_steam_id(steam_id);
        header.set_client_sessionid(client_sessionid);
        header
    }

    /// Parse raw protobuf bytes into a header, preserving field order.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self { fields: protobuf::parse_fields(bytes)? })
    }

    /// Re-encode this header. Byte-identical to the input of
    /// [`ProtoHeader::from_bytes`] whenever no field was mutated.
    pub fn to_bytes(&self) -> Vec<u8> {
        protobuf::encode_fields(&self.fields)
    }

    /// The 64-bit Steam id this message is addressed to or from.
    pub fn steam_id(&self) -> Option<u64> {
        match protobuf::find(&self.fields, FIELD_STEAM_ID) {
            Some(Field::Fixed64(_, value)) => Some(*value),
            _ => None,
        }
    }

    /// Set the `steamid` field.
    pub fn set_steam_id(&mut self, steam_id: u64) {
        protobuf::upsert(&mut self.fields, Field::Fixed64(FIELD_STEAM_ID, steam_id));
    }

    /// The client-local session id.
    pub fn client_sessionid(&self) -> Option<i32> {
        match protobuf::find(&self.fields, FIELD_CLIENT_SESSIONID) {
            Some(Field::Varint(_, value)) => Some(*value as i32),
            _ => None,
        }
    }

    /// Set the `client_sessionid` field.
    pub fn set_client_sessionid(&mut self, client_sessionid: i32) {
        protobuf::upsert(
            &mut self.fields,
            Field::Varint(FIELD_CLIENT_SESSIONID, client_sessionid as u32 as u64),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_header_round_trips() {
        let header = LegacyHeader { emsg: 42, target_job_id: 7, source_job_id: NO_JOB_ID };
        let bytes = header.to_bytes();
        assert_eq!(LegacyHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn proto_header_preserves_unknown_fields_across_round_trip() {
        let mut header = ProtoHeader::new(76561197960287930, 3);
        header.fields.push(Field::LengthDelimited(10, b"some_job_name".to_vec()));

        let bytes = header.to_bytes();
        let reparsed = ProtoHeader::from_bytes(&bytes).expect("well-formed header parses");
        assert_eq!(reparsed.steam_id(), Some(76561197960287930));
        assert_eq!(reparsed.client_sessionid(), Some(3));
        assert_eq!(reparsed.to_bytes(), bytes);
    }
}
