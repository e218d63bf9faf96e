//! A deliberately narrow protobuf field reader/writer.
//!
//! The core only ever needs to read and rewrite two fields of the CM
//! protobuf header (`steamid`, `client_sessionid`); everything else is
//! opaque payload that must survive a decode/encode round trip untouched.
//! Rather than pull in a full schema-driven codegen pipeline for that, this
//! parses the wire format down to an ordered list of raw fields and lets
//! callers pick out the ones they understand.

/// One decoded protobuf field, tagged with its field number and wire type.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    /// Wire type 0.
    Varint(u32, u64),
    /// Wire type 1.
    Fixed64(u32, u64),
    /// Wire type 2: length-delimited (strings, bytes, nested messages).
    LengthDelimited(u32, Vec<u8>),
    /// Wire type 5.
    Fixed32(u32, u32),
}

impl Field {
    fn tag(&self) -> u32 {
        match *self {
            Field::Varint(t, _) | Field::Fixed64(t, _) | Field::LengthDelimited(t, _) | Field::Fixed32(t, _) => t,
        }
    }
}

/// Read a base-128 varint starting at `buf[pos]`. Returns the value and the
/// number of bytes consumed.
fn read_varint(buf: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut i = pos;
    loop {
        let byte = *buf.get(i)?;
        value |= u64::from(byte & 0x7f) << shift;
        i += 1;
        if byte & 0x80 == 0 {
            return Some((value, i - pos));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Parse `bytes` into an ordered list of fields. Unrecognized wire types
/// (3, 4, anything else) fail the whole parse; the CM header never uses
/// deprecated group encoding.
pub fn parse_fields(bytes: &[u8]) -> Option<Vec<Field>> {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (key, key_len) = read_varint(bytes, pos)?;
        pos += key_len;
        let tag = (key >> 3) as u32;
        let wire_type = key & 0x7;
        match wire_type {
            0 => {
                let (value, len) = read_varint(bytes, pos)?;
                pos += len;
                fields.push(Field::Varint(tag, value));
            }
            1 => {
                let bytes8: [u8; 8] = bytes.get(pos..pos + 8)?.try_into().ok()?;
                pos += 8;
                fields.push(Field::Fixed64(tag, u64::from_le_bytes(bytes8)));
            }
            2 => {
                let (len, len_len) = read_varint(bytes, pos)?;
                pos += len_len;
                let data = bytes.get(pos..pos + len as usize)?.to_vec();
                pos += len as usize;
                fields.push(Field::LengthDelimited(tag, data));
            }
            5 => {
                let bytes4: [u8; 4] = bytes.get(pos..pos + 4)?.try_into().ok()?;
                pos += 4;
                fields.push(Field::Fixed32(tag, u32::from_le_bytes(bytes4)));
            }
            _ => return None,
        }
    }
    Some(fields)
}

/// Re-encode a field list in order, producing the original bytes whenever
/// the list came from [`parse_fields`] unmodified.
pub fn encode_fields(fields: &[Field]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        match *field {
            Field::Varint(tag, value) => {
                write_varint(u64::from(tag) << 3, &mut out);
                write_varint(value, &mut out);
            }
            Field::Fixed64(tag, value) => {
                write_varint((u64::from(tag) << 3) | 1, &mut out);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Field::LengthDelimited(tag, ref data) => {
                write_varint((u64::from(tag) << 3) | 2, &mut out);
                write_varint(data.len() as u64, &mut out);
                out.extend_from_slice(data);
            }
            Field::Fixed32(tag, value) => {
                write_varint((u64::from(tag) << 3) | 5, &mut out);
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    out
}

/// Find the value of the first field with the given tag, if present.
pub fn find<'a>(fields: &'a [Field], tag: u32) -> Option<&'a Field> {
    fields.iter().find(|f| f.tag() == tag)
}

/// Replace the first field with `tag`, or append one, preserving the
/// position of every other field.
pub fn upsert(fields: &mut Vec<Field>, new_field: Field) {
    let tag = new_field.tag();
    if let Some(existing) = fields.iter_mut().find(|f| f.tag() == tag) {
        *existing = new_field;
    } else {
        fields.push(new_field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_mixed_field_set() {
        let fields = vec![
            Field::Fixed64(1, 0x0102_0304_0506_0708),
            Field::Varint(2, 42),
            Field::LengthDelimited(10, b"jobname".to_vec()),
        ];
        let encoded = encode_fields(&fields);
        let decoded = parse_fields(&encoded).expect("well-formed encoding parses back");
        assert_eq!(decoded, fields);
    }

    #[test]
    fn upsert_replaces_in_place_and_preserves_order() {
        let mut fields = vec![Field::Varint(2, 1), Field::Fixed64(1, 99)];
        upsert(&mut fields, Field::Varint(2, 7));
        assert_eq!(fields, vec![Field::Varint(2, 7), Field::Fixed64(1, 99)]);
    }
}
