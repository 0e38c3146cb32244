//! The framing/field-decoding state machine (spec §4.3).
//!
//! One field-decode method per field type, dispatched off a table driven
//! by a runtime [`crate::schema::Schema`] instead of hard-coded per packet.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::reassembly::RingBuffer;
use crate::schema::{Endian, FieldDef, FieldType, Header, PacketDef, ScalarType, Schema, TypeDef};
use crate::transform::{Pipeline, TransformContext};
use crate::value::{FieldMap, Value};

/// One fully decoded application message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub name: String,
    pub type_code: u32,
    pub fields: FieldMap,
    pub raw: Vec<u8>,
}

impl ParsedMessage {
    fn unknown(type_code: u32, raw: Vec<u8>) -> Self {
        ParsedMessage {
            name: format!("Unknown({type_code})"),
            type_code,
            fields: FieldMap::new(),
            raw,
        }
    }
}

/// Reads one declared-endian scalar out of `buf` at `offset`, per the
/// type table of spec §4.3. Out-of-bounds reads degrade to the zero value
/// rather than panicking — truncated fields never crash the decoder.
fn read_scalar(buf: &[u8], offset: usize, ty: ScalarType, endian: Endian) -> Value {
    let size = ty.size();
    if offset + size > buf.len() {
        return zero_value(ty);
    }
    let bytes = &buf[offset..offset + size];
    match (ty, endian) {
        (ScalarType::I8, _) => Value::I64(bytes[0] as i8 as i64),
        (ScalarType::U8, _) => Value::I64(bytes[0] as i64),
        (ScalarType::Bool, _) => Value::Bool(bytes[0] != 0),
        (ScalarType::I16, Endian::Little) => Value::I64(LittleEndian::read_i16(bytes) as i64),
        (ScalarType::I16, Endian::Big) => Value::I64(BigEndian::read_i16(bytes) as i64),
        (ScalarType::U16, Endian::Little) => Value::I64(LittleEndian::read_u16(bytes) as i64),
        (ScalarType::U16, Endian::Big) => Value::I64(BigEndian::read_u16(bytes) as i64),
        (ScalarType::I32, Endian::Little) => Value::I64(LittleEndian::read_i32(bytes) as i64),
        (ScalarType::I32, Endian::Big) => Value::I64(BigEndian::read_i32(bytes) as i64),
        (ScalarType::U32, Endian::Little) => Value::I64(LittleEndian::read_u32(bytes) as i64),
        (ScalarType::U32, Endian::Big) => Value::I64(BigEndian::read_u32(bytes) as i64),
        (ScalarType::F32, Endian::Little) => Value::F64(LittleEndian::read_f32(bytes) as f64),
        (ScalarType::F32, Endian::Big) => Value::F64(BigEndian::read_f32(bytes) as f64),
        (ScalarType::I64, Endian::Little) => Value::I64(LittleEndian::read_i64(bytes)),
        (ScalarType::I64, Endian::Big) => Value::I64(BigEndian::read_i64(bytes)),
        (ScalarType::U64, Endian::Little) => Value::U64(LittleEndian::read_u64(bytes)),
        (ScalarType::U64, Endian::Big) => Value::U64(BigEndian::read_u64(bytes)),
        (ScalarType::F64, Endian::Little) => Value::F64(LittleEndian::read_f64(bytes)),
        (ScalarType::F64, Endian::Big) => Value::F64(BigEndian::read_f64(bytes)),
    }
}

fn zero_value(ty: ScalarType) -> Value {
    match ty {
        ScalarType::Bool => Value::Bool(false),
        ScalarType::F32 | ScalarType::F64 => Value::F64(0.0),
        ScalarType::U64 => Value::U64(0),
        _ => Value::I64(0),
    }
}

/// Scalar reads used internally to decode the header before the schema's
/// general field table runs (the header's size/type fields are re-decoded
/// by name as part of the packet's own field list, per spec §4.3 step 9).
fn read_header_u32(buf: &[u8], offset: usize, ty: ScalarType, endian: Endian) -> i64 {
    read_scalar(buf, offset, ty, endian)
        .as_i64()
        .unwrap_or(0)
}

/// Stateless over the reassembly buffer it's handed each call: holds no
/// per-connection data of its own (the connection's state lives in the
/// `RingBuffer` and `TransformContext` the caller owns).
#[derive(Default)]
pub struct Decoder;

impl Decoder {
    pub fn new() -> Self {
        Decoder
    }

    /// Run one iteration of the decode loop (spec §4.3 steps 1-9). `Ok(None)`
    /// on anything that isn't yet a complete, well-framed message: short
    /// buffer, or a desynced declared size. Desync never consumes bytes —
    /// the decoder "silently refuses to advance" per spec §4.3 step 3.
    pub fn decode_one(
        &self,
        schema: &Schema,
        buf: &mut RingBuffer,
        pipeline: &Pipeline,
        ctx: &mut TransformContext,
    ) -> Option<ParsedMessage> {
        let header = &schema.header;
        if buf.available() < header.header_len {
            return None;
        }

        let peeked = buf.peek(header.header_len)?.to_vec();
        let size_field = header.size_field();
        let size = read_header_u32(&peeked, size_field.offset, size_field.ty, schema.endian);
        if size <= 0 || size > 65535 {
            tracing::warn!(size, "declared size out of bounds, desync frozen");
            return None;
        }
        let size = size as usize;

        if buf.available() < size {
            return None;
        }
        let raw_pre_transform = buf.peek(size)?.to_vec();
        buf.consume(size)?;

        let message = pipeline.apply(&raw_pre_transform, ctx);

        let parsed = self.decode_message(schema, header, &message);
        tracing::debug!(name = %parsed.name, type_code = parsed.type_code, "decoded message");
        Some(parsed)
    }

    /// Attempt to recover from a desynced stream by dropping exactly one
    /// byte and retrying (spec §9's open question, decided additively in
    /// SPEC_FULL.md §7: not called by default).
    pub fn resync_drop_byte(&self, buf: &mut RingBuffer) -> bool {
        if buf.available() == 0 {
            return false;
        }
        buf.peek(1).is_some() && buf.consume(1).is_some()
    }

    fn decode_message(&self, schema: &Schema, header: &Header, message: &[u8]) -> ParsedMessage {
        let type_field = header.type_field();
        let type_code =
            read_header_u32(message, type_field.offset, type_field.ty, schema.endian) as u32;

        let Some(packet) = schema.packet_by_code(type_code) else {
            tracing::debug!(type_code, "unknown packet type");
            return ParsedMessage::unknown(type_code, message.to_vec());
        };

        let (fields, _) = decode_fields(&packet.fields, message, 0, schema);
        ParsedMessage {
            name: packet.name.clone(),
            type_code,
            fields,
            raw: message.to_vec(),
        }
    }
}

/// Decode one field list sequentially, starting at `base_offset` within
/// `buf`. Shared by top-level packets and nested user structs. Returns the
/// field map and the total number of bytes the list consumed.
fn decode_fields(
    fields: &[FieldDef],
    buf: &[u8],
    base_offset: usize,
    schema: &Schema,
) -> (FieldMap, usize) {
    let mut map = FieldMap::new();
    let mut offset = base_offset;
    for field in fields {
        let (value, consumed) = decode_field(field, buf, offset, &map, schema);
        map.insert(field.name.clone(), value);
        offset += consumed;
    }
    (map, offset - base_offset)
}

/// Decode one field at `offset`. Returns the decoded value and the number
/// of bytes consumed, even when the value itself degrades to empty.
fn decode_field(
    field: &FieldDef,
    buf: &[u8],
    offset: usize,
    decoded_so_far: &FieldMap,
    schema: &Schema,
) -> (Value, usize) {
    match &field.ty {
        FieldType::Scalar(scalar) => {
            let value = read_scalar(buf, offset, *scalar, schema.endian);
            (value, scalar.size())
        }
        FieldType::String => {
            let remaining = buf.len().saturating_sub(offset);
            let declared = Schema::field_length(field.length, remaining);
            let len = if declared == 0 || declared > remaining {
                remaining
            } else {
                declared
            };
            if offset > buf.len() {
                return (Value::Str(String::new()), 0);
            }
            let window = &buf[offset..offset + len];
            let nul = window.iter().position(|&b| b == 0).unwrap_or(window.len());
            let text = String::from_utf8_lossy(&window[..nul]).into_owned();
            (Value::Str(text), len)
        }
        FieldType::Bytes => {
            let remaining = buf.len().saturating_sub(offset);
            let declared = Schema::field_length(field.length, remaining);
            let len = if declared == 0 || declared > remaining {
                remaining
            } else {
                declared
            };
            if offset > buf.len() {
                return (Value::Bytes(Vec::new()), 0);
            }
            (Value::Bytes(buf[offset..offset + len].to_vec()), len)
        }
        FieldType::Array => {
            let count = field
                .count_field
                .as_ref()
                .and_then(|name| decoded_so_far.get(name))
                .and_then(Value::as_i64)
                .filter(|&c| c >= 0)
                .map(|c| c as usize)
                .unwrap_or(0);
            let element_name = field.element.clone().unwrap_or_default();
            let mut items = Vec::new();
            let mut cursor = offset;
            for _ in 0..count {
                if cursor >= buf.len() {
                    break;
                }
                let (value, consumed) = decode_element(&element_name, buf, cursor, schema);
                if consumed == 0 {
                    break;
                }
                items.push(value);
                cursor += consumed;
            }
            (Value::List(items), cursor - offset)
        }
        FieldType::User(name) => match schema.types.get(name) {
            Some(TypeDef::Struct(nested_fields)) => {
                let (map, consumed) = decode_fields(nested_fields, buf, offset, schema);
                (Value::Map(map), consumed)
            }
            Some(TypeDef::Enum { base, .. }) => {
                let value = read_scalar(buf, offset, *base, schema.endian);
                (value, base.size())
            }
            None => (Value::Bytes(Vec::new()), 0),
        },
    }
}

/// Decode one array element, reusing the same dispatch as a top-level
/// field. Stops (`consumed == 0`) when remaining bytes are too few for the
/// element, per spec §4.3's "stop early" array rule.
fn decode_element(element_name: &str, buf: &[u8], offset: usize, schema: &Schema) -> (Value, usize) {
    if let Some(scalar) = ScalarType::parse(element_name) {
        if offset + scalar.size() > buf.len() {
            return (Value::I64(0), 0);
        }
        return (read_scalar(buf, offset, scalar, schema.endian), scalar.size());
    }
    match element_name {
        "string" => {
            let field = FieldDef {
                name: String::new(),
                ty: FieldType::String,
                length: None,
                count_field: None,
                element: None,
            };
            decode_field(&field, buf, offset, &FieldMap::new(), schema)
        }
        "bytes" => {
            let field = FieldDef {
                name: String::new(),
                ty: FieldType::Bytes,
                length: None,
                count_field: None,
                element: None,
            };
            decode_field(&field, buf, offset, &FieldMap::new(), schema)
        }
        other => match schema.types.get(other) {
            Some(TypeDef::Struct(nested_fields)) => {
                if offset >= buf.len() {
                    return (Value::Map(FieldMap::new()), 0);
                }
                let (map, consumed) = decode_fields(nested_fields, buf, offset, schema);
                (Value::Map(map), consumed)
            }
            Some(TypeDef::Enum { base, .. }) => {
                if offset + base.size() > buf.len() {
                    return (Value::I64(0), 0);
                }
                (read_scalar(buf, offset, *base, schema.endian), base.size())
            }
            None => (Value::Bytes(Vec::new()), 0),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::Schema;
    use crate::transform::Pipeline;

    fn decode_all(schema: &Schema, bytes: &[u8]) -> Vec<ParsedMessage> {
        let mut buf = RingBuffer::new();
        buf.append(bytes);
        let pipeline = Pipeline::from_specs(&schema.transforms);
        let mut ctx = TransformContext::new();
        let decoder = Decoder::new();
        let mut out = Vec::new();
        while let Some(msg) = decoder.decode_one(schema, &mut buf, &pipeline, &mut ctx) {
            out.push(msg);
        }
        out
    }

    #[test]
    fn scenario_one_simple_ping() {
        let schema = Schema::parse(
            r#"{
                "protocol": { "header": { "fields": [
                    { "name": "size", "type": "uint16", "offset": 0 },
                    { "name": "type", "type": "uint16", "offset": 2 }
                ]}},
                "packets": { "257": { "name": "PING", "fields": [
                    { "name": "size", "type": "uint16" },
                    { "name": "type", "type": "uint16" }
                ]}}
            }"#,
        )
        .unwrap();
        let input = [0x04, 0x00, 0x01, 0x01];
        let messages = decode_all(&schema, &input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name, "PING");
        assert_eq!(messages[0].type_code, 257);
        assert_eq!(messages[0].raw, input);
    }

    #[test]
    fn scenario_two_string_nul_terminates_early() {
        let schema = Schema::parse(
            r#"{
                "protocol": { "header": { "fields": [
                    { "name": "size", "type": "uint16", "offset": 0 },
                    { "name": "type", "type": "uint16", "offset": 2 }
                ]}},
                "packets": { "258": { "name": "HELLO", "fields": [
                    { "name": "size", "type": "uint16" },
                    { "name": "type", "type": "uint16" },
                    { "name": "who", "type": "string", "length": 8 }
                ]}}
            }"#,
        )
        .unwrap();
        let input = [0x0C, 0x00, 0x02, 0x01, 0x41, 0x42, 0x00, 0x58, 0x59, 0x5A, 0x00, 0x00];
        let messages = decode_all(&schema, &input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].fields.get("who").unwrap().as_str(), Some("AB"));
    }

    #[test]
    fn scenario_three_array_with_count_field() {
        let schema = Schema::parse(
            r#"{
                "protocol": { "header": { "fields": [
                    { "name": "size", "type": "uint16", "offset": 0 },
                    { "name": "type", "type": "uint16", "offset": 2 }
                ]}},
                "packets": { "259": { "name": "LIST", "fields": [
                    { "name": "size", "type": "uint16" },
                    { "name": "type", "type": "uint16" },
                    { "name": "n", "type": "uint8" },
                    { "name": "xs", "type": "array", "element": "uint16", "count_field": "n" }
                ]}}
            }"#,
        )
        .unwrap();
        let input = [0x0B, 0x00, 0x03, 0x01, 0x03, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00];
        let messages = decode_all(&schema, &input);
        assert_eq!(messages.len(), 1);
        let xs = messages[0].fields.get("xs").unwrap().as_list().unwrap();
        assert_eq!(xs.len(), 3);
        assert_eq!(xs[0].as_i64(), Some(1));
        assert_eq!(xs[1].as_i64(), Some(2));
        assert_eq!(xs[2].as_i64(), Some(3));
    }

    #[test]
    fn scenario_four_unknown_type() {
        let schema = Schema::parse(
            r#"{"protocol": { "header": { "fields": [
                { "name": "size", "type": "uint16", "offset": 0 },
                { "name": "type", "type": "uint16", "offset": 2 }
            ]}}, "packets": {}}"#,
        )
        .unwrap();
        let input = [0x04, 0x00, 0xFF, 0xFF];
        let messages = decode_all(&schema, &input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].name, "Unknown(65535)");
        assert_eq!(messages[0].type_code, 65535);
        assert!(messages[0].fields.is_empty());
        assert_eq!(messages[0].raw, input);
    }

    #[test]
    fn scenario_five_desync_freezes_without_consuming() {
        let schema = Schema::parse(
            r#"{"protocol": { "header": { "fields": [
                { "name": "size", "type": "uint16", "offset": 0 },
                { "name": "type", "type": "uint16", "offset": 2 }
            ]}}, "packets": {}}"#,
        )
        .unwrap();
        let mut buf = RingBuffer::new();
        buf.append(&[0xFF, 0xFF, 0x00, 0x00]);
        let pipeline = Pipeline::from_specs(&schema.transforms);
        let mut ctx = TransformContext::new();
        let decoder = Decoder::new();
        assert!(decoder
            .decode_one(&schema, &mut buf, &pipeline, &mut ctx)
            .is_none());
        assert_eq!(buf.available(), 4);
    }

    #[test]
    fn unknown_user_type_degrades_to_empty() {
        let schema = Schema::parse(
            r#"{"protocol": { "header": { "fields": [
                { "name": "size", "type": "uint16", "offset": 0 },
                { "name": "type", "type": "uint16", "offset": 2 }
            ]}}, "packets": { "1": { "name": "X", "fields": [
                { "name": "size", "type": "uint16" },
                { "name": "type", "type": "uint16" }
            ]}}}"#,
        )
        .unwrap();
        // directly exercise decode_field with an unresolved user type, bypassing
        // schema validation (which would otherwise reject it at load time)
        let field = FieldDef {
            name: "mystery".into(),
            ty: FieldType::User("Ghost".into()),
            length: None,
            count_field: None,
            element: None,
        };
        let (value, consumed) = decode_field(&field, &[1, 2, 3], 0, &FieldMap::new(), &schema);
        assert_eq!(value, Value::Bytes(Vec::new()));
        assert_eq!(consumed, 0);
    }

    #[test]
    fn truncated_field_returns_empty_without_panic() {
        let schema = Schema::parse(
            r#"{"protocol": {}, "packets": {}}"#,
        )
        .unwrap();
        let field = FieldDef {
            name: "x".into(),
            ty: FieldType::Scalar(ScalarType::U32),
            length: None,
            count_field: None,
            element: None,
        };
        let (value, _) = decode_field(&field, &[1, 2], 0, &FieldMap::new(), &schema);
        assert_eq!(value, Value::I64(0));
    }
}
