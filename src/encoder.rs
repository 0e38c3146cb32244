//! The symmetric encoder: given a packet name and a field map, produces
//! the exact byte sequence the decoder would have consumed (spec §4.5).
//!
//! Computes the length, writes fields at their offsets, then back-patches
//! the size field.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::schema::{Endian, FieldDef, FieldType, ScalarType, Schema, TypeDef};
use crate::value::{FieldMap, Value};

pub struct Encoder<'a> {
    schema: &'a Schema,
}

impl<'a> Encoder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Encoder { schema }
    }

    /// Encode `fields` as the named packet, back-patching the header's
    /// size field once the total length is known. Transforms are
    /// deliberately **not** reapplied here (spec §4.5 step 4 / §9): the
    /// replayer resends the plaintext trace the log already stored.
    pub fn encode(&self, packet_name: &str, fields: &FieldMap) -> Result<Vec<u8>> {
        let packet = self
            .schema
            .packet_by_name(packet_name)
            .ok_or_else(|| Error::UnknownPacket {
                name: packet_name.to_string(),
            })?;

        let mut out = Vec::new();
        write_fields(&packet.fields, fields, &mut out, self.schema);

        let header = &self.schema.header;
        let size_field = header.size_field();
        write_scalar_at(
            &mut out,
            size_field.offset,
            size_field.ty,
            self.schema.endian,
            out.len() as i64,
        );
        Ok(out)
    }
}

/// Write one field list in declaration order, appending to `out`.
fn write_fields(fields: &[FieldDef], values: &FieldMap, out: &mut Vec<u8>, schema: &Schema) {
    for field in fields {
        let value = values.get(&field.name).cloned().unwrap_or(Value::I64(0));
        write_field(field, &value, out, schema);
    }
}

fn write_field(field: &FieldDef, value: &Value, out: &mut Vec<u8>, schema: &Schema) {
    match &field.ty {
        FieldType::Scalar(scalar) => {
            if matches!(scalar, ScalarType::F32 | ScalarType::F64) {
                write_float_scalar(out, *scalar, schema.endian, value.as_f64().unwrap_or(0.0));
            } else {
                let offset = out.len();
                out.resize(offset + scalar.size(), 0);
                write_scalar_at(out, offset, *scalar, schema.endian, value.as_i64().unwrap_or(0));
            }
        }
        FieldType::String => {
            let text = value.as_str().unwrap_or("");
            let declared = field.length.and_then(|l| match l {
                crate::schema::LengthSpec::Fixed(n) => Some(n),
                crate::schema::LengthSpec::Remaining => None,
            });
            write_string_field(out, text, declared);
        }
        FieldType::Bytes => {
            let bytes = value.as_bytes().unwrap_or(&[]);
            let declared = field.length.and_then(|l| match l {
                crate::schema::LengthSpec::Fixed(n) => Some(n),
                crate::schema::LengthSpec::Remaining => None,
            });
            write_bytes_field(out, bytes, declared);
        }
        FieldType::Array => {
            let items = value.as_list().unwrap_or(&[]);
            let element_name = field.element.clone().unwrap_or_default();
            for item in items {
                write_element(&element_name, item, out, schema);
            }
        }
        FieldType::User(name) => match schema.types.get(name) {
            Some(TypeDef::Struct(nested_fields)) => {
                let nested = match value {
                    Value::Map(m) => m.clone(),
                    _ => FieldMap::new(),
                };
                write_fields(nested_fields, &nested, out, schema);
            }
            Some(TypeDef::Enum { base, .. }) => {
                write_element_scalar(out, *base, schema.endian, value.as_i64().unwrap_or(0));
            }
            None => {}
        },
    }
}

fn write_element(element_name: &str, value: &Value, out: &mut Vec<u8>, schema: &Schema) {
    if let Some(scalar) = ScalarType::parse(element_name) {
        write_element_scalar(out, scalar, schema.endian, value.as_i64().unwrap_or(0));
        return;
    }
    match element_name {
        "string" => write_string_field(out, value.as_str().unwrap_or(""), None),
        "bytes" => write_bytes_field(out, value.as_bytes().unwrap_or(&[]), None),
        other => match schema.types.get(other) {
            Some(TypeDef::Struct(nested_fields)) => {
                let nested = match value {
                    Value::Map(m) => m.clone(),
                    _ => FieldMap::new(),
                };
                write_fields(nested_fields, &nested, out, schema);
            }
            Some(TypeDef::Enum { base, .. }) => {
                write_element_scalar(out, *base, schema.endian, value.as_i64().unwrap_or(0));
            }
            None => {}
        },
    }
}

fn write_element_scalar(out: &mut Vec<u8>, ty: ScalarType, endian: Endian, n: i64) {
    if matches!(ty, ScalarType::F32 | ScalarType::F64) {
        write_float_scalar(out, ty, endian, n as f64);
        return;
    }
    let offset = out.len();
    out.resize(offset + ty.size(), 0);
    write_scalar_at(out, offset, ty, endian, n);
}

fn write_float_scalar(out: &mut Vec<u8>, ty: ScalarType, endian: Endian, f: f64) {
    let offset = out.len();
    out.resize(offset + ty.size(), 0);
    match (ty, endian) {
        (ScalarType::F32, Endian::Little) => {
            LittleEndian::write_f32(&mut out[offset..], f as f32)
        }
        (ScalarType::F32, Endian::Big) => BigEndian::write_f32(&mut out[offset..], f as f32),
        (ScalarType::F64, Endian::Little) => LittleEndian::write_f64(&mut out[offset..], f),
        (ScalarType::F64, Endian::Big) => BigEndian::write_f64(&mut out[offset..], f),
        _ => unreachable!("non-float scalar passed to write_float_scalar"),
    }
}

/// Write an integer scalar at a fixed offset into an already-sized buffer.
/// Out-of-range values are truncated modulo the target width: the encoder
/// performs numeric coercion, not validation, per spec §4.5 step 2.
fn write_scalar_at(buf: &mut [u8], offset: usize, ty: ScalarType, endian: Endian, n: i64) {
    let slice = &mut buf[offset..offset + ty.size()];
    match (ty, endian) {
        (ScalarType::I8 | ScalarType::U8, _) => slice[0] = n as u8,
        (ScalarType::Bool, _) => slice[0] = if n != 0 { 1 } else { 0 },
        (ScalarType::I16 | ScalarType::U16, Endian::Little) => {
            LittleEndian::write_u16(slice, n as u16)
        }
        (ScalarType::I16 | ScalarType::U16, Endian::Big) => BigEndian::write_u16(slice, n as u16),
        (ScalarType::I32 | ScalarType::U32, Endian::Little) => {
            LittleEndian::write_u32(slice, n as u32)
        }
        (ScalarType::I32 | ScalarType::U32, Endian::Big) => BigEndian::write_u32(slice, n as u32),
        (ScalarType::I64 | ScalarType::U64, Endian::Little) => {
            LittleEndian::write_u64(slice, n as u64)
        }
        (ScalarType::I64 | ScalarType::U64, Endian::Big) => BigEndian::write_u64(slice, n as u64),
        (ScalarType::F32 | ScalarType::F64, _) => {
            unreachable!("float scalars are written via write_float_scalar")
        }
    }
}

/// Encode UTF-8, truncate to `declared - 1`, zero-pad to `declared`. With
/// no declared length (a `"remaining"`-length trailing field), write the
/// text plus one trailing NUL and nothing more.
fn write_string_field(out: &mut Vec<u8>, text: &str, declared: Option<usize>) {
    let bytes = text.as_bytes();
    match declared {
        Some(len) => {
            let keep = bytes.len().min(len.saturating_sub(1));
            let start = out.len();
            out.resize(start + len, 0);
            out[start..start + keep].copy_from_slice(&bytes[..keep]);
        }
        None => {
            out.extend_from_slice(bytes);
            out.push(0);
        }
    }
}

fn write_bytes_field(out: &mut Vec<u8>, bytes: &[u8], declared: Option<usize>) {
    match declared {
        Some(len) => {
            let keep = bytes.len().min(len);
            let start = out.len();
            out.resize(start + len, 0);
            out[start..start + keep].copy_from_slice(&bytes[..keep]);
        }
        None => out.extend_from_slice(bytes),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decoder::Decoder;
    use crate::reassembly::RingBuffer;
    use crate::transform::{Pipeline, TransformContext};

    fn ping_schema() -> Schema {
        Schema::parse(
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
        .unwrap()
    }

    #[test]
    fn back_patches_size_field() {
        let schema = ping_schema();
        let mut fields = FieldMap::new();
        fields.insert("size", Value::I64(0));
        fields.insert("type", Value::I64(257));
        let encoder = Encoder::new(&schema);
        let bytes = encoder.encode("PING", &fields).unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(&bytes[0..2], &[4, 0]);
        assert_eq!(&bytes[2..4], &[1, 1]);
    }

    #[test]
    fn unknown_packet_name_errors() {
        let schema = ping_schema();
        let encoder = Encoder::new(&schema);
        let err = encoder.encode("NOPE", &FieldMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownPacket { .. }));
    }

    #[test]
    fn round_trips_through_decoder() {
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
        let mut fields = FieldMap::new();
        fields.insert("size", Value::I64(0));
        fields.insert("type", Value::I64(258));
        fields.insert("who", Value::Str("AB".into()));

        let encoder = Encoder::new(&schema);
        let bytes = encoder.encode("HELLO", &fields).unwrap();

        let mut buf = RingBuffer::new();
        buf.append(&bytes);
        let pipeline = Pipeline::from_specs(&schema.transforms);
        let mut ctx = TransformContext::new();
        let decoder = Decoder::new();
        let msg = decoder
            .decode_one(&schema, &mut buf, &pipeline, &mut ctx)
            .unwrap();
        assert_eq!(msg.name, "HELLO");
        assert_eq!(msg.fields.get("who").unwrap().as_str(), Some("AB"));
    }

    #[test]
    fn endianness_symmetry() {
        let little = Schema::parse(
            r#"{"protocol": {"endian": "little", "header": {"fields": [
                {"name":"size","type":"uint16","offset":0},
                {"name":"type","type":"uint16","offset":2}
            ]}}, "packets": {"1": {"name":"X","fields":[
                {"name":"size","type":"uint16"},{"name":"type","type":"uint16"},
                {"name":"v","type":"uint32"}
            ]}}}"#,
        )
        .unwrap();
        let big = Schema::parse(
            r#"{"protocol": {"endian": "big", "header": {"fields": [
                {"name":"size","type":"uint16","offset":0},
                {"name":"type","type":"uint16","offset":2}
            ]}}, "packets": {"1": {"name":"X","fields":[
                {"name":"size","type":"uint16"},{"name":"type","type":"uint16"},
                {"name":"v","type":"uint32"}
            ]}}}"#,
        )
        .unwrap();

        for schema in [&little, &big] {
            let mut fields = FieldMap::new();
            fields.insert("size", Value::I64(0));
            fields.insert("type", Value::I64(1));
            fields.insert("v", Value::I64(123456));
            let encoder = Encoder::new(schema);
            let bytes = encoder.encode("X", &fields).unwrap();

            let mut buf = RingBuffer::new();
            buf.append(&bytes);
            let pipeline = Pipeline::from_specs(&schema.transforms);
            let mut ctx = TransformContext::new();
            let decoder = Decoder::new();
            let msg = decoder
                .decode_one(schema, &mut buf, &pipeline, &mut ctx)
                .unwrap();
            assert_eq!(msg.fields.get("v").unwrap().as_i64(), Some(123456));
        }
    }
}
