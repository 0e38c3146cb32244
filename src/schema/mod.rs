//! The in-memory, immutable representation of a loaded protocol
//! description, and the JSON loader that produces it.
//!
//! Field offsets and widths are resolved from a runtime JSON document
//! instead of baked in at compile time, since packet shapes aren't known
//! until a schema is loaded.

mod de;

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Byte order applied to every multi-byte scalar in the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A fixed-width scalar wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    F32,
    I64,
    U64,
    F64,
}

impl ScalarType {
    /// Width of this scalar on the wire, in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 | ScalarType::Bool => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    pub(crate) fn parse(s: &str) -> Option<ScalarType> {
        Some(match s {
            "int8" => ScalarType::I8,
            "uint8" => ScalarType::U8,
            "bool" => ScalarType::Bool,
            "int16" => ScalarType::I16,
            "uint16" => ScalarType::U16,
            "int32" => ScalarType::I32,
            "uint32" => ScalarType::U32,
            "float" => ScalarType::F32,
            "int64" => ScalarType::I64,
            "uint64" => ScalarType::U64,
            "double" => ScalarType::F64,
            _ => return None,
        })
    }
}

/// The declared type of a field: a scalar, a length-prefixed string/byte
/// block, an array of some element type, or a named user type (struct or
/// enum).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    String,
    Bytes,
    Array,
    User(String),
}

impl FieldType {
    fn parse(s: &str) -> FieldType {
        match s {
            "string" => FieldType::String,
            "bytes" => FieldType::Bytes,
            "array" => FieldType::Array,
            other => match ScalarType::parse(other) {
                Some(scalar) => FieldType::Scalar(scalar),
                None => FieldType::User(other.to_string()),
            },
        }
    }
}

/// A field's declared length: either a fixed byte count or the sentinel
/// that means "whatever remains in the enclosing message".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSpec {
    Fixed(usize),
    Remaining,
}

/// One field in a struct, packet, or enum definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub length: Option<LengthSpec>,
    pub count_field: Option<String>,
    pub element: Option<String>,
}

/// A named user type: either a nested struct or an enum over a scalar base.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Struct(Vec<FieldDef>),
    Enum {
        base: ScalarType,
        values: Vec<(String, i64)>,
    },
}

impl TypeDef {
    /// Resolve an enum's integer value to its declared symbolic name.
    pub fn enum_symbol(&self, value: i64) -> Option<&str> {
        match self {
            TypeDef::Enum { values, .. } => values
                .iter()
                .find(|(_, v)| *v == value)
                .map(|(name, _)| name.as_str()),
            TypeDef::Struct(_) => None,
        }
    }
}

/// One field of the protocol header (conventionally `size` and `type`).
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderField {
    pub name: String,
    pub offset: usize,
    pub ty: ScalarType,
}

/// The fixed-layout framing header every message begins with.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub size_field: String,
    pub type_field: String,
    pub fields: Vec<HeaderField>,
    pub header_len: usize,
}

impl Header {
    pub fn size_field(&self) -> &HeaderField {
        self.fields
            .iter()
            .find(|f| f.name == self.size_field)
            .expect("validated at load time")
    }

    pub fn type_field(&self) -> &HeaderField {
        self.fields
            .iter()
            .find(|f| f.name == self.type_field)
            .expect("validated at load time")
    }
}

/// A transform pipeline stage as declared in the schema: a kind name (`xtea`,
/// `raw_rsa`, ...) plus its freeform options blob.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub kind: String,
    pub options: serde_json::Value,
}

/// One packet definition, keyed by its numeric wire type code.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

/// An immutable, loaded protocol description.
#[derive(Debug, Clone)]
pub struct Schema {
    pub endian: Endian,
    pub pack: u8,
    pub header: Header,
    pub types: HashMap<String, TypeDef>,
    pub packets: HashMap<u32, PacketDef>,
    pub transforms: Vec<TransformSpec>,
}

impl Schema {
    /// Load and validate a schema from a JSON file on disk.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Schema> {
        let text = std::fs::read_to_string(path)?;
        Schema::parse(&text)
    }

    /// Parse and validate a schema from a JSON document already in memory.
    pub fn parse(text: &str) -> Result<Schema> {
        let raw: de::RawRoot = serde_json::from_str(text)?;
        de::build(raw)
    }

    /// Resolve a field's declared length against the bytes remaining in the
    /// enclosing message. `None` (the field declares no length at all, e.g.
    /// a bare scalar) resolves to `0`, so absent length never panics.
    pub fn field_length(length: Option<LengthSpec>, remaining: usize) -> usize {
        match length {
            Some(LengthSpec::Fixed(n)) => n,
            Some(LengthSpec::Remaining) => remaining,
            None => 0,
        }
    }

    pub fn packet_by_code(&self, code: u32) -> Option<&PacketDef> {
        self.packets.get(&code)
    }

    pub fn packet_by_name(&self, name: &str) -> Option<&PacketDef> {
        self.packets.values().find(|p| p.name == name)
    }
}

pub(crate) fn validate_field_list(
    fields: &[FieldDef],
    types: &HashMap<String, TypeDef>,
) -> Result<()> {
    for (idx, field) in fields.iter().enumerate() {
        if let Some(count_field) = &field.count_field {
            let declared_before = fields[..idx].iter().any(|f| &f.name == count_field);
            if !declared_before {
                return Err(Error::UnresolvedCountField {
                    name: count_field.clone(),
                });
            }
        }
        if let FieldType::User(name) = &field.ty {
            if !types.contains_key(name) {
                return Err(Error::UnresolvedType { name: name.clone() });
            }
        }
        if matches!(field.ty, FieldType::Array) {
            if let Some(element) = &field.element {
                if ScalarType::parse(element).is_none()
                    && element != "string"
                    && element != "bytes"
                    && !types.contains_key(element)
                {
                    return Err(Error::UnresolvedType {
                        name: element.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const MINIMAL: &str = r#"{
        "protocol": {},
        "packets": {
            "257": { "name": "PING", "fields": [] }
        }
    }"#;

    #[test]
    fn defaults_are_synthesized() {
        let schema = Schema::parse(MINIMAL).unwrap();
        assert_eq!(schema.endian, Endian::Little);
        assert_eq!(schema.pack, 1);
        assert_eq!(schema.header.size_field, "size");
        assert_eq!(schema.header.type_field, "type");
        assert_eq!(schema.header.header_len, 8);
        assert_eq!(schema.packet_by_code(257).unwrap().name, "PING");
    }

    #[test]
    fn missing_protocol_is_rejected() {
        let err = Schema::parse(r#"{"packets": {}}"#).unwrap_err();
        assert!(matches!(err, Error::MissingProtocol));
    }

    #[test]
    fn unresolved_user_type_is_rejected() {
        let doc = r#"{
            "protocol": {},
            "packets": {
                "1": { "name": "X", "fields": [ { "name": "f", "type": "Nope" } ] }
            }
        }"#;
        let err = Schema::parse(doc).unwrap_err();
        assert!(matches!(err, Error::UnresolvedType { .. }));
    }

    #[test]
    fn unresolved_count_field_is_rejected() {
        let doc = r#"{
            "protocol": {},
            "packets": {
                "1": { "name": "X", "fields": [
                    { "name": "xs", "type": "array", "element": "uint8", "count_field": "n" }
                ] }
            }
        }"#;
        let err = Schema::parse(doc).unwrap_err();
        assert!(matches!(err, Error::UnresolvedCountField { .. }));
    }
}
