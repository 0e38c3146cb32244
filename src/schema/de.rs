//! Raw JSON shapes for the schema document, and the conversion from those
//! shapes into the validated [`super::Schema`].

use std::collections::HashMap;

use serde::Deserialize;

use super::{
    validate_field_list, Endian, FieldDef, FieldType, Header, HeaderField, LengthSpec, PacketDef,
    ScalarType, Schema, TransformSpec, TypeDef,
};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub(super) struct RawRoot {
    protocol: Option<RawProtocol>,
    #[serde(default)]
    transforms: Vec<RawTransform>,
    #[serde(default)]
    types: HashMap<String, RawTypeDef>,
    #[serde(default)]
    packets: HashMap<String, RawPacketDef>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProtocol {
    endian: Option<String>,
    pack: Option<u8>,
    header: Option<RawHeader>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHeader {
    size_field: Option<String>,
    type_field: Option<String>,
    #[serde(default)]
    fields: Vec<RawHeaderField>,
}

#[derive(Debug, Deserialize)]
struct RawHeaderField {
    name: String,
    offset: usize,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawTypeDef {
    Struct {
        #[serde(default)]
        fields: Vec<RawFieldDef>,
    },
    Enum {
        base: String,
        #[serde(default)]
        values: HashMap<String, i64>,
    },
}

#[derive(Debug, Deserialize)]
struct RawFieldDef {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    length: Option<RawLength>,
    #[serde(default)]
    count_field: Option<String>,
    #[serde(default)]
    element: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLength {
    Int(usize),
    Sentinel(String),
}

#[derive(Debug, Deserialize)]
struct RawPacketDef {
    name: String,
    #[serde(default)]
    fields: Vec<RawFieldDef>,
}

#[derive(Debug, Deserialize)]
struct RawTransform {
    kind: String,
    #[serde(default)]
    options: serde_json::Value,
}

fn convert_length(raw: Option<RawLength>) -> Option<LengthSpec> {
    match raw {
        None => None,
        Some(RawLength::Int(n)) => Some(LengthSpec::Fixed(n)),
        Some(RawLength::Sentinel(_)) => Some(LengthSpec::Remaining),
    }
}

fn convert_field(raw: RawFieldDef) -> FieldDef {
    FieldDef {
        name: raw.name,
        ty: FieldType::parse(&raw.ty),
        length: convert_length(raw.length),
        count_field: raw.count_field,
        element: raw.element,
    }
}

fn convert_type(raw: RawTypeDef) -> Result<TypeDef> {
    Ok(match raw {
        RawTypeDef::Struct { fields } => {
            TypeDef::Struct(fields.into_iter().map(convert_field).collect())
        }
        RawTypeDef::Enum { base, values } => {
            let base = ScalarType::parse(&base).ok_or_else(|| Error::UnresolvedType {
                name: base.clone(),
            })?;
            let mut values: Vec<(String, i64)> = values.into_iter().collect();
            values.sort_by_key(|(_, v)| *v);
            TypeDef::Enum { base, values }
        }
    })
}

fn default_header() -> RawHeader {
    RawHeader {
        size_field: None,
        type_field: None,
        fields: vec![
            RawHeaderField {
                name: "size".into(),
                offset: 0,
                ty: "uint32".into(),
            },
            RawHeaderField {
                name: "type".into(),
                offset: 4,
                ty: "uint32".into(),
            },
        ],
    }
}

pub(super) fn build(raw: RawRoot) -> Result<Schema> {
    let protocol = raw.protocol.ok_or(Error::MissingProtocol)?;

    let endian = match protocol.endian.as_deref() {
        None | Some("little") => Endian::Little,
        Some("big") => Endian::Big,
        Some(other) => {
            return Err(Error::UnresolvedType {
                name: format!("endian:{other}"),
            })
        }
    };
    let pack = protocol.pack.unwrap_or(1);

    let mut raw_header = protocol.header.unwrap_or_default();
    if raw_header.fields.is_empty() {
        raw_header = default_header();
    }
    let size_field = raw_header.size_field.clone().unwrap_or_else(|| "size".into());
    let type_field = raw_header.type_field.clone().unwrap_or_else(|| "type".into());

    let mut header_fields = Vec::with_capacity(raw_header.fields.len());
    let mut header_len = 0usize;
    for f in &raw_header.fields {
        let ty = ScalarType::parse(&f.ty).ok_or_else(|| Error::UnresolvedType {
            name: f.ty.clone(),
        })?;
        header_len = header_len.max(f.offset + ty.size());
        header_fields.push(HeaderField {
            name: f.name.clone(),
            offset: f.offset,
            ty,
        });
    }

    let size_ty = header_fields
        .iter()
        .find(|hf| hf.name == size_field)
        .map(|hf| hf.ty)
        .ok_or_else(|| Error::UnresolvedType {
            name: size_field.clone(),
        })?;
    if size_ty.size() > 4 {
        return Err(Error::SizeFieldTooWide);
    }
    // The type field must also resolve, even though its width isn't bounded.
    header_fields
        .iter()
        .find(|hf| hf.name == type_field)
        .ok_or_else(|| Error::UnresolvedType {
            name: type_field.clone(),
        })?;

    let header = Header {
        size_field,
        type_field,
        fields: header_fields,
        header_len,
    };

    let mut types = HashMap::new();
    for (name, raw_type) in raw.types {
        types.insert(name, convert_type(raw_type)?);
    }
    for type_def in types.values() {
        if let TypeDef::Struct(fields) = type_def {
            validate_field_list(fields, &types)?;
        }
    }

    let mut packets = HashMap::new();
    for (code, raw_packet) in raw.packets {
        let code: u32 = code
            .parse()
            .map_err(|_| Error::UnresolvedType { name: code.clone() })?;
        let fields: Vec<FieldDef> = raw_packet.fields.into_iter().map(convert_field).collect();
        validate_field_list(&fields, &types)?;
        packets.insert(
            code,
            PacketDef {
                name: raw_packet.name,
                fields,
            },
        );
    }

    let transforms = raw
        .transforms
        .into_iter()
        .map(|t| TransformSpec {
            kind: t.kind,
            options: t.options,
        })
        .collect();

    Ok(Schema {
        endian,
        pack,
        header,
        types,
        packets,
        transforms,
    })
}
