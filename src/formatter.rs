//! Renders a decoded message to the two canonical text forms spec §4.7
//! describes: a console rendering (terse, hex truncated) and a file
//! rendering (complete, including the header fields the console hides).
//!
//! The file rendering's shape is also what [`crate::replay::log`] parses
//! back, so the two modules must stay in lockstep on the record header and
//! field-line formats.

use chrono::{DateTime, Utc};

use crate::decoder::ParsedMessage;
use crate::reassembly::FourTuple;
use crate::schema::{Schema, TypeDef};
use crate::value::Value;

const CONSOLE_HEX_LIMIT: usize = 64;

/// SEND (client-to-server) or RECV (server-to-client), assigned at capture
/// time by the filter-port heuristic (glossary): if the destination port
/// is the filter port, the message is outbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub fn from_filter_port(tuple: &FourTuple, filter_port: u16) -> Direction {
        if tuple.dst_port == filter_port {
            Direction::Send
        } else {
            Direction::Recv
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "SEND",
            Direction::Recv => "RECV",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Formatter<'a> {
    schema: &'a Schema,
}

impl<'a> Formatter<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Formatter { schema }
    }

    /// Console rendering: header line, address line, one line per field
    /// skipping the conventional size/type fields, and a hex line
    /// truncated at [`CONSOLE_HEX_LIMIT`] chars with an ellipsis.
    pub fn console(
        &self,
        msg: &ParsedMessage,
        direction: Direction,
        tuple: &FourTuple,
        at: DateTime<Utc>,
    ) -> String {
        let mut out = String::new();
        out.push_str(&self.header_line(msg, direction, at));
        out.push('\n');
        out.push_str(&format!(
            "  {}:{} -> {}:{}\n",
            tuple.src_ip, tuple.src_port, tuple.dst_ip, tuple.dst_port
        ));
        for (name, value) in msg.fields.iter() {
            if *name == self.schema.header.size_field || *name == self.schema.header.type_field {
                continue;
            }
            out.push_str(&format!("  {}: {}\n", name, self.render_value(name, value)));
        }
        out.push_str(&format!("  raw: {}\n", truncated_hex(&msg.raw, CONSOLE_HEX_LIMIT)));
        out
    }

    /// File rendering: same as console but includes the header's
    /// size/type fields and the full untruncated raw hex.
    pub fn file(
        &self,
        msg: &ParsedMessage,
        direction: Direction,
        tuple: &FourTuple,
        at: DateTime<Utc>,
    ) -> String {
        let mut out = String::new();
        out.push_str(&self.header_line(msg, direction, at));
        out.push('\n');
        out.push_str(&format!(
            "  {}:{} -> {}:{}\n",
            tuple.src_ip, tuple.src_port, tuple.dst_ip, tuple.dst_port
        ));
        for (name, value) in msg.fields.iter() {
            out.push_str(&format!("  {}: {}\n", name, self.render_value(name, value)));
        }
        out.push_str(&format!("  raw: {}\n", hex::encode(&msg.raw)));
        out
    }

    fn header_line(&self, msg: &ParsedMessage, direction: Direction, at: DateTime<Utc>) -> String {
        format!(
            "[{}] {} {} ({} bytes)",
            at.format("%H:%M:%S%.3f"),
            direction,
            msg.name,
            msg.raw.len()
        )
    }

    /// Render one field value. Decorates the schema's declared type field
    /// with its `PacketType` enum symbol, if the schema defines one, per
    /// spec §4.7's enum symbol resolution rule.
    fn render_value(&self, field_name: &str, value: &Value) -> String {
        if field_name == self.schema.header.type_field {
            if let Some(TypeDef::Enum { .. }) = self.schema.types.get("PacketType") {
                if let Some(n) = value.as_i64() {
                    if let Some(symbol) = self
                        .schema
                        .types
                        .get("PacketType")
                        .and_then(|t| t.enum_symbol(n))
                    {
                        return format!("{n} ({symbol})");
                    }
                }
            }
        }
        render_plain(value)
    }
}

fn render_plain(value: &Value) -> String {
    match value {
        Value::I64(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Str(v) => format!("{v:?}"),
        Value::Bytes(v) => hex::encode(v),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(render_plain).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Map(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}={}", render_plain(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn truncated_hex(bytes: &[u8], limit: usize) -> String {
    let full = hex::encode(bytes);
    if full.len() <= limit {
        full
    } else {
        format!("{}...", &full[..limit])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::FieldMap;
    use std::net::Ipv4Addr;

    fn tuple() -> FourTuple {
        FourTuple {
            src_ip: Ipv4Addr::new(127, 0, 0, 1),
            src_port: 54321,
            dst_ip: Ipv4Addr::new(127, 0, 0, 1),
            dst_port: 7172,
        }
    }

    fn schema() -> Schema {
        Schema::parse(
            r#"{"protocol": {"header": {"fields": [
                {"name":"size","type":"uint16","offset":0},
                {"name":"type","type":"uint16","offset":2}
            ]}}, "packets": {"1": {"name":"PING","fields":[
                {"name":"size","type":"uint16"},{"name":"type","type":"uint16"},
                {"name":"seq","type":"uint32"}
            ]}}}"#,
        )
        .unwrap()
    }

    fn message() -> ParsedMessage {
        let mut fields = FieldMap::new();
        fields.insert("size", Value::I64(8));
        fields.insert("type", Value::I64(1));
        fields.insert("seq", Value::I64(42));
        ParsedMessage {
            name: "PING".into(),
            type_code: 1,
            fields,
            raw: vec![8, 0, 1, 0, 42, 0, 0, 0],
        }
    }

    #[test]
    fn console_skips_header_fields() {
        let schema = schema();
        let fmt = Formatter::new(&schema);
        let rendered = fmt.console(&message(), Direction::Send, &tuple(), Utc::now());
        assert!(rendered.contains("seq: 42"));
        assert!(!rendered.contains("size:"));
        assert!(!rendered.contains("type:"));
        assert!(rendered.contains("PING"));
        assert!(rendered.contains("(8 bytes)"));
    }

    #[test]
    fn file_includes_header_fields_and_full_hex() {
        let schema = schema();
        let fmt = Formatter::new(&schema);
        let rendered = fmt.file(&message(), Direction::Recv, &tuple(), Utc::now());
        assert!(rendered.contains("size: 8"));
        assert!(rendered.contains("type: 1"));
        assert!(rendered.contains(&hex::encode(&message().raw)));
    }

    #[test]
    fn direction_from_filter_port() {
        let t = tuple();
        assert_eq!(Direction::from_filter_port(&t, 7172), Direction::Send);
        assert_eq!(Direction::from_filter_port(&t, 54321), Direction::Recv);
    }

    #[test]
    fn hex_truncates_at_limit_with_ellipsis() {
        let bytes = vec![0xAB; 32];
        assert_eq!(truncated_hex(&bytes, 64).len(), 64);
        let bytes = vec![0xAB; 65];
        let truncated = truncated_hex(&bytes, 64);
        assert!(truncated.ends_with("..."));
        assert_eq!(&truncated[..64], &hex::encode(&bytes)[..64]);
    }
}
