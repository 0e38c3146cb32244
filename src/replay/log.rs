//! Parses a text log in the format the [`crate::formatter`]'s file
//! rendering produces, per spec §6/§4.6.

use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};
use crate::formatter::Direction;
use crate::value::{FieldMap, Value};

/// One record read back from a replay log: a decoded message's direction,
/// name, timestamp (offset from midnight), and field map.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: Duration,
    pub direction: Direction,
    pub name: String,
    pub fields: FieldMap,
}

fn header_re() -> Regex {
    Regex::new(r"^\[(\d+):(\d+):(\d+)\.(\d+)\]\s+(SEND|RECV)\s+(\w+)\s+\(\d+\s+bytes\)")
        .expect("static regex")
}

fn field_re() -> Regex {
    Regex::new(r"^\s+(\w+):\s+(.+)$").expect("static regex")
}

fn symbol_re() -> Regex {
    Regex::new(r"^(-?\d+)\s*\(.+\)$").expect("static regex")
}

/// Parse an entire log file's text into an ordered list of records.
/// Address lines (containing `->`) and `raw:` lines are data, not fields,
/// and are skipped per spec §6.
pub fn parse_log(text: &str) -> Result<Vec<LogRecord>> {
    let header = header_re();
    let field = field_re();
    let mut records: Vec<LogRecord> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = header.captures(line) {
            let h: u64 = caps[1].parse().unwrap_or(0);
            let m: u64 = caps[2].parse().unwrap_or(0);
            let s: u64 = caps[3].parse().unwrap_or(0);
            let millis: u64 = caps[4].parse().unwrap_or(0);
            let timestamp =
                Duration::from_secs(h * 3600 + m * 60 + s) + Duration::from_millis(millis);
            let direction = if &caps[5] == "SEND" {
                Direction::Send
            } else {
                Direction::Recv
            };
            records.push(LogRecord {
                timestamp,
                direction,
                name: caps[6].to_string(),
                fields: FieldMap::new(),
            });
            continue;
        }

        if line.contains("->") {
            continue;
        }

        if let Some(caps) = field.captures(line) {
            let name = &caps[1];
            if name == "raw" {
                continue;
            }
            let Some(record) = records.last_mut() else {
                return Err(Error::LogParse {
                    line: line.to_string(),
                });
            };
            record.fields.insert(name.to_string(), parse_value(&caps[2]));
        }
    }

    Ok(records)
}

/// Value parsing rules from spec §4.6: quoted strings become strings,
/// `<N> (Symbol)` forms become the integer `N`, otherwise integer if
/// parseable, else float, else the raw string (best-effort fallback per
/// spec §7's `log-parse-unknown-value` disposition).
fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return Value::Str(trimmed[1..trimmed.len() - 1].to_string());
    }
    if let Some(caps) = symbol_re().captures(trimmed) {
        if let Ok(n) = caps[1].parse::<i64>() {
            return Value::I64(n);
        }
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::I64(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::F64(f);
    }
    Value::Str(trimmed.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_header_and_fields() {
        let log = "[00:00:01.250] SEND PING (4 bytes)\n  127.0.0.1:1234 -> 10.0.0.1:7172\n  seq: 7\n  raw: 04000101\n";
        let records = parse_log(log).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "PING");
        assert_eq!(records[0].direction, Direction::Send);
        assert_eq!(records[0].timestamp, Duration::from_millis(1250));
        assert_eq!(records[0].fields.get("seq").unwrap().as_i64(), Some(7));
    }

    #[test]
    fn parses_quoted_string_and_symbol_forms() {
        let log = "[00:00:00.000] RECV HELLO (8 bytes)\n  who: \"AB\"\n  kind: 1 (PING)\n";
        let records = parse_log(log).unwrap();
        assert_eq!(records[0].fields.get("who").unwrap().as_str(), Some("AB"));
        assert_eq!(records[0].fields.get("kind").unwrap().as_i64(), Some(1));
    }

    #[test]
    fn falls_back_to_raw_string_for_unparseable_value() {
        let log = "[00:00:00.000] RECV X (4 bytes)\n  note: not-a-number\n";
        let records = parse_log(log).unwrap();
        assert_eq!(records[0].fields.get("note").unwrap().as_str(), Some("not-a-number"));
    }

    #[test]
    fn multiple_records_accumulate_independently() {
        let log = "[00:00:00.000] SEND A (4 bytes)\n  x: 1\n[00:00:00.500] RECV B (4 bytes)\n  y: 2\n";
        let records = parse_log(log).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields.get("x").unwrap().as_i64(), Some(1));
        assert_eq!(records[1].fields.get("y").unwrap().as_i64(), Some(2));
    }
}
