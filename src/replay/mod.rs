//! Reads a prior decoded-message log and re-sends its SEND-direction
//! messages against a fresh TCP endpoint under a chosen pacing policy
//! (spec §4.6).

pub mod log;
pub mod transport;

use std::collections::HashMap;
use std::time::Duration;

use crate::encoder::Encoder;
use crate::error::Result;
use crate::formatter::Direction;
use crate::schema::Schema;
use crate::value::FieldMap;

pub use log::{parse_log, LogRecord};
pub use transport::{TcpTransport, Transport};

/// Pacing policy for a replay session (glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Respect the log's inter-message timestamps; never wait for replies.
    Timing,
    /// Wait for each expected reply; no inter-message pacing.
    Response,
    /// Both: paced sends, and wait for replies.
    Hybrid,
}

impl Mode {
    fn paces_sends(self) -> bool {
        matches!(self, Mode::Timing | Mode::Hybrid)
    }

    fn waits_for_response(self) -> bool {
        matches!(self, Mode::Response | Mode::Hybrid)
    }
}

/// A running tally of what the replay session has done, per spec §4.6's
/// "running summary (sent count, received count)".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub sent: usize,
    pub received: usize,
}

/// Per-packet field overrides applied on top of whatever the log recorded,
/// before encoding — the "optional field-override map" of spec §4.6's
/// driver inputs.
pub type Overrides = HashMap<String, FieldMap>;

pub struct Driver<'a> {
    schema: &'a Schema,
    mode: Mode,
    timeout: Duration,
    speed: f64,
    overrides: Overrides,
}

impl<'a> Driver<'a> {
    pub fn new(schema: &'a Schema, mode: Mode, timeout: Duration, speed: f64) -> Self {
        Driver {
            schema,
            mode,
            timeout,
            speed: if speed > 0.0 { speed } else { 1.0 },
            overrides: Overrides::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Replay `records` over `transport`, following the state machine of
    /// spec §4.6: idle -> (paced-wait) -> writing -> (awaiting-response) ->
    /// idle. Sleeping uses `sleep_fn` so tests can assert on elapsed delay
    /// without burning real wall-clock time.
    pub fn run(
        &self,
        records: &[LogRecord],
        transport: &mut dyn Transport,
        mut sleep_fn: impl FnMut(Duration),
    ) -> Result<ReplaySummary> {
        let encoder = Encoder::new(self.schema);
        let mut summary = ReplaySummary::default();
        let mut i = 0;

        while i < records.len() {
            let record = &records[i];
            if record.direction != Direction::Send {
                i += 1;
                continue;
            }

            if self.mode.paces_sends() && i > 0 {
                let delta = record
                    .timestamp
                    .saturating_sub(records[i - 1].timestamp);
                sleep_fn(scale_delay(delta, self.speed));
            }

            let mut fields = record.fields.clone();
            apply_overrides(&mut fields, self.overrides.get(&record.name));
            let bytes = encoder.encode(&record.name, &fields)?;
            transport.write_message(&bytes)?;
            summary.sent += 1;

            if self.mode.waits_for_response() {
                if let Some(j) = next_recv_index(records, i) {
                    match transport.read_message(self.timeout)? {
                        Some(_) => {
                            summary.received += 1;
                            i = j;
                        }
                        None => {
                            tracing::warn!(packet = %record.name, "timed out waiting for response");
                        }
                    }
                }
            }

            i += 1;
        }

        Ok(summary)
    }
}

fn scale_delay(delta: Duration, speed: f64) -> Duration {
    if speed <= 0.0 {
        delta
    } else {
        delta.div_f64(speed)
    }
}

fn next_recv_index(records: &[LogRecord], from: usize) -> Option<usize> {
    records[from + 1..]
        .iter()
        .position(|r| r.direction == Direction::Recv)
        .map(|offset| from + 1 + offset)
}

fn apply_overrides(fields: &mut FieldMap, overrides: Option<&FieldMap>) {
    let Some(overrides) = overrides else { return };
    for (name, value) in overrides.iter() {
        fields.set(name, value.clone());
    }
}

#[cfg(test)]
mod test {
    use super::transport::test_support::MockTransport;
    use super::*;
    use crate::value::{FieldMap, Value};

    fn schema() -> Schema {
        Schema::parse(
            r#"{"protocol": {"header": {"fields": [
                {"name":"size","type":"uint16","offset":0},
                {"name":"type","type":"uint16","offset":2}
            ]}}, "packets": {"1": {"name":"PING","fields":[
                {"name":"size","type":"uint16"},{"name":"type","type":"uint16"}
            ]}}}"#,
        )
        .unwrap()
    }

    fn send_record(name: &str, millis: u64) -> LogRecord {
        let mut fields = FieldMap::new();
        fields.insert("size", Value::I64(0));
        fields.insert("type", Value::I64(1));
        LogRecord {
            timestamp: Duration::from_millis(millis),
            direction: Direction::Send,
            name: name.to_string(),
            fields,
        }
    }

    #[test]
    fn timing_mode_paces_but_never_waits_for_response() {
        let schema = schema();
        let driver = Driver::new(&schema, Mode::Timing, Duration::from_millis(100), 2.0);
        let records = vec![send_record("PING", 0), send_record("PING", 500)];
        let mut transport = MockTransport::new(vec![]);
        let mut elapsed = Vec::new();
        let summary = driver
            .run(&records, &mut transport, |d| elapsed.push(d))
            .unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.received, 0);
        assert_eq!(elapsed, vec![Duration::from_millis(250)]);
    }

    #[test]
    fn response_mode_advances_past_logged_recv_on_reply() {
        let schema = schema();
        let driver = Driver::new(&schema, Mode::Response, Duration::from_millis(50), 1.0);
        let mut records = vec![send_record("PING", 0)];
        records.push(LogRecord {
            timestamp: Duration::from_millis(10),
            direction: Direction::Recv,
            name: "PONG".into(),
            fields: FieldMap::new(),
        });
        records.push(send_record("PING", 20));

        let mut transport = MockTransport::new(vec![Some(vec![0xAA]), None]);
        let summary = driver.run(&records, &mut transport, |_| {}).unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.received, 1);
    }

    #[test]
    fn overrides_replace_field_values_before_encoding() {
        let schema = schema();
        let driver = Driver::new(&schema, Mode::Timing, Duration::from_millis(50), 1.0)
            .with_overrides({
                let mut fields = FieldMap::new();
                fields.insert("type", Value::I64(999));
                let mut overrides = Overrides::new();
                overrides.insert("PING".to_string(), fields);
                overrides
            });
        let records = vec![send_record("PING", 0)];
        let mut transport = MockTransport::new(vec![]);
        driver.run(&records, &mut transport, |_| {}).unwrap();
        assert_eq!(transport.sent[0][2..4], [231, 3]); // 999 little-endian
    }
}
