//! The capture-side dispatch boundary (spec §4.8/§5, ambient in the sense
//! that the real link-layer reader is an external collaborator per §1, but
//! the dispatch loop that owns the connection map is core behavior).

use crate::decoder::{Decoder, ParsedMessage};
use crate::reassembly::{ConnectionMap, FourTuple};
use crate::schema::Schema;
use crate::transform::{Pipeline, TransformContext};

/// Boundary trait for the raw-socket/link-layer reader (kernel capability,
/// OS-specific, explicitly out of scope per spec §1). Implementations hand
/// the dispatcher a TCP payload slice plus the 4-tuple it belongs to.
pub trait PayloadSource {
    fn next_payload(&mut self) -> Option<(FourTuple, Vec<u8>)>;
}

/// One reassembly buffer and transform context per connection, shared by
/// every payload dispatched to that connection.
struct ConnectionState {
    ctx: TransformContext,
}

/// Owns the [`ConnectionMap`] and runs the decoder to exhaustion on every
/// arriving payload (spec §5: "runs the decoder synchronously to
/// exhaustion before returning"). Not `Send`/`Sync` by convention: the
/// capture thread is the map's only mutator.
pub struct Dispatcher {
    connections: ConnectionMap,
    contexts: std::collections::HashMap<FourTuple, ConnectionState>,
    decoder: Decoder,
    pipeline: Pipeline,
}

impl Dispatcher {
    pub fn new(schema: &Schema) -> Self {
        Dispatcher {
            connections: ConnectionMap::new(),
            contexts: std::collections::HashMap::new(),
            decoder: Decoder::new(),
            pipeline: Pipeline::from_specs(&schema.transforms),
        }
    }

    /// Append `payload` to the connection identified by `tuple` and drive
    /// the decoder until it stops producing messages. Ordering guarantee:
    /// messages within one connection are returned in TCP byte order (§5);
    /// no ordering guarantee is made across connections, since each call
    /// only ever touches one connection's buffer.
    pub fn on_payload(
        &mut self,
        tuple: FourTuple,
        payload: &[u8],
        schema: &Schema,
    ) -> Vec<ParsedMessage> {
        let now = std::time::Instant::now();
        if !self.connections.contains(&tuple) {
            tracing::info!(
                src = %tuple.src_ip, src_port = tuple.src_port,
                dst = %tuple.dst_ip, dst_port = tuple.dst_port,
                "connection opened"
            );
        }
        let buf = self.connections.get_or_create(tuple, now);
        buf.append(payload);

        let state = self
            .contexts
            .entry(tuple)
            .or_insert_with(|| ConnectionState {
                ctx: TransformContext::new(),
            });

        let mut out = Vec::new();
        while let Some(msg) = self
            .decoder
            .decode_one(schema, buf, &self.pipeline, &mut state.ctx)
        {
            out.push(msg);
        }
        out
    }

    /// Drain one [`PayloadSource`] completely, decoding every payload it
    /// yields. Exists mainly so integration tests can drive an in-memory
    /// source deterministically without a real capture loop.
    pub fn run(&mut self, source: &mut dyn PayloadSource, schema: &Schema) -> Vec<ParsedMessage> {
        let mut out = Vec::new();
        while let Some((tuple, payload)) = source.next_payload() {
            out.extend(self.on_payload(tuple, &payload, schema));
        }
        out
    }

    /// Remove connections idle since before `now - timeout` (spec §5's
    /// sweep semantics). Also drops their transform context, since a new
    /// connection to the same 4-tuple starts a fresh session.
    pub fn sweep_idle(&mut self, now: std::time::Instant, timeout: std::time::Duration) {
        self.connections.sweep_idle(now, timeout);
        let connections = &self.connections;
        self.contexts.retain(|tuple, _| connections.contains(tuple));
    }
}
