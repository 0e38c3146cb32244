//! `wiretrace`: a declarative, schema-driven TCP protocol engine.
//!
//! Captures TCP traffic, reassembles per-connection byte streams, decodes
//! length-prefixed application messages against an externally supplied
//! JSON protocol description, applies a configurable chain of byte-stream
//! transforms, and renders a structured log — plus the symmetric encoder
//! and replay driver used to resend a prior log's traffic.
//!
//! One module per concern, each re-exported from the crate root.

pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod formatter;
pub mod reassembly;
pub mod replay;
pub mod schema;
pub mod transform;
pub mod value;

pub use capture::{Dispatcher, PayloadSource};
pub use decoder::{Decoder, ParsedMessage};
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use formatter::{Direction, Formatter};
pub use reassembly::{ConnectionMap, FourTuple, RingBuffer};
pub use replay::{Driver as ReplayDriver, LogRecord, Mode as ReplayMode, ReplaySummary};
pub use schema::Schema;
pub use transform::{Pipeline, Transform, TransformContext};
pub use value::{FieldMap, Value};
