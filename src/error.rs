use thiserror::Error;

/// The error type for the wiretrace core: schema loading, encoding, and
/// replay log parsing. Decoding and transform failures are deliberately
/// *not* represented here — per the decoder/transform contract they always
/// degrade to a best-effort result instead of raising an error.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema document is missing the required `protocol` section.
    #[error("schema is missing the required `protocol` section")]
    MissingProtocol,
    /// A field or header declares a user type that isn't in `types`.
    #[error("unresolved user type `{name}`")]
    UnresolvedType { name: String },
    /// An array field's `count_field` doesn't name an earlier sibling field.
    #[error("count_field `{name}` does not name a preceding sibling field")]
    UnresolvedCountField { name: String },
    /// The header's declared size field is wider than 32 bits.
    #[error("header size field must be an integer scalar of at most 32 bits")]
    SizeFieldTooWide,
    /// `Encoder::encode` was asked for a packet name the schema doesn't define.
    #[error("unknown packet `{name}`")]
    UnknownPacket { name: String },
    /// A replay log line couldn't be matched as a record header or field line.
    #[error("could not parse log line: {line}")]
    LogParse { line: String },
    /// The replay driver could not connect to the target endpoint.
    #[error("failed to connect to replay target: {0}")]
    Connect(#[source] std::io::Error),
    /// The replay driver timed out waiting for an expected RECV.
    #[error("timed out waiting for response")]
    ResponseTimeout,
    /// Any other I/O failure (schema file read, socket write, log file read).
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Malformed schema JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The result type used throughout wiretrace.
pub type Result<T> = std::result::Result<T, Error>;
