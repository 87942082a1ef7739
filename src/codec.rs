//! Payload canonicalization.
//!
//! Task payloads cross a process boundary as JSON text, but enqueue callers
//! hold rich in-memory values whose behavior can differ subtly from their
//! reparsed form (arbitrary-precision decimals, date-times). The codec
//! therefore parses the raw payload against the schema type, writes it back
//! to the wire format and parses it once more: a handler only ever observes
//! values identical to a fresh deserialization from the wire.
//!
//! Decimal fields keep their exact textual form through `serde_json`'s
//! arbitrary-precision numbers; date-times round-trip through RFC 3339 via
//! `chrono`'s serde support.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CodecError;

/// Parse `raw` against the schema type `T`, then re-serialize and re-parse.
///
/// A payload failing validation fails the delivery terminally; the caller
/// never falls back to the unvalidated value.
pub fn decode<T>(raw: &Value) -> Result<T, CodecError>
where
    T: DeserializeOwned + Serialize,
{
    let parsed: T = serde_json::from_value(raw.clone()).map_err(CodecError::Validation)?;
    let wire = serde_json::to_string(&parsed).map_err(CodecError::Serialize)?;
    serde_json::from_str(&wire).map_err(CodecError::Validation)
}
