pub mod frame;
pub mod message;
pub mod node;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message body of {0} bytes exceeds the {MAX_BODY_SIZE} byte limit")]
    OversizedBody(u32),
    #[error("failed to decode {kind} body: {source}")]
    BadBody {
        kind: &'static str,
        source: bincode::error::DecodeError,
    },
}

/// Upper bound on a single message body. Nothing legitimate comes close;
/// a header above this means the stream is corrupt.
pub const MAX_BODY_SIZE: u32 = 256 * 1024 * 1024;

/// Encode a structured wire body.
pub fn encode_body<T: bincode::Encode>(value: &T) -> Vec<u8> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .expect("bincode encoding of wire types is infallible")
}

/// Decode a structured wire body, consuming the whole slice.
pub fn decode_body<T: bincode::Decode<()>>(kind: &'static str, body: &[u8]) -> Result<T, WireError> {
    bincode::decode_from_slice(body, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|source| WireError::BadBody { kind, source })
}
