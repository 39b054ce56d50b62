use crate::{envelope::Envelope, Error, Result};

/// Byte-level codec pair for envelopes.
///
/// The message list and the in-flight hash go through the same codec. Any
/// codec that round-trips the envelope's mapping shape is acceptable; the
/// reaper needs to read `start_time` back out of stored bytes.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Envelope>;
}

/// The default codec: JSON objects with the envelope's wire field names.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        serde_json::to_vec(envelope).map_err(Error::serialization)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(bytes).map_err(Error::serialization)
    }
}
