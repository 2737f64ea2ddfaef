//! Value codecs for stored records.
//!
//! Stores are generic over a [`Codec`] so the byte form of a record is a
//! wiring decision. [`JsonCodec`] is the default; [`CborCodec`] trades
//! readability for size.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Converts a domain value to and from the bytes stored in a table.
///
/// Implementations must be deterministic for a given value and must
/// round-trip: `decode(encode(v)) == v`.
pub trait Codec<T>: Send + Sync + fmt::Debug {
    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the value cannot be represented.
    fn encode(&self, value: &T) -> CoreResult<Vec<u8>>;

    /// Decodes a value previously produced by [`Codec::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the bytes are not a valid encoding.
    fn decode(&self, bytes: &[u8]) -> CoreResult<T>;
}

/// JSON text encoding via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> CoreResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// CBOR encoding via `ciborium`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl<T> Codec<T> for CborCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out)
            .map_err(|e| CoreError::codec(format!("cbor encode: {e}")))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> CoreResult<T> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::codec(format!("cbor decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
        tags: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            name: "foo".into(),
            count: 3,
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[test]
    fn json_is_text() {
        let bytes = Codec::<Sample>::encode(&JsonCodec, &sample()).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"name\":\"foo\""));
    }

    #[test]
    fn json_and_cbor_round_trip() {
        let json = JsonCodec.encode(&sample()).unwrap();
        assert_eq!(Codec::<Sample>::decode(&JsonCodec, &json).unwrap(), sample());

        let cbor = CborCodec.encode(&sample()).unwrap();
        assert_eq!(Codec::<Sample>::decode(&CborCodec, &cbor).unwrap(), sample());
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = Codec::<Sample>::decode(&JsonCodec, b"{not json").unwrap_err();
        assert!(matches!(err, CoreError::Codec { .. }));

        let err = Codec::<Sample>::decode(&CborCodec, &[0xff, 0x00]).unwrap_err();
        assert!(matches!(err, CoreError::Codec { .. }));
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = JsonCodec.encode(&sample()).unwrap();
        let b = JsonCodec.encode(&sample()).unwrap();
        assert_eq!(a, b);
    }
}
