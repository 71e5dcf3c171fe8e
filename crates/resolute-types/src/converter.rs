use crate::payload::Payload;
use serde::{Serialize, de::DeserializeOwned};

/// Errors raised while converting between user types and [`Payload`] bytes.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("payload encoding {actual:?} does not match converter encoding {expected:?}")]
    EncodingMismatch { expected: String, actual: String },
}

/// Converts between opaque payload bytes and JSON values.
///
/// The workflow machine treats payloads as opaque; converters are only
/// consulted at the user-code boundary (inputs, results, signal and update
/// arguments). Implementations must be pure: the same value must always
/// produce the same bytes, or replay will diverge.
///
/// The trait is object-safe so worker configuration can carry an
/// `Arc<dyn PayloadConverter>`; the typed surface lives on
/// [`PayloadConverterExt`].
pub trait PayloadConverter: Send + Sync {
    /// Name written into the payload's `encoding` metadata.
    fn encoding(&self) -> &'static str;

    fn encode_value(&self, value: serde_json::Value) -> Result<Payload, ConvertError>;

    fn decode_value(&self, payload: &Payload) -> Result<serde_json::Value, ConvertError>;
}

/// Typed conversion helpers over any [`PayloadConverter`].
pub trait PayloadConverterExt: PayloadConverter {
    fn to_payload<T: Serialize>(&self, value: &T) -> Result<Payload, ConvertError> {
        let value = serde_json::to_value(value).map_err(ConvertError::Encode)?;
        self.encode_value(value)
    }

    fn from_payload<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, ConvertError> {
        let value = self.decode_value(payload)?;
        serde_json::from_value(value).map_err(ConvertError::Decode)
    }
}

impl<C: PayloadConverter + ?Sized> PayloadConverterExt for C {}

/// Default converter: serde_json with an `encoding = "json/plain"` tag.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPayloadConverter;

impl PayloadConverter for JsonPayloadConverter {
    fn encoding(&self) -> &'static str {
        "json/plain"
    }

    fn encode_value(&self, value: serde_json::Value) -> Result<Payload, ConvertError> {
        let data = serde_json::to_vec(&value).map_err(ConvertError::Encode)?;
        Ok(Payload::with_encoding(data, self.encoding()))
    }

    fn decode_value(&self, payload: &Payload) -> Result<serde_json::Value, ConvertError> {
        if let Some(actual) = payload.encoding() {
            if actual != self.encoding() {
                return Err(ConvertError::EncodingMismatch {
                    expected: self.encoding().to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        serde_json::from_slice(&payload.data).map_err(ConvertError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn json_converter_round_trips_values() {
        let conv = JsonPayloadConverter;
        let order = Order {
            id: 7,
            sku: "widget".into(),
        };

        let payload = conv.to_payload(&order).unwrap();
        assert_eq!(payload.encoding(), Some("json/plain"));

        let back: Order = conv.from_payload(&payload).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn typed_helpers_work_through_a_trait_object() {
        let conv: std::sync::Arc<dyn PayloadConverter> =
            std::sync::Arc::new(JsonPayloadConverter);
        let payload = conv.to_payload(&5u32).unwrap();
        let back: u32 = conv.from_payload(&payload).unwrap();
        assert_eq!(back, 5);
    }

    #[test]
    fn mismatched_encoding_is_rejected() {
        let conv = JsonPayloadConverter;
        let payload = Payload::with_encoding(b"{}".to_vec(), "binary/protobuf");

        let err = conv.from_payload::<Order>(&payload).unwrap_err();
        assert!(matches!(err, ConvertError::EncodingMismatch { .. }));
    }

    #[test]
    fn untagged_payload_is_decoded_as_json() {
        let conv = JsonPayloadConverter;
        let payload = Payload::new(br#"{"id":1,"sku":"a"}"#.to_vec());

        let order: Order = conv.from_payload(&payload).unwrap();
        assert_eq!(order.id, 1);
    }

    #[test]
    fn garbage_bytes_report_decode_error() {
        let conv = JsonPayloadConverter;
        let payload = Payload::new(vec![0xde, 0xad]);

        let err = conv.from_payload::<Order>(&payload).unwrap_err();
        assert!(matches!(err, ConvertError::Decode(_)));
    }
}
