use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key carrying the payload's encoding name.
pub const ENCODING_KEY: &str = "encoding";

/// Opaque bytes with string-keyed metadata.
///
/// The core never interprets `data`; conversion to and from user types
/// happens at the SDK boundary through a [`crate::converter::PayloadConverter`].
/// Metadata is a `BTreeMap` so serialized payloads have a stable field order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub data: Vec<u8>,
}

impl Payload {
    /// Create a payload from raw bytes with no metadata.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            metadata: BTreeMap::new(),
            data,
        }
    }

    /// Create a payload tagged with an encoding name.
    pub fn with_encoding(data: Vec<u8>, encoding: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(ENCODING_KEY.to_string(), encoding.as_bytes().to_vec());
        Self { metadata, data }
    }

    /// The payload's declared encoding, if the metadata carries one
    /// and it is valid UTF-8.
    pub fn encoding(&self) -> Option<&str> {
        self.metadata
            .get(ENCODING_KEY)
            .and_then(|raw| std::str::from_utf8(raw).ok())
    }
}

/// String-keyed payload map attached to workflow starts, signals, and updates.
pub type Headers = BTreeMap<String, Payload>;

/// Search attribute map for `UpsertSearchAttributes`.
pub type SearchAttributes = BTreeMap<String, Payload>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_round_trips_through_metadata() {
        let p = Payload::with_encoding(vec![1, 2, 3], "json/plain");
        assert_eq!(p.encoding(), Some("json/plain"));
        assert_eq!(p.data, vec![1, 2, 3]);
    }

    #[test]
    fn bare_payload_has_no_encoding() {
        let p = Payload::new(vec![9]);
        assert_eq!(p.encoding(), None);
    }

    #[test]
    fn non_utf8_encoding_metadata_is_ignored() {
        let mut p = Payload::new(vec![]);
        p.metadata.insert(ENCODING_KEY.to_string(), vec![0xff, 0xfe]);
        assert_eq!(p.encoding(), None);
    }
}
