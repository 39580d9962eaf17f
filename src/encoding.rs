//! JSON and base64 encoding helpers shared by the envelope and payload

use serde::Serialize;

use crate::error::{EnvelopeError, Result};

/// Pretty-print a value as JSON: two-space indentation, trailing newline.
///
/// HTML-sensitive characters (`<`, `>`, `&`) are written verbatim.
pub fn marshal_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    serde_json::to_writer_pretty(&mut buffer, value)
        .map_err(|e| EnvelopeError::Serialization(e.to_string()))?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// Serde adapter storing byte vectors as unpadded standard base64
pub mod b64 {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD_NO_PAD.encode(bytes)
    }

    pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD_NO_PAD.decode(text)
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_b64_roundtrip_sizes() {
        let mut random = vec![0u8; 1000];
        rand::thread_rng().fill_bytes(&mut random);

        for bytes in [vec![], vec![0xff], vec![7u8; 33], random] {
            let text = b64::encode(&bytes);
            assert!(!text.contains('='));
            assert_eq!(b64::decode(&text).unwrap(), bytes);
        }
    }

    #[test]
    fn test_b64_rejects_padding() {
        assert!(b64::decode("AA==").is_err());
        assert_eq!(b64::decode("AA").unwrap(), vec![0u8]);
    }

    #[test]
    fn test_marshal_json_layout() {
        let out = marshal_json(&serde_json::json!({"a": "<b>&"})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"a\": \"<b>&\"\n}\n");
    }
}
