//! Envelope format for vault-piv-helper
//!
//! ```text
//! {
//!   "dev": 12345678,                  serial of the token sealed to
//!   "kid": "EC:P-256:9f86d0...",      fingerprint of its public key
//!   "meta": {"epk": "BE3x..."},       or {"eck": "..."} for RSA
//!   "nonce": "q83v...",               AES-GCM nonce
//!   "enc": "Zm9v..."                  ciphertext || tag
//! }
//! ```
//!
//! Binary fields are unpadded standard base64.

use serde::{Deserialize, Serialize};

use crate::crypto::RecoveryMetadata;
use crate::encoding::{b64, marshal_json};
use crate::error::{EnvelopeError, Result};

/// Sealed payload bound to one device key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "dev")]
    pub device: u32,
    #[serde(rename = "kid")]
    pub key_id: String,
    #[serde(rename = "meta")]
    pub metadata: RecoveryMetadata,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(rename = "enc", with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Indented JSON for persistence
    pub fn encode(&self) -> Result<Vec<u8>> {
        marshal_json(self)
    }

    /// Parse compact or indented JSON
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }

    pub fn family(&self) -> &'static str {
        match self.metadata {
            RecoveryMetadata::Ec { .. } => "EC",
            RecoveryMetadata::Rsa { .. } => "RSA",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            device: 12345678,
            key_id: "EC:P-256:00ff".into(),
            metadata: RecoveryMetadata::Ec {
                epk: vec![0x04, 1, 2, 3],
            },
            nonce: vec![7u8; 12],
            ciphertext: vec![9u8; 20],
        }
    }

    #[test]
    fn test_field_order_and_layout() {
        let text = String::from_utf8(sample().encode().unwrap()).unwrap();
        let expected = "{\n  \"dev\": 12345678,\n  \"kid\": \"EC:P-256:00ff\",\n  \"meta\": {\n    \"epk\": \"BAECAw\"\n  },\n  \"nonce\": \"BwcHBwcHBwcHBwcH\",\n  \"enc\": \"CQkJCQkJCQkJCQkJCQkJCQkJCQk\"\n}\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_decode_compact_and_indented() {
        let envelope = sample();
        let indented = envelope.encode().unwrap();
        let compact = serde_json::to_vec(&envelope).unwrap();

        assert_eq!(Envelope::decode(&indented).unwrap(), envelope);
        assert_eq!(Envelope::decode(&compact).unwrap(), envelope);
    }

    #[test]
    fn test_empty_binary_fields() {
        let envelope = Envelope {
            nonce: vec![],
            ciphertext: vec![],
            metadata: RecoveryMetadata::Rsa { eck: vec![] },
            ..sample()
        };

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.family(), "RSA");
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: [&[u8]; 6] = [
            b"",
            b"not json",
            br#"{"dev": 1, "kid": "x", "meta": {"foo": "AA"}, "nonce": "AA", "enc": "AA"}"#,
            br#"{"dev": 1, "kid": "x", "meta": {"epk": "AA=="}, "nonce": "AA", "enc": "AA"}"#,
            br#"{"dev": -1, "kid": "x", "meta": {"epk": "AA"}, "nonce": "AA", "enc": "AA"}"#,
            br#"{"dev":1,"kid":"x","meta":{"epk":"AA","eck":"AA"},"nonce":"AA","enc":"AA"}"#,
        ];

        for bytes in cases {
            let err = Envelope::decode(bytes).unwrap_err();
            assert!(matches!(err, EnvelopeError::MalformedEnvelope(_)));
        }
    }
}
