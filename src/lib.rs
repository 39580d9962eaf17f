//! # vault-piv-helper
//!
//! Protects Vault initialization secrets with a PIV hardware token.
//!
//! ## Features:
//! - Envelope encryption to a token's KEY_MANAGEMENT slot
//!   (ECDH on P-256/P-384, or RSA PKCS#1 v1.5 key wrapping, then AES-256-GCM)
//! - Key fingerprints bound into every envelope
//! - Device selection by serial, with exclusions, across attached readers
//! - Re-encryption from one token to another without touching disk in plaintext
//! - Atomic file replacement for secrets and tokens

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod envelope;
pub mod envelope_crypto;
pub mod error;
pub mod logging;
pub mod piv;
pub mod secure_fs;
pub mod vault_api;

// Re-exports
pub use crypto::{DevicePublicKey, KeyAgreement};
pub use envelope::Envelope;
pub use envelope_crypto::{decrypt, encrypt};
pub use error::{EnvelopeError, Result};
pub use piv::{DeviceSelector, SelectionCriteria, SlotId, TokenBackend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    use crate::piv::pin;
    use crate::piv::soft::{SoftBackend, SoftPrivateKey, SoftToken};
    use serde_json::{json, Value};

    #[test]
    fn test_public_api_roundtrip() {
        let backend = SoftBackend::new(vec![
            SoftToken::new(31).with_slot(SlotId::KeyManagement, SoftPrivateKey::generate_p256())
        ]);
        let criteria = SelectionCriteria::new().with_pin(pin(SoftToken::DEFAULT_PIN));
        let secrets = json!({"keys": ["AA=="], "root_token": "s.abc123"});

        let bytes = encrypt(&backend, &criteria, &secrets).unwrap();
        let (envelope, opened): (Envelope, Value) = decrypt(&backend, &criteria, &bytes).unwrap();

        assert_eq!(envelope.device, 31);
        assert_eq!(envelope.family(), "EC");
        assert_eq!(opened, secrets);
    }
}
