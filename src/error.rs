//! vault-piv-helper - Error Types

use thiserror::Error;

use crate::piv::SlotId;

/// Result type for envelope and device operations
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Envelope error types
///
/// Messages never carry the PIN, a symmetric key or decrypted payload text.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    // ═══════════════════════════════════════════════════════════════
    // DEVICE ERRORS
    // ═══════════════════════════════════════════════════════════════
    #[error("No PIV devices detected")]
    NoDevicesPresent,

    #[error(
        "Unable to use any of the attached PIV devices. Please ensure that a device with \
         the given serial number is attached or provision the {slot} slot of at least one \
         attached device to auto-select"
    )]
    DeviceSelectionFailed { slot: SlotId },

    #[error("Slot {0} is not provisioned")]
    SlotNotProvisioned(SlotId),

    #[error("Authentication failed - wrong or missing PIN?")]
    AuthenticationFailed,

    #[error("PIV device error: {0}")]
    Token(String),

    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════
    #[error("Private key does not match the public key used to encrypt this message: {expected} != {actual}")]
    KeyMismatch { expected: String, actual: String },

    #[error("Decryption failed - message authentication failed")]
    DecryptionFailed,

    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    // ═══════════════════════════════════════════════════════════════
    // ENVELOPE ERRORS
    // ═══════════════════════════════════════════════════════════════
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Decrypted payload is not valid for the requested type (line {line}, column {column})")]
    MalformedPayload { line: usize, column: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // VAULT API ERRORS
    // ═══════════════════════════════════════════════════════════════
    #[error("Vault request failed: {0}")]
    Vault(String),

    #[error("Vault has not been unsealed (threshold {threshold}, shares {shares}, progress {progress})")]
    VaultSealed {
        threshold: u32,
        shares: u32,
        progress: u32,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EnvelopeError {
    /// Errors raised by the envelope itself rather than the device or environment
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            EnvelopeError::KeyMismatch { .. }
                | EnvelopeError::DecryptionFailed
                | EnvelopeError::MalformedEnvelope(_)
        )
    }

    /// Check if retrying with corrected user input could succeed
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            EnvelopeError::NoDevicesPresent
                | EnvelopeError::DeviceSelectionFailed { .. }
                | EnvelopeError::AuthenticationFailed
        )
    }

    /// Map a payload deserialization error without exposing payload text
    pub(crate) fn payload(e: &serde_json::Error) -> Self {
        EnvelopeError::MalformedPayload {
            line: e.line(),
            column: e.column(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_message_names_slot() {
        let err = EnvelopeError::DeviceSelectionFailed {
            slot: SlotId::KeyManagement,
        };
        assert!(err.to_string().contains("KEY_MANAGEMENT"));
        assert!(err.is_user_correctable());
    }

    #[test]
    fn test_payload_error_hides_content() {
        let e = serde_json::from_str::<u32>("\"s.abc123\"").unwrap_err();
        let err = EnvelopeError::payload(&e);
        assert!(!err.to_string().contains("s.abc123"));
    }

    #[test]
    fn test_integrity_classification() {
        assert!(EnvelopeError::DecryptionFailed.is_integrity_failure());
        assert!(!EnvelopeError::AuthenticationFailed.is_integrity_failure());
    }
}
