//! vault-piv-helper - Key Types
//!
//! Device public keys (EC / RSA) and the ephemeral shared secret.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{EnvelopeError, Result};

/// Key length for AES-256
pub const SECRET_LEN: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════
// SHARED SECRET
// ═══════════════════════════════════════════════════════════════════════════

/// Agreed or unwrapped secret, used directly as the AES-256 key.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SECRET_LEN],
}

impl SharedSecret {
    /// Create a shared secret from raw bytes
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a random secret
    pub fn generate() -> Self {
        let mut secret = Self::new([0u8; SECRET_LEN]);
        OsRng.fill_bytes(&mut secret.bytes);
        secret
    }

    /// Build the key from a raw agreed value, keeping its leading 32 bytes
    pub fn from_agreed(value: &[u8]) -> Result<Self> {
        if value.len() < SECRET_LEN {
            return Err(EnvelopeError::Crypto(format!(
                "agreed secret too short: {} bytes",
                value.len()
            )));
        }

        let mut secret = Self::new([0u8; SECRET_LEN]);
        secret.bytes.copy_from_slice(&value[..SECRET_LEN]);
        Ok(secret)
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE PUBLIC KEYS
// ═══════════════════════════════════════════════════════════════════════════

/// Named curves available on PIV devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    P256,
    P384,
}

impl EcCurve {
    /// NIST curve name, as used in fingerprints
    pub fn name(&self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
        }
    }

    /// Coordinate size in bytes
    pub fn field_len(&self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }
}

impl std::fmt::Display for EcCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Elliptic-curve public key on a supported curve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
}

impl EcPublicKey {
    pub fn curve(&self) -> EcCurve {
        match self {
            Self::P256(_) => EcCurve::P256,
            Self::P384(_) => EcCurve::P384,
        }
    }

    /// Parse an SEC1-encoded point on the given curve
    pub fn from_sec1(curve: EcCurve, bytes: &[u8]) -> Result<Self> {
        let invalid = |_| {
            EnvelopeError::MalformedEnvelope(format!("invalid {} public key", curve.name()))
        };

        match curve {
            EcCurve::P256 => p256::PublicKey::from_sec1_bytes(bytes)
                .map(Self::P256)
                .map_err(invalid),
            EcCurve::P384 => p384::PublicKey::from_sec1_bytes(bytes)
                .map(Self::P384)
                .map_err(invalid),
        }
    }

    /// Uncompressed SEC1 encoding (`0x04 || X || Y`)
    pub fn to_sec1_uncompressed(&self) -> Vec<u8> {
        match self {
            Self::P256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            Self::P384(key) => key.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Fixed-width affine coordinates
    pub fn coordinates(&self) -> (Vec<u8>, Vec<u8>) {
        let point = self.to_sec1_uncompressed();
        let len = self.curve().field_len();
        (point[1..1 + len].to_vec(), point[1 + len..].to_vec())
    }
}

/// Public key read from a PIV slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePublicKey {
    Ec(EcPublicKey),
    Rsa(RsaPublicKey),
}

impl DevicePublicKey {
    /// Parse a DER-encoded SubjectPublicKeyInfo
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = p256::PublicKey::from_public_key_der(der) {
            return Ok(Self::Ec(EcPublicKey::P256(key)));
        }
        if let Ok(key) = p384::PublicKey::from_public_key_der(der) {
            return Ok(Self::Ec(EcPublicKey::P384(key)));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_der(der) {
            return Ok(Self::Rsa(key));
        }

        Err(EnvelopeError::UnsupportedKey(
            "public key is neither P-256, P-384 nor RSA".into(),
        ))
    }

    /// Key family tag: `EC` or `RSA`
    pub fn family(&self) -> &'static str {
        match self {
            Self::Ec(_) => "EC",
            Self::Rsa(_) => "RSA",
        }
    }

    /// Modulus size for RSA keys, coordinate size in bits for EC keys
    pub fn bits(&self) -> usize {
        match self {
            Self::Ec(key) => key.curve().field_len() * 8,
            Self::Rsa(key) => key.n().bits(),
        }
    }
}

impl From<p256::PublicKey> for DevicePublicKey {
    fn from(key: p256::PublicKey) -> Self {
        Self::Ec(EcPublicKey::P256(key))
    }
}

impl From<p384::PublicKey> for DevicePublicKey {
    fn from(key: p384::PublicKey) -> Self {
        Self::Ec(EcPublicKey::P384(key))
    }
}

impl From<RsaPublicKey> for DevicePublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self::Rsa(key)
    }
}
