//! vault-piv-helper - Cryptographic Primitives
//!
//! - EC (P-256 / P-384) ephemeral ECDH and RSA PKCS#1 v1.5 key wrapping
//! - AES-256-GCM payload sealing
//! - Public key fingerprints

pub mod aead;
pub mod agreement;
pub mod fingerprint;
pub mod keys;

pub use aead::{open, seal, SealedData, NONCE_LEN, TAG_LEN};
pub use agreement::{DecryptParams, Decrypter, KeyAgreement, RecoveryMetadata};
pub use fingerprint::fingerprint;
pub use keys::{DevicePublicKey, EcCurve, EcPublicKey, SharedSecret, SECRET_LEN};
