//! vault-piv-helper - Envelope Encryption
//!
//! Seal: select device → read public key → derive secret → AES-GCM → envelope.
//! Open: decode envelope → select device by `dev` → compare `kid` → recover
//! secret → AES-GCM open.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, Decrypter, DevicePublicKey, KeyAgreement};
use crate::encoding::marshal_json;
use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};
use crate::piv::{Access, DeviceSelector, SelectionCriteria, SlotId, TokenBackend};

/// Slot holding the encryption key
pub const ENCRYPTION_SLOT: SlotId = SlotId::KeyManagement;

// ═══════════════════════════════════════════════════════════════════════════
// KEY-LEVEL OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Seal raw bytes to a public key held by device `device`
pub fn seal_bytes(device: u32, key: &DevicePublicKey, plaintext: &[u8]) -> Result<Envelope> {
    let key_id = key.fingerprint();
    let (secret, metadata) = key.derive()?;
    let sealed = crypto::seal(&secret, plaintext)?;

    Ok(Envelope {
        device,
        key_id,
        metadata,
        nonce: sealed.nonce,
        ciphertext: sealed.ciphertext,
    })
}

/// Seal a value as indented JSON
pub fn seal_value<T: Serialize + ?Sized>(
    device: u32,
    key: &DevicePublicKey,
    value: &T,
) -> Result<Envelope> {
    let plaintext = Zeroizing::new(marshal_json(value)?);
    seal_bytes(device, key, &plaintext)
}

/// Fail unless the envelope was sealed to `key`
pub fn verify_key_id(envelope: &Envelope, key: &DevicePublicKey) -> Result<()> {
    let actual = key.fingerprint();
    if envelope.key_id != actual {
        return Err(EnvelopeError::KeyMismatch {
            expected: envelope.key_id.clone(),
            actual,
        });
    }
    Ok(())
}

/// Open an envelope with the private half of `key`.
///
/// The key id is checked before the decrypter is used.
pub fn open_bytes(
    envelope: &Envelope,
    key: &DevicePublicKey,
    decrypter: &mut dyn Decrypter,
) -> Result<Zeroizing<Vec<u8>>> {
    verify_key_id(envelope, key)?;

    let secret = key.recover(decrypter, &envelope.metadata)?;
    crypto::open(&secret, &envelope.nonce, &envelope.ciphertext)
}

pub fn open_value<T: DeserializeOwned>(
    envelope: &Envelope,
    key: &DevicePublicKey,
    decrypter: &mut dyn Decrypter,
) -> Result<T> {
    let plaintext = open_bytes(envelope, key, decrypter)?;
    serde_json::from_slice(&plaintext).map_err(|e| EnvelopeError::payload(&e))
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE-LEVEL OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt a value to the first device matching `criteria`, returning the
/// encoded envelope
pub fn encrypt<T: Serialize + ?Sized>(
    backend: &dyn TokenBackend,
    criteria: &SelectionCriteria,
    value: &T,
) -> Result<Vec<u8>> {
    let device =
        DeviceSelector::new(backend).select(criteria, Some(ENCRYPTION_SLOT), Access::ReadOnly)?;
    let key = device.public_key()?;

    info!(
        serial = device.serial(),
        key_id = %key.fingerprint(),
        "Encrypting with {}",
        key.scheme()
    );

    seal_value(device.serial(), key, value)?.encode()
}

/// Decrypt an encoded envelope on the device it names.
///
/// Any serial requirement in `criteria` is replaced by the envelope's `dev`.
pub fn decrypt<T: DeserializeOwned>(
    backend: &dyn TokenBackend,
    criteria: &SelectionCriteria,
    bytes: &[u8],
) -> Result<(Envelope, T)> {
    let envelope = Envelope::decode(bytes)?;
    debug!(dev = envelope.device, kid = %envelope.key_id, "Decoded envelope");

    let criteria = criteria.for_serial(envelope.device);
    let mut device = DeviceSelector::new(backend).select(
        &criteria,
        Some(ENCRYPTION_SLOT),
        Access::Authenticated,
    )?;
    let key = device.public_key()?.clone();

    info!(
        serial = device.serial(),
        key_id = %envelope.key_id,
        "Decrypting with {}",
        key.scheme()
    );

    let mut decrypter = device.decrypter(ENCRYPTION_SLOT);
    let value = open_value(&envelope, &key, &mut decrypter)?;
    Ok((envelope, value))
}
