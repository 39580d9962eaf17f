//! AES-256-GCM sealing of envelope payloads

use aes_gcm::aead::consts::{U12, U13, U14, U15, U16};
use aes_gcm::aead::generic_array::{ArrayLength, GenericArray};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::keys::SharedSecret;
use crate::error::{EnvelopeError, Result};

/// Nonce length used when sealing
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Nonce and ciphertext (tag appended) of a sealed payload
#[derive(Debug, Clone)]
pub struct SealedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Seal plaintext under a fresh random 96-bit nonce, no associated data
pub fn seal(key: &SharedSecret, plaintext: &[u8]) -> Result<SealedData> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| EnvelopeError::Crypto(format!("Invalid key: {}", e)))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| EnvelopeError::Crypto("AES-GCM encryption failed".into()))?;

    Ok(SealedData {
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Open a sealed payload.
///
/// The nonce length found in the envelope selects the GCM variant, so
/// envelopes written with nonces of 12 to 16 bytes remain readable.
pub fn open(key: &SharedSecret, nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    match nonce.len() {
        12 => open_sized::<U12>(key, nonce, ciphertext),
        13 => open_sized::<U13>(key, nonce, ciphertext),
        14 => open_sized::<U14>(key, nonce, ciphertext),
        15 => open_sized::<U15>(key, nonce, ciphertext),
        16 => open_sized::<U16>(key, nonce, ciphertext),
        n => Err(EnvelopeError::MalformedEnvelope(format!(
            "unsupported nonce length: {} bytes",
            n
        ))),
    }
}

fn open_sized<N>(key: &SharedSecret, nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>
where
    N: ArrayLength<u8>,
    AesGcm<Aes256, N>: KeyInit + Aead,
{
    if ciphertext.len() < TAG_LEN {
        return Err(EnvelopeError::DecryptionFailed);
    }

    let cipher = AesGcm::<Aes256, N>::new_from_slice(key.expose())
        .map_err(|e| EnvelopeError::Crypto(format!("Invalid key: {}", e)))?;

    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| EnvelopeError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = SharedSecret::generate();
        let sealed = seal(&key, b"root token").unwrap();

        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_eq!(sealed.ciphertext.len(), b"root token".len() + TAG_LEN);

        let opened = open(&key, &sealed.nonce, &sealed.ciphertext).unwrap();
        assert_eq!(opened.as_slice(), b"root token");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = SharedSecret::generate();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&SharedSecret::generate(), b"secret").unwrap();
        let result = open(&SharedSecret::generate(), &sealed.nonce, &sealed.ciphertext);

        assert!(matches!(result, Err(EnvelopeError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = SharedSecret::generate();
        let mut sealed = seal(&key, b"secret").unwrap();
        sealed.ciphertext[0] ^= 0x01;

        let result = open(&key, &sealed.nonce, &sealed.ciphertext);
        assert!(matches!(result, Err(EnvelopeError::DecryptionFailed)));
    }

    #[test]
    fn test_long_nonce_accepted() {
        let key = SharedSecret::generate();
        let nonce = [9u8; 16];
        let cipher = AesGcm::<Aes256, U16>::new_from_slice(key.expose()).unwrap();
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(&nonce), b"legacy".as_slice())
            .unwrap();

        let opened = open(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(opened.as_slice(), b"legacy");
    }

    #[test]
    fn test_nonce_length_bounds() {
        let key = SharedSecret::generate();
        for len in [0usize, 8, 11, 17, 32] {
            let result = open(&key, &vec![0u8; len], &[0u8; 32]);
            assert!(matches!(result, Err(EnvelopeError::MalformedEnvelope(_))));
        }
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = SharedSecret::generate();
        let result = open(&key, &[0u8; NONCE_LEN], &[0u8; 5]);
        assert!(matches!(result, Err(EnvelopeError::DecryptionFailed)));
    }
}
