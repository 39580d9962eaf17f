//! vault-piv-helper - Key Agreement
//!
//! Each device key family derives a fresh shared secret when sealing and
//! recovers it with the help of the device private key when opening:
//!
//! - EC: ephemeral ECDH on the device curve. The raw X coordinate of the
//!   shared point is the key material, without a KDF. The ephemeral public
//!   key travels in the envelope as `epk`.
//! - RSA: a random secret wrapped with PKCS#1 v1.5 encryption. The wrapped
//!   secret travels in the envelope as `eck`.

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::fingerprint::{fingerprint, fingerprint_ec, fingerprint_rsa};
use super::keys::{DevicePublicKey, EcPublicKey, SharedSecret, SECRET_LEN};
use crate::encoding::b64;
use crate::error::{EnvelopeError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// RECOVERY METADATA
// ═══════════════════════════════════════════════════════════════════════════

/// Scheme-specific data needed to recover the shared secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum RecoveryMetadata {
    /// Ephemeral EC public key, uncompressed SEC1
    Ec {
        #[serde(with = "b64")]
        epk: Vec<u8>,
    },
    /// RSA-encrypted shared secret
    Rsa {
        #[serde(with = "b64")]
        eck: Vec<u8>,
    },
}

// ═══════════════════════════════════════════════════════════════════════════
// PRIVATE-KEY CAPABILITY
// ═══════════════════════════════════════════════════════════════════════════

/// Operation requested from a private key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptParams {
    /// Input is the peer public key (uncompressed SEC1); output is the raw
    /// shared X coordinate
    Ecdh,
    /// Input is a PKCS#1 v1.5 block; output is the unwrapped secret
    Pkcs1v15 { session_key_len: usize },
}

/// Private-key operation delegated to a device (or an in-memory key in tests)
pub trait Decrypter {
    fn decrypt(&mut self, input: &[u8], params: DecryptParams) -> Result<Zeroizing<Vec<u8>>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// KEY AGREEMENT
// ═══════════════════════════════════════════════════════════════════════════

pub trait KeyAgreement {
    /// Short scheme name for log messages
    fn scheme(&self) -> &'static str;

    /// Stable identifier of the public key
    fn fingerprint(&self) -> String;

    /// Produce a fresh shared secret and the metadata to recover it
    fn derive(&self) -> Result<(SharedSecret, RecoveryMetadata)>;

    /// Recover the shared secret from metadata using the private key
    fn recover(
        &self,
        decrypter: &mut dyn Decrypter,
        metadata: &RecoveryMetadata,
    ) -> Result<SharedSecret>;
}

impl KeyAgreement for EcPublicKey {
    fn scheme(&self) -> &'static str {
        "ECDH/AES"
    }

    fn fingerprint(&self) -> String {
        fingerprint_ec(self)
    }

    fn derive(&self) -> Result<(SharedSecret, RecoveryMetadata)> {
        let (secret, epk) = match self {
            EcPublicKey::P256(peer) => {
                let ephemeral = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let epk = EcPublicKey::P256(ephemeral.public_key()).to_sec1_uncompressed();
                let shared = ephemeral.diffie_hellman(peer);
                (SharedSecret::from_agreed(shared.raw_secret_bytes())?, epk)
            }
            EcPublicKey::P384(peer) => {
                let ephemeral = p384::ecdh::EphemeralSecret::random(&mut OsRng);
                let epk = EcPublicKey::P384(ephemeral.public_key()).to_sec1_uncompressed();
                let shared = ephemeral.diffie_hellman(peer);
                (SharedSecret::from_agreed(shared.raw_secret_bytes())?, epk)
            }
        };

        Ok((secret, RecoveryMetadata::Ec { epk }))
    }

    fn recover(
        &self,
        decrypter: &mut dyn Decrypter,
        metadata: &RecoveryMetadata,
    ) -> Result<SharedSecret> {
        let RecoveryMetadata::Ec { epk } = metadata else {
            return Err(EnvelopeError::MalformedEnvelope(
                "missing `epk` for EC key".into(),
            ));
        };

        // Reject points that are not on the device curve before touching the device
        EcPublicKey::from_sec1(self.curve(), epk)?;

        let agreed = decrypter.decrypt(epk, DecryptParams::Ecdh)?;
        SharedSecret::from_agreed(&agreed)
    }
}

impl KeyAgreement for RsaPublicKey {
    fn scheme(&self) -> &'static str {
        "RSA+PKCS1v15/AES"
    }

    fn fingerprint(&self) -> String {
        fingerprint_rsa(self)
    }

    fn derive(&self) -> Result<(SharedSecret, RecoveryMetadata)> {
        let secret = SharedSecret::generate();
        let eck = self
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, secret.expose())
            .map_err(|e| EnvelopeError::Crypto(format!("RSA encryption failed: {}", e)))?;

        Ok((secret, RecoveryMetadata::Rsa { eck }))
    }

    fn recover(
        &self,
        decrypter: &mut dyn Decrypter,
        metadata: &RecoveryMetadata,
    ) -> Result<SharedSecret> {
        let RecoveryMetadata::Rsa { eck } = metadata else {
            return Err(EnvelopeError::MalformedEnvelope(
                "missing `eck` for RSA key".into(),
            ));
        };

        let params = DecryptParams::Pkcs1v15 {
            session_key_len: SECRET_LEN,
        };

        // A bad padding or length yields a random key; the failure then
        // surfaces as an authentication error when opening the payload.
        match decrypter.decrypt(eck, params) {
            Ok(unwrapped) if unwrapped.len() == SECRET_LEN => SharedSecret::from_agreed(&unwrapped),
            Ok(_) | Err(EnvelopeError::DecryptionFailed) => Ok(SharedSecret::generate()),
            Err(e) => Err(e),
        }
    }
}

impl KeyAgreement for DevicePublicKey {
    fn scheme(&self) -> &'static str {
        match self {
            DevicePublicKey::Ec(key) => key.scheme(),
            DevicePublicKey::Rsa(key) => key.scheme(),
        }
    }

    fn fingerprint(&self) -> String {
        fingerprint(self)
    }

    fn derive(&self) -> Result<(SharedSecret, RecoveryMetadata)> {
        match self {
            DevicePublicKey::Ec(key) => key.derive(),
            DevicePublicKey::Rsa(key) => key.derive(),
        }
    }

    fn recover(
        &self,
        decrypter: &mut dyn Decrypter,
        metadata: &RecoveryMetadata,
    ) -> Result<SharedSecret> {
        match self {
            DevicePublicKey::Ec(key) => key.recover(decrypter, metadata),
            DevicePublicKey::Rsa(key) => key.recover(decrypter, metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piv::soft::{test_rsa_key, SoftPrivateKey};

    struct FailingDecrypter(fn() -> EnvelopeError);

    impl Decrypter for FailingDecrypter {
        fn decrypt(&mut self, _: &[u8], _: DecryptParams) -> Result<Zeroizing<Vec<u8>>> {
            Err((self.0)())
        }
    }

    #[test]
    fn test_ec_derive_recover_both_curves() {
        for mut private in [SoftPrivateKey::generate_p256(), SoftPrivateKey::generate_p384()] {
            let public = private.public_key();
            let (secret, metadata) = public.derive().unwrap();

            let RecoveryMetadata::Ec { epk } = &metadata else {
                panic!("expected EC metadata");
            };
            assert_eq!(epk[0], 0x04);

            let recovered = public.recover(&mut private, &metadata).unwrap();
            assert_eq!(secret.expose(), recovered.expose());
        }
    }

    #[test]
    fn test_ec_fresh_ephemeral_per_derive() {
        let public = SoftPrivateKey::generate_p256().public_key();
        let (a, meta_a) = public.derive().unwrap();
        let (b, meta_b) = public.derive().unwrap();

        assert_ne!(meta_a, meta_b);
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_ec_rejects_off_curve_point() {
        let mut private = SoftPrivateKey::generate_p256();
        let public = private.public_key();

        let metadata = RecoveryMetadata::Ec {
            epk: vec![0x04; 65],
        };
        let err = public.recover(&mut private, &metadata).unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_metadata_family_mismatch() {
        let mut private = SoftPrivateKey::generate_p256();
        let public = private.public_key();

        let err = public
            .recover(&mut private, &RecoveryMetadata::Rsa { eck: vec![1, 2, 3] })
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_rsa_derive_recover() {
        let mut private = SoftPrivateKey::Rsa(test_rsa_key().clone());
        let public = private.public_key();

        let (secret, metadata) = public.derive().unwrap();
        let recovered = public.recover(&mut private, &metadata).unwrap();
        assert_eq!(secret.expose(), recovered.expose());
    }

    #[test]
    fn test_rsa_bad_padding_yields_unrelated_key() {
        let mut private = SoftPrivateKey::Rsa(test_rsa_key().clone());
        let public = private.public_key();

        let (secret, metadata) = public.derive().unwrap();
        let RecoveryMetadata::Rsa { mut eck } = metadata else {
            panic!("expected RSA metadata");
        };
        eck[10] ^= 0xff;

        let recovered = public
            .recover(&mut private, &RecoveryMetadata::Rsa { eck })
            .unwrap();
        assert_ne!(secret.expose(), recovered.expose());
    }

    #[test]
    fn test_rsa_device_errors_propagate() {
        let public = SoftPrivateKey::Rsa(test_rsa_key().clone()).public_key();
        let (_, metadata) = public.derive().unwrap();

        let mut failing = FailingDecrypter(|| EnvelopeError::AuthenticationFailed);
        let err = public.recover(&mut failing, &metadata).unwrap_err();
        assert!(matches!(err, EnvelopeError::AuthenticationFailed));

        let mut failing = FailingDecrypter(|| EnvelopeError::DecryptionFailed);
        assert!(public.recover(&mut failing, &metadata).is_ok());
    }

    #[test]
    fn test_metadata_json_shape() {
        let ec = RecoveryMetadata::Ec { epk: vec![4, 1, 2] };
        assert_eq!(serde_json::to_string(&ec).unwrap(), r#"{"epk":"BAEC"}"#);

        let rsa: RecoveryMetadata = serde_json::from_str(r#"{"eck":"AQID"}"#).unwrap();
        assert_eq!(rsa, RecoveryMetadata::Rsa { eck: vec![1, 2, 3] });

        assert!(serde_json::from_str::<RecoveryMetadata>("{}").is_err());
    }

    #[test]
    fn test_metadata_rejects_ambiguous_fields() {
        let cases = [
            r#"{"epk":"BAEC","eck":"AQID"}"#,
            r#"{"eck":"AQID","epk":"BAEC"}"#,
            r#"{"epk":"BAEC","extra":1}"#,
            r#"{"eck":"AQID","kid":"x"}"#,
        ];

        for json in cases {
            assert!(serde_json::from_str::<RecoveryMetadata>(json).is_err(), "{}", json);
        }
    }
}
