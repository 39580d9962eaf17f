//! Stable key identifiers written into envelopes as `kid`

use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use super::keys::{DevicePublicKey, EcPublicKey};

/// `EC:<curve>:<hex sha256(curve || X || Y)>`
pub fn fingerprint_ec(key: &EcPublicKey) -> String {
    let curve = key.curve();
    let (x, y) = key.coordinates();

    let mut hasher = Sha256::new();
    hasher.update(curve.name().as_bytes());
    hasher.update(&x);
    hasher.update(&y);

    format!("EC:{}:{}", curve.name(), hex::encode(hasher.finalize()))
}

/// `RSA:<bits>:<hex sha256(n || e)>`, exponent as 4 big-endian bytes
pub fn fingerprint_rsa(key: &RsaPublicKey) -> String {
    let exponent = key.e().to_bytes_be();
    let mut e = vec![0u8; 4usize.saturating_sub(exponent.len())];
    e.extend_from_slice(&exponent);

    let mut hasher = Sha256::new();
    hasher.update(key.n().to_bytes_be());
    hasher.update(&e);

    format!("RSA:{}:{}", key.n().bits(), hex::encode(hasher.finalize()))
}

pub fn fingerprint(key: &DevicePublicKey) -> String {
    match key {
        DevicePublicKey::Ec(ec) => fingerprint_ec(ec),
        DevicePublicKey::Rsa(rsa) => fingerprint_rsa(rsa),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::RngCore;
    use rsa::BigUint;
    use std::collections::HashSet;

    #[test]
    fn test_ec_fingerprint_format() {
        let key = EcPublicKey::P256(p256::SecretKey::random(&mut OsRng).public_key());
        let fp = fingerprint_ec(&key);

        assert!(fp.starts_with("EC:P-256:"));
        assert_eq!(fp.len(), "EC:P-256:".len() + 64);
        assert_eq!(fp, fingerprint_ec(&key.clone()));
    }

    #[test]
    fn test_rsa_fingerprint_format() {
        let mut modulus = [0u8; 256];
        OsRng.fill_bytes(&mut modulus);
        modulus[0] |= 0x80;
        modulus[255] |= 0x01;

        let key =
            RsaPublicKey::new(BigUint::from_bytes_be(&modulus), BigUint::from(65537u32)).unwrap();
        let fp = fingerprint_rsa(&key);

        assert!(fp.starts_with("RSA:2048:"));
        assert_eq!(fp, fingerprint(&DevicePublicKey::Rsa(key)));
    }

    #[test]
    fn test_fingerprints_distinct_across_keys() {
        let mut seen = HashSet::new();

        for _ in 0..100 {
            let key = EcPublicKey::P256(p256::SecretKey::random(&mut OsRng).public_key());
            assert!(seen.insert(fingerprint_ec(&key)));
        }
        for _ in 0..100 {
            let key = EcPublicKey::P384(p384::SecretKey::random(&mut OsRng).public_key());
            assert!(seen.insert(fingerprint_ec(&key)));
        }
        for _ in 0..100 {
            let mut modulus = [0u8; 128];
            OsRng.fill_bytes(&mut modulus);
            modulus[0] |= 0x80;
            modulus[127] |= 0x01;
            let modulus = BigUint::from_bytes_be(&modulus);
            let key = RsaPublicKey::new(modulus, BigUint::from(65537u32)).unwrap();
            assert!(seen.insert(fingerprint_rsa(&key)));
        }

        assert_eq!(seen.len(), 300);
    }
}
