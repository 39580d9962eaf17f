//! PC/SC hardware backend for YubiKey PIV devices

use std::collections::HashMap;

use der::Encode;
use secrecy::ExposeSecret;
use tracing::debug;
use yubikey::piv::{self, AlgorithmId};
use yubikey::reader::Context;
use yubikey::{Certificate, YubiKey};
use zeroize::Zeroizing;

use super::{OpenOptions, Pin, SlotId, SlotInfo, TokenBackend, TokenSession};
use crate::crypto::{DecryptParams, DevicePublicKey, EcCurve};
use crate::error::{EnvelopeError, Result};

fn token_error(e: yubikey::Error) -> EnvelopeError {
    EnvelopeError::Token(e.to_string())
}

fn piv_slot(slot: SlotId) -> piv::SlotId {
    match slot {
        SlotId::Authentication => piv::SlotId::Authentication,
        SlotId::Signature => piv::SlotId::Signature,
        SlotId::KeyManagement => piv::SlotId::KeyManagement,
        SlotId::CardAuthentication => piv::SlotId::CardAuthentication,
    }
}

fn algorithm(key: &DevicePublicKey) -> Result<AlgorithmId> {
    match key {
        DevicePublicKey::Ec(ec) => Ok(match ec.curve() {
            EcCurve::P256 => AlgorithmId::EccP256,
            EcCurve::P384 => AlgorithmId::EccP384,
        }),
        DevicePublicKey::Rsa(_) => match key.bits() {
            1024 => Ok(AlgorithmId::Rsa1024),
            2048 => Ok(AlgorithmId::Rsa2048),
            bits => Err(EnvelopeError::UnsupportedKey(format!("RSA-{} on PIV device", bits))),
        },
    }
}

/// Strip PKCS#1 v1.5 type 2 padding from a raw RSA block.
///
/// Not constant time. Callers treat any failure as a wrong key.
fn unpad_pkcs1v15(block: &[u8], expected_len: usize) -> Option<Zeroizing<Vec<u8>>> {
    let block = match block.first() {
        Some(0x00) => &block[1..],
        _ => block,
    };
    if block.first() != Some(&0x02) {
        return None;
    }

    let separator = block[1..].iter().position(|&b| b == 0)? + 1;
    // At least 8 bytes of non-zero padding
    if separator < 9 {
        return None;
    }

    let message = &block[separator + 1..];
    (message.len() == expected_len).then(|| Zeroizing::new(message.to_vec()))
}

/// Devices reachable through the system PC/SC service
#[derive(Debug, Default)]
pub struct YubiKeyBackend;

impl YubiKeyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TokenBackend for YubiKeyBackend {
    fn list_readers(&self) -> Result<Vec<String>> {
        let mut context = Context::open().map_err(token_error)?;
        let readers = context.iter().map_err(token_error)?;
        Ok(readers.map(|reader| reader.name().into_owned()).collect())
    }

    fn open(&self, reader: &str, options: &OpenOptions<'_>) -> Result<Box<dyn TokenSession>> {
        let mut context = Context::open().map_err(token_error)?;
        for candidate in context.iter().map_err(token_error)? {
            if candidate.name() != reader {
                continue;
            }

            let yubikey = candidate.open().map_err(token_error)?;
            if options.verbose {
                debug!(reader, "Connected to PIV device");
            }
            return Ok(Box::new(YubiKeySession {
                yubikey: Some(yubikey),
                algorithms: HashMap::new(),
            }));
        }

        Err(EnvelopeError::Token(format!("reader not found: {}", reader)))
    }
}

struct YubiKeySession {
    yubikey: Option<YubiKey>,
    algorithms: HashMap<SlotId, AlgorithmId>,
}

impl YubiKeySession {
    fn device(&mut self) -> Result<&mut YubiKey> {
        self.yubikey
            .as_mut()
            .ok_or_else(|| EnvelopeError::Token("session closed".into()))
    }
}

impl TokenSession for YubiKeySession {
    fn serial(&mut self) -> Result<u32> {
        Ok(self.device()?.serial().0)
    }

    fn version(&mut self) -> Result<String> {
        let version = self.device()?.version();
        Ok(format!("{}.{}.{}", version.major, version.minor, version.patch))
    }

    fn read_slot(&mut self, slot: SlotId) -> Result<SlotInfo> {
        let certificate = match Certificate::read(self.device()?, piv_slot(slot)) {
            Ok(certificate) => certificate,
            Err(yubikey::Error::NotFound) => return Err(EnvelopeError::SlotNotProvisioned(slot)),
            Err(e) => return Err(token_error(e)),
        };

        let spki = certificate
            .subject_pki()
            .to_der()
            .map_err(|e| EnvelopeError::Token(format!("invalid public key: {}", e)))?;
        let public_key = DevicePublicKey::from_spki_der(&spki)?;
        self.algorithms.insert(slot, algorithm(&public_key)?);

        Ok(SlotInfo {
            public_key,
            certificate: certificate.cert.to_der().ok(),
        })
    }

    fn login(&mut self, pin: &Pin) -> Result<()> {
        match self.device()?.verify_pin(pin.expose_secret().as_bytes()) {
            Ok(()) => Ok(()),
            Err(yubikey::Error::WrongPin { .. }) | Err(yubikey::Error::PinLocked) => {
                Err(EnvelopeError::AuthenticationFailed)
            }
            Err(e) => Err(token_error(e)),
        }
    }

    fn decrypt(
        &mut self,
        slot: SlotId,
        input: &[u8],
        params: DecryptParams,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let algorithm = match self.algorithms.get(&slot) {
            Some(algorithm) => *algorithm,
            None => {
                self.read_slot(slot)?;
                self.algorithms
                    .get(&slot)
                    .copied()
                    .ok_or(EnvelopeError::SlotNotProvisioned(slot))?
            }
        };

        let output = piv::decrypt_data(self.device()?, input, algorithm, piv_slot(slot))
            .map_err(|e| match e {
                yubikey::Error::WrongPin { .. } | yubikey::Error::AuthenticationError => {
                    EnvelopeError::AuthenticationFailed
                }
                e => token_error(e),
            })?;

        match params {
            DecryptParams::Ecdh => Ok(Zeroizing::new(output.to_vec())),
            DecryptParams::Pkcs1v15 { session_key_len } => {
                unpad_pkcs1v15(&output, session_key_len).ok_or(EnvelopeError::DecryptionFailed)
            }
        }
    }

    fn close(&mut self) {
        self.yubikey.take();
    }
}
