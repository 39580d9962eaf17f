//! In-memory PIV tokens
//!
//! Software keys behind the same [`TokenBackend`] seam as hardware devices.
//! Used by the test suite and for exercising the envelope flow without a
//! reader attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use secrecy::ExposeSecret;
use zeroize::Zeroizing;

use super::{OpenOptions, Pin, SlotId, SlotInfo, TokenBackend, TokenSession};
use crate::crypto::{DecryptParams, Decrypter, DevicePublicKey};
use crate::error::{EnvelopeError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// SOFTWARE PRIVATE KEYS
// ═══════════════════════════════════════════════════════════════════════════

pub enum SoftPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    Rsa(RsaPrivateKey),
}

impl SoftPrivateKey {
    pub fn generate_p256() -> Self {
        Self::P256(p256::SecretKey::random(&mut OsRng))
    }

    pub fn generate_p384() -> Self {
        Self::P384(p384::SecretKey::random(&mut OsRng))
    }

    pub fn public_key(&self) -> DevicePublicKey {
        match self {
            Self::P256(key) => key.public_key().into(),
            Self::P384(key) => key.public_key().into(),
            Self::Rsa(key) => key.to_public_key().into(),
        }
    }

    fn decrypt_with(&self, input: &[u8], params: DecryptParams) -> Result<Zeroizing<Vec<u8>>> {
        let invalid_peer =
            |_| EnvelopeError::MalformedEnvelope("invalid ephemeral public key".into());

        match (self, params) {
            (Self::P256(key), DecryptParams::Ecdh) => {
                let peer = p256::PublicKey::from_sec1_bytes(input).map_err(invalid_peer)?;
                let shared = p256::ecdh::diffie_hellman(key.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            (Self::P384(key), DecryptParams::Ecdh) => {
                let peer = p384::PublicKey::from_sec1_bytes(input).map_err(invalid_peer)?;
                let shared = p384::ecdh::diffie_hellman(key.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            (Self::Rsa(key), DecryptParams::Pkcs1v15 { session_key_len }) => {
                let unwrapped = Zeroizing::new(
                    key.decrypt(Pkcs1v15Encrypt, input)
                        .map_err(|_| EnvelopeError::DecryptionFailed)?,
                );
                if unwrapped.len() != session_key_len {
                    return Err(EnvelopeError::DecryptionFailed);
                }
                Ok(unwrapped)
            }
            _ => Err(EnvelopeError::UnsupportedKey(
                "decryption parameters do not match the key family".into(),
            )),
        }
    }
}

impl Decrypter for SoftPrivateKey {
    fn decrypt(&mut self, input: &[u8], params: DecryptParams) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt_with(input, params)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════

/// One simulated device
pub struct SoftToken {
    serial: u32,
    version: String,
    reader: Option<String>,
    pin: String,
    slots: HashMap<SlotId, SoftPrivateKey>,
    fail_open: bool,
    fail_serial: bool,
}

impl SoftToken {
    pub const DEFAULT_PIN: &'static str = "123456";

    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            version: "5.4.3".into(),
            reader: None,
            pin: Self::DEFAULT_PIN.into(),
            slots: HashMap::new(),
            fail_open: false,
            fail_serial: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_reader(mut self, reader: impl Into<String>) -> Self {
        self.reader = Some(reader.into());
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = pin.into();
        self
    }

    pub fn with_slot(mut self, slot: SlotId, key: SoftPrivateKey) -> Self {
        self.slots.insert(slot, key);
        self
    }

    /// Opening a session against this token fails
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Reading the serial number fails
    pub fn failing_serial(mut self) -> Self {
        self.fail_serial = true;
        self
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn public_key(&self, slot: SlotId) -> Option<DevicePublicKey> {
        self.slots.get(&slot).map(SoftPrivateKey::public_key)
    }

    fn reader_name(&self) -> String {
        self.reader
            .clone()
            .unwrap_or_else(|| format!("Soft PIV Token #{}", self.serial))
    }
}

/// Session counters shared by a backend and its sessions
#[derive(Debug, Default)]
pub struct SessionStats {
    open: AtomicUsize,
    max_open: AtomicUsize,
    closed: AtomicUsize,
    slot_reads: AtomicUsize,
    decrypts: AtomicUsize,
}

impl SessionStats {
    /// Sessions currently open
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions open at once
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn slot_reads(&self) -> usize {
        self.slot_reads.load(Ordering::SeqCst)
    }

    /// Private-key operations performed
    pub fn decrypts(&self) -> usize {
        self.decrypts.load(Ordering::SeqCst)
    }

    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn released(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend over a fixed set of soft tokens, enumerated in insertion order
pub struct SoftBackend {
    tokens: Vec<(String, Arc<SoftToken>)>,
    stats: Arc<SessionStats>,
}

impl SoftBackend {
    pub fn new(tokens: Vec<SoftToken>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|token| (token.reader_name(), Arc::new(token)))
                .collect(),
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

impl TokenBackend for SoftBackend {
    fn list_readers(&self) -> Result<Vec<String>> {
        Ok(self.tokens.iter().map(|(name, _)| name.clone()).collect())
    }

    fn open(&self, reader: &str, _options: &OpenOptions<'_>) -> Result<Box<dyn TokenSession>> {
        let token = self
            .tokens
            .iter()
            .find(|(name, _)| name == reader)
            .map(|(_, token)| Arc::clone(token))
            .ok_or_else(|| EnvelopeError::Token(format!("reader not found: {}", reader)))?;

        if token.fail_open {
            return Err(EnvelopeError::Token(format!("unable to connect to {}", reader)));
        }

        self.stats.opened();
        Ok(Box::new(SoftSession {
            token,
            stats: Arc::clone(&self.stats),
            authenticated: false,
            closed: false,
        }))
    }
}

struct SoftSession {
    token: Arc<SoftToken>,
    stats: Arc<SessionStats>,
    authenticated: bool,
    closed: bool,
}

impl SoftSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EnvelopeError::Token("session closed".into()));
        }
        Ok(())
    }

    fn key(&self, slot: SlotId) -> Result<&SoftPrivateKey> {
        self.token
            .slots
            .get(&slot)
            .ok_or(EnvelopeError::SlotNotProvisioned(slot))
    }
}

impl TokenSession for SoftSession {
    fn serial(&mut self) -> Result<u32> {
        self.ensure_open()?;
        if self.token.fail_serial {
            return Err(EnvelopeError::Token("unable to read serial number".into()));
        }
        Ok(self.token.serial)
    }

    fn version(&mut self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.token.version.clone())
    }

    fn read_slot(&mut self, slot: SlotId) -> Result<SlotInfo> {
        self.ensure_open()?;
        self.stats.slot_reads.fetch_add(1, Ordering::SeqCst);

        Ok(SlotInfo {
            public_key: self.key(slot)?.public_key(),
            certificate: None,
        })
    }

    fn login(&mut self, pin: &Pin) -> Result<()> {
        self.ensure_open()?;
        if pin.expose_secret() != &self.token.pin {
            return Err(EnvelopeError::AuthenticationFailed);
        }
        self.authenticated = true;
        Ok(())
    }

    fn decrypt(
        &mut self,
        slot: SlotId,
        input: &[u8],
        params: DecryptParams,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.ensure_open()?;
        if !self.authenticated {
            return Err(EnvelopeError::AuthenticationFailed);
        }

        self.stats.decrypts.fetch_add(1, Ordering::SeqCst);
        self.key(slot)?.decrypt_with(input, params)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.released();
        }
    }
}

impl Drop for SoftSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// RSA key shared across tests; generation is slow in debug builds
#[cfg(test)]
pub(crate) fn test_rsa_key() -> &'static RsaPrivateKey {
    use std::sync::OnceLock;

    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA key generation"))
}
