//! vault-piv-helper - PIV Device Access
//!
//! Devices are reached through a [`TokenBackend`] (PC/SC hardware, or an
//! in-memory soft token). A backend enumerates readers and opens sessions;
//! a [`TokenSession`] exposes the few PIV operations this tool needs.

mod criteria;
mod selector;
pub mod soft;

#[cfg(feature = "yubikey")]
pub mod yubikey;

use std::fmt;
use std::ops::{Deref, DerefMut};

use secrecy::SecretBox;
use zeroize::Zeroizing;

use crate::crypto::{DecryptParams, Decrypter, DevicePublicKey, KeyAgreement};
use crate::error::Result;

pub use criteria::SelectionCriteria;
pub use selector::{Access, CandidateError, DeviceSelector, Inventory, SelectedDevice};

/// Device PIN, zeroized on drop
pub type Pin = SecretBox<String>;

/// Wrap a PIN string
pub fn pin(value: impl Into<String>) -> Pin {
    SecretBox::new(Box::new(value.into()))
}

// ═══════════════════════════════════════════════════════════════════════════
// SLOTS
// ═══════════════════════════════════════════════════════════════════════════

/// PIV key slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    Authentication,
    Signature,
    KeyManagement,
    CardAuthentication,
}

impl SlotId {
    /// PIV key reference
    pub fn key_reference(&self) -> u8 {
        match self {
            Self::Authentication => 0x9a,
            Self::Signature => 0x9c,
            Self::KeyManagement => 0x9d,
            Self::CardAuthentication => 0x9e,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication => "AUTHENTICATION",
            Self::Signature => "SIGNATURE",
            Self::KeyManagement => "KEY_MANAGEMENT",
            Self::CardAuthentication => "CARD_AUTHENTICATION",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of a provisioned slot
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub public_key: DevicePublicKey,
    /// DER certificate, when the slot carries one
    pub certificate: Option<Vec<u8>>,
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKEND / SESSION
// ═══════════════════════════════════════════════════════════════════════════

/// Options passed when opening a session
#[derive(Clone, Copy, Default)]
pub struct OpenOptions<'a> {
    pub pin: Option<&'a Pin>,
    pub verbose: bool,
}

/// Source of PIV devices
pub trait TokenBackend {
    /// Names of the attached readers, in enumeration order
    fn list_readers(&self) -> Result<Vec<String>>;

    fn open(&self, reader: &str, options: &OpenOptions<'_>) -> Result<Box<dyn TokenSession>>;
}

/// Open session against one device
pub trait TokenSession {
    fn serial(&mut self) -> Result<u32>;

    /// Firmware version as `major.minor.patch`
    fn version(&mut self) -> Result<String>;

    /// Read the public key (and certificate) held in a slot.
    ///
    /// Fails with `SlotNotProvisioned` when the slot holds no key.
    fn read_slot(&mut self, slot: SlotId) -> Result<SlotInfo>;

    /// Verify the PIN, unlocking private-key operations
    fn login(&mut self, pin: &Pin) -> Result<()>;

    fn decrypt(
        &mut self,
        slot: SlotId,
        input: &[u8],
        params: DecryptParams,
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Release the device. Further calls fail.
    fn close(&mut self);
}

/// Closes its session when dropped, on every exit path
pub struct SessionGuard {
    reader: String,
    session: Box<dyn TokenSession>,
}

impl SessionGuard {
    pub fn new(reader: impl Into<String>, session: Box<dyn TokenSession>) -> Self {
        Self {
            reader: reader.into(),
            session,
        }
    }
}

impl Deref for SessionGuard {
    type Target = dyn TokenSession;

    fn deref(&self) -> &Self::Target {
        &*self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::trace!(reader = %self.reader, "Closing PIV session");
        self.session.close();
    }
}

/// Routes private-key operations to one slot of an open session
pub struct SlotDecrypter<'a> {
    session: &'a mut dyn TokenSession,
    slot: SlotId,
}

impl<'a> SlotDecrypter<'a> {
    pub fn new(session: &'a mut dyn TokenSession, slot: SlotId) -> Self {
        Self { session, slot }
    }
}

impl Decrypter for SlotDecrypter<'_> {
    fn decrypt(&mut self, input: &[u8], params: DecryptParams) -> Result<Zeroizing<Vec<u8>>> {
        self.session.decrypt(self.slot, input, params)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════

/// What was learned about one attached device
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub reader: String,
    pub serial: u32,
    pub version: String,
    pub slot: Option<SlotId>,
    pub public_key: Option<DevicePublicKey>,
    pub certificate: Option<Vec<u8>>,
    /// Whether selection would pick this device
    pub selected: bool,
}

impl DeviceDescriptor {
    pub fn new(reader: impl Into<String>, serial: u32, version: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
            serial,
            version: version.into(),
            slot: None,
            public_key: None,
            certificate: None,
            selected: false,
        }
    }

    pub fn key_id(&self) -> Option<String> {
        self.public_key.as_ref().map(|key| key.fingerprint())
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.selected { "* " } else { "  " };
        write!(
            f,
            "{}{} #{} v{}",
            marker, self.reader, self.serial, self.version
        )?;

        if let Some(slot) = self.slot {
            match self.key_id() {
                Some(kid) => write!(f, " {}={}", slot, kid)?,
                None => write!(f, " {}=<not provisioned>", slot)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piv::soft::{SoftBackend, SoftPrivateKey, SoftToken};
    use secrecy::ExposeSecret;

    #[test]
    fn test_slot_names() {
        assert_eq!(SlotId::KeyManagement.to_string(), "KEY_MANAGEMENT");
        assert_eq!(SlotId::KeyManagement.key_reference(), 0x9d);
        assert_eq!(SlotId::CardAuthentication.key_reference(), 0x9e);
    }

    #[test]
    fn test_pin_wrapping() {
        let p = pin("123456");
        assert_eq!(p.expose_secret(), "123456");
    }

    #[test]
    fn test_guard_closes_session() {
        let backend = SoftBackend::new(vec![SoftToken::new(1)]);
        let readers = backend.list_readers().unwrap();

        {
            let session = backend.open(&readers[0], &OpenOptions::default()).unwrap();
            let mut guard = SessionGuard::new(&readers[0], session);
            assert_eq!(guard.serial().unwrap(), 1);
            assert_eq!(backend.stats().open(), 1);
        }

        assert_eq!(backend.stats().open(), 0);
        assert_eq!(backend.stats().closed(), 1);
    }

    #[test]
    fn test_descriptor_display() {
        let key = SoftPrivateKey::generate_p256().public_key();
        let kid = key.fingerprint();

        let mut descriptor =
            DeviceDescriptor::new("Yubico YubiKey OTP+FIDO+CCID 00", 1234, "5.4.3");
        descriptor.slot = Some(SlotId::KeyManagement);
        descriptor.public_key = Some(key);
        descriptor.selected = true;

        let line = descriptor.to_string();
        assert!(line.starts_with("* Yubico YubiKey OTP+FIDO+CCID 00 #1234 v5.4.3"));
        assert!(line.ends_with(&format!("KEY_MANAGEMENT={}", kid)));

        descriptor.public_key = None;
        descriptor.selected = false;
        assert!(descriptor.to_string().contains("<not provisioned>"));
    }
}
