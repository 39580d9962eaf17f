//! Device selection across the attached readers

use tracing::{debug, info, warn};

use super::{
    DeviceDescriptor, OpenOptions, SelectionCriteria, SessionGuard, SlotDecrypter, SlotId,
    TokenBackend,
};
use crate::crypto::DevicePublicKey;
use crate::error::{EnvelopeError, Result};

/// Whether the selected device must be unlocked with the PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Authenticated,
}

/// A device picked by [`DeviceSelector::select`], with its session open
pub struct SelectedDevice {
    pub descriptor: DeviceDescriptor,
    session: SessionGuard,
}

impl SelectedDevice {
    pub fn serial(&self) -> u32 {
        self.descriptor.serial
    }

    /// Public key of the requested slot
    pub fn public_key(&self) -> Result<&DevicePublicKey> {
        let slot = self.descriptor.slot.unwrap_or(SlotId::KeyManagement);
        self.descriptor
            .public_key
            .as_ref()
            .ok_or(EnvelopeError::SlotNotProvisioned(slot))
    }

    /// Private-key operations against `slot`
    pub fn decrypter(&mut self, slot: SlotId) -> SlotDecrypter<'_> {
        SlotDecrypter::new(&mut *self.session, slot)
    }
}

/// A reader that could not be inspected
#[derive(Debug)]
pub struct CandidateError {
    pub reader: String,
    pub error: EnvelopeError,
}

/// Every attached device, for listing
#[derive(Debug, Default)]
pub struct Inventory {
    pub devices: Vec<DeviceDescriptor>,
    pub errors: Vec<CandidateError>,
}

impl Inventory {
    pub fn selected(&self) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.selected)
    }
}

pub struct DeviceSelector<'a> {
    backend: &'a dyn TokenBackend,
}

impl<'a> DeviceSelector<'a> {
    pub fn new(backend: &'a dyn TokenBackend) -> Self {
        Self { backend }
    }

    /// Pick the first attached device that meets the criteria.
    ///
    /// When `slot` is given, the device must hold a key in it. Devices that
    /// fail to open or are missing the key are logged and skipped. Sessions
    /// of rejected devices are closed before the next reader is tried.
    pub fn select(
        &self,
        criteria: &SelectionCriteria,
        slot: Option<SlotId>,
        access: Access,
    ) -> Result<SelectedDevice> {
        let readers = self.backend.list_readers()?;
        if readers.is_empty() {
            return Err(EnvelopeError::NoDevicesPresent);
        }

        let pin = match access {
            Access::ReadOnly => None,
            Access::Authenticated => {
                Some(criteria.pin().ok_or(EnvelopeError::AuthenticationFailed)?)
            }
        };
        let options = OpenOptions {
            pin,
            verbose: criteria.is_verbose(),
        };

        for reader in &readers {
            let mut candidate = match self.try_candidate(reader, criteria, slot, &options) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    warn!(reader = %reader, error = %e, "Unable to use PIV device");
                    continue;
                }
            };

            if let Some(pin) = pin {
                candidate.session.login(pin)?;
            }

            info!(
                serial = candidate.serial(),
                version = %candidate.descriptor.version,
                pin = pin.is_some(),
                explicit = criteria.required_serial().is_some(),
                "Using PIV device"
            );
            return Ok(candidate);
        }

        Err(EnvelopeError::DeviceSelectionFailed {
            slot: slot.unwrap_or(SlotId::KeyManagement),
        })
    }

    fn try_candidate(
        &self,
        reader: &str,
        criteria: &SelectionCriteria,
        slot: Option<SlotId>,
        options: &OpenOptions<'_>,
    ) -> Result<Option<SelectedDevice>> {
        let mut session = SessionGuard::new(reader, self.backend.open(reader, options)?);
        let serial = session.serial()?;
        let version = session.version()?;

        if !criteria.accepts(serial) {
            debug!(reader, serial, "Skipping PIV device that does not meet criteria");
            return Ok(None);
        }

        let mut descriptor = DeviceDescriptor::new(reader, serial, version);
        if let Some(slot) = slot {
            let info = session.read_slot(slot)?;
            descriptor.slot = Some(slot);
            descriptor.public_key = Some(info.public_key);
            descriptor.certificate = info.certificate;
        }
        descriptor.selected = true;

        Ok(Some(SelectedDevice {
            descriptor,
            session,
        }))
    }

    /// Describe every attached device.
    ///
    /// The device `select` would pick for the same criteria is marked as
    /// selected. Readers that fail are reported in `errors`.
    pub fn inventory(
        &self,
        criteria: &SelectionCriteria,
        slot: Option<SlotId>,
    ) -> Result<Inventory> {
        let readers = self.backend.list_readers()?;
        let options = OpenOptions {
            pin: None,
            verbose: criteria.is_verbose(),
        };

        let mut inventory = Inventory::default();
        for reader in readers {
            match self.describe(&reader, slot, &options) {
                Ok(mut descriptor) => {
                    let usable = slot.is_none() || descriptor.public_key.is_some();
                    if usable
                        && inventory.selected().is_none()
                        && criteria.accepts(descriptor.serial)
                    {
                        descriptor.selected = true;
                    }
                    inventory.devices.push(descriptor);
                }
                Err(error) => {
                    debug!(reader = %reader, error = %error, "Unable to inspect PIV device");
                    inventory.errors.push(CandidateError { reader, error });
                }
            }
        }

        Ok(inventory)
    }

    fn describe(
        &self,
        reader: &str,
        slot: Option<SlotId>,
        options: &OpenOptions<'_>,
    ) -> Result<DeviceDescriptor> {
        let mut session = SessionGuard::new(reader, self.backend.open(reader, options)?);
        let serial = session.serial()?;
        let version = session.version()?;

        let mut descriptor = DeviceDescriptor::new(reader, serial, version);
        if let Some(slot) = slot {
            descriptor.slot = Some(slot);
            match session.read_slot(slot) {
                Ok(info) => {
                    descriptor.public_key = Some(info.public_key);
                    descriptor.certificate = info.certificate;
                }
                Err(EnvelopeError::SlotNotProvisioned(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(descriptor)
    }
}
