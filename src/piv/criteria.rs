//! Selection criteria for PIV devices
//!
//! A required serial accepts exactly that device, even when it is also
//! excluded. Without one, any device outside the exclusion set qualifies.

use std::collections::HashSet;
use std::fmt;

use secrecy::ExposeSecret;

use super::{pin, Pin};

/// Which attached devices are acceptable for an operation
#[derive(Default)]
pub struct SelectionCriteria {
    required_serial: Option<u32>,
    excluded: HashSet<u32>,
    pin: Option<Pin>,
    verbose: bool,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pin(mut self, value: Pin) -> Self {
        self.pin = Some(value);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Only accept the device with this serial. `0` clears the requirement.
    pub fn require_serial(mut self, serial: u32) -> Self {
        self.required_serial = (serial != 0).then_some(serial);
        self
    }

    /// Never accept the device with this serial
    pub fn exclude(mut self, serial: u32) -> Self {
        self.excluded.insert(serial);
        self
    }

    /// Derived criteria that additionally reject `serial`
    pub fn excluding(&self, serial: u32) -> Self {
        self.clone().exclude(serial)
    }

    /// Derived criteria pinned to `serial`
    pub fn for_serial(&self, serial: u32) -> Self {
        self.clone().require_serial(serial)
    }

    pub fn required_serial(&self) -> Option<u32> {
        self.required_serial
    }

    pub fn is_excluded(&self, serial: u32) -> bool {
        self.excluded.contains(&serial)
    }

    /// An explicit serial takes precedence over the exclusion set
    pub fn accepts(&self, serial: u32) -> bool {
        match self.required_serial {
            Some(required) => required == serial,
            None => !self.is_excluded(serial),
        }
    }

    pub fn pin(&self) -> Option<&Pin> {
        self.pin.as_ref()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

impl Clone for SelectionCriteria {
    fn clone(&self) -> Self {
        Self {
            required_serial: self.required_serial,
            excluded: self.excluded.clone(),
            pin: self.pin.as_ref().map(|p| pin(p.expose_secret().clone())),
            verbose: self.verbose,
        }
    }
}

impl fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionCriteria")
            .field("required_serial", &self.required_serial)
            .field("excluded", &self.excluded)
            .field("pin", &self.pin.as_ref().map(|_| "[REDACTED]"))
            .field("verbose", &self.verbose)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepts_any() {
        let criteria = SelectionCriteria::new();
        assert!(criteria.accepts(1));
        assert!(criteria.accepts(u32::MAX));
    }

    #[test]
    fn test_required_serial() {
        let criteria = SelectionCriteria::new().require_serial(42);
        assert!(criteria.accepts(42));
        assert!(!criteria.accepts(43));

        assert_eq!(criteria.require_serial(0).required_serial(), None);
    }

    #[test]
    fn test_requirement_overrides_exclusion() {
        let criteria = SelectionCriteria::new().exclude(7).require_serial(7);
        assert!(criteria.accepts(7));
        assert!(!criteria.accepts(8));
    }

    #[test]
    fn test_derived_criteria_leave_original_untouched() {
        let base = SelectionCriteria::new().with_pin(pin("123456")).exclude(1);

        let shared = base.excluding(2);
        assert!(!shared.accepts(1));
        assert!(!shared.accepts(2));
        assert!(base.accepts(2));

        let pinned = base.for_serial(3);
        assert_eq!(pinned.required_serial(), Some(3));
        assert_eq!(base.required_serial(), None);
        assert_eq!(pinned.pin().unwrap().expose_secret(), "123456");
    }

    #[test]
    fn test_debug_hides_pin() {
        let criteria = SelectionCriteria::new().with_pin(pin("987654"));
        let debug = format!("{:?}", criteria);

        assert!(!debug.contains("987654"));
        assert!(debug.contains("[REDACTED]"));
    }
}
