//! Device discovery

use crate::device::{DeviceDescriptor, DevicePath};
use crate::driver::AuthenticatorDriver;
use crate::error::{Error, Result};

use std::sync::Arc;
use tracing::{debug, warn};

/// Holds the last discovery snapshot and resolves indices into it
pub struct DeviceRegistry<D: AuthenticatorDriver> {
    driver: Arc<D>,
    devices: Vec<DeviceDescriptor>,
}

impl<D: AuthenticatorDriver> DeviceRegistry<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            devices: Vec::new(),
        }
    }

    /// Enumerate attached authenticators
    ///
    /// The previous snapshot is replaced wholesale, never merged. On failure
    /// the previous snapshot is kept.
    pub fn discover(&mut self) -> Result<Vec<DeviceDescriptor>> {
        let devices = self.driver.list_devices().map_err(|e| {
            warn!(error = %e, "device enumeration failed");
            Error::DriverUnavailable(e.to_string())
        })?;
        debug!(count = devices.len(), "discovered authenticators");
        self.devices = devices.clone();
        Ok(devices)
    }

    /// Descriptor at `index` of the last snapshot
    pub fn resolve(&self, index: usize) -> Result<DeviceDescriptor> {
        self.devices
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.devices.len(),
            })
    }

    /// Last snapshot
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Whether the last snapshot contains `path`
    pub fn contains(&self, path: &DevicePath) -> bool {
        self.devices.iter().any(|d| &d.path == path)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub(crate) fn driver(&self) -> &Arc<D> {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDriver;

    #[test]
    fn test_discover_replaces_snapshot() {
        let driver = Arc::new(ScriptedDriver::new());
        let mut registry = DeviceRegistry::new(Arc::clone(&driver));

        driver.attach("/dev/hidraw0");
        driver.attach("/dev/hidraw1");
        assert_eq!(registry.discover().unwrap().len(), 2);

        driver.detach("/dev/hidraw0");
        let devices = registry.discover().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(registry.devices(), devices.as_slice());
        assert!(!registry.contains(&DevicePath::from("/dev/hidraw0")));
        assert!(registry.contains(&DevicePath::from("/dev/hidraw1")));
    }

    #[test]
    fn test_resolve_out_of_range() {
        let driver = Arc::new(ScriptedDriver::new());
        let mut registry = DeviceRegistry::new(Arc::clone(&driver));
        assert_eq!(
            registry.resolve(0),
            Err(Error::IndexOutOfRange { index: 0, len: 0 })
        );

        driver.attach("/dev/hidraw0");
        registry.discover().unwrap();
        assert_eq!(
            registry.resolve(0).unwrap().path,
            DevicePath::from("/dev/hidraw0")
        );
        assert_eq!(
            registry.resolve(1),
            Err(Error::IndexOutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn test_enumeration_failure_is_driver_unavailable() {
        let driver = Arc::new(ScriptedDriver::new());
        let mut registry = DeviceRegistry::new(Arc::clone(&driver));
        driver.attach("/dev/hidraw0");
        registry.discover().unwrap();

        driver.fail_enumeration(true);
        assert!(matches!(
            registry.discover(),
            Err(Error::DriverUnavailable(_))
        ));
        assert_eq!(registry.len(), 1);
    }
}
