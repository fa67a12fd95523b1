//! Selected-device session

use crate::device::{DeviceDescriptor, DeviceInfo, DevicePath};
use crate::driver::AuthenticatorDriver;
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifier of one session; increases with every selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A selected device with its open driver handle
pub struct Session<D: AuthenticatorDriver> {
    id: SessionId,
    device: DeviceDescriptor,
    handle: Arc<D::Handle>,
}

impl<D: AuthenticatorDriver> Session<D> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn path(&self) -> &DevicePath {
        &self.device.path
    }

    pub(crate) fn handle(&self) -> &Arc<D::Handle> {
        &self.handle
    }
}

impl<D: AuthenticatorDriver> Clone for Session<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            device: self.device.clone(),
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<D: AuthenticatorDriver> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Owns the "selected device" relationship
///
/// Capability facts (`has_pin`, `supports_biometric`) are re-read from the
/// device on every call rather than cached.
pub struct SessionManager<D: AuthenticatorDriver> {
    registry: DeviceRegistry<D>,
    session: Option<Session<D>>,
    next_id: u64,
}

impl<D: AuthenticatorDriver> SessionManager<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            registry: DeviceRegistry::new(driver),
            session: None,
            next_id: 1,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry<D> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry<D> {
        &mut self.registry
    }

    pub fn driver(&self) -> &Arc<D> {
        self.registry.driver()
    }

    /// The live session, if any
    pub fn session(&self) -> Option<&Session<D>> {
        self.session.as_ref()
    }

    pub(crate) fn require_session(&self) -> Result<&Session<D>> {
        self.session.as_ref().ok_or(Error::NoSessionSelected)
    }

    /// Select the device at `index` of the last discovery snapshot
    ///
    /// On success the previous session is dropped and a fresh one takes its
    /// place. If the handle cannot be opened the previous session stays.
    pub fn select_device(&mut self, index: usize) -> Result<DeviceInfo> {
        let device = self.registry.resolve(index)?;
        self.open_session(device)?;
        self.get_info()
    }

    /// Select the device whose identity is `path` in the last snapshot
    pub fn select_path(&mut self, path: &DevicePath) -> Result<DeviceInfo> {
        let device = self
            .registry
            .devices()
            .iter()
            .find(|d| &d.path == path)
            .cloned()
            .ok_or(Error::InvalidState("device is not in the last discovery snapshot"))?;
        self.open_session(device)?;
        self.get_info()
    }

    fn open_session(&mut self, device: DeviceDescriptor) -> Result<()> {
        let handle = self.driver().open(&device).map_err(|e| {
            warn!(path = %device.path, error = %e, "failed to open device");
            Error::DriverOpenFailed(e.to_string())
        })?;

        let id = SessionId(self.next_id);
        self.next_id += 1;
        info!(session = %id, path = %device.path, product = device.label(), "device selected");

        self.session = Some(Session {
            id,
            device,
            handle: Arc::new(handle),
        });
        Ok(())
    }

    /// Drop the live session
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(session = %session.id, "session closed");
        }
    }

    /// authenticatorGetInfo on the selected device
    pub fn get_info(&self) -> Result<DeviceInfo> {
        let session = self.require_session()?;
        let info = self.driver().get_info(session.handle())?;
        Ok(DeviceInfo::from_parts(session.path().clone(), info))
    }

    /// Whether the selected device has a client PIN configured
    pub fn has_pin(&self) -> Result<bool> {
        Ok(self.get_info()?.has_pin())
    }

    /// Whether the selected device supports fingerprint enrollment
    pub fn supports_biometric(&self) -> Result<bool> {
        let info = self.get_info()?;
        Ok(self.driver().capability_supports_bio(&info))
    }
}
