//! Per-instance facade held by the UI shell

use crate::config::ManagerConfig;
use crate::device::{DeviceDescriptor, DeviceInfo, DevicePath};
use crate::driver::AuthenticatorDriver;
use crate::enrollment::{
    EnrollmentCoordinator, EnrollmentHandle, EnrollmentState, TemplateId, TemplateManager,
};
use crate::error::{Error, Result};
use crate::pin::PinController;
use crate::reset::{ResetCoordinator, ResetProgress, ResetState};
use crate::session::{Session, SessionId, SessionManager};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Owns the session, the reset machine and the enrollment slot
///
/// At most one of reset and enrollment runs at a time. Replacing the
/// session abandons whichever of them belonged to the old one.
///
/// ```no_run
/// # fn demo<D: keyman::AuthenticatorDriver>(driver: std::sync::Arc<D>) -> keyman::Result<()> {
/// use keyman::KeyManager;
///
/// let mut manager = KeyManager::new(driver);
/// manager.discover()?;
/// let info = manager.select_device(0)?;
/// println!("{info}");
/// # Ok(())
/// # }
/// ```
pub struct KeyManager<D: AuthenticatorDriver> {
    config: ManagerConfig,
    sessions: SessionManager<D>,
    reset: ResetCoordinator,
    enrollment: EnrollmentCoordinator<D>,
}

impl<D: AuthenticatorDriver> KeyManager<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self::with_config(driver, ManagerConfig::default())
    }

    pub fn with_config(driver: Arc<D>, config: ManagerConfig) -> Self {
        Self {
            sessions: SessionManager::new(driver),
            reset: ResetCoordinator::new(&config),
            enrollment: EnrollmentCoordinator::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager<D> {
        &self.sessions
    }

    // Devices

    pub fn discover(&mut self) -> Result<Vec<DeviceDescriptor>> {
        self.sessions.registry_mut().discover()
    }

    /// Last discovery snapshot
    pub fn devices(&self) -> &[DeviceDescriptor] {
        self.sessions.registry().devices()
    }

    pub fn session(&self) -> Option<&Session<D>> {
        self.sessions.session()
    }

    pub fn select_device(&mut self, index: usize) -> Result<DeviceInfo> {
        let previous = self.session_id();
        let info = self.sessions.select_device(index)?;
        self.supersede_if_replaced(previous);
        Ok(info)
    }

    pub fn select_path(&mut self, path: &DevicePath) -> Result<DeviceInfo> {
        let previous = self.session_id();
        let info = self.sessions.select_path(path)?;
        self.supersede_if_replaced(previous);
        Ok(info)
    }

    /// Drop the live session, abandoning any operation on it
    pub fn close_session(&mut self) {
        let previous = self.session_id();
        self.sessions.close();
        self.supersede_if_replaced(previous);
    }

    pub fn get_info(&self) -> Result<DeviceInfo> {
        self.sessions.get_info()
    }

    pub fn has_pin(&self) -> Result<bool> {
        self.sessions.has_pin()
    }

    pub fn supports_biometric(&self) -> Result<bool> {
        self.sessions.supports_biometric()
    }

    // PIN

    pub fn set_pin(&self, new_pin: &str) -> Result<()> {
        PinController::new(&self.sessions).set_pin(new_pin)
    }

    pub fn change_pin(&self, current_pin: &str, new_pin: &str) -> Result<()> {
        PinController::new(&self.sessions).change_pin(current_pin, new_pin)
    }

    pub fn set_or_change_pin(&self, new_pin: &str, current_pin: Option<&str>) -> Result<()> {
        PinController::new(&self.sessions).set_or_change_pin(new_pin, current_pin)
    }

    // Reset

    /// Arm a factory reset of the selected device at `target`
    pub fn arm_reset(&mut self, target: &DevicePath) -> Result<()> {
        self.arm_reset_at(target, Instant::now())
    }

    pub fn arm_reset_at(&mut self, target: &DevicePath, now: Instant) -> Result<()> {
        if self.enrollment.is_active() {
            return Err(Error::OperationInProgress);
        }
        self.reset.arm_at(target, &self.sessions, now)
    }

    /// Advance an armed reset; the shell calls this every tick interval
    pub fn tick_reset(&mut self, now: Instant) -> ResetProgress {
        self.reset.tick(now, &mut self.sessions)
    }

    pub fn cancel_reset(&mut self) -> Result<()> {
        self.reset.cancel()
    }

    pub fn reset_state(&self) -> ResetState {
        self.reset.state()
    }

    /// Cause of the last failed or timed-out reset
    pub fn reset_error(&self) -> Option<&Error> {
        self.reset.last_error()
    }

    // Fingerprints

    pub fn start_enrollment(&mut self, pin: &str) -> Result<EnrollmentHandle> {
        if self.reset.state().is_armed() {
            return Err(Error::OperationInProgress);
        }
        self.enrollment.start(pin, &self.sessions)
    }

    pub fn enrollment_state(&self) -> EnrollmentState {
        self.enrollment.state()
    }

    pub fn list_templates(&self, pin: &str) -> Result<BTreeMap<TemplateId, String>> {
        TemplateManager::new(&self.sessions).list(pin)
    }

    pub fn remove_template(&self, pin: &str, id: &TemplateId) -> Result<()> {
        TemplateManager::new(&self.sessions).remove(pin, id)
    }

    pub fn rename_template(&self, pin: &str, id: &TemplateId, name: &str) -> Result<()> {
        TemplateManager::new(&self.sessions)
            .with_default_name(&self.config.default_template_name)
            .rename(pin, id, name)
    }

    fn session_id(&self) -> Option<SessionId> {
        self.sessions.session().map(Session::id)
    }

    fn supersede_if_replaced(&mut self, previous: Option<SessionId>) {
        if previous.is_some() && previous != self.session_id() {
            debug!("session replaced, abandoning operations on the previous one");
            self.reset.supersede();
            self.enrollment.supersede();
        }
    }
}
