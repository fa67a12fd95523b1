//! Client PIN management
//!
//! Strength and length policy belong to the authenticator firmware. The only
//! local rule is that a PIN is not empty; confirm-twice checks are the shell's
//! business.

use crate::driver::AuthenticatorDriver;
use crate::error::{DriverError, Error, Result};
use crate::session::SessionManager;

use tracing::{info, warn};

/// PIN operations on the selected device
pub struct PinController<'a, D: AuthenticatorDriver> {
    sessions: &'a SessionManager<D>,
}

impl<'a, D: AuthenticatorDriver> PinController<'a, D> {
    pub fn new(sessions: &'a SessionManager<D>) -> Self {
        Self { sessions }
    }

    /// Set the first PIN on a device that has none
    pub fn set_pin(&self, new_pin: &str) -> Result<()> {
        let session = self.sessions.require_session()?;
        ensure_not_empty(new_pin)?;
        if self.sessions.has_pin()? {
            return Err(Error::PinAlreadySet);
        }

        self.sessions
            .driver()
            .set_pin(session.handle(), new_pin)
            .map_err(|e| match e {
                // setPIN is refused once a PIN exists
                DriverError::NotAllowed => Error::PinAlreadySet,
                other => {
                    warn!(error = %other, "setPIN failed");
                    Error::from(other)
                }
            })?;
        info!(session = %session.id(), "PIN set");
        Ok(())
    }

    /// Replace the current PIN
    pub fn change_pin(&self, current_pin: &str, new_pin: &str) -> Result<()> {
        let session = self.sessions.require_session()?;
        ensure_not_empty(current_pin)?;
        ensure_not_empty(new_pin)?;
        if !self.sessions.has_pin()? {
            return Err(Error::PinNotSet);
        }

        self.sessions
            .driver()
            .change_pin(session.handle(), current_pin, new_pin)
            .map_err(|e| {
                warn!(error = %e, "changePIN failed");
                Error::from(e)
            })?;
        info!(session = %session.id(), "PIN changed");
        Ok(())
    }

    /// Change the PIN when `current_pin` is given and non-empty, set it otherwise
    pub fn set_or_change_pin(&self, new_pin: &str, current_pin: Option<&str>) -> Result<()> {
        match current_pin.filter(|pin| !pin.is_empty()) {
            Some(current) => self.change_pin(current, new_pin),
            None => self.set_pin(new_pin),
        }
    }
}

fn ensure_not_empty(pin: &str) -> Result<()> {
    if pin.is_empty() {
        return Err(Error::PinPolicyViolation("PIN must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDriver;
    use std::sync::Arc;

    fn selected() -> (Arc<ScriptedDriver>, SessionManager<ScriptedDriver>) {
        let driver = Arc::new(ScriptedDriver::new());
        driver.attach("/dev/hidraw0");
        let mut sessions = SessionManager::new(Arc::clone(&driver));
        sessions.registry_mut().discover().unwrap();
        sessions.select_device(0).unwrap();
        (driver, sessions)
    }

    #[test]
    fn test_no_session() {
        let driver = Arc::new(ScriptedDriver::new());
        let sessions = SessionManager::new(driver);
        let pin = PinController::new(&sessions);
        assert_eq!(pin.set_pin("1234"), Err(Error::NoSessionSelected));
        assert_eq!(pin.change_pin("1234", "5678"), Err(Error::NoSessionSelected));
    }

    #[test]
    fn test_set_then_has_pin() {
        let (_, sessions) = selected();
        assert!(!sessions.has_pin().unwrap());
        PinController::new(&sessions).set_pin("1234").unwrap();
        assert!(sessions.has_pin().unwrap());
    }

    #[test]
    fn test_set_twice_is_rejected() {
        let (_, sessions) = selected();
        let pin = PinController::new(&sessions);
        pin.set_pin("1234").unwrap();
        assert_eq!(pin.set_pin("9999"), Err(Error::PinAlreadySet));
    }

    #[test]
    fn test_empty_pin_is_policy_violation() {
        let (_, sessions) = selected();
        assert!(matches!(
            PinController::new(&sessions).set_pin(""),
            Err(Error::PinPolicyViolation(_))
        ));
    }

    #[test]
    fn test_change_pin() {
        let (driver, sessions) = selected();
        let pin = PinController::new(&sessions);
        assert_eq!(pin.change_pin("1234", "5678"), Err(Error::PinNotSet));

        driver.preset_pin("/dev/hidraw0", "1234");
        assert_eq!(pin.change_pin("0000", "5678"), Err(Error::WrongPin));
        pin.change_pin("1234", "5678").unwrap();
        assert_eq!(driver.pin_of("/dev/hidraw0").as_deref(), Some("5678"));
    }

    #[test]
    fn test_set_or_change_dispatch() {
        let (driver, sessions) = selected();
        let pin = PinController::new(&sessions);
        pin.set_or_change_pin("1234", Some("")).unwrap();
        assert_eq!(driver.pin_of("/dev/hidraw0").as_deref(), Some("1234"));

        pin.set_or_change_pin("4321", Some("1234")).unwrap();
        assert_eq!(driver.pin_of("/dev/hidraw0").as_deref(), Some("4321"));
    }
}
