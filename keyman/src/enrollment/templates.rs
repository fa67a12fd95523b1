//! Listing, renaming and removing enrolled fingerprints
//!
//! Every call negotiates its own PIN token with the bio-enrollment
//! permission; tokens never outlive the operation.

use super::TemplateId;
use crate::config::DEFAULT_TEMPLATE_NAME;
use crate::driver::{AuthenticatorDriver, Permissions, PinToken};
use crate::error::{DriverError, Error, Result};
use crate::session::{Session, SessionManager};

use std::collections::BTreeMap;
use tracing::info;

/// Template management on the selected device
///
/// Independent of any running enrollment.
pub struct TemplateManager<'a, D: AuthenticatorDriver> {
    sessions: &'a SessionManager<D>,
    default_name: &'a str,
}

impl<'a, D: AuthenticatorDriver> TemplateManager<'a, D> {
    pub fn new(sessions: &'a SessionManager<D>) -> Self {
        Self {
            sessions,
            default_name: DEFAULT_TEMPLATE_NAME,
        }
    }

    /// Name used when a rename supplies an empty one
    pub fn with_default_name(mut self, name: &'a str) -> Self {
        self.default_name = name;
        self
    }

    /// Templates on the device, by id
    pub fn list(&self, pin: &str) -> Result<BTreeMap<TemplateId, String>> {
        let (session, token) = self.authorize(pin)?;
        self.fetch(session, &token)
    }

    /// Remove the template `id`
    ///
    /// Unknown ids fail with [`Error::TemplateNotFound`] without touching the
    /// device.
    pub fn remove(&self, pin: &str, id: &TemplateId) -> Result<()> {
        let (session, token) = self.authorize(pin)?;
        if !self.fetch(session, &token)?.contains_key(id) {
            return Err(Error::TemplateNotFound);
        }

        self.sessions
            .driver()
            .remove_template(session.handle(), &token, id)
            .map_err(not_found)?;
        info!(template = %id, "fingerprint removed");
        Ok(())
    }

    /// Give the template `id` a new display name
    ///
    /// An empty name falls back to the default name, as in enrollment.
    pub fn rename(&self, pin: &str, id: &TemplateId, name: &str) -> Result<()> {
        let name = if name.is_empty() {
            self.default_name
        } else {
            name
        };
        let (session, token) = self.authorize(pin)?;
        if !self.fetch(session, &token)?.contains_key(id) {
            return Err(Error::TemplateNotFound);
        }

        self.sessions
            .driver()
            .rename_template(session.handle(), &token, id, name)
            .map_err(not_found)?;
        info!(template = %id, name, "fingerprint renamed");
        Ok(())
    }

    fn authorize(&self, pin: &str) -> Result<(&'a Session<D>, PinToken)> {
        let session = self.sessions.require_session()?;
        if !self.sessions.supports_biometric()? {
            return Err(Error::BiometricUnsupported);
        }
        if pin.is_empty() {
            return Err(Error::PinPolicyViolation("PIN must not be empty".to_string()));
        }
        let token = self
            .sessions
            .driver()
            .pin_token(session.handle(), pin, Permissions::BIO_ENROLLMENT)?;
        Ok((session, token))
    }

    fn fetch(
        &self,
        session: &Session<D>,
        token: &PinToken,
    ) -> Result<BTreeMap<TemplateId, String>> {
        let templates = self.sessions.driver().list_templates(session.handle(), token)?;
        Ok(templates.into_iter().map(|t| (t.id, t.name)).collect())
    }
}

/// The device reports an unknown template id as an invalid parameter
fn not_found(err: DriverError) -> Error {
    match err {
        DriverError::InvalidParameter => Error::TemplateNotFound,
        other => other.into(),
    }
}
