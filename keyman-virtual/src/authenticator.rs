//! State of one virtual security key
//!
//! Mirrors what a CTAP2 authenticator keeps in flash: the PIN hash and retry
//! counter, the fingerprint templates, and the currently issued
//! pinUvAuthToken.

use crate::config::VirtualConfig;

use keyman::{
    Aaguid, AuthenticatorInfo, DriverError, DriverResult, EnrollmentTemplate, Permissions,
    PinToken, TemplateId,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

/// PINs longer than this are rejected, as CTAP does
const MAX_PIN_BYTES: usize = 63;

/// LEFT(SHA-256(pin), 16)
fn pin_hash(pin: &str) -> [u8; 16] {
    let digest = Sha256::digest(pin.as_bytes());
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&digest[..16]);
    hash
}

#[derive(Debug)]
struct IssuedToken {
    token: Vec<u8>,
    permissions: Permissions,
}

/// In-memory authenticator
#[derive(Debug)]
pub struct VirtualAuthenticator {
    config: VirtualConfig,
    pin_hash: Option<[u8; 16]>,
    retries: u8,
    templates: Vec<EnrollmentTemplate>,
    token: Option<IssuedToken>,
}

impl VirtualAuthenticator {
    pub fn new(config: VirtualConfig) -> Self {
        Self {
            retries: config.pin_retries,
            config,
            pin_hash: None,
            templates: Vec::new(),
            token: None,
        }
    }

    pub fn config(&self) -> &VirtualConfig {
        &self.config
    }

    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }

    /// Remaining PIN attempts
    pub fn pin_retries(&self) -> u8 {
        self.retries
    }

    pub fn templates(&self) -> &[EnrollmentTemplate] {
        &self.templates
    }

    /// authenticatorGetInfo
    pub fn info(&self) -> AuthenticatorInfo {
        let mut info = AuthenticatorInfo {
            versions: self.config.versions.iter().cloned().collect(),
            aaguid: Aaguid(self.config.aaguid),
            extensions: self.config.extensions.clone(),
            ..Default::default()
        };
        info.options.insert("rk".to_string(), true);
        info.options.insert("up".to_string(), true);
        info.options.insert("clientPin".to_string(), self.has_pin());
        if self.config.bio {
            info.options
                .insert("bioEnroll".to_string(), !self.templates.is_empty());
        }
        info
    }

    fn check_policy(&self, pin: &str) -> DriverResult<()> {
        if pin.chars().count() < self.config.min_pin_length || pin.len() > MAX_PIN_BYTES {
            return Err(DriverError::PinPolicyViolation);
        }
        Ok(())
    }

    /// Verify `pin`, consuming a retry on mismatch
    fn verify_pin(&mut self, pin: &str) -> DriverResult<()> {
        let expected = self.pin_hash.ok_or(DriverError::PinNotSet)?;
        if self.retries == 0 {
            return Err(DriverError::PinBlocked);
        }
        if pin_hash(pin) != expected {
            self.retries -= 1;
            debug!(retries = self.retries, "wrong PIN");
            return Err(if self.retries == 0 {
                DriverError::PinBlocked
            } else {
                DriverError::PinInvalid
            });
        }
        self.retries = self.config.pin_retries;
        Ok(())
    }

    /// clientPin setPIN
    pub fn set_pin(&mut self, new_pin: &str) -> DriverResult<()> {
        if self.has_pin() {
            return Err(DriverError::NotAllowed);
        }
        self.check_policy(new_pin)?;
        self.pin_hash = Some(pin_hash(new_pin));
        self.retries = self.config.pin_retries;
        Ok(())
    }

    /// clientPin changePIN
    pub fn change_pin(&mut self, current_pin: &str, new_pin: &str) -> DriverResult<()> {
        self.verify_pin(current_pin)?;
        self.check_policy(new_pin)?;
        self.pin_hash = Some(pin_hash(new_pin));
        // A new PIN invalidates outstanding tokens.
        self.token = None;
        Ok(())
    }

    /// clientPin getPinUvAuthTokenUsingPinWithPermissions
    pub fn pin_token(&mut self, pin: &str, permissions: Permissions) -> DriverResult<PinToken> {
        self.verify_pin(pin)?;
        let mut token = vec![0u8; 32];
        OsRng.fill_bytes(&mut token);
        self.token = Some(IssuedToken {
            token: token.clone(),
            permissions,
        });
        Ok(PinToken::new(token))
    }

    /// Check `token` was issued by us with `permission`
    pub fn authorize(&self, token: &PinToken, permission: Permissions) -> DriverResult<()> {
        match &self.token {
            Some(issued) if issued.token == token.as_bytes() => {
                if issued.permissions.contains(permission) {
                    Ok(())
                } else {
                    Err(DriverError::NotAllowed)
                }
            }
            _ => Err(DriverError::PinInvalid),
        }
    }

    /// authenticatorReset: wipe the PIN, templates and tokens
    pub fn reset(&mut self) {
        self.pin_hash = None;
        self.retries = self.config.pin_retries;
        self.templates.clear();
        self.token = None;
    }

    /// A fresh template id not used by any stored template
    pub fn allocate_template_id(&self) -> TemplateId {
        loop {
            let mut bytes = [0u8; 2];
            OsRng.fill_bytes(&mut bytes);
            let id = TemplateId::new(bytes.to_vec());
            if !self.templates.iter().any(|t| t.id == id) {
                return id;
            }
        }
    }

    /// Store a finished template, still unnamed
    pub fn store_template(&mut self, id: TemplateId) {
        self.templates.push(EnrollmentTemplate {
            id,
            name: String::new(),
        });
    }

    pub fn rename_template(&mut self, id: &TemplateId, name: &str) -> DriverResult<()> {
        let template = self
            .templates
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or(DriverError::InvalidParameter)?;
        template.name = name.to_string();
        Ok(())
    }

    pub fn remove_template(&mut self, id: &TemplateId) -> DriverResult<()> {
        let before = self.templates.len();
        self.templates.retain(|t| &t.id != id);
        if self.templates.len() == before {
            return Err(DriverError::InvalidParameter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_pin(pin: &str) -> VirtualAuthenticator {
        let mut auth = VirtualAuthenticator::new(
            VirtualConfig::builder().bio(true).pin_retries(3).build(),
        );
        auth.set_pin(pin).unwrap();
        auth
    }

    #[test]
    fn test_info_options() {
        let mut auth = VirtualAuthenticator::new(VirtualConfig::builder().bio(true).build());
        let info = auth.info();
        assert_eq!(info.options.get("clientPin"), Some(&false));
        assert_eq!(info.options.get("bioEnroll"), Some(&false));
        assert!(info.versions.contains("FIDO_2_1"));

        auth.set_pin("1234").unwrap();
        assert_eq!(auth.info().options.get("clientPin"), Some(&true));

        let plain = VirtualAuthenticator::new(VirtualConfig::default());
        assert!(!plain.info().options.contains_key("bioEnroll"));
    }

    #[test]
    fn test_set_pin_policy() {
        let mut auth = VirtualAuthenticator::new(VirtualConfig::default());
        assert_eq!(auth.set_pin("12"), Err(DriverError::PinPolicyViolation));
        assert_eq!(auth.set_pin(&"9".repeat(64)), Err(DriverError::PinPolicyViolation));
        auth.set_pin("1234").unwrap();
        assert_eq!(auth.set_pin("5678"), Err(DriverError::NotAllowed));
    }

    #[test]
    fn test_wrong_pin_blocks_after_retries() {
        let mut auth = with_pin("1234");
        assert_eq!(
            auth.pin_token("0000", Permissions::BIO_ENROLLMENT).unwrap_err(),
            DriverError::PinInvalid
        );
        assert_eq!(auth.pin_retries(), 2);
        auth.pin_token("1234", Permissions::BIO_ENROLLMENT).unwrap();
        assert_eq!(auth.pin_retries(), 3);

        assert_eq!(auth.change_pin("0000", "5678"), Err(DriverError::PinInvalid));
        assert_eq!(auth.change_pin("0000", "5678"), Err(DriverError::PinInvalid));
        assert_eq!(auth.change_pin("0000", "5678"), Err(DriverError::PinBlocked));
        assert_eq!(auth.change_pin("1234", "5678"), Err(DriverError::PinBlocked));
    }

    #[test]
    fn test_token_permissions() {
        let mut auth = with_pin("1234");
        let token = auth.pin_token("1234", Permissions::GET_ASSERTION).unwrap();
        assert_eq!(
            auth.authorize(&token, Permissions::BIO_ENROLLMENT),
            Err(DriverError::NotAllowed)
        );

        let token = auth.pin_token("1234", Permissions::BIO_ENROLLMENT).unwrap();
        auth.authorize(&token, Permissions::BIO_ENROLLMENT).unwrap();

        auth.change_pin("1234", "5678").unwrap();
        assert_eq!(
            auth.authorize(&token, Permissions::BIO_ENROLLMENT),
            Err(DriverError::PinInvalid)
        );
    }

    #[test]
    fn test_reset_wipes_state() {
        let mut auth = with_pin("1234");
        let id = auth.allocate_template_id();
        auth.store_template(id.clone());
        auth.rename_template(&id, "Thumb").unwrap();

        auth.reset();
        assert!(!auth.has_pin());
        assert!(auth.templates().is_empty());
        assert_eq!(auth.remove_template(&id), Err(DriverError::InvalidParameter));
    }
}
