#![warn(unused_extern_crates)]

//! Coordinator for FIDO2 security-key management
//!
//! Discovers authenticators through an [`AuthenticatorDriver`], holds a
//! session on the selected one, and runs the two long-lived operations a
//! key-manager UI needs: the unplug/re-plug factory reset and fingerprint
//! enrollment. [`KeyManager`] ties the pieces together for a UI shell.

pub mod config;
pub mod device;
pub mod driver;
pub mod enrollment;
pub mod error;
pub mod manager;
pub mod pin;
pub mod registry;
pub mod reset;
pub mod session;

#[cfg(test)]
mod testing;

// Re-export main types at root level for convenience
pub use config::{ManagerConfig, ManagerConfigBuilder, DEFAULT_TEMPLATE_NAME};
pub use device::{Aaguid, AuthenticatorInfo, DeviceDescriptor, DeviceInfo, DevicePath};
pub use driver::{
    AuthenticatorDriver, CancelToken, CaptureSample, DriverResult, EnrollmentBegin, Permissions,
    PinToken, SampleFeedback,
};
pub use enrollment::{
    EnrollmentControl, EnrollmentCoordinator, EnrollmentEvent, EnrollmentHandle,
    EnrollmentOutcome, EnrollmentState, EnrollmentTemplate, TemplateId, TemplateManager,
};
pub use error::{DriverError, Error, Result};
pub use manager::KeyManager;
pub use pin::PinController;
pub use registry::DeviceRegistry;
pub use reset::{ResetCoordinator, ResetProgress, ResetState};
pub use session::{Session, SessionId, SessionManager};
