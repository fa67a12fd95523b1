#![warn(unused_extern_crates)]

//! Virtual FIDO2 authenticators for keyman
//!
//! [`VirtualDriver`] implements [`keyman::AuthenticatorDriver`] over an
//! in-memory bus of keys. Tests and demos move keys on and off the bus
//! and touch the fingerprint sensor without any hardware.
//!
//! ```
//! use std::sync::Arc;
//! use keyman::KeyManager;
//! use keyman_virtual::{VirtualConfig, VirtualDriver};
//!
//! let driver = Arc::new(VirtualDriver::new());
//! driver.plug("/dev/hidraw0", VirtualConfig::builder().bio(true).build());
//!
//! let mut manager = KeyManager::new(Arc::clone(&driver));
//! manager.discover().unwrap();
//! manager.select_device(0).unwrap();
//! manager.set_pin("1234").unwrap();
//! assert!(manager.has_pin().unwrap());
//! ```

pub mod authenticator;
pub mod config;
pub mod driver;

pub use authenticator::VirtualAuthenticator;
pub use config::{VirtualConfig, VirtualConfigBuilder};
pub use driver::{VirtualDriver, VirtualEnrollment, VirtualHandle};
