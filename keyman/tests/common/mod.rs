//! Shared fixtures for the integration tests

#![allow(dead_code)]

use keyman::{KeyManager, ManagerConfig};
use keyman_virtual::{VirtualConfig, VirtualDriver};

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const KEY: &str = "/dev/hidraw0";
pub const OTHER_KEY: &str = "/dev/hidraw1";
pub const TEST_PIN: &str = "123456";

/// Generous bound for anything the enrollment worker does
pub const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Route keyman's tracing output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyman=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn bio_key() -> VirtualConfig {
    VirtualConfig::builder()
        .product("Bio Key")
        .bio(true)
        .samples_required(2)
        .build()
}

/// A bus with a bio key at [`KEY`] (PIN set) and a plain key at [`OTHER_KEY`]
pub fn two_keys() -> Arc<VirtualDriver> {
    init_tracing();
    let driver = Arc::new(VirtualDriver::new());
    driver.plug(KEY, bio_key());
    driver.plug(OTHER_KEY, VirtualConfig::default());
    driver
}

/// A manager with [`KEY`] selected and [`TEST_PIN`] set on it
pub fn selected_manager(
    driver: &Arc<VirtualDriver>,
    config: ManagerConfig,
) -> KeyManager<VirtualDriver> {
    let mut manager = KeyManager::with_config(Arc::clone(driver), config);
    manager.discover().expect("Failed to discover devices");
    manager.select_device(0).expect("Failed to select device");
    if !manager.has_pin().expect("Failed to read PIN state") {
        manager.set_pin(TEST_PIN).expect("Failed to set PIN");
    }
    manager
}
