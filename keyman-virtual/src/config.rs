//! Configuration types for the virtual authenticator
//!
//! This module describes the model a virtual key pretends to be: its AAGUID,
//! advertised versions and extensions, whether it carries a fingerprint
//! sensor, and the PIN policy it enforces.

use std::time::Duration;

/// Virtual authenticator configuration
///
/// # Example
///
/// ```
/// use keyman_virtual::VirtualConfig;
///
/// let config = VirtualConfig::builder()
///     .product("Bio Key")
///     .bio(true)
///     .samples_required(4)
///     .min_pin_length(6)
///     .build();
/// assert!(config.bio);
/// ```
#[derive(Debug, Clone)]
pub struct VirtualConfig {
    /// AAGUID - 16 bytes identifying the authenticator model
    pub aaguid: [u8; 16],

    /// Advertised CTAP versions
    pub versions: Vec<String>,

    /// Advertised extension identifiers
    pub extensions: Vec<String>,

    /// USB vendor and product id reported by enumeration
    pub vendor_id: u16,
    pub product_id: u16,

    /// Product string reported by enumeration
    pub product: Option<String>,

    /// Whether the key has a fingerprint sensor
    pub bio: bool,

    /// Good samples needed to build one template
    pub samples_required: u32,

    /// Minimum PIN length in code points
    pub min_pin_length: usize,

    /// Consecutive wrong PINs before the PIN is blocked
    pub pin_retries: u8,

    /// How long after power-up authenticatorReset is accepted
    pub reset_window: Duration,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            aaguid: [
                0x6f, 0x15, 0x82, 0x74, 0xaa, 0xb6, 0x44, 0x3d, 0x9b, 0xcf, 0x8a, 0x3f, 0x69, 0x29,
                0x7c, 0x88,
            ],
            versions: vec!["FIDO_2_0".to_string(), "FIDO_2_1".to_string()],
            extensions: vec!["credProtect".to_string(), "hmac-secret".to_string()],
            vendor_id: 0x1209,
            product_id: 0x0001,
            product: Some("Virtual FIDO2 Key".to_string()),
            bio: false,
            samples_required: 3,
            min_pin_length: 4,
            pin_retries: 8,
            reset_window: Duration::from_secs(10),
        }
    }
}

impl VirtualConfig {
    /// Create a new builder for constructing configuration
    pub fn builder() -> VirtualConfigBuilder {
        VirtualConfigBuilder::new()
    }
}

/// Builder for constructing virtual authenticator configuration
#[derive(Debug)]
pub struct VirtualConfigBuilder {
    config: VirtualConfig,
}

impl VirtualConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: VirtualConfig::default(),
        }
    }

    pub fn aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.config.aaguid = aaguid;
        self
    }

    pub fn versions(mut self, versions: Vec<String>) -> Self {
        self.config.versions = versions;
        self
    }

    /// Set supported extensions
    ///
    /// # Arguments
    /// * `extensions` - List of extension identifiers (e.g., "credProtect", "hmac-secret")
    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    pub fn ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.config.vendor_id = vendor_id;
        self.config.product_id = product_id;
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.config.product = Some(product.into());
        self
    }

    /// Report no product string, as some keys do
    pub fn anonymous(mut self) -> Self {
        self.config.product = None;
        self
    }

    /// Enable the fingerprint sensor
    pub fn bio(mut self, bio: bool) -> Self {
        self.config.bio = bio;
        self
    }

    /// Set the number of good samples per template (at least 1)
    pub fn samples_required(mut self, samples: u32) -> Self {
        self.config.samples_required = samples.max(1);
        self
    }

    pub fn min_pin_length(mut self, length: usize) -> Self {
        self.config.min_pin_length = length;
        self
    }

    pub fn pin_retries(mut self, retries: u8) -> Self {
        self.config.pin_retries = retries;
        self
    }

    pub fn reset_window(mut self, window: Duration) -> Self {
        self.config.reset_window = window;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> VirtualConfig {
        self.config
    }
}

impl Default for VirtualConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
