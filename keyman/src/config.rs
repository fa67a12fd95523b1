//! Coordinator configuration
//!
//! Timeouts of the reset state machine and the enrollment name request.

use std::time::Duration;

/// Default name given to a fingerprint when the operator supplies none
pub const DEFAULT_TEMPLATE_NAME: &str = "Fingerprint";

/// Configuration for a [`KeyManager`](crate::KeyManager)
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keyman::ManagerConfig;
///
/// let config = ManagerConfig::builder()
///     .disconnect_timeout(Duration::from_secs(15))
///     .name_grace_period(Duration::from_secs(30))
///     .build();
/// assert_eq!(config.reconnect_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// How long the reset machine waits for the device to disappear
    pub disconnect_timeout: Duration,

    /// How long the reset machine waits for the device to come back
    pub reconnect_timeout: Duration,

    /// Cadence at which the shell is expected to call `tick`
    pub tick_interval: Duration,

    /// How long an enrollment waits for a template name before using the default
    pub name_grace_period: Duration,

    /// Name used when the operator supplies an empty one
    pub default_template_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_secs(10),
            reconnect_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            name_grace_period: Duration::from_secs(120),
            default_template_name: DEFAULT_TEMPLATE_NAME.to_string(),
        }
    }
}

impl ManagerConfig {
    /// Create a new builder for constructing configuration
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }
}

/// Builder for [`ManagerConfig`]
#[derive(Debug)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
        }
    }

    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_timeout = timeout;
        self
    }

    pub fn reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.reconnect_timeout = timeout;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn name_grace_period(mut self, period: Duration) -> Self {
        self.config.name_grace_period = period;
        self
    }

    /// Set the fallback template name
    ///
    /// An empty string keeps the current fallback.
    pub fn default_template_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.config.default_template_name = name;
        }
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ManagerConfig {
        self.config
    }
}

impl Default for ManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
