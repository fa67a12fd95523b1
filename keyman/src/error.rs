//! Error types for the keyman coordinator and its driver seam

use thiserror::Error as ThisError;

/// Errors reported by an [`AuthenticatorDriver`](crate::AuthenticatorDriver)
///
/// The kinds follow the CTAP2 status codes a driver is expected to surface;
/// anything without a dedicated kind is carried as [`DriverError::Ctap`] or
/// [`DriverError::Other`].
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum DriverError {
    /// The transport could not enumerate devices
    #[error("transport unavailable: {0}")]
    Transport(String),

    /// The device handle could not be opened
    #[error("could not open device: {0}")]
    OpenFailed(String),

    /// The device refused the operation in its current state
    #[error("operation not allowed")]
    NotAllowed,

    /// PIN did not match
    #[error("PIN invalid")]
    PinInvalid,

    /// PIN retries exhausted
    #[error("PIN blocked")]
    PinBlocked,

    /// PIN is required but none is set
    #[error("PIN not set")]
    PinNotSet,

    /// PIN rejected by the device policy (length, format)
    #[error("PIN policy violation")]
    PinPolicyViolation,

    /// A parameter (for example a template id) was not accepted
    #[error("invalid parameter")]
    InvalidParameter,

    /// The operation was canceled on the device side
    #[error("operation canceled")]
    KeepaliveCancel,

    /// The user did not interact with the device in time
    #[error("user action timeout")]
    UserActionTimeout,

    /// The device does not implement the command
    #[error("unsupported command")]
    Unsupported,

    /// Any other CTAP status byte
    #[error("CTAP error 0x{0:02x}")]
    Ctap(u8),

    /// Unspecified driver failure
    #[error("{0}")]
    Other(String),
}

/// Errors returned by coordinator operations
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// An operation needs a selected device
    #[error("no device selected")]
    NoSessionSelected,

    /// Index is not an offset into the last discovery result
    #[error("device index {index} out of range ({len} device(s) discovered)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Devices could not be enumerated
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    /// A driver handle could not be established
    #[error("failed to open device: {0}")]
    DriverOpenFailed(String),

    /// `set_pin` on a device that already has a PIN
    #[error("a PIN is already set on this device")]
    PinAlreadySet,

    /// PIN-protected operation on a device without a PIN
    #[error("no PIN is set on this device")]
    PinNotSet,

    /// The device reported a PIN mismatch
    #[error("wrong PIN")]
    WrongPin,

    /// The PIN was rejected by local or device policy
    #[error("PIN rejected: {0}")]
    PinPolicyViolation(String),

    /// The device has no fingerprint sensor or bio-enrollment support
    #[error("device does not support biometric enrollment")]
    BiometricUnsupported,

    /// No template with the given id exists on the device
    #[error("fingerprint template not found")]
    TemplateNotFound,

    /// State-machine misuse
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A reset or enrollment is already in flight
    #[error("another operation is in progress")]
    OperationInProgress,

    /// The device was not unplugged within the disconnect window
    #[error("timed out waiting for the device to be disconnected")]
    DisconnectTimeout,

    /// The device was not plugged back in within the reconnect window
    #[error("timed out waiting for the device to be reconnected")]
    ReconnectTimeout,

    /// The factory reset command itself failed
    #[error("factory reset failed: {0}")]
    ResetCommandFailed(DriverError),

    /// `supply_name` without a pending name request
    #[error("no name request is pending")]
    NoNameRequestPending,

    /// The session this operation belonged to was replaced
    #[error("the device session was replaced")]
    SessionSuperseded,

    /// Opaque passthrough of a driver failure
    #[error("driver error: {0}")]
    Driver(DriverError),
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Transport(msg) => Error::DriverUnavailable(msg),
            DriverError::OpenFailed(msg) => Error::DriverOpenFailed(msg),
            DriverError::PinInvalid => Error::WrongPin,
            DriverError::PinNotSet => Error::PinNotSet,
            DriverError::PinPolicyViolation => {
                Error::PinPolicyViolation("rejected by the authenticator".to_string())
            }
            other => Error::Driver(other),
        }
    }
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;
