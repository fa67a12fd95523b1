//! The seam between the coordinator and the CTAP2 stack
//!
//! Everything that touches hardware goes through [`AuthenticatorDriver`]:
//! enumeration, opening handles, authenticatorGetInfo, clientPIN,
//! authenticatorReset and the bio-enrollment subcommands. The coordinator
//! never sees CBOR, HID framing or PIN-protocol crypto.

use crate::device::{AuthenticatorInfo, DeviceDescriptor, DeviceInfo};
use crate::enrollment::{EnrollmentTemplate, TemplateId};
use crate::error::DriverError;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result type for driver calls
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Permissions requested together with a PIN token
///
/// Values follow the CTAP 2.1 pinUvAuthToken permission bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub const MAKE_CREDENTIAL: Permissions = Permissions(0x01);
    pub const GET_ASSERTION: Permissions = Permissions(0x02);
    pub const CREDENTIAL_MANAGEMENT: Permissions = Permissions(0x04);
    pub const BIO_ENROLLMENT: Permissions = Permissions(0x08);

    /// Raw bitmap
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

/// PIN/UV auth token issued by the driver for a single operation
#[derive(Clone, PartialEq, Eq)]
pub struct PinToken(Vec<u8>);

impl PinToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinToken([{} bytes redacted])", self.0.len())
    }
}

/// Cancellation flag shared between an enrollment worker and the driver
///
/// A driver blocked in [`AuthenticatorDriver::capture_step`] must watch the
/// token and return [`DriverError::KeepaliveCancel`] once it trips.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Quality feedback for the last fingerprint sample (lastEnrollSampleStatus)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFeedback {
    #[default]
    Good,
    TooHigh,
    TooLow,
    TooLeft,
    TooRight,
    TooFast,
    TooSlow,
    PoorQuality,
    TooSkewed,
    TooShort,
    MergeFailure,
    AlreadyExists,
    NoUserActivity,
    NoUserPresenceTransition,
}

impl fmt::Display for SampleFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SampleFeedback::Good => "good sample",
            SampleFeedback::TooHigh => "finger too high",
            SampleFeedback::TooLow => "finger too low",
            SampleFeedback::TooLeft => "finger too far left",
            SampleFeedback::TooRight => "finger too far right",
            SampleFeedback::TooFast => "finger moved too fast",
            SampleFeedback::TooSlow => "finger moved too slow",
            SampleFeedback::PoorQuality => "poor quality sample",
            SampleFeedback::TooSkewed => "finger too skewed",
            SampleFeedback::TooShort => "touch too short",
            SampleFeedback::MergeFailure => "sample could not be merged",
            SampleFeedback::AlreadyExists => "fingerprint already enrolled",
            SampleFeedback::NoUserActivity => "no user activity",
            SampleFeedback::NoUserPresenceTransition => "lift and touch again",
        };
        f.write_str(text)
    }
}

/// Result of one sensor capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSample {
    /// Template being built, once the device has assigned one
    pub template_id: Option<TemplateId>,
    /// Samples still required after this one
    pub remaining: u32,
    pub feedback: SampleFeedback,
}

/// A started enrollment together with the device's sample requirement
#[derive(Debug)]
pub struct EnrollmentBegin<E> {
    pub session: E,
    pub remaining: u32,
}

/// Capabilities the coordinator needs from a CTAP2 stack
///
/// Every call may block on hardware I/O. Implementations must be shareable
/// across threads: the enrollment worker calls into the driver while the
/// controlling thread keeps servicing the UI.
pub trait AuthenticatorDriver: Send + Sync + 'static {
    /// An open connection to one authenticator
    type Handle: Send + Sync + 'static;

    /// Driver-side state of an in-progress fingerprint enrollment
    type Enrollment: Send + 'static;

    /// Enumerate attached authenticators
    fn list_devices(&self) -> DriverResult<Vec<DeviceDescriptor>>;

    /// Open a handle to `device`
    fn open(&self, device: &DeviceDescriptor) -> DriverResult<Self::Handle>;

    /// authenticatorGetInfo
    fn get_info(&self, handle: &Self::Handle) -> DriverResult<AuthenticatorInfo>;

    /// clientPIN setPIN
    fn set_pin(&self, handle: &Self::Handle, new_pin: &str) -> DriverResult<()>;

    /// clientPIN changePIN
    fn change_pin(&self, handle: &Self::Handle, current_pin: &str, new_pin: &str)
        -> DriverResult<()>;

    /// authenticatorReset
    fn factory_reset(&self, handle: &Self::Handle) -> DriverResult<()>;

    /// Whether `info` advertises bio enrollment
    fn capability_supports_bio(&self, info: &DeviceInfo) -> bool {
        info.option("bioEnroll").is_some() || info.option("userVerificationMgmtPreview").is_some()
    }

    /// Negotiate a PIN/UV auth token with `permissions`
    fn pin_token(
        &self,
        handle: &Self::Handle,
        pin: &str,
        permissions: Permissions,
    ) -> DriverResult<PinToken>;

    /// bioEnrollment enrollBegin, without capturing a sample
    fn begin_enrollment(
        &self,
        handle: &Self::Handle,
        token: &PinToken,
    ) -> DriverResult<EnrollmentBegin<Self::Enrollment>>;

    /// Capture one sample; blocks until the sensor is touched or `cancel` trips
    fn capture_step(
        &self,
        enrollment: &mut Self::Enrollment,
        cancel: &CancelToken,
    ) -> DriverResult<CaptureSample>;

    /// bioEnrollment setFriendlyName for a freshly enrolled template
    fn name_template(
        &self,
        handle: &Self::Handle,
        token: &PinToken,
        id: &TemplateId,
        name: &str,
    ) -> DriverResult<()>;

    /// bioEnrollment enumerateEnrollments
    fn list_templates(
        &self,
        handle: &Self::Handle,
        token: &PinToken,
    ) -> DriverResult<Vec<EnrollmentTemplate>>;

    /// bioEnrollment removeEnrollment
    fn remove_template(&self, handle: &Self::Handle, token: &PinToken, id: &TemplateId)
        -> DriverResult<()>;

    /// bioEnrollment setFriendlyName for an existing template
    fn rename_template(
        &self,
        handle: &Self::Handle,
        token: &PinToken,
        id: &TemplateId,
        name: &str,
    ) -> DriverResult<()>;
}
