//! A USB bus of virtual keys behind [`AuthenticatorDriver`]
//!
//! Keys are plugged into and unplugged from named paths. Each plug starts a
//! new power cycle: handles opened before it stop working, and
//! authenticatorReset is accepted only within the configured window after
//! it. Sensor touches are injected by the test or demo driving the bus.

use crate::authenticator::VirtualAuthenticator;
use crate::config::VirtualConfig;

use keyman::{
    AuthenticatorDriver, AuthenticatorInfo, CancelToken, CaptureSample, DeviceDescriptor,
    DevicePath, DriverError, DriverResult, EnrollmentBegin, EnrollmentTemplate, Permissions,
    PinToken, SampleFeedback, TemplateId,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long a capture sleeps between cancel checks
const TOUCH_POLL: Duration = Duration::from_millis(20);

/// What the next touch of the sensor produces
#[derive(Debug, Clone)]
enum Touch {
    Sample(SampleFeedback),
    Fail(DriverError),
}

#[derive(Debug)]
struct Slot {
    authenticator: VirtualAuthenticator,
    plugged: bool,
    power_cycle: u64,
    powered_at: Instant,
}

#[derive(Debug, Default)]
struct Bus {
    slots: BTreeMap<DevicePath, Slot>,
    power_cycles: u64,
    touches: VecDeque<Touch>,
    enumeration_fails: bool,
    reset_calls: usize,
}

impl Bus {
    fn connected(&mut self, handle: &VirtualHandle) -> DriverResult<&mut Slot> {
        match self.slots.get_mut(&handle.path) {
            Some(slot) if slot.plugged && slot.power_cycle == handle.power_cycle => Ok(slot),
            _ => Err(DriverError::Transport(format!(
                "{} is no longer connected",
                handle.path
            ))),
        }
    }
}

/// Open connection to a virtual key, valid for one power cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHandle {
    path: DevicePath,
    power_cycle: u64,
}

impl VirtualHandle {
    pub fn path(&self) -> &DevicePath {
        &self.path
    }
}

/// An enrollment in progress on a virtual key
#[derive(Debug)]
pub struct VirtualEnrollment {
    handle: VirtualHandle,
    id: TemplateId,
    remaining: u32,
}

/// In-memory implementation of [`AuthenticatorDriver`]
#[derive(Debug, Default)]
pub struct VirtualDriver {
    bus: Mutex<Bus>,
    touched: Condvar,
}

impl VirtualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn bus(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plug a factory-fresh key built from `config` in at `path`
    ///
    /// Replaces any key previously known at that path.
    pub fn plug(&self, path: impl Into<DevicePath>, config: VirtualConfig) {
        let path = path.into();
        let mut bus = self.bus();
        bus.power_cycles += 1;
        let slot = Slot {
            authenticator: VirtualAuthenticator::new(config),
            plugged: true,
            power_cycle: bus.power_cycles,
            powered_at: Instant::now(),
        };
        info!(path = %path, "virtual key plugged");
        bus.slots.insert(path, slot);
    }

    /// Pull the key at `path`; its state is kept for [`replug`](Self::replug)
    pub fn unplug(&self, path: impl Into<DevicePath>) {
        let path = path.into();
        if let Some(slot) = self.bus().slots.get_mut(&path) {
            slot.plugged = false;
            info!(path = %path, "virtual key unplugged");
        }
        self.touched.notify_all();
    }

    /// Plug a previously unplugged key back in, starting a new power cycle
    pub fn replug(&self, path: impl Into<DevicePath>) {
        let path = path.into();
        let mut bus = self.bus();
        bus.power_cycles += 1;
        let cycle = bus.power_cycles;
        if let Some(slot) = bus.slots.get_mut(&path) {
            slot.plugged = true;
            slot.power_cycle = cycle;
            slot.powered_at = Instant::now();
            info!(path = %path, "virtual key re-plugged");
        }
    }

    /// Make enumeration fail until cleared, as a flaky HID stack would
    pub fn fail_enumeration(&self, fail: bool) {
        self.bus().enumeration_fails = fail;
    }

    /// Touch the sensor with a good sample
    pub fn touch(&self) {
        self.touch_with(SampleFeedback::Good);
    }

    /// Touch the sensor; anything but `Good` is rejected by the key
    pub fn touch_with(&self, feedback: SampleFeedback) {
        self.push_touch(Touch::Sample(feedback));
    }

    /// Make the next capture fail with `err`
    pub fn fail_next_capture(&self, err: DriverError) {
        self.push_touch(Touch::Fail(err));
    }

    fn push_touch(&self, touch: Touch) {
        self.bus().touches.push_back(touch);
        self.touched.notify_all();
    }

    /// Number of authenticatorReset commands received
    pub fn reset_calls(&self) -> usize {
        self.bus().reset_calls
    }

    /// Run `f` against the key at `path`, plugged or not
    pub fn with_authenticator<T>(
        &self,
        path: impl Into<DevicePath>,
        f: impl FnOnce(&mut VirtualAuthenticator) -> T,
    ) -> Option<T> {
        let path = path.into();
        self.bus()
            .slots
            .get_mut(&path)
            .map(|slot| f(&mut slot.authenticator))
    }

    /// Run `f` against the authenticator behind a live handle
    fn on_key<T>(
        &self,
        handle: &VirtualHandle,
        f: impl FnOnce(&mut VirtualAuthenticator) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut bus = self.bus();
        let slot = bus.connected(handle)?;
        f(&mut slot.authenticator)
    }
}

impl AuthenticatorDriver for VirtualDriver {
    type Handle = VirtualHandle;
    type Enrollment = VirtualEnrollment;

    fn list_devices(&self) -> DriverResult<Vec<DeviceDescriptor>> {
        let bus = self.bus();
        if bus.enumeration_fails {
            return Err(DriverError::Transport("HID enumeration failed".to_string()));
        }
        Ok(bus
            .slots
            .iter()
            .filter(|(_, slot)| slot.plugged)
            .map(|(path, slot)| {
                let config = slot.authenticator.config();
                let descriptor = DeviceDescriptor::new(path.clone())
                    .with_ids(config.vendor_id, config.product_id);
                match &config.product {
                    Some(product) => descriptor.with_product(product.clone()),
                    None => descriptor,
                }
            })
            .collect())
    }

    fn open(&self, device: &DeviceDescriptor) -> DriverResult<VirtualHandle> {
        let bus = self.bus();
        match bus.slots.get(&device.path) {
            Some(slot) if slot.plugged => {
                debug!(path = %device.path, "virtual key opened");
                Ok(VirtualHandle {
                    path: device.path.clone(),
                    power_cycle: slot.power_cycle,
                })
            }
            _ => Err(DriverError::OpenFailed(format!(
                "{}: no such device",
                device.path
            ))),
        }
    }

    fn get_info(&self, handle: &VirtualHandle) -> DriverResult<AuthenticatorInfo> {
        self.on_key(handle, |key| Ok(key.info()))
    }

    fn set_pin(&self, handle: &VirtualHandle, new_pin: &str) -> DriverResult<()> {
        self.on_key(handle, |key| key.set_pin(new_pin))
    }

    fn change_pin(
        &self,
        handle: &VirtualHandle,
        current_pin: &str,
        new_pin: &str,
    ) -> DriverResult<()> {
        self.on_key(handle, |key| key.change_pin(current_pin, new_pin))
    }

    fn factory_reset(&self, handle: &VirtualHandle) -> DriverResult<()> {
        let mut bus = self.bus();
        bus.reset_calls += 1;
        let slot = bus.connected(handle)?;
        let window = slot.authenticator.config().reset_window;
        if slot.powered_at.elapsed() > window {
            debug!(path = %handle.path, "reset refused, outside the power-up window");
            return Err(DriverError::NotAllowed);
        }
        slot.authenticator.reset();
        info!(path = %handle.path, "virtual key reset");
        Ok(())
    }

    fn pin_token(
        &self,
        handle: &VirtualHandle,
        pin: &str,
        permissions: Permissions,
    ) -> DriverResult<PinToken> {
        self.on_key(handle, |key| key.pin_token(pin, permissions))
    }

    fn begin_enrollment(
        &self,
        handle: &VirtualHandle,
        token: &PinToken,
    ) -> DriverResult<EnrollmentBegin<VirtualEnrollment>> {
        let (id, remaining) = self.on_key(handle, |key| {
            if !key.config().bio {
                return Err(DriverError::Unsupported);
            }
            key.authorize(token, Permissions::BIO_ENROLLMENT)?;
            Ok((key.allocate_template_id(), key.config().samples_required))
        })?;
        debug!(template = %id, remaining, "enrollment begun");
        Ok(EnrollmentBegin {
            session: VirtualEnrollment {
                handle: handle.clone(),
                id,
                remaining,
            },
            remaining,
        })
    }

    fn capture_step(
        &self,
        enrollment: &mut VirtualEnrollment,
        cancel: &CancelToken,
    ) -> DriverResult<CaptureSample> {
        let mut bus = self.bus();
        let touch = loop {
            if cancel.is_canceled() {
                return Err(DriverError::KeepaliveCancel);
            }
            bus.connected(&enrollment.handle)?;
            if let Some(touch) = bus.touches.pop_front() {
                break touch;
            }
            bus = self
                .touched
                .wait_timeout(bus, TOUCH_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        };

        let feedback = match touch {
            Touch::Fail(err) => return Err(err),
            Touch::Sample(feedback) => feedback,
        };
        if feedback == SampleFeedback::Good {
            enrollment.remaining = enrollment.remaining.saturating_sub(1);
            if enrollment.remaining == 0 {
                bus.connected(&enrollment.handle)?
                    .authenticator
                    .store_template(enrollment.id.clone());
            }
        }
        debug!(remaining = enrollment.remaining, %feedback, "sample captured");

        Ok(CaptureSample {
            template_id: Some(enrollment.id.clone()),
            remaining: enrollment.remaining,
            feedback,
        })
    }

    fn name_template(
        &self,
        handle: &VirtualHandle,
        token: &PinToken,
        id: &TemplateId,
        name: &str,
    ) -> DriverResult<()> {
        self.rename_template(handle, token, id, name)
    }

    fn list_templates(
        &self,
        handle: &VirtualHandle,
        token: &PinToken,
    ) -> DriverResult<Vec<EnrollmentTemplate>> {
        self.on_key(handle, |key| {
            key.authorize(token, Permissions::BIO_ENROLLMENT)?;
            Ok(key.templates().to_vec())
        })
    }

    fn remove_template(
        &self,
        handle: &VirtualHandle,
        token: &PinToken,
        id: &TemplateId,
    ) -> DriverResult<()> {
        self.on_key(handle, |key| {
            key.authorize(token, Permissions::BIO_ENROLLMENT)?;
            key.remove_template(id)
        })
    }

    fn rename_template(
        &self,
        handle: &VirtualHandle,
        token: &PinToken,
        id: &TemplateId,
        name: &str,
    ) -> DriverResult<()> {
        self.on_key(handle, |key| {
            key.authorize(token, Permissions::BIO_ENROLLMENT)?;
            key.rename_template(id, name)
        })
    }
}
