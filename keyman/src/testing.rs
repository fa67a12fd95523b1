//! Scripted in-crate driver for unit tests

use crate::device::{Aaguid, AuthenticatorInfo, DeviceDescriptor, DevicePath};
use crate::driver::{
    AuthenticatorDriver, CancelToken, CaptureSample, DriverResult, EnrollmentBegin, Permissions,
    PinToken, SampleFeedback,
};
use crate::enrollment::{EnrollmentTemplate, TemplateId};
use crate::error::DriverError;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const TOKEN: [u8; 32] = [0xaa; 32];

#[derive(Default)]
struct Device {
    pin: Option<String>,
    bio: bool,
    templates: Vec<EnrollmentTemplate>,
}

struct State {
    attached: Vec<DevicePath>,
    devices: HashMap<DevicePath, Device>,
    enumeration_fails: bool,
    open_fails: bool,
    reset_error: Option<DriverError>,
    reset_calls: usize,
    remove_calls: usize,
    samples_required: u32,
    touches: u32,
    naming_delay: Duration,
    next_template: u8,
}

pub(crate) struct ScriptedEnrollment {
    path: DevicePath,
    id: TemplateId,
    remaining: u32,
}

/// Devices are plugged and unplugged by the test; captures wait for queued touches
pub(crate) struct ScriptedDriver {
    state: Mutex<State>,
}

impl ScriptedDriver {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                attached: Vec::new(),
                devices: HashMap::new(),
                enumeration_fails: false,
                open_fails: false,
                reset_error: None,
                reset_calls: 0,
                remove_calls: 0,
                samples_required: 1,
                touches: 0,
                naming_delay: Duration::ZERO,
                next_template: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn device<'s>(state: &'s mut State, path: &DevicePath) -> &'s mut Device {
        state.devices.entry(path.clone()).or_default()
    }

    pub(crate) fn attach(&self, path: &str) {
        let path = DevicePath::from(path);
        let mut state = self.lock();
        Self::device(&mut state, &path);
        state.attached.push(path);
    }

    pub(crate) fn detach(&self, path: &str) {
        let path = DevicePath::from(path);
        self.lock().attached.retain(|p| p != &path);
    }

    pub(crate) fn fail_enumeration(&self, fail: bool) {
        self.lock().enumeration_fails = fail;
    }

    pub(crate) fn fail_open(&self, fail: bool) {
        self.lock().open_fails = fail;
    }

    pub(crate) fn fail_reset(&self, err: Option<DriverError>) {
        self.lock().reset_error = err;
    }

    pub(crate) fn factory_reset_calls(&self) -> usize {
        self.lock().reset_calls
    }

    pub(crate) fn remove_calls(&self) -> usize {
        self.lock().remove_calls
    }

    pub(crate) fn preset_pin(&self, path: &str, pin: &str) {
        let mut state = self.lock();
        Self::device(&mut state, &DevicePath::from(path)).pin = Some(pin.to_string());
    }

    pub(crate) fn clear_pin(&self, path: &str) {
        let mut state = self.lock();
        Self::device(&mut state, &DevicePath::from(path)).pin = None;
    }

    pub(crate) fn pin_of(&self, path: &str) -> Option<String> {
        let mut state = self.lock();
        Self::device(&mut state, &DevicePath::from(path)).pin.clone()
    }

    pub(crate) fn set_bio(&self, path: &str, bio: bool) {
        let mut state = self.lock();
        Self::device(&mut state, &DevicePath::from(path)).bio = bio;
    }

    pub(crate) fn set_samples_required(&self, samples: u32) {
        self.lock().samples_required = samples;
    }

    pub(crate) fn queue_touches(&self, touches: u32) {
        self.lock().touches += touches;
    }

    /// Make `name_template` take `delay` before writing the name
    pub(crate) fn delay_naming(&self, delay: Duration) {
        self.lock().naming_delay = delay;
    }

    pub(crate) fn preset_template(&self, path: &str, id: &[u8], name: &str) {
        let mut state = self.lock();
        Self::device(&mut state, &DevicePath::from(path))
            .templates
            .push(EnrollmentTemplate {
                id: TemplateId::new(id.to_vec()),
                name: name.to_string(),
            });
    }

    pub(crate) fn template_names(&self, path: &str) -> Vec<String> {
        let mut state = self.lock();
        Self::device(&mut state, &DevicePath::from(path))
            .templates
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    fn check_token(token: &PinToken) -> DriverResult<()> {
        if token.as_bytes() != TOKEN {
            return Err(DriverError::PinInvalid);
        }
        Ok(())
    }

    fn set_name(&self, path: &DevicePath, id: &TemplateId, name: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let template = Self::device(&mut state, path)
            .templates
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or(DriverError::InvalidParameter)?;
        template.name = name.to_string();
        Ok(())
    }
}

impl AuthenticatorDriver for ScriptedDriver {
    type Handle = DevicePath;
    type Enrollment = ScriptedEnrollment;

    fn list_devices(&self) -> DriverResult<Vec<DeviceDescriptor>> {
        let state = self.lock();
        if state.enumeration_fails {
            return Err(DriverError::Transport("hid enumeration failed".to_string()));
        }
        Ok(state
            .attached
            .iter()
            .map(|path| DeviceDescriptor {
                path: path.clone(),
                vendor_id: Some(0x1050),
                product_id: Some(0x0402),
                product_string: Some("Scripted Key".to_string()),
            })
            .collect())
    }

    fn open(&self, device: &DeviceDescriptor) -> DriverResult<DevicePath> {
        let state = self.lock();
        if state.open_fails || !state.attached.contains(&device.path) {
            return Err(DriverError::OpenFailed(device.path.to_string()));
        }
        Ok(device.path.clone())
    }

    fn get_info(&self, handle: &DevicePath) -> DriverResult<AuthenticatorInfo> {
        let mut state = self.lock();
        let device = Self::device(&mut state, handle);
        let mut options = vec![
            ("rk".to_string(), true),
            ("clientPin".to_string(), device.pin.is_some()),
        ];
        if device.bio {
            options.push(("bioEnroll".to_string(), !device.templates.is_empty()));
        }
        Ok(AuthenticatorInfo {
            versions: ["FIDO_2_0".to_string(), "FIDO_2_1".to_string()]
                .into_iter()
                .collect(),
            aaguid: Aaguid([0x11; 16]),
            extensions: vec!["credProtect".to_string()],
            options: options.into_iter().collect(),
        })
    }

    fn set_pin(&self, handle: &DevicePath, new_pin: &str) -> DriverResult<()> {
        let mut state = self.lock();
        let device = Self::device(&mut state, handle);
        if device.pin.is_some() {
            return Err(DriverError::NotAllowed);
        }
        if new_pin.len() < 4 {
            return Err(DriverError::PinPolicyViolation);
        }
        device.pin = Some(new_pin.to_string());
        Ok(())
    }

    fn change_pin(
        &self,
        handle: &DevicePath,
        current_pin: &str,
        new_pin: &str,
    ) -> DriverResult<()> {
        let mut state = self.lock();
        let device = Self::device(&mut state, handle);
        match device.pin.as_deref() {
            None => return Err(DriverError::PinNotSet),
            Some(pin) if pin != current_pin => return Err(DriverError::PinInvalid),
            Some(_) => {}
        }
        if new_pin.len() < 4 {
            return Err(DriverError::PinPolicyViolation);
        }
        device.pin = Some(new_pin.to_string());
        Ok(())
    }

    fn factory_reset(&self, handle: &DevicePath) -> DriverResult<()> {
        let mut state = self.lock();
        state.reset_calls += 1;
        if let Some(err) = state.reset_error.clone() {
            return Err(err);
        }
        let device = Self::device(&mut state, handle);
        device.pin = None;
        device.templates.clear();
        Ok(())
    }

    fn pin_token(
        &self,
        handle: &DevicePath,
        pin: &str,
        _permissions: Permissions,
    ) -> DriverResult<PinToken> {
        let mut state = self.lock();
        match Self::device(&mut state, handle).pin.as_deref() {
            None => Err(DriverError::PinNotSet),
            Some(expected) if expected != pin => Err(DriverError::PinInvalid),
            Some(_) => Ok(PinToken::new(TOKEN.to_vec())),
        }
    }

    fn begin_enrollment(
        &self,
        handle: &DevicePath,
        token: &PinToken,
    ) -> DriverResult<EnrollmentBegin<ScriptedEnrollment>> {
        Self::check_token(token)?;
        let mut state = self.lock();
        let id = TemplateId::new(vec![state.next_template]);
        state.next_template = state.next_template.wrapping_add(1);
        let remaining = state.samples_required;
        Ok(EnrollmentBegin {
            session: ScriptedEnrollment {
                path: handle.clone(),
                id,
                remaining,
            },
            remaining,
        })
    }

    fn capture_step(
        &self,
        enrollment: &mut ScriptedEnrollment,
        cancel: &CancelToken,
    ) -> DriverResult<CaptureSample> {
        loop {
            if cancel.is_canceled() {
                return Err(DriverError::KeepaliveCancel);
            }
            {
                let mut state = self.lock();
                if state.touches > 0 {
                    state.touches -= 1;
                    break;
                }
            }
            thread::sleep(Duration::from_millis(2));
        }

        enrollment.remaining = enrollment.remaining.saturating_sub(1);
        if enrollment.remaining == 0 {
            let mut state = self.lock();
            Self::device(&mut state, &enrollment.path)
                .templates
                .push(EnrollmentTemplate {
                    id: enrollment.id.clone(),
                    name: String::new(),
                });
        }
        Ok(CaptureSample {
            template_id: Some(enrollment.id.clone()),
            remaining: enrollment.remaining,
            feedback: SampleFeedback::Good,
        })
    }

    fn name_template(
        &self,
        handle: &DevicePath,
        token: &PinToken,
        id: &TemplateId,
        name: &str,
    ) -> DriverResult<()> {
        Self::check_token(token)?;
        let delay = self.lock().naming_delay;
        thread::sleep(delay);
        self.set_name(handle, id, name)
    }

    fn list_templates(
        &self,
        handle: &DevicePath,
        token: &PinToken,
    ) -> DriverResult<Vec<EnrollmentTemplate>> {
        Self::check_token(token)?;
        let mut state = self.lock();
        Ok(Self::device(&mut state, handle).templates.clone())
    }

    fn remove_template(
        &self,
        handle: &DevicePath,
        token: &PinToken,
        id: &TemplateId,
    ) -> DriverResult<()> {
        Self::check_token(token)?;
        let mut state = self.lock();
        state.remove_calls += 1;
        let templates = &mut Self::device(&mut state, handle).templates;
        let before = templates.len();
        templates.retain(|t| &t.id != id);
        if templates.len() == before {
            return Err(DriverError::InvalidParameter);
        }
        Ok(())
    }

    fn rename_template(
        &self,
        handle: &DevicePath,
        token: &PinToken,
        id: &TemplateId,
        name: &str,
    ) -> DriverResult<()> {
        Self::check_token(token)?;
        self.set_name(handle, id, name)
    }
}
