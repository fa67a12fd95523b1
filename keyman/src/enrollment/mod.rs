//! Fingerprint enrollment
//!
//! An enrollment runs on its own worker thread because every capture blocks
//! until the operator touches the sensor. The worker reports progress over a
//! single ordered event channel and, once enough samples are captured, asks
//! for a template name. The caller answers through the returned
//! [`EnrollmentHandle`]; the same handle cancels the task.
//!
//! ```text
//! Idle -> Running -> AwaitingName -> Completed
//!            \            \-------> Canceled | Failed
//!             \-------------------> Canceled | Failed
//! ```

mod templates;
mod worker;

pub use templates::TemplateManager;

use crate::config::ManagerConfig;
use crate::driver::{AuthenticatorDriver, CancelToken, Permissions, SampleFeedback};
use crate::error::{DriverError, Error, Result};
use crate::session::SessionManager;

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

use worker::Worker;

/// Opaque identifier of a fingerprint template stored on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(Vec<u8>);

impl TemplateId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Reference to a template owned by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentTemplate {
    pub id: TemplateId,
    pub name: String,
}

/// State of an enrollment task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Idle,
    Running,
    AwaitingName,
    Completed,
    Canceled,
    Failed,
}

impl EnrollmentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnrollmentState::Completed | EnrollmentState::Canceled | EnrollmentState::Failed
        )
    }

    /// Whether the task is still running or waiting for a name
    pub fn is_active(self) -> bool {
        matches!(self, EnrollmentState::Running | EnrollmentState::AwaitingName)
    }
}

/// Progress reported by the enrollment worker, in order
///
/// `Done`, `Canceled` and `Failed` are always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentEvent {
    /// A sample was captured; `remaining` more touches are needed
    TouchNeeded {
        remaining: u32,
        feedback: SampleFeedback,
    },
    /// All samples captured; answer with [`EnrollmentHandle::supply_name`]
    NameRequested,
    /// The template was stored under its final name
    Done(EnrollmentTemplate),
    Canceled,
    Failed(Error),
}

impl EnrollmentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentEvent::Done(_) | EnrollmentEvent::Canceled | EnrollmentEvent::Failed(_)
        )
    }
}

/// How an enrollment ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    Completed(EnrollmentTemplate),
    Canceled,
    Failed(Error),
}

/// Messages from the controlling side to the worker
#[derive(Debug)]
pub(crate) enum Control {
    Name(String),
    Cancel,
}

#[derive(Debug)]
pub(crate) struct TaskState {
    pub(crate) state: EnrollmentState,
    pub(crate) remaining: u32,
    /// Set by the worker once it takes a name; later names are refused
    pub(crate) name_accepted: bool,
}

/// State shared between a worker and its handle
#[derive(Debug)]
pub(crate) struct TaskShared {
    task: Mutex<TaskState>,
    cancel: CancelToken,
    superseded: AtomicBool,
    control: Sender<Control>,
}

impl TaskShared {
    fn new(control: Sender<Control>) -> Self {
        Self {
            task: Mutex::new(TaskState {
                state: EnrollmentState::Running,
                remaining: 0,
                name_accepted: false,
            }),
            cancel: CancelToken::new(),
            superseded: AtomicBool::new(false),
            control,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskState> {
        // Poisoning only happens if a holder panicked; the state itself stays consistent.
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> EnrollmentState {
        self.lock().state
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }

    fn cancel(&self) -> Result<()> {
        let task = self.lock();
        if !task.state.is_active() {
            return Err(Error::InvalidState("enrollment is not running"));
        }
        self.cancel.cancel();
        // The worker may already be past its last receive; nothing to wake then.
        let _ = self.control.send(Control::Cancel);
        Ok(())
    }

    fn supply_name(&self, name: &str) -> Result<()> {
        let task = self.lock();
        if task.state != EnrollmentState::AwaitingName
            || task.name_accepted
            || self.cancel.is_canceled()
        {
            return Err(Error::NoNameRequestPending);
        }
        self.control
            .send(Control::Name(name.to_string()))
            .map_err(|_| Error::NoNameRequestPending)
    }

    fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
        if self.cancel().is_ok() {
            warn!("enrollment abandoned, session replaced");
        }
    }
}

/// Caller's end of a running enrollment
///
/// Dropping a handle whose task is still active cancels it.
pub struct EnrollmentHandle {
    shared: Arc<TaskShared>,
    events: Receiver<EnrollmentEvent>,
    worker: Option<JoinHandle<EnrollmentOutcome>>,
}

impl EnrollmentHandle {
    pub fn state(&self) -> EnrollmentState {
        self.shared.state()
    }

    /// Samples still needed, as last reported by the device
    pub fn remaining_scans(&self) -> u32 {
        self.shared.lock().remaining
    }

    /// Whether cancellation was requested
    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel_token().is_canceled()
    }

    /// Answer a pending [`EnrollmentEvent::NameRequested`]
    ///
    /// An empty name stores the template under the default name.
    pub fn supply_name(&self, name: &str) -> Result<()> {
        self.shared.supply_name(name)
    }

    /// Cancel the task, unblocking a capture or a pending name request
    ///
    /// Succeeds until the template is committed, including while a name
    /// that was already supplied is being written.
    pub fn cancel(&self) -> Result<()> {
        self.shared.cancel()
    }

    /// Block until the next event; `None` once the worker has finished
    pub fn recv(&self) -> Option<EnrollmentEvent> {
        self.events.recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<EnrollmentEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Next event if one is queued
    pub fn try_recv(&self) -> std::result::Result<EnrollmentEvent, TryRecvError> {
        self.events.try_recv()
    }

    /// Blocking iterator over the remaining events
    pub fn events(&self) -> impl Iterator<Item = EnrollmentEvent> + '_ {
        self.events.iter()
    }

    /// A cloneable control end for other threads
    pub fn control(&self) -> EnrollmentControl {
        EnrollmentControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Join the worker and return how the task ended
    ///
    /// Blocks until the task reaches a terminal state; unconsumed events are
    /// discarded.
    pub fn wait(mut self) -> EnrollmentOutcome {
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome,
            _ => EnrollmentOutcome::Failed(Error::Driver(DriverError::Other(
                "enrollment worker panicked".to_string(),
            ))),
        }
    }
}

impl fmt::Debug for EnrollmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentHandle")
            .field("state", &self.state())
            .field("remaining_scans", &self.remaining_scans())
            .finish_non_exhaustive()
    }
}

impl Drop for EnrollmentHandle {
    fn drop(&mut self) {
        if self.state().is_active() {
            let _ = self.shared.cancel();
        }
    }
}

/// Name and cancel an enrollment without owning its event stream
///
/// Does not cancel anything when dropped.
#[derive(Debug, Clone)]
pub struct EnrollmentControl {
    shared: Arc<TaskShared>,
}

impl EnrollmentControl {
    pub fn state(&self) -> EnrollmentState {
        self.shared.state()
    }

    /// See [`EnrollmentHandle::supply_name`]
    pub fn supply_name(&self, name: &str) -> Result<()> {
        self.shared.supply_name(name)
    }

    /// See [`EnrollmentHandle::cancel`]
    pub fn cancel(&self) -> Result<()> {
        self.shared.cancel()
    }
}

/// Starts enrollments and keeps track of the one in flight
pub struct EnrollmentCoordinator<D: AuthenticatorDriver> {
    name_grace_period: Duration,
    default_name: String,
    active: Option<Arc<TaskShared>>,
    _driver: PhantomData<fn() -> D>,
}

impl<D: AuthenticatorDriver> EnrollmentCoordinator<D> {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            name_grace_period: config.name_grace_period,
            default_name: config.default_template_name.clone(),
            active: None,
            _driver: PhantomData,
        }
    }

    /// State of the most recent task, `Idle` if none was started
    pub fn state(&self) -> EnrollmentState {
        self.active
            .as_ref()
            .map_or(EnrollmentState::Idle, |task| task.state())
    }

    /// Whether a task is running or waiting for a name
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Start enrolling a fingerprint on the selected device
    ///
    /// The PIN token is negotiated before the worker starts, so a wrong PIN is
    /// reported here rather than as an event.
    pub fn start(&mut self, pin: &str, sessions: &SessionManager<D>) -> Result<EnrollmentHandle> {
        if self.is_active() {
            return Err(Error::OperationInProgress);
        }
        let session = sessions.require_session()?;
        let info = sessions.get_info()?;
        if !sessions.driver().capability_supports_bio(&info) {
            return Err(Error::BiometricUnsupported);
        }
        if !info.has_pin() {
            return Err(Error::PinNotSet);
        }
        if pin.is_empty() {
            return Err(Error::PinPolicyViolation("PIN must not be empty".to_string()));
        }

        let driver = Arc::clone(sessions.driver());
        let handle = Arc::clone(session.handle());
        let token = driver.pin_token(&handle, pin, Permissions::BIO_ENROLLMENT)?;

        let (control_tx, control_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let shared = Arc::new(TaskShared::new(control_tx));

        let worker = Worker {
            driver,
            handle,
            token,
            shared: Arc::clone(&shared),
            events: event_tx,
            control: control_rx,
            name_grace_period: self.name_grace_period,
            default_name: self.default_name.clone(),
        };
        let join = thread::Builder::new()
            .name("keyman-enroll".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::Driver(DriverError::Other(e.to_string())))?;

        info!(session = %session.id(), "fingerprint enrollment started");
        self.active = Some(Arc::clone(&shared));

        Ok(EnrollmentHandle {
            shared,
            events: event_rx,
            worker: Some(join),
        })
    }

    /// Abandon the active task because its session was replaced
    pub(crate) fn supersede(&mut self) {
        if let Some(task) = self.active.as_ref() {
            if task.state().is_active() {
                task.supersede();
            }
        }
    }
}
