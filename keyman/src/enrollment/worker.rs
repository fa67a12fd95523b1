//! The enrollment capture loop

use super::{
    Control, EnrollmentEvent, EnrollmentOutcome, EnrollmentState, EnrollmentTemplate, TaskShared,
    TemplateId,
};
use crate::driver::{AuthenticatorDriver, PinToken};
use crate::error::{DriverError, Error};

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of the name request
enum NameDecision {
    Accepted(String),
    Canceled,
}

pub(super) struct Worker<D: AuthenticatorDriver> {
    pub(super) driver: Arc<D>,
    pub(super) handle: Arc<D::Handle>,
    pub(super) token: PinToken,
    pub(super) shared: Arc<TaskShared>,
    pub(super) events: Sender<EnrollmentEvent>,
    pub(super) control: Receiver<Control>,
    pub(super) name_grace_period: Duration,
    pub(super) default_name: String,
}

impl<D: AuthenticatorDriver> Worker<D> {
    pub(super) fn run(self) -> EnrollmentOutcome {
        let id = match self.capture_all() {
            Ok(Some(id)) => id,
            Ok(None) => return self.canceled(None),
            Err(err) => return self.fail(err),
        };

        match self.await_name() {
            NameDecision::Accepted(name) => self.commit(id, name),
            NameDecision::Canceled => self.canceled(Some(id)),
        }
    }

    /// Capture samples until the device needs no more
    ///
    /// Returns `Ok(None)` when canceled from our side.
    fn capture_all(&self) -> Result<Option<TemplateId>, Error> {
        let cancel = self.shared.cancel_token();
        let begin = self.driver.begin_enrollment(&self.handle, &self.token)?;
        let mut enrollment = begin.session;
        let mut remaining = begin.remaining;
        let mut template_id = None;
        self.shared.lock().remaining = remaining;
        debug!(remaining, "enrollment begun");

        while remaining > 0 {
            if cancel.is_canceled() {
                return Ok(None);
            }
            let sample = match self.driver.capture_step(&mut enrollment, cancel) {
                Ok(sample) => sample,
                Err(_) if cancel.is_canceled() => return Ok(None),
                Err(err) => {
                    warn!(error = %err, "fingerprint capture failed");
                    return Err(err.into());
                }
            };

            if sample.template_id.is_some() {
                template_id = sample.template_id;
            }
            remaining = sample.remaining;
            self.shared.lock().remaining = remaining;
            debug!(remaining, feedback = %sample.feedback, "sample captured");

            if remaining > 0 {
                self.emit(EnrollmentEvent::TouchNeeded {
                    remaining,
                    feedback: sample.feedback,
                });
            }
        }

        if cancel.is_canceled() {
            return Ok(None);
        }
        template_id.map(Some).ok_or_else(|| {
            Error::Driver(DriverError::Other(
                "device did not report a template id".to_string(),
            ))
        })
    }

    /// Suspend until a name arrives, the task is canceled or the grace period ends
    fn await_name(&self) -> NameDecision {
        {
            let mut task = self.shared.lock();
            if self.shared.cancel_token().is_canceled() {
                return NameDecision::Canceled;
            }
            task.state = EnrollmentState::AwaitingName;
        }
        self.emit(EnrollmentEvent::NameRequested);

        let supplied = match self.control.recv_timeout(self.name_grace_period) {
            Ok(Control::Name(name)) => Some(name),
            Ok(Control::Cancel) => return NameDecision::Canceled,
            Err(RecvTimeoutError::Timeout) => {
                debug!("name request timed out, using default name");
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        };

        // Cancellation wins over a name that raced with it.
        let mut task = self.shared.lock();
        if self.shared.cancel_token().is_canceled() {
            return NameDecision::Canceled;
        }
        task.name_accepted = true;
        NameDecision::Accepted(supplied.unwrap_or_default())
    }

    fn commit(&self, id: TemplateId, name: String) -> EnrollmentOutcome {
        let name = if name.is_empty() {
            self.default_name.clone()
        } else {
            name
        };

        if let Err(err) = self
            .driver
            .name_template(&self.handle, &self.token, &id, &name)
        {
            if self.shared.cancel_token().is_canceled() {
                return self.canceled(Some(id));
            }
            warn!(template = %id, error = %err, "failed to name template");
            return self.fail(err.into());
        }

        if !self.complete() {
            debug!(template = %id, "canceled while naming, falling back to default name");
            return self.canceled(Some(id));
        }
        let template = EnrollmentTemplate { id, name };
        info!(template = %template.id, name = %template.name, "fingerprint enrolled");
        self.emit(EnrollmentEvent::Done(template.clone()));
        EnrollmentOutcome::Completed(template)
    }

    fn canceled(&self, id: Option<TemplateId>) -> EnrollmentOutcome {
        if self.shared.is_superseded() {
            return self.fail(Error::SessionSuperseded);
        }

        // A template the device already built keeps the default name.
        if let Some(id) = id {
            if let Err(err) = self
                .driver
                .name_template(&self.handle, &self.token, &id, &self.default_name)
            {
                warn!(template = %id, error = %err, "failed to name template after cancel");
            }
        }

        info!("fingerprint enrollment canceled");
        self.finish(EnrollmentState::Canceled);
        self.emit(EnrollmentEvent::Canceled);
        EnrollmentOutcome::Canceled
    }

    fn fail(&self, err: Error) -> EnrollmentOutcome {
        warn!(error = %err, "fingerprint enrollment failed");
        self.finish(EnrollmentState::Failed);
        self.emit(EnrollmentEvent::Failed(err.clone()));
        EnrollmentOutcome::Failed(err)
    }

    /// Move to `Completed` unless a cancel got in first
    fn complete(&self) -> bool {
        let mut task = self.shared.lock();
        if self.shared.cancel_token().is_canceled() {
            return false;
        }
        task.state = EnrollmentState::Completed;
        true
    }

    fn finish(&self, state: EnrollmentState) {
        self.shared.lock().state = state;
    }

    fn emit(&self, event: EnrollmentEvent) {
        // The handle may be gone; the task still runs to a terminal state.
        let _ = self.events.send(event);
    }
}
