//! Factory reset state machine
//!
//! CTAP2 only accepts authenticatorReset shortly after the key powers up, so
//! the operator has to unplug and re-plug it. Authenticators send no
//! disconnect or reconnect notification; the only signal is absence from and
//! presence in periodic enumeration. The shell calls [`ResetCoordinator::tick`]
//! on a fixed cadence and each tick performs one blocking discovery.
//!
//! ```text
//! Idle -> ArmedAwaitingDisconnect -> ArmedAwaitingReconnect -> Succeeded
//!              |                            |              \-> Failed
//!              \-> TimedOut                 \-> TimedOut
//! ```
//!
//! The destructive driver call happens only on the reconnect transition, so
//! canceling earlier never leaves a partially reset device.

use crate::config::ManagerConfig;
use crate::device::DevicePath;
use crate::driver::AuthenticatorDriver;
use crate::error::{Error, Result};
use crate::session::SessionManager;

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State of the reset machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    Idle,
    ArmedAwaitingDisconnect,
    ArmedAwaitingReconnect,
    Succeeded,
    TimedOut,
    Failed,
}

impl ResetState {
    /// Whether a reset attempt is in flight
    pub fn is_armed(self) -> bool {
        matches!(
            self,
            ResetState::ArmedAwaitingDisconnect | ResetState::ArmedAwaitingReconnect
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResetState::Succeeded | ResetState::TimedOut | ResetState::Failed
        )
    }
}

/// What a single tick observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetProgress {
    /// Nothing armed; the tick did nothing
    Inactive(ResetState),
    /// Still waiting for the device to be unplugged
    AwaitingDisconnect { remaining: Duration },
    /// The device disappeared; now waiting for it to come back
    DisconnectObserved,
    /// Still waiting for the device to be plugged back in
    AwaitingReconnect { remaining: Duration },
    /// The device came back and was reset
    Succeeded,
    /// A patience window elapsed
    TimedOut(Error),
    /// The reset command or re-selection failed
    Failed(Error),
}

#[derive(Debug)]
struct ResetProcess {
    state: ResetState,
    target: DevicePath,
    phase_start: Instant,
}

/// Drives one factory reset attempt at a time
#[derive(Debug)]
pub struct ResetCoordinator {
    disconnect_timeout: Duration,
    reconnect_timeout: Duration,
    process: Option<ResetProcess>,
    last_error: Option<Error>,
}

impl ResetCoordinator {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            disconnect_timeout: config.disconnect_timeout,
            reconnect_timeout: config.reconnect_timeout,
            process: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ResetState {
        self.process
            .as_ref()
            .map_or(ResetState::Idle, |process| process.state)
    }

    /// Device being reset, while a process exists
    pub fn target(&self) -> Option<&DevicePath> {
        self.process.as_ref().map(|process| &process.target)
    }

    /// Cause of the last `TimedOut` or `Failed` state
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Arm a reset of `target`, which must be the selected device
    pub fn arm<D: AuthenticatorDriver>(
        &mut self,
        target: &DevicePath,
        sessions: &SessionManager<D>,
    ) -> Result<()> {
        self.arm_at(target, sessions, Instant::now())
    }

    /// [`arm`](Self::arm) with an explicit start instant
    pub fn arm_at<D: AuthenticatorDriver>(
        &mut self,
        target: &DevicePath,
        sessions: &SessionManager<D>,
        now: Instant,
    ) -> Result<()> {
        if self.state().is_armed() {
            return Err(Error::InvalidState("a reset is already armed"));
        }
        let session = sessions.require_session()?;
        if session.path() != target {
            return Err(Error::InvalidState("reset target is not the selected device"));
        }

        info!(path = %target, "factory reset armed, waiting for disconnect");
        self.last_error = None;
        self.process = Some(ResetProcess {
            state: ResetState::ArmedAwaitingDisconnect,
            target: target.clone(),
            phase_start: now,
        });
        Ok(())
    }

    /// Abort an armed reset; a no-op when idle
    pub fn cancel(&mut self) -> Result<()> {
        let state = self.state();
        if state == ResetState::Idle {
            return Ok(());
        }
        if !state.is_armed() {
            return Err(Error::InvalidState("reset already finished"));
        }
        if let Some(process) = self.process.take() {
            info!(path = %process.target, state = ?process.state, "factory reset canceled");
        }
        Ok(())
    }

    /// Abandon an armed reset because its session was replaced
    pub(crate) fn supersede(&mut self) {
        if self.state().is_armed() {
            warn!("factory reset abandoned, session replaced");
            self.finish(ResetState::Failed, Error::SessionSuperseded);
        }
    }

    /// Advance the machine; call once per tick interval
    pub fn tick<D: AuthenticatorDriver>(
        &mut self,
        now: Instant,
        sessions: &mut SessionManager<D>,
    ) -> ResetProgress {
        let Some(process) = self.process.as_mut() else {
            return ResetProgress::Inactive(ResetState::Idle);
        };
        let elapsed = now.saturating_duration_since(process.phase_start);

        match process.state {
            ResetState::ArmedAwaitingDisconnect => {
                if elapsed > self.disconnect_timeout {
                    return self.time_out(Error::DisconnectTimeout);
                }
                match discover_contains(sessions, &process.target) {
                    Some(false) => {
                        debug!(path = %process.target, "disconnect observed");
                        process.state = ResetState::ArmedAwaitingReconnect;
                        process.phase_start = now;
                        ResetProgress::DisconnectObserved
                    }
                    _ => ResetProgress::AwaitingDisconnect {
                        remaining: self.disconnect_timeout.saturating_sub(elapsed),
                    },
                }
            }
            ResetState::ArmedAwaitingReconnect => {
                if elapsed > self.reconnect_timeout {
                    return self.time_out(Error::ReconnectTimeout);
                }
                match discover_contains(sessions, &process.target) {
                    Some(true) => {
                        let target = process.target.clone();
                        self.reset_reconnected(&target, sessions)
                    }
                    _ => ResetProgress::AwaitingReconnect {
                        remaining: self.reconnect_timeout.saturating_sub(elapsed),
                    },
                }
            }
            state => ResetProgress::Inactive(state),
        }
    }

    fn reset_reconnected<D: AuthenticatorDriver>(
        &mut self,
        target: &DevicePath,
        sessions: &mut SessionManager<D>,
    ) -> ResetProgress {
        info!(path = %target, "device reconnected, sending authenticatorReset");

        let result = sessions.select_path(target).and_then(|_| {
            let session = sessions.require_session()?;
            sessions
                .driver()
                .factory_reset(session.handle())
                .map_err(Error::ResetCommandFailed)
        });

        match result {
            Ok(()) => {
                info!(path = %target, "factory reset succeeded");
                if let Some(process) = self.process.as_mut() {
                    process.state = ResetState::Succeeded;
                }
                ResetProgress::Succeeded
            }
            Err(err) => {
                warn!(path = %target, error = %err, "factory reset failed");
                self.finish(ResetState::Failed, err.clone());
                ResetProgress::Failed(err)
            }
        }
    }

    fn time_out(&mut self, err: Error) -> ResetProgress {
        warn!(error = %err, "factory reset timed out");
        self.finish(ResetState::TimedOut, err.clone());
        ResetProgress::TimedOut(err)
    }

    fn finish(&mut self, state: ResetState, err: Error) {
        if let Some(process) = self.process.as_mut() {
            process.state = state;
        }
        self.last_error = Some(err);
    }
}

/// `None` when enumeration failed; such a tick is treated as inconclusive
fn discover_contains<D: AuthenticatorDriver>(
    sessions: &mut SessionManager<D>,
    target: &DevicePath,
) -> Option<bool> {
    match sessions.registry_mut().discover() {
        Ok(devices) => Some(devices.iter().any(|d| &d.path == target)),
        Err(err) => {
            debug!(error = %err, "enumeration failed during reset tick");
            None
        }
    }
}
