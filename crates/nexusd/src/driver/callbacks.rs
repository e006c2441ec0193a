//! Callback target handed to the driver.
//!
//! The driver calls these methods on its own thread. Each call is turned
//! into a [`PlatformCommand`] on the same ordered channel the application
//! uses, then waits for the platform actor to finish handling it. Nothing
//! here returns an error to the driver: failures become
//! [`ConnectStatus::Rejected`] or a logged no-op.
//!
//! # Blocking
//!
//! Every method blocks the calling thread. Calling one from inside an async
//! context panics (tokio forbids `blocking_send` there), which is why the
//! driver owns the calling thread.

use nexus_core::{ClientSettings, ConnectionHandle, JoinSettings, PlatformState};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::platform::PlatformCommand;

/// Verdict on a client connect, as the driver understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Accepted,
    Rejected,
}

impl ConnectStatus {
    /// Driver-native status code: 0 accepted, -1 rejected.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Accepted => 0,
            Self::Rejected => -1,
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Callback target installed in the driver at construction.
///
/// Holds only a weak reference to the platform's command channel, so a
/// driver that keeps its callbacks alive does not keep the platform alive.
#[derive(Clone)]
pub struct DriverCallbacks {
    sender: mpsc::WeakSender<PlatformCommand>,
    state: watch::Receiver<PlatformState>,
}

impl DriverCallbacks {
    pub(crate) fn new(
        sender: mpsc::WeakSender<PlatformCommand>,
        state: watch::Receiver<PlatformState>,
    ) -> Self {
        Self { sender, state }
    }

    /// Whether a client callback arriving now may reach the actor.
    fn admits_clients(&self, callback: &'static str, join: &JoinSettings) -> bool {
        let state = *self.state.borrow();
        if !state.accepts_clients() {
            warn!(
                callback,
                client = %join.name,
                state = %state,
                "Client callback outside operational state, dropping"
            );
            return false;
        }
        true
    }

    /// A client finished joining; returns whether the platform accepts it.
    pub fn client_connect(
        &self,
        handle: ConnectionHandle,
        join: JoinSettings,
        settings: ClientSettings,
    ) -> ConnectStatus {
        if !self.admits_clients("client_connect", &join) {
            return ConnectStatus::Rejected;
        }
        self.dispatch("client_connect", |respond_to| {
            PlatformCommand::ClientConnect {
                handle,
                join,
                settings,
                respond_to,
            }
        })
        .unwrap_or(ConnectStatus::Rejected)
    }

    /// A client connection went away.
    pub fn client_disconnect(&self, handle: ConnectionHandle, join: &JoinSettings) {
        if !self.admits_clients("client_disconnect", join) {
            return;
        }
        let join = join.clone();
        self.dispatch("client_disconnect", |respond_to| {
            PlatformCommand::ClientDisconnect {
                handle,
                join,
                respond_to,
            }
        });
    }

    /// The display server is shutting down underneath the platform.
    pub fn close_down(&self) {
        self.dispatch("close_down", |respond_to| PlatformCommand::CloseDown {
            respond_to,
        });
    }

    /// The hardware hit an unrecoverable error.
    pub fn failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.dispatch("failure", |respond_to| PlatformCommand::Fault {
            reason,
            respond_to,
        });
    }

    /// Sends a command and blocks until the actor has handled it.
    ///
    /// Returns `None` once the platform is gone.
    fn dispatch<T>(
        &self,
        callback: &'static str,
        make: impl FnOnce(oneshot::Sender<T>) -> PlatformCommand,
    ) -> Option<T> {
        let Some(sender) = self.sender.upgrade() else {
            debug!(callback, "Platform gone, dropping driver callback");
            return None;
        };

        let (tx, rx) = oneshot::channel();
        if sender.blocking_send(make(tx)).is_err() {
            debug!(callback, "Platform channel closed, dropping driver callback");
            return None;
        }
        drop(sender);

        rx.blocking_recv().ok()
    }
}

impl std::fmt::Debug for DriverCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCallbacks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(state: PlatformState) -> watch::Receiver<PlatformState> {
        watch::channel(state).1
    }

    #[test]
    fn test_connect_status_codes() {
        assert_eq!(ConnectStatus::Accepted.code(), 0);
        assert_eq!(ConnectStatus::Rejected.code(), -1);
        assert!(ConnectStatus::Accepted.is_accepted());
        assert!(!ConnectStatus::Rejected.is_accepted());
    }

    #[test]
    fn test_callbacks_after_platform_gone() {
        let (tx, rx) = mpsc::channel::<PlatformCommand>(4);
        let callbacks =
            DriverCallbacks::new(tx.downgrade(), published(PlatformState::Operational));
        drop(tx);
        drop(rx);

        let status = callbacks.client_connect(
            ConnectionHandle::new(1),
            JoinSettings::new("late"),
            ClientSettings::default(),
        );
        assert_eq!(status, ConnectStatus::Rejected);

        // Must not block or panic
        callbacks.client_disconnect(ConnectionHandle::new(1), &JoinSettings::new("late"));
        callbacks.close_down();
        callbacks.failure("gone");
    }

    #[test]
    fn test_connect_waits_for_reply() {
        let (tx, mut rx) = mpsc::channel::<PlatformCommand>(4);
        let callbacks =
            DriverCallbacks::new(tx.downgrade(), published(PlatformState::Operational));

        let responder = std::thread::spawn(move || {
            if let Some(PlatformCommand::ClientConnect {
                join, respond_to, ..
            }) = rx.blocking_recv()
            {
                assert_eq!(join.name.as_str(), "deviceA");
                let _ = respond_to.send(ConnectStatus::Accepted);
                return true;
            }
            false
        });

        let status = callbacks.client_connect(
            ConnectionHandle::new(9),
            JoinSettings::new("deviceA"),
            ClientSettings::default(),
        );
        assert_eq!(status, ConnectStatus::Accepted);
        assert!(responder.join().unwrap());
        drop(tx);
    }

    #[test]
    fn test_client_callbacks_dropped_outside_operational() {
        let (tx, mut rx) = mpsc::channel::<PlatformCommand>(4);
        let callbacks =
            DriverCallbacks::new(tx.downgrade(), published(PlatformState::Initializing));

        let status = callbacks.client_connect(
            ConnectionHandle::new(3),
            JoinSettings::new("early"),
            ClientSettings::default(),
        );
        callbacks.client_disconnect(ConnectionHandle::new(3), &JoinSettings::new("early"));

        assert_eq!(status, ConnectStatus::Rejected);
        assert!(rx.try_recv().is_err(), "nothing reaches the actor");
        drop(tx);
    }
}
