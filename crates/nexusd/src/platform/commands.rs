//! Platform actor commands and errors.
//!
//! This module defines the message types for communicating with the `PlatformActor`:
//! - `PlatformCommand`: Commands sent to the actor, from the application or the driver
//! - `PlatformError`: Errors that application-facing operations return
//! - `DetachReason`: Why a client left the registry (logged)

use nexus_core::{
    ClientName, ClientSettings, ClientView, ConnectionHandle, DomainError, JoinSettings, Opacity,
    PlatformState, Rectangle, ScreenResolution, ZOrder,
};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::driver::{ConnectStatus, DriverError};

// ============================================================================
// Platform Commands
// ============================================================================

/// Commands sent to the platform actor.
///
/// Driver callbacks and application requests share one channel, so the
/// actor sees them in a single order. Each command carries a oneshot
/// channel for its response; driver callbacks block on it.
#[derive(Debug)]
pub enum PlatformCommand {
    // --- driver callbacks ---
    /// A client finished joining the display server.
    ClientConnect {
        handle: ConnectionHandle,
        join: JoinSettings,
        settings: ClientSettings,
        respond_to: oneshot::Sender<ConnectStatus>,
    },

    /// A client connection went away.
    ClientDisconnect {
        handle: ConnectionHandle,
        join: JoinSettings,
        respond_to: oneshot::Sender<()>,
    },

    /// The display server is closing down.
    CloseDown { respond_to: oneshot::Sender<()> },

    /// The hardware reported an unrecoverable error.
    Fault {
        reason: String,
        respond_to: oneshot::Sender<()>,
    },

    // --- application requests ---
    /// One-time join handshake.
    Join {
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    IsJoined { respond_to: oneshot::Sender<bool> },

    /// Start the display server and become operational.
    Start {
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    SetResolution {
        format: ScreenResolution,
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    GetResolution {
        respond_to: oneshot::Sender<Result<ScreenResolution, PlatformError>>,
    },

    GetClient {
        name: ClientName,
        respond_to: oneshot::Sender<Option<ClientView>>,
    },

    /// All clients, sorted by name.
    GetAllClients {
        respond_to: oneshot::Sender<Vec<ClientView>>,
    },

    Kill {
        name: ClientName,
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    SetOpacity {
        name: ClientName,
        opacity: Opacity,
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    SetGeometry {
        name: ClientName,
        geometry: Rectangle,
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    SetZOrder {
        name: ClientName,
        z_order: ZOrder,
        respond_to: oneshot::Sender<Result<(), PlatformError>>,
    },

    /// Tear everything down and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Platform Errors
// ============================================================================

/// Errors returned by platform operations.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The configuration blob did not parse or validate.
    #[error("invalid configuration: {0}")]
    Config(#[from] DomainError),

    /// The hardware resource could not be allocated.
    #[error("failed to allocate display resource: {0}")]
    Allocation(DriverError),

    /// The join handshake failed; it may be retried.
    #[error("join handshake failed: {0}")]
    JoinFailed(String),

    /// The operation is not permitted in the current state.
    #[error("{operation} not permitted while {state}")]
    InvalidState {
        state: PlatformState,
        operation: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("client not found: {0}")]
    ClientNotFound(ClientName),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// A blocking driver call exceeded the configured bound.
    #[error("driver call timed out: {operation}")]
    Timeout { operation: &'static str },

    /// The platform actor is gone.
    #[error("platform channel closed")]
    ChannelClosed,
}

// ============================================================================
// Detach Reasons
// ============================================================================

/// Why a client left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The driver reported the connection closed.
    Disconnected,

    /// Killed through the client capability.
    Killed,

    /// Another client connected under the same name.
    Replaced,

    /// The display server closed down.
    CloseDown,

    /// The hardware reported an unrecoverable error.
    Fault,

    /// The platform shut down.
    Shutdown,
}

impl std::fmt::Display for DetachReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Killed => write!(f, "killed"),
            Self::Replaced => write!(f, "replaced by a newer connection"),
            Self::CloseDown => write!(f, "server closed down"),
            Self::Fault => write!(f, "hardware failure"),
            Self::Shutdown => write!(f, "platform shut down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::InvalidState {
            state: PlatformState::Uninitialized,
            operation: "set_resolution",
        };
        assert_eq!(
            err.to_string(),
            "set_resolution not permitted while uninitialized"
        );

        let err = PlatformError::ClientNotFound(ClientName::new("deviceA"));
        assert_eq!(err.to_string(), "client not found: deviceA");

        let err = PlatformError::Timeout { operation: "join" };
        assert_eq!(err.to_string(), "driver call timed out: join");

        let err = PlatformError::ChannelClosed;
        assert_eq!(err.to_string(), "platform channel closed");
    }

    #[test]
    fn test_platform_error_from_domain_and_driver() {
        let err: PlatformError = DomainError::parse("configuration", "bad").into();
        assert!(matches!(err, PlatformError::Config(_)));

        let err: PlatformError = DriverError::Failed("x".to_string()).into();
        assert!(matches!(err, PlatformError::Driver(_)));
    }

    #[test]
    fn test_detach_reason_display() {
        assert_eq!(DetachReason::Disconnected.to_string(), "disconnected");
        assert_eq!(DetachReason::CloseDown.to_string(), "server closed down");
        assert_eq!(
            DetachReason::Replaced.to_string(),
            "replaced by a newer connection"
        );
    }
}
