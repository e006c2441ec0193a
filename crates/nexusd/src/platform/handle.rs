//! Client interface for interacting with the PlatformActor.
//!
//! `PlatformHandle` is the application-facing contract of the platform
//! manager. `ClientHandle` is the non-owning capability for one attached
//! client that observers and external owners receive.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `PlatformError::ChannelClosed`

use tokio::sync::{mpsc, oneshot, watch};

use nexus_core::{ClientName, ClientView, Opacity, PlatformState, Rectangle, ScreenResolution, ZOrder};

use super::commands::{PlatformCommand, PlatformError};

/// Sends a command and waits for its response.
async fn request<T>(
    sender: &mpsc::Sender<PlatformCommand>,
    make: impl FnOnce(oneshot::Sender<T>) -> PlatformCommand,
) -> Result<T, PlatformError> {
    let (tx, rx) = oneshot::channel();

    sender
        .send(make(tx))
        .await
        .map_err(|_| PlatformError::ChannelClosed)?;

    rx.await.map_err(|_| PlatformError::ChannelClosed)
}

// ============================================================================
// Platform Handle
// ============================================================================

/// Handle for interacting with the platform actor.
///
/// Cheap to clone. The platform lives as long as at least one handle does;
/// dropping the last one tears the platform down.
#[derive(Clone)]
pub struct PlatformHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<PlatformCommand>,

    /// Latest lifecycle state, published by the actor
    state: watch::Receiver<PlatformState>,
}

impl PlatformHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<PlatformCommand>,
        state: watch::Receiver<PlatformState>,
    ) -> Self {
        Self { sender, state }
    }

    /// Current lifecycle state. Never blocks.
    pub fn state(&self) -> PlatformState {
        *self.state.borrow()
    }

    /// A receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<PlatformState> {
        self.state.clone()
    }

    /// Joins this process to the display server.
    ///
    /// Idempotent: once joined, returns `Ok(())` without touching the driver.
    ///
    /// # Errors
    ///
    /// - `PlatformError::JoinFailed` if the handshake was refused
    /// - `PlatformError::Timeout` if the driver did not answer in time
    /// - `PlatformError::ChannelClosed` if the actor has shut down
    pub async fn join(&self) -> Result<(), PlatformError> {
        request(&self.sender, |respond_to| PlatformCommand::Join { respond_to }).await?
    }

    /// Whether the join handshake has completed.
    pub async fn is_joined(&self) -> bool {
        request(&self.sender, |respond_to| PlatformCommand::IsJoined {
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    /// Starts the display server: `Uninitialized → Initializing → Operational`.
    ///
    /// # Errors
    ///
    /// - `PlatformError::InvalidState` unless the platform is `Uninitialized`
    /// - `PlatformError::Driver` / `Timeout` if start-up failed (state becomes `Failure`)
    /// - `PlatformError::ChannelClosed` if the actor has shut down
    pub async fn start(&self) -> Result<(), PlatformError> {
        request(&self.sender, |respond_to| PlatformCommand::Start { respond_to }).await?
    }

    /// Changes the output resolution.
    ///
    /// # Errors
    ///
    /// - `PlatformError::InvalidState` unless the platform is `Operational`
    /// - `PlatformError::InvalidArgument` for `ScreenResolution::Unknown`
    /// - `PlatformError::Driver` / `Timeout` if the hardware refused or stalled
    /// - `PlatformError::ChannelClosed` if the actor has shut down
    pub async fn set_resolution(&self, format: ScreenResolution) -> Result<(), PlatformError> {
        request(&self.sender, |respond_to| PlatformCommand::SetResolution {
            format,
            respond_to,
        })
        .await?
    }

    /// Current output resolution, as reported by the hardware.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Driver` / `Timeout` if the hardware refused or stalled
    /// - `PlatformError::ChannelClosed` if the actor has shut down
    pub async fn resolution(&self) -> Result<ScreenResolution, PlatformError> {
        request(&self.sender, |respond_to| PlatformCommand::GetResolution {
            respond_to,
        })
        .await?
    }

    /// Snapshot of one client, or `None` if it is not attached or the
    /// actor is gone.
    pub async fn client(&self, name: impl Into<ClientName>) -> Option<ClientView> {
        let name = name.into();
        request(&self.sender, |respond_to| PlatformCommand::GetClient {
            name,
            respond_to,
        })
        .await
        .ok()?
    }

    /// Snapshots of all attached clients, sorted by name.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn clients(&self) -> Vec<ClientView> {
        request(&self.sender, |respond_to| PlatformCommand::GetAllClients {
            respond_to,
        })
        .await
        .unwrap_or_default()
    }

    /// Capability for an attached client, or `None` if it is not attached.
    pub async fn client_handle(&self, name: impl Into<ClientName>) -> Option<ClientHandle> {
        let view = self.client(name).await?;
        Some(ClientHandle::new(view.name, self.sender.downgrade()))
    }

    /// Forcibly closes a client's connection and removes its session.
    ///
    /// # Errors
    ///
    /// - `PlatformError::ClientNotFound` if no such client is attached
    /// - `PlatformError::Driver` / `Timeout` if the hardware refused or stalled
    /// - `PlatformError::ChannelClosed` if the actor has shut down
    pub async fn kill(&self, name: impl Into<ClientName>) -> Result<(), PlatformError> {
        let name = name.into();
        request(&self.sender, |respond_to| PlatformCommand::Kill {
            name,
            respond_to,
        })
        .await?
    }

    /// Sets a client's opacity.
    ///
    /// # Errors
    ///
    /// Same as [`PlatformHandle::kill`].
    pub async fn set_opacity(
        &self,
        name: impl Into<ClientName>,
        opacity: Opacity,
    ) -> Result<(), PlatformError> {
        let name = name.into();
        request(&self.sender, |respond_to| PlatformCommand::SetOpacity {
            name,
            opacity,
            respond_to,
        })
        .await?
    }

    /// Moves and resizes a client's surface.
    ///
    /// # Errors
    ///
    /// Same as [`PlatformHandle::kill`], plus `InvalidArgument` for an empty rectangle.
    pub async fn set_geometry(
        &self,
        name: impl Into<ClientName>,
        geometry: Rectangle,
    ) -> Result<(), PlatformError> {
        let name = name.into();
        request(&self.sender, |respond_to| PlatformCommand::SetGeometry {
            name,
            geometry,
            respond_to,
        })
        .await?
    }

    /// Changes a client's stacking rank.
    ///
    /// # Errors
    ///
    /// Same as [`PlatformHandle::kill`].
    pub async fn set_z_order(
        &self,
        name: impl Into<ClientName>,
        z_order: ZOrder,
    ) -> Result<(), PlatformError> {
        let name = name.into();
        request(&self.sender, |respond_to| PlatformCommand::SetZOrder {
            name,
            z_order,
            respond_to,
        })
        .await?
    }

    /// Tears the platform down and waits until it is done.
    ///
    /// Any callback already queued is handled first. All clients are
    /// detached, the driver callbacks removed and the hardware released.
    /// Calling it again after the platform stopped is harmless.
    pub async fn shutdown(&self) -> Result<(), PlatformError> {
        match request(&self.sender, |respond_to| PlatformCommand::Shutdown {
            respond_to,
        })
        .await
        {
            Ok(()) | Err(PlatformError::ChannelClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Returns `true` while the actor is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

// ============================================================================
// Client Handle
// ============================================================================

/// Non-owning capability for one attached client.
///
/// Holding one does not keep the client or the platform alive; every call
/// fails with `ClientNotFound` or `ChannelClosed` once either is gone.
#[derive(Clone)]
pub struct ClientHandle {
    name: ClientName,
    sender: mpsc::WeakSender<PlatformCommand>,
}

impl ClientHandle {
    pub(crate) fn new(name: ClientName, sender: mpsc::WeakSender<PlatformCommand>) -> Self {
        Self { name, sender }
    }

    pub fn name(&self) -> &ClientName {
        &self.name
    }

    /// Closes the client's connection.
    pub async fn kill(&self) -> Result<(), PlatformError> {
        let name = self.name.clone();
        self.send(|respond_to| PlatformCommand::Kill { name, respond_to })
            .await
    }

    pub async fn set_opacity(&self, opacity: Opacity) -> Result<(), PlatformError> {
        let name = self.name.clone();
        self.send(|respond_to| PlatformCommand::SetOpacity {
            name,
            opacity,
            respond_to,
        })
        .await
    }

    pub async fn set_geometry(&self, geometry: Rectangle) -> Result<(), PlatformError> {
        let name = self.name.clone();
        self.send(|respond_to| PlatformCommand::SetGeometry {
            name,
            geometry,
            respond_to,
        })
        .await
    }

    pub async fn set_z_order(&self, z_order: ZOrder) -> Result<(), PlatformError> {
        let name = self.name.clone();
        self.send(|respond_to| PlatformCommand::SetZOrder {
            name,
            z_order,
            respond_to,
        })
        .await
    }

    async fn send(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), PlatformError>>) -> PlatformCommand,
    ) -> Result<(), PlatformError> {
        let sender = self.sender.upgrade().ok_or(PlatformError::ChannelClosed)?;
        request(&sender, make).await?
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
