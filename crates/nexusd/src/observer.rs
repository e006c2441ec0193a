//! Observer capabilities supplied by whoever creates the platform.
//!
//! Both observers are called synchronously from inside the platform actor,
//! often while a driver thread waits for the callback to complete. They
//! must return promptly; anything slow belongs on a task of its own.

use std::sync::Arc;

use nexus_core::{ClientName, ClientView, PlatformState};
use tracing::info;

use crate::platform::ClientHandle;

/// Receives every platform state transition.
pub trait StateObserver: Send + Sync {
    fn state_changed(&self, state: PlatformState);
}

/// Receives client attach and detach notifications.
pub trait ClientObserver: Send + Sync {
    /// A client attached. `client` is a non-owning capability for the new
    /// session; `view` is its state at attach time.
    fn attached(&self, client: &ClientHandle, view: &ClientView);

    /// A client detached. Called before the session leaves the registry.
    fn detached(&self, name: &ClientName);
}

/// The pair of observers a platform is constructed with.
///
/// The platform keeps shared references; the creator keeps its own.
#[derive(Clone)]
pub struct Observers {
    pub state: Arc<dyn StateObserver>,
    pub clients: Arc<dyn ClientObserver>,
}

impl Observers {
    pub fn new(state: Arc<dyn StateObserver>, clients: Arc<dyn ClientObserver>) -> Self {
        Self { state, clients }
    }

    /// Observers that only log.
    pub fn tracing() -> Self {
        let observer = Arc::new(TracingObserver);
        Self {
            state: observer.clone(),
            clients: observer,
        }
    }
}

/// Logs every notification at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StateObserver for TracingObserver {
    fn state_changed(&self, state: PlatformState) {
        info!(state = %state, code = state.code(), "Platform state notification");
    }
}

impl ClientObserver for TracingObserver {
    fn attached(&self, client: &ClientHandle, view: &ClientView) {
        info!(
            client = %client.name(),
            handle = %view.handle,
            geometry = %view.geometry,
            "Client attached"
        );
    }

    fn detached(&self, name: &ClientName) {
        info!(client = %name, "Client detached");
    }
}
