//! Platform manager using the Actor pattern.
//!
//! The platform actor owns the display hardware resource, the client
//! registry and the lifecycle state machine. Driver callbacks and
//! application requests reach it through one ordered command channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                            ┌──────────────────┐
//! │  Driver thread  │── DriverCallbacks ──┐      │  StateObserver   │
//! └─────────────────┘   (blocking send)   │      └────────▲─────────┘
//!                                          ▼               │
//! ┌─────────────────┐               ┌──────────────┐       │
//! │ PlatformHandle  │──────────────▶│PlatformActor │───────┤
//! │  (application)  │PlatformCommand│              │       │
//! └─────────────────┘  (mpsc)       └──────┬───────┘┌──────┴───────────┐
//!                                          │        │  ClientObserver  │
//!                                          ▼        └──────────────────┘
//!                               ClientRegistry + StateMachine
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;
use std::time::Duration;

use nexus_core::{PlatformConfig, PlatformState};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::driver::{
    call_bounded, call_tracked, Bounded, DisplayDriver, DriverCallbacks, DriverError, PendingCall,
};
use crate::observer::Observers;

mod actor;
mod commands;
mod handle;
mod registry;
mod state_machine;

pub use actor::PlatformActor;
pub use commands::{DetachReason, PlatformCommand, PlatformError};
pub use handle::{ClientHandle, PlatformHandle};
pub use registry::ClientRegistry;
pub use state_machine::StateMachine;

/// Command channel buffer size.
const COMMAND_BUFFER: usize = 100;

/// Constructs the platform and spawns its actor.
///
/// This function:
/// 1. Parses `configuration`
/// 2. Allocates the hardware resource through `driver`
/// 3. Installs the driver callbacks
/// 4. Spawns the PlatformActor in `Uninitialized` and returns its handle
///
/// Nothing is left behind on failure: a resource allocated in step 2 is
/// released again if step 3 fails.
///
/// # Errors
///
/// - `PlatformError::Config` if the configuration is malformed
/// - `PlatformError::Allocation` if the hardware resource is unavailable
/// - `PlatformError::Timeout` if the driver did not answer in time; an
///   allocation that completes afterwards is released in the background
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use nexusd::driver::sim::SimulatedDriver;
/// use nexusd::observer::Observers;
/// use nexusd::platform::spawn_platform;
///
/// #[tokio::main]
/// async fn main() -> Result<(), nexusd::platform::PlatformError> {
///     let driver = Arc::new(SimulatedDriver::new());
///     let platform = spawn_platform("Compositor", "{}", driver, Observers::tracing()).await?;
///
///     platform.join().await?;
///     platform.start().await?;
///     platform.shutdown().await
/// }
/// ```
pub async fn spawn_platform(
    callsign: impl Into<String>,
    configuration: &str,
    driver: Arc<dyn DisplayDriver>,
    observers: Observers,
) -> Result<PlatformHandle, PlatformError> {
    let callsign = callsign.into();
    let config = PlatformConfig::parse(configuration)?;
    let limit = config.driver_timeout();

    let allocation_config = config.clone();
    let allocation = call_tracked(&driver, limit, "allocate", move |d| {
        d.allocate(&allocation_config)
    })
    .await;
    match allocation {
        Bounded::Finished(result) => result.map_err(|e| match e {
            PlatformError::Driver(err) => PlatformError::Allocation(err),
            other => other,
        })?,
        Bounded::Expired(pending) => {
            release_when_allocated(pending, Arc::clone(&driver), limit);
            return Err(PlatformError::Timeout {
                operation: "allocate",
            });
        }
    }

    let state = StateMachine::new(PlatformState::Uninitialized, observers.state);
    let state_rx = state.subscribe();

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let callbacks = DriverCallbacks::new(cmd_tx.downgrade(), state.subscribe());

    if let Err(e) = call_bounded(&driver, limit, "register_callbacks", move |d| {
        d.register_callbacks(callbacks)
    })
    .await
    {
        warn!(callsign = %callsign, error = %e, "Callback registration failed, releasing resource");
        let released = call_bounded(&driver, limit, "release", |d| {
            d.release();
            Ok::<(), DriverError>(())
        })
        .await;
        if let Err(release_error) = released {
            warn!(error = %release_error, "Failed to release display resource");
        }
        return Err(e);
    }

    let actor = PlatformActor::new(
        callsign.clone(),
        cmd_rx,
        cmd_tx.downgrade(),
        driver,
        config,
        state,
        observers.clients,
    );
    tokio::spawn(actor.run());

    info!(callsign = %callsign, "Platform constructed");
    Ok(PlatformHandle::new(cmd_tx, state_rx))
}

/// Releases the resource if an allocation that already timed out succeeds
/// after all. Construction has failed by then, so nobody else will.
fn release_when_allocated(
    pending: PendingCall<()>,
    driver: Arc<dyn DisplayDriver>,
    limit: Duration,
) {
    tokio::spawn(async move {
        if pending.finish().await.is_err() {
            return;
        }
        warn!("Allocation completed after its timeout, releasing resource");
        let released = call_bounded(&driver, limit, "release", |d| {
            d.release();
            Ok::<(), DriverError>(())
        })
        .await;
        if let Err(e) = released {
            warn!(error = %e, "Failed to release late allocation");
        }
    });
}
