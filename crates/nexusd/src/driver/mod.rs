//! Hardware driver boundary.
//!
//! [`DisplayDriver`] is everything the platform manager consumes from the
//! display hardware: allocation, the server start-up, the join handshake,
//! resolution control and per-client surface attributes. The driver reports
//! client connects, disconnects, close-down and failures back through
//! [`DriverCallbacks`], on a thread the driver owns.
//!
//! # Re-entrancy
//!
//! Driver methods are invoked from the platform actor. An implementation
//! must never invoke a callback from inside one of its own methods: the
//! callback waits for the actor, and the actor is waiting for the method.

use std::sync::Arc;
use std::time::Duration;

use nexus_core::{
    ConnectionHandle, JoinSettings, Opacity, PlatformConfig, Rectangle, ScreenResolution, ZOrder,
};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::warn;

use crate::platform::PlatformError;

mod callbacks;
pub mod sim;

pub use callbacks::{ConnectStatus, DriverCallbacks};

// ============================================================================
// Driver Errors
// ============================================================================

/// Errors reported by a display driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The hardware resource cannot be reached or allocated.
    #[error("hardware resource unavailable: {0}")]
    Unavailable(String),

    /// The driver refused the request.
    #[error("driver rejected request: {0}")]
    Rejected(String),

    /// The driver accepted the request but it failed.
    #[error("driver call failed: {0}")]
    Failed(String),
}

/// Registration token for a standby acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StandbyToken(pub u64);

// ============================================================================
// Driver Trait
// ============================================================================

/// The display hardware as seen by the platform manager.
///
/// All methods may block. The manager runs them on the blocking pool and
/// bounds each call with the configured driver timeout.
pub trait DisplayDriver: Send + Sync + 'static {
    /// Allocates the hardware resource described by `config`.
    fn allocate(&self, config: &PlatformConfig) -> Result<(), DriverError>;

    /// Releases the hardware resource. Called at most once.
    fn release(&self);

    /// Starts the display server on the allocated resource.
    fn start(&self, config: &PlatformConfig) -> Result<(), DriverError>;

    /// Installs the callback target for connect, disconnect, close-down and failure.
    fn register_callbacks(&self, callbacks: DriverCallbacks) -> Result<(), DriverError>;

    /// Removes the callback target installed by `register_callbacks`.
    fn unregister_callbacks(&self);

    /// Joins this process to the display server.
    fn join(&self, settings: &JoinSettings) -> Result<(), DriverError>;

    /// Undoes a successful `join`.
    fn leave(&self);

    fn register_standby_ack(&self) -> StandbyToken;

    fn unregister_standby_ack(&self, token: StandbyToken);

    fn set_resolution(&self, format: ScreenResolution) -> Result<(), DriverError>;

    fn resolution(&self) -> Result<ScreenResolution, DriverError>;

    /// Forcibly closes a client connection.
    fn kill_client(&self, handle: ConnectionHandle) -> Result<(), DriverError>;

    fn set_opacity(&self, handle: ConnectionHandle, opacity: Opacity) -> Result<(), DriverError>;

    fn set_geometry(&self, handle: ConnectionHandle, geometry: Rectangle)
        -> Result<(), DriverError>;

    fn set_z_order(&self, handle: ConnectionHandle, z_order: ZOrder) -> Result<(), DriverError>;
}

// ============================================================================
// Bounded Calls
// ============================================================================

/// Outcome of a driver call run under a time limit.
pub(crate) enum Bounded<T> {
    /// The call returned (or its thread died) within the limit.
    Finished(Result<T, PlatformError>),

    /// The limit expired; the call is still running on the blocking pool.
    Expired(PendingCall<T>),
}

/// A driver call that outlived its time limit.
///
/// The blocking thread cannot be cancelled. Whoever holds this decides what
/// to do with a late result, usually undoing its side effect.
pub(crate) struct PendingCall<T> {
    operation: &'static str,
    task: JoinHandle<Result<T, DriverError>>,
}

impl<T> PendingCall<T> {
    pub(crate) fn operation(&self) -> &'static str {
        self.operation
    }

    /// Waits up to `limit` more for the call to return.
    ///
    /// Hands the call back if it is still running.
    pub(crate) async fn settle(mut self, limit: Duration) -> Result<Result<T, PlatformError>, Self> {
        let waited = timeout(limit, &mut self.task).await;
        match waited {
            Ok(joined) => Ok(flatten(self.operation, joined)),
            Err(_) => Err(self),
        }
    }

    /// Waits for the call to return, however long it takes.
    pub(crate) async fn finish(self) -> Result<T, PlatformError> {
        let operation = self.operation;
        flatten(operation, self.task.await)
    }
}

fn flatten<T>(
    operation: &'static str,
    joined: Result<Result<T, DriverError>, JoinError>,
) -> Result<T, PlatformError> {
    match joined {
        Ok(result) => result.map_err(PlatformError::from),
        Err(join_error) => {
            warn!(operation, error = %join_error, "Driver call aborted");
            Err(PlatformError::Driver(DriverError::Failed(join_error.to_string())))
        }
    }
}

/// Runs a blocking driver call on the blocking pool, bounded by `limit`.
///
/// Unlike [`call_bounded`], an expired call is handed back so the caller can
/// reconcile a late success.
pub(crate) async fn call_tracked<T, F>(
    driver: &Arc<dyn DisplayDriver>,
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Bounded<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn DisplayDriver) -> Result<T, DriverError> + Send + 'static,
{
    let driver = Arc::clone(driver);
    let mut task = tokio::task::spawn_blocking(move || call(driver.as_ref()));

    let waited = timeout(limit, &mut task).await;
    match waited {
        Ok(joined) => Bounded::Finished(flatten(operation, joined)),
        Err(_) => {
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "Driver call timed out"
            );
            Bounded::Expired(PendingCall { operation, task })
        }
    }
}

/// Runs a blocking driver call on the blocking pool, bounded by `limit`.
///
/// A call that outlives `limit` is reported as `PlatformError::Timeout` and
/// left to finish on its own. Use it for calls whose late completion needs
/// no undo: reads, attribute pushes and the teardown primitives.
pub(crate) async fn call_bounded<T, F>(
    driver: &Arc<dyn DisplayDriver>,
    limit: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, PlatformError>
where
    T: Send + 'static,
    F: FnOnce(&dyn DisplayDriver) -> Result<T, DriverError> + Send + 'static,
{
    match call_tracked(driver, limit, operation, call).await {
        Bounded::Finished(result) => result,
        Bounded::Expired(_) => Err(PlatformError::Timeout { operation }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim::SimulatedDriver;

    fn driver() -> Arc<dyn DisplayDriver> {
        Arc::new(SimulatedDriver::new())
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Unavailable("no heap".to_string());
        assert_eq!(err.to_string(), "hardware resource unavailable: no heap");

        let err = DriverError::Rejected("busy".to_string());
        assert_eq!(err.to_string(), "driver rejected request: busy");
    }

    #[tokio::test]
    async fn test_call_bounded_returns_result() {
        let driver = driver();
        let result = call_bounded(&driver, Duration::from_secs(1), "resolution", |d| {
            d.resolution()
        })
        .await;
        assert_eq!(result.unwrap(), ScreenResolution::Unknown);
    }

    #[tokio::test]
    async fn test_call_bounded_maps_driver_error() {
        let driver = driver();
        let result: Result<(), _> = call_bounded(&driver, Duration::from_secs(1), "op", |_| {
            Err(DriverError::Failed("boom".to_string()))
        })
        .await;
        assert!(matches!(result, Err(PlatformError::Driver(DriverError::Failed(_)))));
    }

    #[tokio::test]
    async fn test_call_bounded_times_out() {
        let driver = driver();
        let result: Result<(), _> =
            call_bounded(&driver, Duration::from_millis(20), "slow", |_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(PlatformError::Timeout { operation: "slow" })
        ));
    }

    #[tokio::test]
    async fn test_expired_call_can_be_settled_later() {
        let driver = driver();
        let outcome = call_tracked(&driver, Duration::from_millis(20), "slow", |_| {
            std::thread::sleep(Duration::from_millis(150));
            Ok(7)
        })
        .await;

        let Bounded::Expired(pending) = outcome else {
            panic!("call should have expired");
        };
        assert_eq!(pending.operation(), "slow");

        // Still running after another short wait
        let pending = match pending.settle(Duration::from_millis(10)).await {
            Err(pending) => pending,
            Ok(_) => panic!("call should still be running"),
        };

        assert_eq!(pending.finish().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_tracked_call_within_limit_finishes() {
        let driver = driver();
        let outcome = call_tracked(&driver, Duration::from_secs(1), "resolution", |d| {
            d.resolution()
        })
        .await;
        assert!(matches!(
            outcome,
            Bounded::Finished(Ok(ScreenResolution::Unknown))
        ));
    }
}
