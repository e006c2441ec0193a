//! In-process simulated display driver.
//!
//! Stands in for the Nexus server when no display hardware is present:
//! the `nexusd` binary runs on it, and the tests use it to play the driver
//! side of the callback boundary. Simulation entry points (`connect`,
//! `disconnect`, `close_down`, `fail`) block the calling thread exactly like
//! a real driver callback would, so call them from a plain thread or
//! `spawn_blocking`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nexus_core::{
    ClientName, ClientSettings, ConnectionHandle, JoinSettings, Opacity, PlatformConfig,
    Rectangle, ScreenResolution, ZOrder,
};
use tracing::{debug, info};

use super::{ConnectStatus, DisplayDriver, DriverCallbacks, DriverError, StandbyToken};

/// How long a simulated start keeps running after announcing a client.
const START_ANNOUNCE_WINDOW: Duration = Duration::from_millis(50);

/// Counters of every driver primitive the platform invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub allocations: u32,
    pub releases: u32,
    pub starts: u32,
    pub joins: u32,
    pub leaves: u32,
    pub standby_registrations: u32,
    pub standby_unregistrations: u32,
    pub callback_registrations: u32,
    pub callback_unregistrations: u32,
    pub kills: u32,
}

/// Surface attributes last pushed to the simulated hardware for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulatedSurface {
    pub opacity: Option<Opacity>,
    pub geometry: Option<Rectangle>,
    pub z_order: Option<ZOrder>,
}

#[derive(Default)]
struct SimState {
    stats: SimulatedStats,
    callbacks: Option<DriverCallbacks>,
    allocated: bool,
    resolution: ScreenResolution,
    next_handle: u64,
    next_standby: u64,
    clients: HashMap<ClientName, ConnectionHandle>,
    surfaces: HashMap<ConnectionHandle, SimulatedSurface>,
    fail_allocate: bool,
    fail_start: bool,
    fail_join: bool,
    join_delay: Option<Duration>,
    allocate_delay: Option<Duration>,
    start_client: Option<ClientName>,
    start_connect: Option<JoinHandle<ConnectStatus>>,
}

/// A display driver that keeps all hardware state in memory.
#[derive(Default)]
pub struct SimulatedDriver {
    state: Mutex<SimState>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every allocation fail with `DriverError::Unavailable`.
    #[must_use]
    pub fn failing_allocation(self) -> Self {
        self.lock().fail_allocate = true;
        self
    }

    /// Makes server start-up fail.
    #[must_use]
    pub fn failing_start(self) -> Self {
        self.lock().fail_start = true;
        self
    }

    /// Delays every join handshake by `delay`.
    #[must_use]
    pub fn with_join_delay(self, delay: Duration) -> Self {
        self.lock().join_delay = Some(delay);
        self
    }

    /// Delays every allocation by `delay`.
    #[must_use]
    pub fn with_allocate_delay(self, delay: Duration) -> Self {
        self.lock().allocate_delay = Some(delay);
        self
    }

    /// Announces a client named `name` from a driver thread while the
    /// server is starting, before `start` returns.
    #[must_use]
    pub fn with_client_during_start(self, name: &str) -> Self {
        self.lock().start_client = Some(ClientName::new(name));
        self
    }

    /// Waits for the client announced during start-up and returns the
    /// platform's verdict. Blocks like any driver-side call.
    pub fn take_start_connect(&self) -> Option<ConnectStatus> {
        let announcement = self.lock().start_connect.take()?;
        announcement.join().ok()
    }

    /// Makes join handshakes fail until switched off again.
    pub fn set_join_failure(&self, fail: bool) {
        self.lock().fail_join = fail;
    }

    pub fn stats(&self) -> SimulatedStats {
        self.lock().stats.clone()
    }

    pub fn is_allocated(&self) -> bool {
        self.lock().allocated
    }

    pub fn has_callbacks(&self) -> bool {
        self.lock().callbacks.is_some()
    }

    /// Attributes last pushed for a connection.
    pub fn surface(&self, handle: ConnectionHandle) -> Option<SimulatedSurface> {
        self.lock().surfaces.get(&handle).copied()
    }

    /// Handle the simulated server assigned to a connected client.
    pub fn handle_of(&self, name: &str) -> Option<ConnectionHandle> {
        self.lock().clients.get(&ClientName::new(name)).copied()
    }

    // ========================================================================
    // Driver-side simulation (blocking)
    // ========================================================================

    /// Simulates a client joining under `name` with default settings.
    pub fn connect(&self, name: &str) -> ConnectStatus {
        let handle = self.allocate_handle();
        self.connect_with(handle, JoinSettings::new(name), ClientSettings::default())
    }

    /// Simulates a client joining with explicit handle and settings.
    pub fn connect_with(
        &self,
        handle: ConnectionHandle,
        join: JoinSettings,
        settings: ClientSettings,
    ) -> ConnectStatus {
        let Some(callbacks) = self.callbacks() else {
            debug!(client = %join.name, "No callback target, refusing simulated client");
            return ConnectStatus::Rejected;
        };

        let name = join.name.clone();
        let status = callbacks.client_connect(handle, join, settings);
        if status.is_accepted() {
            self.lock().clients.insert(name, handle);
        }
        status
    }

    /// Simulates the client named `name` dropping its connection.
    pub fn disconnect(&self, name: &str) {
        let name = ClientName::new(name);
        let handle = self
            .lock()
            .clients
            .remove(&name)
            .unwrap_or(ConnectionHandle::NULL);

        if let Some(callbacks) = self.callbacks() {
            callbacks.client_disconnect(handle, &JoinSettings::new(name));
        }
    }

    /// Simulates the server closing down.
    pub fn close_down(&self) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.close_down();
        }
    }

    /// Simulates an unrecoverable hardware error.
    pub fn fail(&self, reason: &str) {
        if let Some(callbacks) = self.callbacks() {
            callbacks.failure(reason);
        }
    }

    fn allocate_handle(&self) -> ConnectionHandle {
        let mut state = self.lock();
        state.next_handle += 1;
        ConnectionHandle::new(0x1000 + state.next_handle)
    }

    /// Clones the callback target out of the lock so the platform can call
    /// back into the driver while the callback is in flight.
    fn callbacks(&self) -> Option<DriverCallbacks> {
        self.lock().callbacks.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplayDriver for SimulatedDriver {
    fn allocate(&self, config: &PlatformConfig) -> Result<(), DriverError> {
        let delay = self.lock().allocate_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.lock();
        if state.fail_allocate {
            return Err(DriverError::Unavailable(
                "simulated allocation failure".to_string(),
            ));
        }
        state.stats.allocations += 1;
        state.allocated = true;
        info!(
            box_mode = config.box_mode,
            graphics_heap_mb = config.graphics_heap_mb,
            svp = ?config.svp,
            "Simulated display resource allocated"
        );
        Ok(())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.stats.releases += 1;
        state.allocated = false;
        state.clients.clear();
        state.surfaces.clear();
        info!("Simulated display resource released");
    }

    fn start(&self, config: &PlatformConfig) -> Result<(), DriverError> {
        let early = {
            let mut state = self.lock();
            state.stats.starts += 1;
            if state.fail_start {
                return Err(DriverError::Failed("simulated start failure".to_string()));
            }
            if !state.allocated {
                return Err(DriverError::Unavailable("resource not allocated".to_string()));
            }
            state.resolution = config.resolution;
            state.start_client.take().zip(state.callbacks.clone())
        };

        if let Some((name, callbacks)) = early {
            let handle = self.allocate_handle();
            let announcement = thread::spawn(move || {
                callbacks.client_connect(handle, JoinSettings::new(name), ClientSettings::default())
            });
            // Start-up keeps running while the announcement is in flight
            thread::sleep(START_ANNOUNCE_WINDOW);
            self.lock().start_connect = Some(announcement);
        }
        Ok(())
    }

    fn register_callbacks(&self, callbacks: DriverCallbacks) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.stats.callback_registrations += 1;
        state.callbacks = Some(callbacks);
        Ok(())
    }

    fn unregister_callbacks(&self) {
        let mut state = self.lock();
        state.stats.callback_unregistrations += 1;
        state.callbacks = None;
    }

    fn join(&self, settings: &JoinSettings) -> Result<(), DriverError> {
        let (delay, fail) = {
            let state = self.lock();
            (state.join_delay, state.fail_join)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if fail {
            return Err(DriverError::Rejected(format!(
                "simulated join failure for {}",
                settings.name
            )));
        }
        self.lock().stats.joins += 1;
        Ok(())
    }

    fn leave(&self) {
        self.lock().stats.leaves += 1;
    }

    fn register_standby_ack(&self) -> StandbyToken {
        let mut state = self.lock();
        state.stats.standby_registrations += 1;
        state.next_standby += 1;
        StandbyToken(state.next_standby)
    }

    fn unregister_standby_ack(&self, _token: StandbyToken) {
        self.lock().stats.standby_unregistrations += 1;
    }

    fn set_resolution(&self, format: ScreenResolution) -> Result<(), DriverError> {
        let mut state = self.lock();
        if !state.allocated {
            return Err(DriverError::Unavailable("resource not allocated".to_string()));
        }
        state.resolution = format;
        Ok(())
    }

    fn resolution(&self) -> Result<ScreenResolution, DriverError> {
        Ok(self.lock().resolution)
    }

    fn kill_client(&self, handle: ConnectionHandle) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.stats.kills += 1;
        state.clients.retain(|_, h| *h != handle);
        state.surfaces.remove(&handle);
        Ok(())
    }

    fn set_opacity(&self, handle: ConnectionHandle, opacity: Opacity) -> Result<(), DriverError> {
        self.lock().surfaces.entry(handle).or_default().opacity = Some(opacity);
        Ok(())
    }

    fn set_geometry(
        &self,
        handle: ConnectionHandle,
        geometry: Rectangle,
    ) -> Result<(), DriverError> {
        self.lock().surfaces.entry(handle).or_default().geometry = Some(geometry);
        Ok(())
    }

    fn set_z_order(&self, handle: ConnectionHandle, z_order: ZOrder) -> Result<(), DriverError> {
        self.lock().surfaces.entry(handle).or_default().z_order = Some(z_order);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_and_release_counters() {
        let driver = SimulatedDriver::new();
        driver.allocate(&PlatformConfig::default()).unwrap();
        assert!(driver.is_allocated());

        driver.release();
        assert!(!driver.is_allocated());
        assert_eq!(driver.stats().allocations, 1);
        assert_eq!(driver.stats().releases, 1);
    }

    #[test]
    fn test_failing_allocation() {
        let driver = SimulatedDriver::new().failing_allocation();
        let err = driver.allocate(&PlatformConfig::default()).unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
        assert!(!driver.is_allocated());
    }

    #[test]
    fn test_start_applies_configured_resolution() {
        let driver = SimulatedDriver::new();
        let config = PlatformConfig {
            resolution: ScreenResolution::R720p,
            ..PlatformConfig::default()
        };
        driver.allocate(&config).unwrap();
        driver.start(&config).unwrap();
        assert_eq!(driver.resolution().unwrap(), ScreenResolution::R720p);
    }

    #[test]
    fn test_join_failure_toggle() {
        let driver = SimulatedDriver::new();
        driver.set_join_failure(true);
        assert!(driver.join(&JoinSettings::new("me")).is_err());

        driver.set_join_failure(false);
        assert!(driver.join(&JoinSettings::new("me")).is_ok());
        assert_eq!(driver.stats().joins, 1);
    }

    #[test]
    fn test_connect_without_callbacks_is_rejected() {
        let driver = SimulatedDriver::new();
        assert_eq!(driver.connect("orphan"), ConnectStatus::Rejected);
        assert!(driver.handle_of("orphan").is_none());
    }

    #[test]
    fn test_surface_attributes_recorded() {
        let driver = SimulatedDriver::new();
        let handle = ConnectionHandle::new(5);
        driver.set_opacity(handle, Opacity::new(10)).unwrap();
        driver.set_z_order(handle, ZOrder::new(2)).unwrap();

        let surface = driver.surface(handle).unwrap();
        assert_eq!(surface.opacity, Some(Opacity::new(10)));
        assert_eq!(surface.z_order, Some(ZOrder::new(2)));
        assert_eq!(surface.geometry, None);

        driver.kill_client(handle).unwrap();
        assert!(driver.surface(handle).is_none());
        assert_eq!(driver.stats().kills, 1);
    }
}
