//! Platform actor - owns the display resource, the client registry and the
//! lifecycle state machine.
//!
//! The actor receives commands via an mpsc channel shared by the driver
//! callbacks and the application handles, and processes them one at a
//! time. That single loop is the only place the registry and the state are
//! mutated.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the requester went away)
//! - Driver failures are logged and reported, never propagated to the driver

use std::sync::Arc;

use nexus_core::{
    ClientName, ClientSession, ClientSettings, ClientView, ConnectionHandle, JoinSettings,
    PlatformConfig, PlatformState, ScreenResolution,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::commands::{DetachReason, PlatformCommand, PlatformError};
use super::handle::ClientHandle;
use super::registry::ClientRegistry;
use super::state_machine::StateMachine;
use crate::driver::{
    call_bounded, call_tracked, Bounded, ConnectStatus, DisplayDriver, DriverError, PendingCall,
};
use crate::observer::ClientObserver;

/// Whether the command loop keeps running after a command.
enum Flow {
    Continue,
    Stop,
}

/// The platform actor.
///
/// # Ownership
///
/// The actor owns the hardware resource (through `driver`) from the moment
/// it is spawned until teardown releases it, plus the client registry and
/// the state machine. The observers are shared with the platform's creator.
pub struct PlatformActor {
    /// Identity this platform joins the display server under
    callsign: String,

    /// Command receiver
    receiver: mpsc::Receiver<PlatformCommand>,

    /// Used to mint client capabilities; does not keep the channel open
    weak_sender: mpsc::WeakSender<PlatformCommand>,

    driver: Arc<dyn DisplayDriver>,
    config: PlatformConfig,
    registry: ClientRegistry,
    state: StateMachine,
    client_observer: Arc<dyn ClientObserver>,

    /// Join handshake completed
    joined: bool,

    /// Join that timed out but may still complete on the driver side
    pending_join: Option<PendingCall<()>>,

    /// Hardware resource released; teardown never runs twice
    released: bool,
}

impl PlatformActor {
    pub(crate) fn new(
        callsign: String,
        receiver: mpsc::Receiver<PlatformCommand>,
        weak_sender: mpsc::WeakSender<PlatformCommand>,
        driver: Arc<dyn DisplayDriver>,
        config: PlatformConfig,
        state: StateMachine,
        client_observer: Arc<dyn ClientObserver>,
    ) -> Self {
        Self {
            callsign,
            receiver,
            weak_sender,
            driver,
            config,
            registry: ClientRegistry::new(),
            state,
            client_observer,
            joined: false,
            pending_join: None,
            released: false,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until a shutdown command arrives or every handle
    /// is dropped. Either way the hardware resource is released before the
    /// loop returns.
    pub async fn run(mut self) {
        info!(callsign = %self.callsign, "Platform actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if let Flow::Stop = self.handle_command(cmd).await {
                break;
            }
        }

        // Last handle dropped without an explicit shutdown
        self.teardown(DetachReason::Shutdown).await;

        info!(callsign = %self.callsign, "Platform actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: PlatformCommand) -> Flow {
        match cmd {
            PlatformCommand::ClientConnect {
                handle,
                join,
                settings,
                respond_to,
            } => {
                let status = self.handle_client_connect(handle, join, settings);
                // Ignore send error - the driver thread may have given up
                let _ = respond_to.send(status);
            }
            PlatformCommand::ClientDisconnect {
                handle,
                join,
                respond_to,
            } => {
                self.handle_client_disconnect(handle, &join);
                let _ = respond_to.send(());
            }
            PlatformCommand::CloseDown { respond_to } => {
                self.handle_close_down().await;
                let _ = respond_to.send(());
            }
            PlatformCommand::Fault { reason, respond_to } => {
                self.handle_fault(&reason);
                let _ = respond_to.send(());
            }
            PlatformCommand::Join { respond_to } => {
                let result = self.handle_join().await;
                let _ = respond_to.send(result);
            }
            PlatformCommand::IsJoined { respond_to } => {
                let _ = respond_to.send(self.joined);
            }
            PlatformCommand::Start { respond_to } => {
                let result = self.handle_start().await;
                let _ = respond_to.send(result);
            }
            PlatformCommand::SetResolution { format, respond_to } => {
                let result = self.handle_set_resolution(format).await;
                let _ = respond_to.send(result);
            }
            PlatformCommand::GetResolution { respond_to } => {
                let result = self.driver_call("resolution", |d| d.resolution()).await;
                let _ = respond_to.send(result);
            }
            PlatformCommand::GetClient { name, respond_to } => {
                let view = self.registry.find(&name).map(ClientView::from_session);
                let _ = respond_to.send(view);
            }
            PlatformCommand::GetAllClients { respond_to } => {
                let _ = respond_to.send(self.registry.views());
            }
            PlatformCommand::Kill { name, respond_to } => {
                let result = self.handle_kill(&name).await;
                let _ = respond_to.send(result);
            }
            PlatformCommand::SetOpacity {
                name,
                opacity,
                respond_to,
            } => {
                let result = self
                    .update_client(&name, "set_opacity", move |d, h| d.set_opacity(h, opacity))
                    .await
                    .map(|session| session.set_opacity(opacity));
                let _ = respond_to.send(result);
            }
            PlatformCommand::SetGeometry {
                name,
                geometry,
                respond_to,
            } => {
                let result = if geometry.is_empty() {
                    Err(PlatformError::InvalidArgument(format!(
                        "empty geometry {geometry}"
                    )))
                } else {
                    self.update_client(&name, "set_geometry", move |d, h| {
                        d.set_geometry(h, geometry)
                    })
                    .await
                    .map(|session| session.set_geometry(geometry))
                };
                let _ = respond_to.send(result);
            }
            PlatformCommand::SetZOrder {
                name,
                z_order,
                respond_to,
            } => {
                let result = self
                    .update_client(&name, "set_z_order", move |d, h| d.set_z_order(h, z_order))
                    .await
                    .map(|session| session.set_z_order(z_order));
                let _ = respond_to.send(result);
            }
            PlatformCommand::Shutdown { respond_to } => {
                info!(callsign = %self.callsign, "Platform shutdown requested");
                self.teardown(DetachReason::Shutdown).await;
                let _ = respond_to.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // ========================================================================
    // Driver Callbacks
    // ========================================================================

    /// Handles a client connect reported by the driver.
    ///
    /// Connects outside `Operational` are dropped and logged, never
    /// buffered. `DriverCallbacks` already checked the state on arrival;
    /// the check here catches a close-down or fault queued ahead of it.
    /// Every check happens before the session is built, so a rejection
    /// leaves nothing behind.
    fn handle_client_connect(
        &mut self,
        handle: ConnectionHandle,
        join: JoinSettings,
        settings: ClientSettings,
    ) -> ConnectStatus {
        let state = self.state.current();
        if !state.accepts_clients() {
            warn!(
                client = %join.name,
                state = %state,
                "Client connect outside operational state, dropping"
            );
            return ConnectStatus::Rejected;
        }

        if !handle.is_valid() {
            warn!(client = %join.name, "Client connect with null handle, rejecting");
            return ConnectStatus::Rejected;
        }

        if join.name.is_blank() {
            warn!(handle = %handle, "Client connect without a name, rejecting");
            return ConnectStatus::Rejected;
        }

        if settings.secure_graphics && !self.config.svp.allows_secure_graphics() {
            warn!(
                client = %join.name,
                svp = ?self.config.svp,
                "Secure graphics requested without secure video path, rejecting"
            );
            return ConnectStatus::Rejected;
        }

        if !self.registry.contains(&join.name) && self.registry.len() >= self.config.max_clients {
            warn!(
                client = %join.name,
                current = self.registry.len(),
                max = self.config.max_clients,
                "Client registry is full, rejecting"
            );
            return ConnectStatus::Rejected;
        }

        let name = join.name.clone();
        if let Some(previous) = self.registry.find(&name).map(ClientSession::handle) {
            warn!(
                client = %name,
                old_handle = %previous,
                new_handle = %handle,
                "Client name reused, replacing previous session"
            );
            self.detach(&name, DetachReason::Replaced);
        }

        let session = ClientSession::new(handle, join, settings, self.config.default_geometry());
        self.registry.add(session);

        if let Some(session) = self.registry.find(&name) {
            let view = ClientView::from_session(session);
            let capability = ClientHandle::new(name.clone(), self.weak_sender.clone());

            info!(
                client = %name,
                handle = %handle,
                total_clients = self.registry.len(),
                "Client attached"
            );
            self.client_observer.attached(&capability, &view);
        }

        ConnectStatus::Accepted
    }

    /// Handles a client disconnect reported by the driver.
    ///
    /// The observer hears about the detach while the session is still
    /// registered; removal follows.
    fn handle_client_disconnect(&mut self, handle: ConnectionHandle, join: &JoinSettings) {
        let state = self.state.current();
        if !state.accepts_clients() {
            warn!(
                client = %join.name,
                state = %state,
                "Client disconnect outside operational state, dropping"
            );
            return;
        }

        let Some(session) = self.registry.find(&join.name) else {
            warn!(
                client = %join.name,
                handle = %handle,
                "Disconnect for unknown client, ignoring"
            );
            return;
        };

        if session.handle() != handle {
            debug!(
                client = %join.name,
                registered = %session.handle(),
                reported = %handle,
                "Disconnect handle differs from registered handle"
            );
        }

        self.detach(&join.name, DetachReason::Disconnected);
    }

    /// Handles the server closing down underneath the platform.
    async fn handle_close_down(&mut self) {
        if self.released {
            warn!(callsign = %self.callsign, "Close-down after release, ignoring");
            return;
        }
        info!(callsign = %self.callsign, "Display server closing down");
        self.teardown(DetachReason::CloseDown).await;
    }

    /// Handles an unrecoverable hardware error.
    ///
    /// The resource stays allocated; close-down or shutdown releases it.
    fn handle_fault(&mut self, reason: &str) {
        error!(
            callsign = %self.callsign,
            reason,
            clients = self.registry.len(),
            "Display hardware failure"
        );
        self.state.transition(PlatformState::Failure);
        self.detach_all(DetachReason::Fault);
    }

    // ========================================================================
    // Application Requests
    // ========================================================================

    /// Handles the one-time join handshake.
    ///
    /// A join that timed out is kept as pending. The next join waits for it
    /// instead of joining a second time, and adopts it if it succeeded late.
    async fn handle_join(&mut self) -> Result<(), PlatformError> {
        if self.joined {
            debug!(callsign = %self.callsign, "Already joined");
            return Ok(());
        }

        let limit = self.config.driver_timeout();

        if let Some(pending) = self.pending_join.take() {
            match pending.settle(limit).await {
                Ok(Ok(())) => {
                    info!(callsign = %self.callsign, "Earlier join completed late, adopting it");
                    return self.complete_join().await;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "Earlier join failed, joining again");
                }
                Err(still_running) => {
                    warn!(
                        operation = still_running.operation(),
                        "Earlier join still in flight"
                    );
                    self.pending_join = Some(still_running);
                    return Err(PlatformError::Timeout { operation: "join" });
                }
            }
        }

        let settings = JoinSettings::new(self.callsign.as_str());
        let attempt = call_tracked(&self.driver, limit, "join", move |d| d.join(&settings)).await;
        match attempt {
            Bounded::Finished(result) => {
                result.map_err(|e| match e {
                    PlatformError::Driver(err) => PlatformError::JoinFailed(err.to_string()),
                    other => other,
                })?;
                self.complete_join().await
            }
            Bounded::Expired(pending) => {
                self.pending_join = Some(pending);
                Err(PlatformError::Timeout { operation: "join" })
            }
        }
    }

    /// Records a successful join and clears the standby acknowledgment.
    ///
    /// Runs once per process lifetime: `joined` never resets before teardown.
    async fn complete_join(&mut self) -> Result<(), PlatformError> {
        self.joined = true;

        let standby = self
            .driver_call("standby_ack", |d| {
                let token = d.register_standby_ack();
                d.unregister_standby_ack(token);
                Ok(())
            })
            .await;
        if let Err(e) = standby {
            warn!(error = %e, "Failed to clear standby acknowledgment");
        }

        info!(callsign = %self.callsign, "Joined display server");
        Ok(())
    }

    /// Handles server start-up.
    ///
    /// A start that times out ends in `Failure` like any other failed start.
    /// The driver has no inverse for start; teardown's release undoes a late one.
    async fn handle_start(&mut self) -> Result<(), PlatformError> {
        let state = self.state.current();
        if state != PlatformState::Uninitialized {
            return Err(PlatformError::InvalidState {
                state,
                operation: "start",
            });
        }

        self.state.transition(PlatformState::Initializing);

        let config = self.config.clone();
        match self.driver_call("start", move |d| d.start(&config)).await {
            Ok(()) => {
                self.state.transition(PlatformState::Operational);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Display server failed to start");
                self.state.transition(PlatformState::Failure);
                Err(e)
            }
        }
    }

    /// Handles a resolution change.
    async fn handle_set_resolution(
        &mut self,
        format: ScreenResolution,
    ) -> Result<(), PlatformError> {
        let state = self.state.current();
        if state != PlatformState::Operational {
            warn!(format = %format, state = %state, "Resolution change refused");
            return Err(PlatformError::InvalidState {
                state,
                operation: "set_resolution",
            });
        }

        if !format.is_known() {
            return Err(PlatformError::InvalidArgument(format!(
                "cannot select resolution {format}"
            )));
        }

        self.driver_call("set_resolution", move |d| d.set_resolution(format))
            .await?;
        info!(format = %format, "Resolution changed");
        Ok(())
    }

    /// Handles a kill request from a client capability or external owner.
    async fn handle_kill(&mut self, name: &ClientName) -> Result<(), PlatformError> {
        let handle = self
            .registry
            .find(name)
            .map(ClientSession::handle)
            .ok_or_else(|| PlatformError::ClientNotFound(name.clone()))?;

        self.driver_call("kill_client", move |d| d.kill_client(handle))
            .await?;
        self.detach(name, DetachReason::Killed);
        Ok(())
    }

    /// Pushes an attribute change to the driver and, on success, returns the
    /// session for the caller to record it.
    async fn update_client<F>(
        &mut self,
        name: &ClientName,
        operation: &'static str,
        call: F,
    ) -> Result<&mut ClientSession, PlatformError>
    where
        F: FnOnce(&dyn DisplayDriver, ConnectionHandle) -> Result<(), DriverError>
            + Send
            + 'static,
    {
        let handle = self
            .registry
            .find(name)
            .map(ClientSession::handle)
            .ok_or_else(|| PlatformError::ClientNotFound(name.clone()))?;

        self.driver_call(operation, move |d| call(d, handle)).await?;

        debug!(client = %name, operation, "Client attribute updated");
        self.registry
            .find_mut(name)
            .ok_or_else(|| PlatformError::ClientNotFound(name.clone()))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Detaches every client, releases the hardware and ends in `Failure`.
    ///
    /// Runs at most once; later calls do nothing.
    async fn teardown(&mut self, reason: DetachReason) {
        if self.released {
            return;
        }
        self.released = true;

        self.state.transition(PlatformState::Deinitializing);
        self.detach_all(reason);

        if let Err(e) = self
            .driver_call("unregister_callbacks", |d| {
                d.unregister_callbacks();
                Ok(())
            })
            .await
        {
            warn!(error = %e, "Failed to unregister driver callbacks");
        }

        // A late join still has to be undone before release
        if let Some(pending) = self.pending_join.take() {
            match pending.settle(self.config.driver_timeout()).await {
                Ok(Ok(())) => self.joined = true,
                Ok(Err(_)) => {}
                Err(_) => warn!("Join still in flight at teardown, cannot leave"),
            }
        }

        if self.joined {
            self.joined = false;
            if let Err(e) = self
                .driver_call("leave", |d| {
                    d.leave();
                    Ok(())
                })
                .await
            {
                warn!(error = %e, "Failed to leave display server");
            }
        }

        if let Err(e) = self
            .driver_call("release", |d| {
                d.release();
                Ok(())
            })
            .await
        {
            warn!(error = %e, "Failed to release display resource");
        }

        info!(callsign = %self.callsign, reason = %reason, "Display resource released");
        self.state.transition(PlatformState::Failure);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Notifies the observer, then removes the session.
    fn detach(&mut self, name: &ClientName, reason: DetachReason) {
        self.client_observer.detached(name);
        if self.registry.remove(name).is_some() {
            info!(
                client = %name,
                reason = %reason,
                total_clients = self.registry.len(),
                "Client detached"
            );
        }
    }

    /// Detaches every client, in name order.
    fn detach_all(&mut self, reason: DetachReason) {
        for name in self.registry.names() {
            self.detach(&name, reason);
        }
    }

    async fn driver_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, PlatformError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DisplayDriver) -> Result<T, DriverError> + Send + 'static,
    {
        call_bounded(&self.driver, self.config.driver_timeout(), operation, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::driver::sim::SimulatedDriver;
    use crate::observer::Observers;

    /// Records client notifications in order.
    #[derive(Default)]
    struct ClientLog(Mutex<Vec<String>>);

    impl ClientObserver for ClientLog {
        fn attached(&self, client: &ClientHandle, _view: &ClientView) {
            self.0.lock().unwrap().push(format!("attached {}", client.name()));
        }

        fn detached(&self, name: &ClientName) {
            self.0.lock().unwrap().push(format!("detached {name}"));
        }
    }

    fn create_test_actor() -> (
        PlatformActor,
        mpsc::Sender<PlatformCommand>,
        Arc<SimulatedDriver>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let driver = Arc::new(SimulatedDriver::new());
        let config = PlatformConfig::default();
        driver.allocate(&config).unwrap();

        let observers = Observers::tracing();
        let state = StateMachine::new(PlatformState::Uninitialized, observers.state);
        let actor = PlatformActor::new(
            "Test".to_string(),
            cmd_rx,
            cmd_tx.downgrade(),
            driver.clone(),
            config,
            state,
            observers.clients,
        );
        (actor, cmd_tx, driver)
    }

    fn connect(actor: &mut PlatformActor, name: &str, raw: u64) -> ConnectStatus {
        actor.handle_client_connect(
            ConnectionHandle::new(raw),
            JoinSettings::new(name),
            ClientSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_connect_requires_operational() {
        let (mut actor, _tx, _driver) = create_test_actor();

        assert_eq!(connect(&mut actor, "netflix", 1), ConnectStatus::Rejected);
        assert!(actor.registry.is_empty());

        actor.handle_start().await.unwrap();
        assert_eq!(connect(&mut actor, "netflix", 1), ConnectStatus::Accepted);
        assert_eq!(actor.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_resolves_by_name() {
        let (mut actor, _tx, _driver) = create_test_actor();
        actor.handle_start().await.unwrap();
        connect(&mut actor, "netflix", 1);

        // Reported handle differs from the registered one
        actor.handle_client_disconnect(ConnectionHandle::new(9), &JoinSettings::new("netflix"));

        assert!(actor.registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_down_twice_releases_once() {
        let (mut actor, _tx, driver) = create_test_actor();
        actor.handle_start().await.unwrap();
        connect(&mut actor, "netflix", 1);

        actor.handle_close_down().await;
        actor.handle_close_down().await;

        assert_eq!(driver.stats().releases, 1);
        assert_eq!(driver.stats().leaves, 0);
        assert_eq!(actor.state.current(), PlatformState::Failure);
        assert!(actor.registry.is_empty());
    }

    #[tokio::test]
    async fn test_fault_keeps_resource() {
        let (mut actor, _tx, driver) = create_test_actor();
        actor.handle_start().await.unwrap();
        connect(&mut actor, "netflix", 1);

        actor.handle_fault("bus error");

        assert_eq!(actor.state.current(), PlatformState::Failure);
        assert!(actor.registry.is_empty());
        assert!(driver.is_allocated());
    }

    #[tokio::test]
    async fn test_join_registers_standby_once() {
        let (mut actor, _tx, driver) = create_test_actor();

        actor.handle_join().await.unwrap();
        actor.handle_join().await.unwrap();

        assert!(actor.joined);
        assert_eq!(driver.stats().joins, 1);
        assert_eq!(driver.stats().standby_unregistrations, 1);
    }

    #[tokio::test]
    async fn test_run_tears_down_when_handles_dropped() {
        let (actor, tx, driver) = create_test_actor();
        let task = tokio::spawn(actor.run());

        drop(tx);
        task.await.unwrap();

        assert!(!driver.is_allocated());
        assert_eq!(driver.stats().releases, 1);
    }

    #[tokio::test]
    async fn test_replacement_notifies_detach_before_attach() {
        let (mut actor, _tx, _driver) = create_test_actor();
        let log = Arc::new(ClientLog::default());
        let observer: Arc<dyn ClientObserver> = log.clone();
        actor.client_observer = observer;
        actor.handle_start().await.unwrap();

        connect(&mut actor, "netflix", 1);
        assert_eq!(connect(&mut actor, "netflix", 2), ConnectStatus::Accepted);

        assert_eq!(
            *log.0.lock().unwrap(),
            vec!["attached netflix", "detached netflix", "attached netflix"]
        );
        assert_eq!(actor.registry.len(), 1);
        assert_eq!(
            actor.registry.find(&ClientName::new("netflix")).unwrap().handle(),
            ConnectionHandle::new(2)
        );
    }

    #[tokio::test]
    async fn test_resolution_refused_while_deinitializing() {
        let (mut actor, _tx, driver) = create_test_actor();
        actor.handle_start().await.unwrap();
        let before = driver.resolution().unwrap();

        actor.state.transition(PlatformState::Deinitializing);
        let result = actor.handle_set_resolution(ScreenResolution::R720p).await;

        assert!(matches!(
            result,
            Err(PlatformError::InvalidState {
                state: PlatformState::Deinitializing,
                operation: "set_resolution"
            })
        ));
        assert_eq!(driver.resolution().unwrap(), before);
    }

    #[tokio::test]
    async fn test_timed_out_join_is_adopted_not_repeated() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let driver =
            Arc::new(SimulatedDriver::new().with_join_delay(Duration::from_millis(150)));
        let config = PlatformConfig {
            driver_timeout_ms: 20,
            ..PlatformConfig::default()
        };
        driver.allocate(&config).unwrap();
        let observers = Observers::tracing();
        let state = StateMachine::new(PlatformState::Uninitialized, observers.state);
        let mut actor = PlatformActor::new(
            "Test".to_string(),
            cmd_rx,
            cmd_tx.downgrade(),
            driver.clone(),
            config,
            state,
            observers.clients,
        );

        assert!(matches!(
            actor.handle_join().await,
            Err(PlatformError::Timeout { operation: "join" })
        ));
        assert!(actor.pending_join.is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;
        actor.handle_join().await.unwrap();

        assert!(actor.joined);
        assert!(actor.pending_join.is_none());
        assert_eq!(driver.stats().joins, 1);
        assert_eq!(driver.stats().standby_unregistrations, 1);
    }
}
