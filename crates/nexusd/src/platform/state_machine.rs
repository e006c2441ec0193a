//! Lifecycle state machine.
//!
//! Holds the current [`PlatformState`] and fans every transition out to the
//! state observer and to a watch channel that handles read without a round
//! trip through the actor. Legality of a transition is the actor's call;
//! this layer applies whatever it is given, because the driver can report
//! states the platform did not ask for.

use std::sync::Arc;

use nexus_core::PlatformState;
use tokio::sync::watch;
use tracing::info;

use crate::observer::StateObserver;

pub struct StateMachine {
    current: PlatformState,
    publisher: watch::Sender<PlatformState>,
    observer: Arc<dyn StateObserver>,
}

impl StateMachine {
    /// Creates a machine in `initial`. No notification is sent for the
    /// initial state.
    pub fn new(initial: PlatformState, observer: Arc<dyn StateObserver>) -> Self {
        let (publisher, _) = watch::channel(initial);
        Self {
            current: initial,
            publisher,
            observer,
        }
    }

    pub fn current(&self) -> PlatformState {
        self.current
    }

    /// Moves to `next`, publishes it, then notifies the observer.
    pub fn transition(&mut self, next: PlatformState) {
        let previous = self.current;
        self.current = next;
        self.publisher.send_replace(next);

        info!(from = %previous, to = %next, "Platform state changed");
        self.observer.state_changed(next);
    }

    /// A receiver that always holds the latest state.
    pub fn subscribe(&self) -> watch::Receiver<PlatformState> {
        self.publisher.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PlatformState>>);

    impl StateObserver for Recorder {
        fn state_changed(&self, state: PlatformState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn test_initial_state_not_notified() {
        let recorder = Arc::new(Recorder::default());
        let machine = StateMachine::new(PlatformState::Uninitialized, recorder.clone());

        assert_eq!(machine.current(), PlatformState::Uninitialized);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transition_notifies_and_publishes() {
        let recorder = Arc::new(Recorder::default());
        let mut machine = StateMachine::new(PlatformState::Uninitialized, recorder.clone());
        let rx = machine.subscribe();

        machine.transition(PlatformState::Initializing);
        machine.transition(PlatformState::Operational);

        assert_eq!(machine.current(), PlatformState::Operational);
        assert_eq!(*rx.borrow(), PlatformState::Operational);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![PlatformState::Initializing, PlatformState::Operational]
        );
    }

    #[test]
    fn test_no_transition_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let mut machine = StateMachine::new(PlatformState::Operational, recorder.clone());

        machine.transition(PlatformState::Uninitialized);
        machine.transition(PlatformState::Uninitialized);

        assert_eq!(machine.current(), PlatformState::Uninitialized);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }
}
