use tokio::sync::watch;
use tracing::debug;

use crate::ConnectivityState;

/// Observes transport connectivity transitions and fires its listeners once
/// per recovery, i.e. whenever the state returns to ready after a loss.
///
/// Loss itself is not an error: the store client keeps retrying on its own.
/// Recovery matters because a watch stream may have silently missed events
/// across the outage, so the owning cluster must resynchronize.
pub(crate) struct StateWatcher {
    disconnected: bool,
    listeners: Vec<Box<dyn Fn() + Send + Sync>>,
}

impl StateWatcher {
    pub(crate) fn new() -> Self {
        Self {
            disconnected: false,
            listeners: Vec::new(),
        }
    }

    pub(crate) fn add_listener(&mut self, listener: impl Fn() + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Consumes transitions until the client shuts down or the state channel
    /// is dropped.
    pub(crate) async fn watch(mut self, mut states: watch::Receiver<ConnectivityState>) {
        self.update_state(*states.borrow_and_update());
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state == ConnectivityState::Shutdown {
                return;
            }
            self.update_state(state);
        }
    }

    fn update_state(&mut self, state: ConnectivityState) {
        match state {
            ConnectivityState::Ready => {
                if self.disconnected {
                    self.disconnected = false;
                    self.notify();
                }
            }
            ConnectivityState::TransientFailure | ConnectivityState::Shutdown => {
                self.disconnected = true;
            }
        }
    }

    fn notify(&self) {
        debug!("connectivity recovered, notifying listeners");
        for listener in &self.listeners {
            listener();
        }
    }
}
