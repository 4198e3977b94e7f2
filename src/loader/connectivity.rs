//! Online/offline signal.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared connectivity flag with change notifications
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state; subscribers wake only on an actual change
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if changed {
            info!(online, "Connectivity changed");
        }
    }

    /// Receiver that observes transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!connectivity.is_online());
    }
}
