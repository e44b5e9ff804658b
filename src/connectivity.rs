//! Online/offline signal fed by the host platform.

use tokio::sync::watch;
use tracing::info;

pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        crate::metrics::set_online(online);
        Self { tx }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the signal. Returns true on an offline → online transition.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.tx.send_replace(online);
        if previous != online {
            crate::metrics::set_online(online);
            info!(online, "Connectivity changed");
        }
        !previous && online
    }

    #[must_use]
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
    async fn test_reconnect_is_reported_once() {
        let conn = Connectivity::new(false);
        let mut rx = conn.subscribe();

        assert!(conn.set_online(true));
        assert!(!conn.set_online(true));
        assert!(conn.is_online());

        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        assert!(!conn.set_online(false));
        assert!(!conn.is_online());
    }
}
