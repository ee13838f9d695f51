//! Shutdown coordination.

use std::sync::Arc;
use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// The signal is latched: a listener created after [`Shutdown::trigger`]
/// still observes it.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

/// One task's view of the shutdown signal.
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered, immediately if it already was.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) {
        // Err means every `Shutdown` handle is gone; nothing can trigger anymore.
        if self.rx.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        a.recv().await;
        b.recv().await;
        assert!(a.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_before_subscribe_is_not_lost() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let mut late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_millis(100), late.recv())
            .await
            .expect("latched signal is seen by late subscribers");
    }

    #[tokio::test]
    async fn test_untriggered_listener_waits() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();
        assert!(tokio::time::timeout(Duration::from_millis(20), listener.recv())
            .await
            .is_err());
    }
}
