//! Cancellation plumbing shared by the periodic loops.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Receiving side of a loop's cancellation signal.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested or the owner is gone.
    pub async fn wait(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}

/// A spawned periodic loop together with its cancellation handle.
pub struct LoopHandle {
    name: &'static str,
    sender: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn `body` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = watch::channel(false);
        let join = tokio::spawn(body(ShutdownSignal { receiver }));
        Self { name, sender, join }
    }

    /// Signal cancellation and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.sender.send(true);
        if let Err(e) = self.join.await {
            if e.is_panic() {
                warn!("{} loop panicked: {}", self.name, e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_stop_unwinds_sleeping_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();
        let handle = LoopHandle::spawn("test", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.stop().await;
        let seen = iterations.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_signal_state() {
        let (sender, receiver) = watch::channel(false);
        let mut signal = ShutdownSignal { receiver };
        assert!(!signal.is_shutdown());
        sender.send(true).unwrap();
        signal.wait().await;
        assert!(signal.is_shutdown());
    }
}
