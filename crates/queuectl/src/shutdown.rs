//! Signal-safe shutdown flag shared between the signal task and the
//! worker loop.
//!
//! SIGINT and SIGTERM only set the flag; they never abort an in-flight
//! child process. The loop polls [`ShutdownFlag::is_set`] between
//! iterations and uses [`ShutdownFlag::notified`] to cut poll sleeps
//! short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to a process-wide shutdown request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<Inner>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every pending [`notified`](Self::notified).
    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested. Returns immediately if
    /// it already was.
    pub async fn notified(&self) {
        let notified = self.inner.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }

    /// Spawn a background task that sets the flag on SIGINT or SIGTERM.
    ///
    /// Must be called from within a tokio runtime. Repeated signals are
    /// absorbed by the same task; none of them kill the process directly.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let flag = self.clone();
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                };
                info!(signal = name, "shutdown requested");
                flag.trigger();
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_unset() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
    }

    #[tokio::test]
    async fn notified_returns_immediately_when_already_set() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        tokio::time::timeout(Duration::from_millis(50), flag.notified())
            .await
            .expect("notified() should not block after trigger()");
    }

    #[tokio::test]
    async fn trigger_wakes_a_waiting_task() {
        let flag = ShutdownFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.notified().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(flag.is_set());
    }
}
