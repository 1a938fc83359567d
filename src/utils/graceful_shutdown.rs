use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use tokio::{signal, sync::broadcast};

use crate::{ports::dispatcher::TaskDispatcher, reactor::ReactorHandle};

/// Why the server is going down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered programmatically
    Requested,
}

/// Turns OS signals into a single shutdown event: every watched reactor is
/// stopped and subscribers are notified once.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    reactors: Mutex<Vec<ReactorHandle>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager with default 5-second drain timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            reactors: Mutex::new(Vec::new()),
            drain_timeout,
        }
    }

    /// Stop this reactor when shutdown begins.
    pub fn watch_reactor(&self, handle: ReactorHandle) {
        if self.is_shutdown_initiated() {
            handle.stop();
            return;
        }
        self.reactors.lock().push(handle);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        tracing::info!("Shutdown manually triggered: {:?}", reason);
        self.initiate_shutdown(reason);
    }

    /// Wait for SIGINT or SIGTERM and start the shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.initiate_shutdown(ShutdownReason::Interrupt);
            }
            result = wait_for_sigterm() => {
                result.wrap_err("Failed to register SIGTERM handler")?;
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.initiate_shutdown(ShutdownReason::Terminate);
            }
        }
        Ok(())
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Shutdown already initiated, ignoring signal");
            return;
        }

        for handle in self.reactors.lock().drain(..) {
            handle.stop();
        }
        // No subscribers is fine: the reactors are already stopping.
        let _ = self.shutdown_tx.send(reason);
    }

    /// Wait indefinitely for the shutdown event.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return ShutdownReason::Requested;
        }
        match receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => ShutdownReason::Requested,
        }
    }

    /// Stop a worker pool without blocking the runtime, cancelling queued
    /// tasks. Returns `true` when every worker exited within the timeout.
    pub async fn drain_dispatcher(&self, dispatcher: Arc<dyn TaskDispatcher>) -> bool {
        let timeout = self.drain_timeout;
        match tokio::task::spawn_blocking(move || dispatcher.shutdown(true, timeout)).await {
            Ok(clean) => {
                if !clean {
                    tracing::warn!("Workers still busy after {:?}; exiting anyway", timeout);
                }
                clean
            }
            Err(e) => {
                tracing::error!("Dispatcher shutdown task failed: {}", e);
                false
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> std::io::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapters::ThreadedTaskDispatcher, reactor::Reactor};

    #[tokio::test]
    async fn test_trigger_stops_watched_reactors() {
        let shutdown = GracefulShutdown::new();
        let reactor = Reactor::new().unwrap();
        shutdown.watch_reactor(reactor.handle());

        let mut receiver = shutdown.subscribe();
        shutdown.trigger_shutdown(ShutdownReason::Requested);

        assert!(shutdown.is_shutdown_initiated());
        assert!(reactor.handle().is_stopping());
        assert_eq!(receiver.try_recv().unwrap(), ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_second_trigger_is_ignored() {
        let shutdown = GracefulShutdown::new();
        let mut receiver = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Terminate);
        shutdown.trigger_shutdown(ShutdownReason::Interrupt);

        assert_eq!(receiver.try_recv().unwrap(), ShutdownReason::Terminate);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reactor_watched_after_shutdown_is_stopped() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger_shutdown(ShutdownReason::Requested);

        let reactor = Reactor::new().unwrap();
        shutdown.watch_reactor(reactor.handle());
        assert!(reactor.handle().is_stopping());
        assert_eq!(
            shutdown.wait_for_shutdown_signal().await,
            ShutdownReason::Requested
        );
    }

    #[tokio::test]
    async fn test_drain_dispatcher() {
        let shutdown = GracefulShutdown::with_timeout(Duration::from_secs(2));
        let pool: Arc<dyn TaskDispatcher> = Arc::new(ThreadedTaskDispatcher::with_threads(2));

        assert!(shutdown.drain_dispatcher(pool).await);
    }
}
