use std::io;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// The `timeout` may be `None`, in which case the shutdown is not graceful and services should
/// stop immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Determines how services are asked to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Services get the configured shutdown timeout to finish their work.
    Graceful,
    /// Services stop right away and drop remaining work.
    Immediate,
}

/// Notifies a service about an upcoming shutdown.
///
/// The handle is cheap to clone. Every service obtains its own handle from the [`Controller`]
/// and observes it in its main loop.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Waits for a shutdown to be requested.
    ///
    /// Resolves immediately if a shutdown was requested before. If the controller is dropped
    /// without requesting a shutdown, this never resolves.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            let current = *self.0.borrow_and_update();
            if let Some(shutdown) = current {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Waits for an immediate shutdown, which cuts off any graceful phase in progress.
    pub async fn immediate(&mut self) {
        loop {
            let current = *self.0.borrow_and_update();
            if let Some(Shutdown { timeout: None }) = current {
                return;
            }

            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Returns the current shutdown request, if any.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }
}

/// Coordinates the shutdown of all services.
///
/// The controller is created once at startup and passed explicitly to everything that needs to
/// observe shutdown. A shutdown is requested either programmatically with [`shutdown`] or by
/// process signals through [`listen_signals`].
///
/// [`shutdown`]: Self::shutdown
/// [`listen_signals`]: Self::listen_signals
#[derive(Debug)]
pub struct Controller {
    tx: watch::Sender<Option<Shutdown>>,
    timeout: Duration,
}

impl Controller {
    /// Creates a controller with the given graceful shutdown timeout.
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx, timeout }
    }

    /// Returns the configured graceful shutdown timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns a new handle to observe shutdown requests.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.tx.subscribe())
    }

    /// Requests all services to shut down.
    ///
    /// Requesting an immediate shutdown after a graceful one cuts the graceful phase short.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let timeout = match mode {
            ShutdownMode::Graceful => Some(self.timeout),
            ShutdownMode::Immediate => None,
        };

        self.tx.send_replace(Some(Shutdown { timeout }));
    }

    /// Listens for `SIGINT` and `SIGTERM` and requests a shutdown.
    ///
    /// The first signal starts a graceful shutdown, a second signal forces an immediate one.
    pub async fn listen_signals(&self) -> io::Result<()> {
        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        for mode in [ShutdownMode::Graceful, ShutdownMode::Immediate] {
            #[cfg(unix)]
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => (),
            }

            #[cfg(not(unix))]
            tokio::signal::ctrl_c().await?;

            match mode {
                ShutdownMode::Graceful => {
                    ferry_log::info!(timeout = ?self.timeout, "shutting down gracefully")
                }
                ShutdownMode::Immediate => ferry_log::warn!("shutting down immediately"),
            }

            self.shutdown(mode);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_notified_after_shutdown() {
        let controller = Controller::new(Duration::from_secs(5));
        let mut handle = controller.handle();
        assert_eq!(handle.get(), None);

        let waiter = tokio::spawn(async move { handle.notified().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.shutdown(ShutdownMode::Graceful);

        let shutdown = waiter.await.unwrap();
        assert_eq!(shutdown.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_handle_created_late_sees_shutdown() {
        let controller = Controller::new(Duration::from_secs(5));
        controller.shutdown(ShutdownMode::Immediate);

        let mut handle = controller.handle();
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
        handle.immediate().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_controller_never_notifies() {
        let controller = Controller::new(Duration::from_secs(5));
        let mut handle = controller.handle();
        drop(controller);

        let result = tokio::time::timeout(Duration::from_secs(60), handle.notified()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_after_graceful() {
        let controller = Controller::new(Duration::from_secs(5));
        let mut handle = controller.handle();
        controller.shutdown(ShutdownMode::Graceful);

        let waiter = tokio::spawn(async move { handle.immediate().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        controller.shutdown(ShutdownMode::Immediate);
        waiter.await.unwrap();
    }
}
