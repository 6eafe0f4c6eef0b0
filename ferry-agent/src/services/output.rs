use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use ferry_common::time::sleep_jitter;
use ferry_common::{RetryBackoff, SleepHandle};
use ferry_statsd::metric;
use ferry_system::{FromMessage, Interface, NoResponse, Receiver, Service, ShutdownHandle};
use futures::FutureExt;
use tokio::time::{Instant, MissedTickBehavior};

use crate::buffer::{Batch, MetricBuffer};
use crate::plugin::{Output, PluginError};
use crate::stats::{PluginStats, RunnerState};
use crate::statsd::AgentTimers;

/// Requests an immediate flush of the output buffer.
#[derive(Debug)]
pub struct FlushOutput;

/// The messages accepted by an [`OutputService`].
#[derive(Debug)]
pub enum Outbound {
    /// Writes all buffered metrics, unless a retry is pending.
    Flush,
}

impl Interface for Outbound {}

impl FromMessage<FlushOutput> for Outbound {
    type Response = NoResponse;

    fn from_message(_: FlushOutput, _: ()) -> Self {
        Self::Flush
    }
}

/// Flush and retry settings of an output.
#[derive(Clone, Copy, Debug)]
pub struct OutputSettings {
    /// Maximum number of metrics per write.
    pub batch_size: usize,
    /// Time between two regular flushes.
    pub flush_interval: Duration,
    /// Maximum random delay before each regular flush.
    pub flush_jitter: Duration,
    /// Upper bound for the delay between retries.
    pub max_retry_interval: Duration,
    /// Time the final flush may take at shutdown.
    pub shutdown_timeout: Duration,
}

/// How the main loop of the output ended.
enum Drain {
    /// Flush the remaining metrics until the deadline.
    Until(Instant),
    /// Stop without flushing.
    Skip,
}

/// Writes the contents of one output buffer to its output.
///
/// The buffer is flushed on the flush interval and whenever a full batch is available. A failed
/// batch returns to the front of the buffer and is retried with exponential backoff. While a retry
/// is pending, no other flush takes place. Once the buffer is closed at shutdown, the remaining
/// metrics are flushed for at most the shutdown timeout. Whatever is left afterwards is counted as
/// dropped.
pub struct OutputService {
    output: Box<dyn Output>,
    buffer: Arc<MetricBuffer>,
    stats: Arc<PluginStats>,
    settings: OutputSettings,
    backoff: RetryBackoff,
    retry: SleepHandle,
    shutdown: ShutdownHandle,
}

impl OutputService {
    /// Creates the service for an output.
    pub fn new(
        output: Box<dyn Output>,
        buffer: Arc<MetricBuffer>,
        stats: Arc<PluginStats>,
        settings: OutputSettings,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            output,
            buffer,
            stats,
            backoff: RetryBackoff::new(settings.max_retry_interval),
            retry: SleepHandle::idle(),
            settings,
            shutdown,
        }
    }

    /// Connects the output, retrying until it succeeds or a shutdown is requested.
    async fn connect(&mut self, shutdown: &mut ShutdownHandle) -> bool {
        loop {
            let connect = AssertUnwindSafe(self.output.connect()).catch_unwind();
            let result = tokio::select! {
                biased;

                _ = shutdown.notified() => return false,
                result = connect => result,
            };

            let error = match result {
                Ok(Ok(())) => {
                    self.backoff.reset();
                    return true;
                }
                Ok(Err(error)) => error,
                Err(payload) => PluginError::from_panic(payload),
            };

            let delay = self.backoff.next_backoff();
            ferry_log::error!(
                error = &error as &dyn Error,
                output = self.stats.name(),
                retry_in = ?delay,
                "failed to connect output",
            );

            tokio::select! {
                biased;

                _ = shutdown.notified() => return false,
                _ = tokio::time::sleep(delay) => (),
            }
        }
    }

    async fn run_loop(
        &mut self,
        rx: &mut Receiver<Outbound>,
        immediate: &mut ShutdownHandle,
    ) -> Drain {
        let interval = self.settings.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let buffer = Arc::clone(&self.buffer);

        loop {
            tokio::select! {
                biased;

                _ = buffer.closed() => break,
                _ = immediate.immediate() => return Drain::Skip,
                _ = &mut self.retry => {
                    self.retry.reset();
                    self.flush().await;
                }
                _ = ticker.tick(), if self.retry.is_idle() => {
                    sleep_jitter(self.settings.flush_jitter).await;
                    self.flush().await;
                }
                _ = buffer.batch_ready(), if self.retry.is_idle() => {
                    self.flush().await;
                }
                Some(Outbound::Flush) = rx.recv(), if self.retry.is_idle() => {
                    self.flush().await;
                }
            }
        }

        Drain::Until(Instant::now() + self.settings.shutdown_timeout)
    }

    /// Writes the metrics buffered at the start of the flush in batches.
    ///
    /// Returns `false` if a write failed. The retry is scheduled in that case.
    async fn flush(&mut self) -> bool {
        let mut remaining = self.buffer.len();

        while remaining > 0 {
            let batch = match self.buffer.batch(self.settings.batch_size.min(remaining)) {
                Ok(batch) => batch,
                Err(error) => {
                    ferry_log::error!(
                        error = &error as &dyn Error,
                        output = self.stats.name(),
                        "cannot take batch from buffer",
                    );
                    return false;
                }
            };

            if batch.is_empty() {
                self.finish(batch, true);
                break;
            }

            let count = batch.len();
            if !self.write(batch).await {
                return false;
            }
            remaining = remaining.saturating_sub(count);
        }

        true
    }

    async fn write(&mut self, batch: Batch) -> bool {
        let start = Instant::now();
        let result = AssertUnwindSafe(self.output.write(batch.metrics()))
            .catch_unwind()
            .await;

        metric!(
            timer(AgentTimers::OutputWriteDuration) = start.elapsed(),
            plugin = self.stats.name(),
        );

        let error = match result {
            Ok(Ok(())) => {
                let count = batch.len() as u64;
                self.finish(batch, true);
                self.stats.add_written(count);
                self.backoff.reset();
                return true;
            }
            Ok(Err(error)) => error,
            Err(payload) => PluginError::from_panic(payload),
        };

        self.finish(batch, false);
        self.stats.add_write_error();

        let delay = self.backoff.next_backoff();
        ferry_log::error!(
            error = &error as &dyn Error,
            output = self.stats.name(),
            attempt = self.backoff.attempt(),
            retry_in = ?delay,
            "failed to write metrics",
        );
        self.retry.set(delay);

        false
    }

    fn finish(&self, batch: Batch, accepted: bool) {
        let result = if accepted {
            self.buffer.accept(batch)
        } else {
            self.buffer.reject(batch)
        };

        if let Err(error) = result {
            ferry_log::error!(
                error = &error as &dyn Error,
                output = self.stats.name(),
                "cannot return batch to buffer",
            );
        }
    }

    /// Flushes until the buffer is empty, waiting for retries in between.
    async fn final_flush(&mut self) {
        while !self.retry.is_idle() || !self.buffer.is_empty() {
            if !self.retry.is_idle() {
                (&mut self.retry).await;
                self.retry.reset();
            }

            if !self.flush().await && self.retry.is_idle() {
                break;
            }
        }

        let closed = AssertUnwindSafe(self.output.close()).catch_unwind().await;
        let error = match closed {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(payload) => PluginError::from_panic(payload),
        };

        ferry_log::warn!(
            error = &error as &dyn Error,
            output = self.stats.name(),
            "failed to close output",
        );
    }
}

impl Service for OutputService {
    type Interface = Outbound;

    async fn run(mut self, mut rx: Receiver<Self::Interface>) {
        let mut shutdown = self.shutdown.clone();
        let mut immediate = self.shutdown.clone();

        self.stats.set_state(RunnerState::Started);

        let drain = if self.connect(&mut shutdown).await {
            self.stats.set_state(RunnerState::Running);
            self.run_loop(&mut rx, &mut immediate).await
        } else {
            let buffer = Arc::clone(&self.buffer);
            tokio::select! {
                _ = buffer.closed() => (),
                _ = immediate.immediate() => (),
            }
            Drain::Skip
        };

        self.stats.set_state(RunnerState::Stopping);

        if let Drain::Until(deadline) = drain {
            tokio::select! {
                biased;

                _ = immediate.immediate() => (),
                _ = tokio::time::sleep_until(deadline) => {
                    ferry_log::error!(
                        output = self.stats.name(),
                        "final flush did not finish within the shutdown timeout",
                    );
                }
                _ = self.final_flush() => (),
            }
        }

        let dropped = self.buffer.drain_dropped();
        if dropped > 0 {
            ferry_log::error!(
                output = self.stats.name(),
                dropped,
                "metrics were dropped at shutdown",
            );
        }

        self.stats.set_state(RunnerState::Stopped);
    }
}
