use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use ferry_common::time::sleep_jitter;
use ferry_metrics::Metric;
use ferry_statsd::metric;
use ferry_system::{Receiver, Service, Shutdown, ShutdownHandle};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::accumulator::Accumulator;
use crate::plugin::{Input, PluginError};
use crate::stats::{PluginStats, RunnerState};
use crate::statsd::AgentTimers;

/// Scheduling of an input.
#[derive(Clone, Copy, Debug)]
pub struct InputSettings {
    /// Time between the start of two gathers.
    pub interval: Duration,
    /// Maximum random delay before each gather.
    pub jitter: Duration,
}

/// Resolves once a shutdown was requested and its timeout has passed.
async fn cutoff(shutdown: &mut ShutdownHandle) {
    let Shutdown { timeout } = shutdown.notified().await;
    if let Some(timeout) = timeout {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => (),
            _ = shutdown.immediate() => (),
        }
    }
}

/// Runs one input on its interval and sends gathered metrics to the pipeline.
///
/// Metrics reach the pipeline while the gather is still running. Those that found the ingress
/// channel full are forwarded after the gather, waiting for capacity.
///
/// Errors and panics of the input are logged and counted, the service keeps gathering. At
/// shutdown, a gather in progress may finish until the shutdown timeout. After that it is cut off
/// and the metrics accumulated so far are still forwarded.
pub struct InputService {
    input: Box<dyn Input>,
    accumulator: Accumulator,
    stats: Arc<PluginStats>,
    settings: InputSettings,
    ingress: mpsc::Sender<Vec<Metric>>,
    shutdown: ShutdownHandle,
}

impl InputService {
    /// Creates the service for an input.
    pub fn new(
        input: Box<dyn Input>,
        accumulator: Accumulator,
        stats: Arc<PluginStats>,
        settings: InputSettings,
        ingress: mpsc::Sender<Vec<Metric>>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            input,
            accumulator: accumulator.with_ingress(ingress.clone()),
            stats,
            settings,
            ingress,
            shutdown,
        }
    }

    /// Runs a single gather. Returns `false` if it was cut off by the shutdown.
    async fn gather(&mut self, shutdown: &mut ShutdownHandle) -> bool {
        let start = Instant::now();

        let result = {
            let gather = AssertUnwindSafe(self.input.gather(&mut self.accumulator)).catch_unwind();
            tokio::select! {
                biased;

                result = gather => Some(result),
                _ = cutoff(shutdown) => None,
            }
        };

        metric!(
            timer(AgentTimers::InputGatherDuration) = start.elapsed(),
            plugin = self.stats.name(),
        );

        let error = match result {
            Some(Ok(Ok(()))) => return true,
            Some(Ok(Err(error))) => error,
            Some(Err(payload)) => PluginError::from_panic(payload),
            None => {
                ferry_log::error!(
                    input = self.stats.name(),
                    "input did not finish gathering within the shutdown timeout",
                );
                return false;
            }
        };

        self.stats.add_gather_error();
        ferry_log::error!(
            error = &error as &dyn Error,
            input = self.stats.name(),
            "failed to gather metrics",
        );
        true
    }

    /// Sends the metrics left in the accumulator to the pipeline, waiting if the pipeline is busy.
    async fn forward(&mut self) {
        let metrics = self.accumulator.take_metrics();
        if metrics.is_empty() {
            return;
        }

        if let Err(mpsc::error::SendError(metrics)) = self.ingress.send(metrics).await {
            ferry_log::error!(
                input = self.stats.name(),
                count = metrics.len(),
                "pipeline stopped, dropping metrics",
            );
            self.stats.add_dropped(metrics.len() as u64);
            metrics.into_iter().for_each(Metric::reject);
        }
    }
}

impl Service for InputService {
    type Interface = ();

    async fn run(mut self, _rx: Receiver<Self::Interface>) {
        let mut shutdown = self.shutdown.clone();

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.stats.set_state(RunnerState::Running);
        ferry_log::debug!(
            input = self.stats.name(),
            interval = ?self.settings.interval,
            "input started",
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = ticker.tick() => (),
            }

            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = sleep_jitter(self.settings.jitter) => (),
            }

            let completed = self.gather(&mut shutdown).await;
            self.forward().await;
            if !completed {
                break;
            }
        }

        self.stats.set_state(RunnerState::Stopping);
        self.forward().await;
        ferry_log::debug!(input = self.stats.name(), "input stopped");
        self.stats.set_state(RunnerState::Stopped);
    }
}
