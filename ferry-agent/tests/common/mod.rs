//! Plugins and helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ferry_agent::{
    Accumulator, Aggregator, Input, Output, OutputSettings, PluginError, PluginRegistry, Processor,
};
use ferry_metrics::{DeliveryInfo, FieldValue, Fields, Metric, Tags};
use parking_lot::Mutex;

/// Returns a metric `test` with a `seq` field.
pub fn metric(seq: i64) -> Metric {
    let timestamp = Utc.timestamp_opt(1_700_000_000 + seq, 0).single().unwrap();
    Metric::new("test", timestamp).with_field("seq", seq)
}

/// Returns the `seq` fields of the metrics.
pub fn seqs(metrics: &[Metric]) -> Vec<i64> {
    metrics
        .iter()
        .filter_map(|metric| match metric.field("seq") {
            Some(FieldValue::Integer(seq)) => Some(*seq),
            _ => None,
        })
        .collect()
}

pub fn output_settings() -> OutputSettings {
    OutputSettings {
        batch_size: 10,
        flush_interval: Duration::from_secs(60),
        flush_jitter: Duration::ZERO,
        max_retry_interval: Duration::from_secs(60),
        shutdown_timeout: Duration::from_secs(1),
    }
}

/// All write attempts of a [`RecordingOutput`], including failed ones.
#[derive(Clone, Debug, Default)]
pub struct Writes(Arc<Mutex<Vec<Vec<Metric>>>>);

impl Writes {
    pub fn attempts(&self) -> Vec<Vec<Metric>> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    fn record(&self, metrics: &[Metric]) {
        // Untracked copies, the log must not hold up delivery notifications.
        let copies = metrics
            .iter()
            .map(|m| {
                let (tags, fields) = (m.tags().clone(), m.fields().clone());
                Metric::from_parts(m.name(), tags, fields, m.timestamp(), m.ty())
            })
            .collect();
        self.0.lock().push(copies);
    }
}

/// An output recording every write. The first `failures` writes fail.
pub struct RecordingOutput {
    writes: Writes,
    failures: usize,
}

impl RecordingOutput {
    pub fn new(writes: &Writes, failures: usize) -> Self {
        Self {
            writes: writes.clone(),
            failures,
        }
    }
}

#[async_trait]
impl Output for RecordingOutput {
    fn description() -> &'static str {
        "Records writes"
    }

    fn sample_config() -> &'static str {
        ""
    }

    async fn write(&mut self, metrics: &[Metric]) -> Result<(), PluginError> {
        self.writes.record(metrics);

        if self.failures > 0 {
            self.failures -= 1;
            return Err(PluginError::custom("connection refused"));
        }

        Ok(())
    }
}

/// An input emitting `cpu usage=42` on its first `limit` gathers.
pub struct CountingInput {
    limit: usize,
}

#[async_trait]
impl Input for CountingInput {
    fn description() -> &'static str {
        "Counts gathers"
    }

    fn sample_config() -> &'static str {
        ""
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        if self.limit == 0 {
            return Ok(());
        }
        self.limit -= 1;

        let fields = Fields::from([("usage".to_owned(), FieldValue::Float(42.0))]);
        let tags = Tags::from([("host".to_owned(), "a".to_owned())]);
        acc.add_gauge("cpu", fields, tags, None);
        Ok(())
    }
}

/// An input whose gathers take a long time.
pub struct SlowInput {
    duration: Duration,
}

#[async_trait]
impl Input for SlowInput {
    fn description() -> &'static str {
        "Gathers slowly"
    }

    fn sample_config() -> &'static str {
        ""
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        acc.add_metric(metric(0));
        tokio::time::sleep(self.duration).await;
        acc.add_metric(metric(1));
        Ok(())
    }
}

/// An input emitting one tracking group on its first gather and collecting delivery reports.
pub struct TrackingInput {
    sent: bool,
    reports: Arc<Mutex<Vec<DeliveryInfo>>>,
}

#[async_trait]
impl Input for TrackingInput {
    fn description() -> &'static str {
        "Tracks delivery"
    }

    fn sample_config() -> &'static str {
        ""
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        while let Some(info) = acc.delivered().try_recv() {
            self.reports.lock().push(info);
        }

        if !self.sent {
            self.sent = true;
            acc.add_tracking_group(vec![metric(1), metric(2)]);
        }

        Ok(())
    }
}

/// An input whose single gather emits one metric per second for `count` seconds.
pub struct StreamingInput {
    count: i64,
}

#[async_trait]
impl Input for StreamingInput {
    fn description() -> &'static str {
        "Streams metrics"
    }

    fn sample_config() -> &'static str {
        ""
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        for seq in 0..std::mem::take(&mut self.count) {
            acc.add_metric(metric(seq));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }
}

/// An input that emits one tracking group and waits for its delivery within the same gather,
/// like a queue consumer holding back its acknowledgement.
pub struct AckingInput {
    sent: bool,
    reports: Arc<Mutex<Vec<DeliveryInfo>>>,
}

#[async_trait]
impl Input for AckingInput {
    fn description() -> &'static str {
        "Acknowledges delivered metrics"
    }

    fn sample_config() -> &'static str {
        ""
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        if self.sent {
            return Ok(());
        }
        self.sent = true;

        acc.add_tracking_group(vec![metric(1)]);
        let delivered = tokio::time::timeout(Duration::from_secs(20), acc.delivered().recv());
        if let Ok(Some(info)) = delivered.await {
            self.reports.lock().push(info);
        }
        Ok(())
    }
}

/// A processor that always fails.
pub struct FailingProcessor;

impl Processor for FailingProcessor {
    fn description() -> &'static str {
        "Always fails"
    }

    fn sample_config() -> &'static str {
        ""
    }

    fn apply(&mut self, _: Vec<Metric>) -> Result<Vec<Metric>, PluginError> {
        Err(PluginError::custom("broken"))
    }
}

/// An aggregator emitting the number of metrics per period.
#[derive(Default)]
pub struct CountAggregator(i64);

impl Aggregator for CountAggregator {
    fn description() -> &'static str {
        "Counts metrics"
    }

    fn sample_config() -> &'static str {
        ""
    }

    fn add(&mut self, _: &Metric) {
        self.0 += 1;
    }

    fn push(&mut self, acc: &mut Accumulator) {
        let fields = Fields::from([("count".to_owned(), FieldValue::Integer(self.0))]);
        acc.add_fields("count", fields, Tags::new(), None);
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Shared state of the plugins in a [`registry`].
#[derive(Clone, Debug, Default)]
pub struct Recorders {
    pub writes: Writes,
    pub flaky_writes: Writes,
    pub reports: Arc<Mutex<Vec<DeliveryInfo>>>,
}

/// Returns a registry with all test plugins.
///
/// - `counting` input: five gathers of `cpu usage=42 host=a`
/// - `slow` input: gathers take two seconds
/// - `tracking` input: one tracking group of two metrics
/// - `streaming` input: one gather adding a metric per second for 30 seconds
/// - `acking` input: one tracked metric, waits for its delivery inside the gather
/// - `recording` output: always succeeds
/// - `flaky` output: the first write fails
/// - `failing` processor
/// - `count` aggregator
pub fn registry(recorders: &Recorders) -> PluginRegistry {
    let mut registry = PluginRegistry::new();

    registry.register_input("counting", "", "", |_, _| {
        Ok(Box::new(CountingInput { limit: 5 }))
    });

    registry.register_input("slow", "", "", |_, _| {
        Ok(Box::new(SlowInput {
            duration: Duration::from_secs(2),
        }))
    });

    let reports = Arc::clone(&recorders.reports);
    registry.register_input("tracking", "", "", move |_, _| {
        Ok(Box::new(TrackingInput {
            sent: false,
            reports: Arc::clone(&reports),
        }))
    });

    registry.register_input("streaming", "", "", |_, _| {
        Ok(Box::new(StreamingInput { count: 30 }))
    });

    let reports = Arc::clone(&recorders.reports);
    registry.register_input("acking", "", "", move |_, _| {
        Ok(Box::new(AckingInput {
            sent: false,
            reports: Arc::clone(&reports),
        }))
    });

    let writes = recorders.writes.clone();
    registry.register_output("recording", "", "", move |_, _| {
        Ok(Box::new(RecordingOutput::new(&writes, 0)))
    });

    let flaky_writes = recorders.flaky_writes.clone();
    registry.register_output("flaky", "", "", move |_, _| {
        Ok(Box::new(RecordingOutput::new(&flaky_writes, 1)))
    });

    registry.register_processor("failing", "", "", |_, _| Ok(Box::new(FailingProcessor)));
    registry.register_aggregator("count", "", "", |_, _| {
        Ok(Box::new(CountAggregator::default()))
    });

    registry
}
