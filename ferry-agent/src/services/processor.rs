use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ferry_config::FaultPolicy;
use ferry_metrics::{Filter, Metric};
use ferry_system::{Addr, Receiver, Service};
use tokio::sync::mpsc;

use crate::plugin::{PluginError, Processor};
use crate::services::aggregator::{AddMetrics, Aggregation, FinalPush};
use crate::services::router::OutputRouter;
use crate::stats::{PluginStats, RunnerState};

/// A processor in the chain together with its filter.
pub struct RunningProcessor {
    processor: Box<dyn Processor>,
    filter: Filter,
    stats: Arc<PluginStats>,
}

impl RunningProcessor {
    /// Wraps a processor instance.
    pub fn new(processor: Box<dyn Processor>, filter: Filter, stats: Arc<PluginStats>) -> Self {
        Self {
            processor,
            filter,
            stats,
        }
    }

    /// Runs the processor on the selected metrics and passes all others through.
    ///
    /// Consecutive selected metrics are handed to the processor together, so the relative order of
    /// selected and unselected metrics is preserved.
    fn process(&mut self, metrics: Vec<Metric>, policy: FaultPolicy) -> Vec<Metric> {
        if self.filter.is_empty() {
            return self.apply(metrics, policy);
        }

        let mut output = Vec::with_capacity(metrics.len());
        let mut selected = Vec::new();

        for mut metric in metrics {
            if !self.filter.select(&metric) {
                if !selected.is_empty() {
                    output.extend(self.apply(std::mem::take(&mut selected), policy));
                }
                output.push(metric);
                continue;
            }

            self.filter.modify(&mut metric);
            if !metric.fields().is_empty() {
                selected.push(metric);
            }
        }

        if !selected.is_empty() {
            output.extend(self.apply(selected, policy));
        }

        output
    }

    fn apply(&mut self, metrics: Vec<Metric>, policy: FaultPolicy) -> Vec<Metric> {
        let original = metrics.clone();
        let processor = &mut self.processor;

        let error = match panic::catch_unwind(AssertUnwindSafe(|| processor.apply(metrics))) {
            Ok(Ok(metrics)) => return metrics,
            Ok(Err(error)) => error,
            Err(payload) => PluginError::from_panic(payload),
        };

        self.stats.add_fault();

        match policy {
            FaultPolicy::FailOpen => {
                ferry_log::error!(
                    error = &error as &dyn Error,
                    processor = self.stats.name(),
                    "processor failed, passing metrics through unchanged",
                );
                original
            }
            FaultPolicy::FailClosed => {
                ferry_log::error!(
                    error = &error as &dyn Error,
                    processor = self.stats.name(),
                    count = original.len(),
                    "processor failed, dropping metrics",
                );
                self.stats.add_dropped(original.len() as u64);
                original.into_iter().for_each(Metric::reject);
                Vec::new()
            }
        }
    }
}

/// The connection from the pipeline to a running aggregator.
#[derive(Debug)]
pub struct AggregatorLink {
    filter: Filter,
    drop_original: bool,
    addr: Addr<Aggregation>,
}

impl AggregatorLink {
    /// Creates a link to the aggregator at `addr`.
    pub fn new(filter: Filter, drop_original: bool, addr: Addr<Aggregation>) -> Self {
        Self {
            filter,
            drop_original,
            addr,
        }
    }
}

/// Moves metrics from the inputs through processors and aggregators to the outputs.
///
/// Metrics are processed in the order they arrive. Once all inputs have stopped, every aggregator
/// pushes a final time and the output buffers are closed.
pub struct PipelineService {
    processors: Vec<RunningProcessor>,
    aggregators: Vec<AggregatorLink>,
    router: Arc<OutputRouter>,
    ingress: mpsc::Receiver<Vec<Metric>>,
    policy: FaultPolicy,
}

impl PipelineService {
    /// Creates the pipeline. Processors run in the given order.
    pub fn new(
        processors: Vec<RunningProcessor>,
        aggregators: Vec<AggregatorLink>,
        router: Arc<OutputRouter>,
        ingress: mpsc::Receiver<Vec<Metric>>,
        policy: FaultPolicy,
    ) -> Self {
        Self {
            processors,
            aggregators,
            router,
            ingress,
            policy,
        }
    }

    fn handle(&mut self, mut metrics: Vec<Metric>) {
        for processor in &mut self.processors {
            if metrics.is_empty() {
                return;
            }
            metrics = processor.process(metrics, self.policy);
        }

        if self.aggregators.is_empty() {
            self.router.route(metrics);
            return;
        }

        let mut forward = Vec::with_capacity(metrics.len());
        let mut copies = vec![Vec::new(); self.aggregators.len()];

        for metric in metrics {
            let mut keep = true;

            for (link, copies) in self.aggregators.iter().zip(&mut copies) {
                if !link.filter.select(&metric) {
                    continue;
                }

                let mut copy = metric.clone();
                link.filter.modify(&mut copy);
                if !copy.fields().is_empty() {
                    copies.push(copy);
                }

                keep &= !link.drop_original;
            }

            if keep {
                forward.push(metric);
            }
        }

        for (link, copies) in self.aggregators.iter().zip(copies) {
            if !copies.is_empty() {
                link.addr.send(AddMetrics(copies));
            }
        }

        self.router.route(forward);
    }
}

impl Service for PipelineService {
    type Interface = ();

    async fn run(mut self, _rx: Receiver<Self::Interface>) {
        for processor in &self.processors {
            processor.stats.set_state(RunnerState::Running);
        }

        while let Some(metrics) = self.ingress.recv().await {
            self.handle(metrics);
        }

        ferry_log::debug!("all inputs stopped, pushing aggregators");
        for link in &self.aggregators {
            if link.addr.send(FinalPush).await.is_err() {
                ferry_log::warn!("aggregator stopped before its final push");
            }
        }

        for processor in &self.processors {
            processor.stats.set_state(RunnerState::Stopped);
        }

        self.router.close();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ferry_metrics::FilterConfig;

    use super::*;
    use crate::plugin::PluginKind;

    /// Tags every metric with its position in the batch.
    struct Numbering;

    impl Processor for Numbering {
        fn description() -> &'static str {
            "Numbers metrics"
        }

        fn sample_config() -> &'static str {
            ""
        }

        fn apply(&mut self, metrics: Vec<Metric>) -> Result<Vec<Metric>, PluginError> {
            Ok(metrics
                .into_iter()
                .enumerate()
                .map(|(i, metric)| metric.with_tag("n", i.to_string()))
                .collect())
        }
    }

    struct Failing;

    impl Processor for Failing {
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

    struct Panicking;

    impl Processor for Panicking {
        fn description() -> &'static str {
            "Always panics"
        }

        fn sample_config() -> &'static str {
            ""
        }

        fn apply(&mut self, _: Vec<Metric>) -> Result<Vec<Metric>, PluginError> {
            panic!("processor bug");
        }
    }

    fn running(processor: impl Processor, filter: FilterConfig) -> RunningProcessor {
        let stats = Arc::new(PluginStats::new(PluginKind::Processor, "test"));
        RunningProcessor::new(Box::new(processor), Filter::new(&filter).unwrap(), stats)
    }

    fn metrics(names: &[&str]) -> Vec<Metric> {
        let now = Utc::now();
        names
            .iter()
            .map(|name| Metric::new(*name, now).with_field("value", 1i64))
            .collect()
    }

    fn names(metrics: &[Metric]) -> Vec<&str> {
        metrics.iter().map(|metric| metric.name()).collect()
    }

    #[test]
    fn test_unselected_metrics_keep_position() {
        let filter = FilterConfig {
            namepass: vec!["cpu".to_owned()],
            ..Default::default()
        };
        let mut processor = running(Numbering, filter);

        let input = metrics(&["cpu", "cpu", "mem", "cpu"]);
        let output = processor.process(input, FaultPolicy::FailOpen);

        assert_eq!(names(&output), ["cpu", "cpu", "mem", "cpu"]);
        assert_eq!(output[1].tag("n"), Some("1"));
        assert_eq!(output[2].tag("n"), None);
        assert_eq!(output[3].tag("n"), Some("0"));
    }

    #[test]
    fn test_fail_open_passes_batch() {
        let mut processor = running(Failing, FilterConfig::default());
        let output = processor.process(metrics(&["cpu", "mem"]), FaultPolicy::FailOpen);

        assert_eq!(names(&output), ["cpu", "mem"]);
        assert_eq!(processor.stats.faults(), 1);
        assert_eq!(processor.stats.dropped(), 0);
    }

    #[test]
    fn test_fail_closed_drops_batch() {
        let mut processor = running(Failing, FilterConfig::default());
        let output = processor.process(metrics(&["cpu", "mem"]), FaultPolicy::FailClosed);

        assert!(output.is_empty());
        assert_eq!(processor.stats.faults(), 1);
        assert_eq!(processor.stats.dropped(), 2);
    }

    #[test]
    fn test_panic_is_a_fault() {
        let mut processor = running(Panicking, FilterConfig::default());
        let output = processor.process(metrics(&["cpu"]), FaultPolicy::FailOpen);

        assert_eq!(names(&output), ["cpu"]);
        assert_eq!(processor.stats.faults(), 1);
    }
}
