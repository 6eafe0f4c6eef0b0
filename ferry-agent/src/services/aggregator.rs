use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use ferry_metrics::Metric;
use ferry_system::{AsyncResponse, FromMessage, Interface, NoResponse, Receiver, Sender, Service};
use tokio::time::{Instant, MissedTickBehavior};

use crate::accumulator::Accumulator;
use crate::plugin::{Aggregator, PluginError};
use crate::services::router::OutputRouter;
use crate::stats::{PluginStats, RunnerState};

/// Adds metrics to the aggregation state.
#[derive(Debug)]
pub struct AddMetrics(pub Vec<Metric>);

/// Pushes the aggregation state one last time and stops the aggregator.
#[derive(Debug)]
pub struct FinalPush;

/// The messages accepted by an [`AggregatorService`].
#[derive(Debug)]
pub enum Aggregation {
    /// Adds metrics to the current period.
    AddMetrics(Vec<Metric>),
    /// Pushes and stops, responding once the pushed metrics were routed.
    FinalPush(Sender<()>),
}

impl Interface for Aggregation {}

impl FromMessage<AddMetrics> for Aggregation {
    type Response = NoResponse;

    fn from_message(message: AddMetrics, _: ()) -> Self {
        Self::AddMetrics(message.0)
    }
}

impl FromMessage<FinalPush> for Aggregation {
    type Response = AsyncResponse<()>;

    fn from_message(_: FinalPush, sender: Sender<()>) -> Self {
        Self::FinalPush(sender)
    }
}

/// Runs one aggregator and pushes its results at the end of every period.
///
/// Periods are measured from the start of the service. A metric belongs to the period in which it
/// reaches the aggregator. Pushed metrics go directly to the outputs and are not processed again.
pub struct AggregatorService {
    aggregator: Box<dyn Aggregator>,
    accumulator: Accumulator,
    period: Duration,
    router: Arc<OutputRouter>,
    stats: Arc<PluginStats>,
}

impl AggregatorService {
    /// Creates the service for an aggregator.
    pub fn new(
        aggregator: Box<dyn Aggregator>,
        accumulator: Accumulator,
        period: Duration,
        router: Arc<OutputRouter>,
        stats: Arc<PluginStats>,
    ) -> Self {
        Self {
            aggregator,
            accumulator,
            period,
            router,
            stats,
        }
    }

    fn fault(&self, payload: Box<dyn std::any::Any + Send>) {
        let error = PluginError::from_panic(payload);
        self.stats.add_fault();
        ferry_log::error!(
            error = &error as &dyn std::error::Error,
            aggregator = self.stats.name(),
            "aggregator failed",
        );
    }

    fn add(&mut self, metrics: Vec<Metric>) {
        for metric in metrics {
            let aggregator = &mut self.aggregator;
            let added = panic::catch_unwind(AssertUnwindSafe(|| aggregator.add(&metric)));
            if let Err(payload) = added {
                self.fault(payload);
            }
        }
    }

    fn push(&mut self) {
        let aggregator = &mut self.aggregator;
        let accumulator = &mut self.accumulator;

        let pushed = panic::catch_unwind(AssertUnwindSafe(|| aggregator.push(accumulator)));
        if let Err(payload) = pushed {
            self.fault(payload);
        }

        let aggregator = &mut self.aggregator;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| aggregator.reset())) {
            self.fault(payload);
        }

        let metrics = self.accumulator.take_metrics();
        ferry_log::trace!(
            aggregator = self.stats.name(),
            count = metrics.len(),
            "pushing aggregated metrics",
        );
        self.router.route(metrics);
    }
}

impl Service for AggregatorService {
    type Interface = Aggregation;

    async fn run(mut self, mut rx: Receiver<Self::Interface>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.stats.set_state(RunnerState::Running);

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => self.push(),
                message = rx.recv() => match message {
                    Some(Aggregation::AddMetrics(metrics)) => self.add(metrics),
                    Some(Aggregation::FinalPush(sender)) => {
                        self.push();
                        sender.send(());
                        break;
                    }
                    None => {
                        self.push();
                        break;
                    }
                },
            }
        }

        self.stats.set_state(RunnerState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ferry_config::MetricMakerConfig;
    use ferry_metrics::{FieldValue, Fields, Filter, Precision, Tags};
    use ferry_system::ServiceRunner;

    use super::*;
    use crate::accumulator::MetricMaker;
    use crate::buffer::MetricBuffer;
    use crate::plugin::PluginKind;

    /// Counts metrics per period.
    #[derive(Default)]
    struct Count(i64);

    impl Aggregator for Count {
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

    fn setup() -> (AggregatorService, Arc<MetricBuffer>) {
        let stats = Arc::new(PluginStats::new(PluginKind::Aggregator, "count"));
        let maker = MetricMaker::new(
            &MetricMakerConfig::default(),
            Filter::default(),
            Tags::new(),
            Precision::default(),
        );
        let accumulator = Accumulator::new(Arc::new(maker), Arc::clone(&stats));

        let buffer_stats = Arc::new(PluginStats::new(PluginKind::Output, "out"));
        let buffer = Arc::new(MetricBuffer::new(100, 10, buffer_stats));
        let mut router = OutputRouter::new();
        router.add(Filter::default(), Arc::clone(&buffer));

        let service = AggregatorService::new(
            Box::new(Count::default()),
            accumulator,
            Duration::from_secs(10),
            Arc::new(router),
            stats,
        );

        (service, buffer)
    }

    fn pushed_counts(buffer: &MetricBuffer) -> Vec<i64> {
        buffer
            .peek(buffer.len())
            .iter()
            .filter_map(|metric| match metric.field("count") {
                Some(FieldValue::Integer(count)) => Some(*count),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_per_period() {
        let (service, buffer) = setup();
        let mut runner = ServiceRunner::new();
        let addr = runner.start(service);

        let now = Utc::now();
        let metric = Metric::new("cpu", now).with_field("usage", 1.0);

        addr.send(AddMetrics(vec![metric.clone(), metric.clone()]));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(pushed_counts(&buffer), [2]);

        addr.send(AddMetrics(vec![metric]));
        addr.send(FinalPush).await.unwrap();
        assert_eq!(pushed_counts(&buffer), [2, 1]);

        drop(addr);
        runner.join().await;
    }
}
