use std::sync::Arc;

use ferry_config::{Config, FaultPolicy, PluginConfig};
use ferry_metrics::{Filter, FilterError, Tags};
use ferry_system::{Addr, Controller, ServiceRunner};
use tokio::sync::mpsc;

use crate::accumulator::{Accumulator, MetricMaker};
use crate::buffer::MetricBuffer;
use crate::plugin::{Aggregator, Input, Output, PluginKind};
use crate::registry::{PluginContext, PluginRegistry, RegistryError};
use crate::services::{
    AggregatorLink, AggregatorService, FlushOutput, InputService, InputSettings, OutputRouter,
    OutputService, OutputSettings, Outbound, PipelineService, RunningProcessor,
};
use crate::stats::{PluginStats, Stats};

/// Number of gathered batches that may wait for the pipeline before inputs are slowed down.
const INGRESS_CAPACITY: usize = 100;

/// An error when building the agent from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A plugin could not be created.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The filter of a plugin is invalid.
    #[error("invalid filter for {kind} {name:?}")]
    Filter {
        /// The kind of plugin.
        kind: PluginKind,
        /// The name of the plugin.
        name: String,
        /// The filter's error.
        #[source]
        source: FilterError,
    },
}

fn filter(kind: PluginKind, config: &impl PluginConfig) -> Result<Filter, AgentError> {
    Filter::new(config.filter()).map_err(|source| AgentError::Filter {
        kind,
        name: config.name().to_owned(),
        source,
    })
}

fn resolve_hostname(config: &Config) -> Option<String> {
    let agent = config.agent();
    if agent.omit_hostname {
        return None;
    }

    if let Some(ref hostname) = agent.hostname {
        return Some(hostname.clone());
    }

    match hostname::get() {
        Ok(hostname) => Some(hostname.to_string_lossy().into_owned()),
        Err(error) => {
            ferry_log::warn!(
                error = &error as &dyn std::error::Error,
                "could not determine hostname",
            );
            None
        }
    }
}

struct InputSlot {
    input: Box<dyn Input>,
    accumulator: Accumulator,
    stats: Arc<PluginStats>,
    settings: InputSettings,
}

struct AggregatorSlot {
    aggregator: Box<dyn Aggregator>,
    accumulator: Accumulator,
    filter: Filter,
    drop_original: bool,
    period: std::time::Duration,
    stats: Arc<PluginStats>,
}

struct OutputSlot {
    output: Box<dyn Output>,
    buffer: Arc<MetricBuffer>,
    filter: Filter,
    stats: Arc<PluginStats>,
    settings: OutputSettings,
}

/// The result of a completed agent run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Number of metrics left in output buffers when the agent stopped.
    pub dropped: u64,
}

/// A configured pipeline of plugin instances, ready to run.
///
/// Creating the agent instantiates every configured plugin through the [`PluginRegistry`]. Any
/// invalid plugin configuration fails here, before the first metric is gathered.
pub struct Agent {
    inputs: Vec<InputSlot>,
    processors: Vec<RunningProcessor>,
    aggregators: Vec<AggregatorSlot>,
    outputs: Vec<OutputSlot>,
    policy: FaultPolicy,
    stats: Arc<Stats>,
}

impl Agent {
    /// Creates all plugin instances for the configuration.
    pub fn new(config: &Config, registry: &PluginRegistry) -> Result<Self, AgentError> {
        let agent = config.agent();
        let stats = Arc::new(Stats::new());
        let hostname = resolve_hostname(config);

        let mut global_tags: Tags = config.global_tags().clone();
        if let Some(ref hostname) = hostname {
            global_tags
                .entry("host".to_owned())
                .or_insert_with(|| hostname.clone());
        }

        let context = PluginContext {
            stats: Arc::clone(&stats),
            hostname,
        };

        let mut outputs = Vec::with_capacity(config.outputs().len());
        for output in config.outputs() {
            let instance = registry.create_output(&output.ty, &context, &output.options)?;
            let plugin_stats = stats.register(PluginKind::Output, output.name());
            let batch_size = output.metric_batch_size(agent);
            let buffer = MetricBuffer::new(
                output.metric_buffer_limit(agent),
                batch_size,
                Arc::clone(&plugin_stats),
            );

            outputs.push(OutputSlot {
                output: instance,
                buffer: Arc::new(buffer),
                filter: filter(PluginKind::Output, output)?,
                stats: plugin_stats,
                settings: OutputSettings {
                    batch_size,
                    flush_interval: output.flush_interval(agent),
                    flush_jitter: output.flush_jitter(agent),
                    max_retry_interval: config.max_retry_interval(),
                    shutdown_timeout: config.shutdown_timeout(),
                },
            });
        }

        let mut ordered: Vec<_> = config.processors().iter().collect();
        ordered.sort_by_key(|processor| (processor.order.is_none(), processor.order));

        let mut processors = Vec::with_capacity(ordered.len());
        for processor in ordered {
            let instance =
                registry.create_processor(&processor.ty, &context, &processor.options)?;
            processors.push(RunningProcessor::new(
                instance,
                filter(PluginKind::Processor, processor)?,
                stats.register(PluginKind::Processor, processor.name()),
            ));
        }

        let mut aggregators = Vec::with_capacity(config.aggregators().len());
        for aggregator in config.aggregators() {
            let instance =
                registry.create_aggregator(&aggregator.ty, &context, &aggregator.options)?;
            let plugin_stats = stats.register(PluginKind::Aggregator, aggregator.name());
            let maker = MetricMaker::new(
                &aggregator.maker,
                Filter::default(),
                global_tags.clone(),
                agent.precision,
            );

            aggregators.push(AggregatorSlot {
                aggregator: instance,
                accumulator: Accumulator::new(Arc::new(maker), Arc::clone(&plugin_stats)),
                filter: filter(PluginKind::Aggregator, aggregator)?,
                drop_original: aggregator.drop_original,
                period: aggregator.period(),
                stats: plugin_stats,
            });
        }

        let mut inputs = Vec::with_capacity(config.inputs().len());
        for input in config.inputs() {
            let instance = registry.create_input(&input.ty, &context, &input.options)?;
            let plugin_stats = stats.register(PluginKind::Input, input.name());
            let maker = MetricMaker::new(
                &input.maker,
                filter(PluginKind::Input, input)?,
                global_tags.clone(),
                agent.precision,
            );

            inputs.push(InputSlot {
                input: instance,
                accumulator: Accumulator::new(Arc::new(maker), Arc::clone(&plugin_stats)),
                stats: plugin_stats,
                settings: InputSettings {
                    interval: input.interval(agent),
                    jitter: input.collection_jitter(agent),
                },
            });
        }

        Ok(Self {
            inputs,
            processors,
            aggregators,
            outputs,
            policy: agent.processor_fault_policy,
            stats,
        })
    }

    /// Returns the statistics of all plugins.
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Starts all plugins.
    ///
    /// Outputs start first and inputs last, so no metric is gathered before its destination is
    /// running. The agent stops once a shutdown is requested through the controller.
    pub fn start(self, controller: &Controller) -> RunningAgent {
        let mut runner = ServiceRunner::new();
        let mut router = OutputRouter::new();
        let mut outputs = Vec::with_capacity(self.outputs.len());

        for slot in self.outputs {
            router.add(slot.filter, Arc::clone(&slot.buffer));
            let service = OutputService::new(
                slot.output,
                slot.buffer,
                slot.stats,
                slot.settings,
                controller.handle(),
            );
            outputs.push(runner.start(service));
        }

        let router = Arc::new(router);

        let mut aggregators = Vec::with_capacity(self.aggregators.len());
        for slot in self.aggregators {
            let service = AggregatorService::new(
                slot.aggregator,
                slot.accumulator,
                slot.period,
                Arc::clone(&router),
                slot.stats,
            );
            let addr = runner.start(service);
            aggregators.push(AggregatorLink::new(slot.filter, slot.drop_original, addr));
        }

        let input_count = self.inputs.len();
        let (ingress, ingress_rx) = mpsc::channel(INGRESS_CAPACITY);
        runner.start(PipelineService::new(
            self.processors,
            aggregators,
            router,
            ingress_rx,
            self.policy,
        ));

        for slot in self.inputs {
            runner.start(InputService::new(
                slot.input,
                slot.accumulator,
                slot.stats,
                slot.settings,
                ingress.clone(),
                controller.handle(),
            ));
        }

        ferry_log::info!(
            inputs = input_count,
            outputs = outputs.len(),
            "agent started",
        );

        RunningAgent {
            runner,
            outputs,
            stats: self.stats,
        }
    }

    /// Runs the agent until it has shut down.
    pub async fn run(self, controller: &Controller) -> ShutdownReport {
        self.start(controller).join().await
    }
}

/// An agent whose plugins are running.
pub struct RunningAgent {
    runner: ServiceRunner,
    outputs: Vec<Addr<Outbound>>,
    stats: Arc<Stats>,
}

impl RunningAgent {
    /// Returns the statistics of all plugins.
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Requests all outputs to write their buffered metrics now.
    pub fn flush(&self) {
        for output in &self.outputs {
            output.send(FlushOutput);
        }
    }

    /// Waits until all plugins have stopped.
    pub async fn join(self) -> ShutdownReport {
        let Self {
            runner,
            outputs,
            stats,
        } = self;

        drop(outputs);
        runner.join().await;

        let report = ShutdownReport {
            dropped: stats.total(PluginKind::Output, PluginStats::dropped_at_shutdown),
        };

        ferry_log::info!(dropped = report.dropped, "agent stopped");
        report
    }
}
