use ferry_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics of the pipeline.
///
/// All counters are tagged with:
/// - `plugin`: the name of the plugin instance.
/// - `kind`: the plugin kind, such as `input` or `output`.
pub enum AgentCounters {
    /// Number of metrics accepted by an accumulator after the metric maker.
    MetricsGathered,
    /// Number of metrics written successfully by an output.
    MetricsWritten,
    /// Number of metrics lost, through buffer overflow or at shutdown.
    MetricsDropped,
    /// Number of failed write attempts of an output.
    OutputWriteErrors,
    /// Number of failed gathers of an input, including errors reported through the accumulator.
    InputGatherErrors,
    /// Number of errors and panics of processors.
    ProcessorFaults,
    /// Number of panics of aggregators.
    AggregatorFaults,
}

impl CounterMetric for AgentCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::MetricsGathered => "metrics.gathered",
            Self::MetricsWritten => "metrics.written",
            Self::MetricsDropped => "metrics.dropped",
            Self::OutputWriteErrors => "output.write_errors",
            Self::InputGatherErrors => "input.gather_errors",
            Self::ProcessorFaults => "processor.faults",
            Self::AggregatorFaults => "aggregator.faults",
        }
    }
}

/// Gauge metrics of the pipeline.
pub enum AgentGauges {
    /// Number of metrics in an output buffer, including the batch being written.
    ///
    /// This metric is tagged with:
    /// - `plugin`: the name of the output.
    OutputBufferSize,
}

impl GaugeMetric for AgentGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::OutputBufferSize => "output.buffer_size",
        }
    }
}

/// Timer metrics of the pipeline.
pub enum AgentTimers {
    /// Time spent in a single gather of an input.
    ///
    /// This metric is tagged with:
    /// - `plugin`: the name of the input.
    InputGatherDuration,
    /// Time spent in a single write of an output, including failed ones.
    ///
    /// This metric is tagged with:
    /// - `plugin`: the name of the output.
    OutputWriteDuration,
}

impl TimerMetric for AgentTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::InputGatherDuration => "input.gather_duration",
            Self::OutputWriteDuration => "output.write_duration",
        }
    }
}
