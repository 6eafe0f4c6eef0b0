use std::sync::Arc;

use async_trait::async_trait;
use ferry_agent::{
    Accumulator, Input, Plugin, PluginContext, PluginError, PluginKind, PluginStats, Stats,
};
use ferry_metrics::{FieldValue, Fields, Tags};
use serde::Deserialize;

/// Options of the [`Internal`] input.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InternalOptions {
    /// Emit one `internal_gather` and `internal_write` metric per plugin.
    pub per_plugin: bool,
}

/// Reports the agent's own counters as metrics.
///
/// Emits `internal_agent` with totals of all plugins and, if enabled, `internal_gather` per input
/// and `internal_write` per output.
#[derive(Debug)]
pub struct Internal {
    stats: Arc<Stats>,
    per_plugin: bool,
}

fn fields<const N: usize>(values: [(&str, u64); N]) -> Fields {
    values
        .into_iter()
        .map(|(key, value)| (key.to_owned(), FieldValue::Unsigned(value)))
        .collect()
}

#[async_trait]
impl Input for Internal {
    fn description() -> &'static str {
        "Collect statistics about the agent itself"
    }

    fn sample_config() -> &'static str {
        "\
  # Emit metrics per input and output in addition to the totals.
  per_plugin: true
"
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        let stats = &self.stats;
        let plugins = stats.plugins();

        let agent = fields([
            ("metrics_gathered", stats.total(PluginKind::Input, PluginStats::gathered)),
            ("metrics_written", stats.total(PluginKind::Output, PluginStats::written)),
            ("metrics_dropped", plugins.iter().map(|p| p.dropped()).sum()),
            ("gather_errors", stats.total(PluginKind::Input, PluginStats::gather_errors)),
            ("write_errors", stats.total(PluginKind::Output, PluginStats::write_errors)),
        ]);
        acc.add_gauge("internal_agent", agent, Tags::new(), None);

        if !self.per_plugin {
            return Ok(());
        }

        for plugin in &plugins {
            match plugin.kind() {
                PluginKind::Input => {
                    let values = fields([
                        ("metrics_gathered", plugin.gathered()),
                        ("gather_errors", plugin.gather_errors()),
                    ]);
                    let tags = Tags::from([("input".to_owned(), plugin.name().to_owned())]);
                    acc.add_gauge("internal_gather", values, tags, None);
                }
                PluginKind::Output => {
                    let values = fields([
                        ("metrics_written", plugin.written()),
                        ("metrics_dropped", plugin.dropped()),
                        ("write_errors", plugin.write_errors()),
                        ("buffer_size", plugin.buffer_size()),
                    ]);
                    let tags = Tags::from([("output".to_owned(), plugin.name().to_owned())]);
                    acc.add_gauge("internal_write", values, tags, None);
                }
                PluginKind::Processor | PluginKind::Aggregator => (),
            }
        }

        Ok(())
    }
}

impl Plugin for Internal {
    type Options = InternalOptions;

    fn create(options: Self::Options, context: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self {
            stats: Arc::clone(&context.stats),
            per_plugin: options.per_plugin,
        })
    }
}

#[cfg(test)]
mod tests {
    use ferry_agent::MetricMaker;
    use ferry_metrics::Metric;

    use super::*;

    fn accumulator(stats: &Stats) -> Accumulator {
        let plugin_stats = stats.register(PluginKind::Input, "internal");
        Accumulator::new(Arc::new(MetricMaker::default()), plugin_stats)
    }

    fn field(metric: &Metric, key: &str) -> Option<u64> {
        match metric.field(key) {
            Some(FieldValue::Unsigned(value)) => Some(*value),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_reports_totals() {
        let context = PluginContext::default();
        let mut acc = accumulator(&context.stats);

        let options = InternalOptions { per_plugin: true };
        let mut internal = Internal::create(options, &context).unwrap();

        internal.gather(&mut acc).await.unwrap();
        let metrics = acc.take_metrics();

        let names: Vec<_> = metrics.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["internal_agent", "internal_gather"]);

        assert_eq!(field(&metrics[0], "metrics_gathered"), Some(0));
        assert_eq!(metrics[1].tag("input"), Some("internal"));

        // The first gather is counted in the next report.
        internal.gather(&mut acc).await.unwrap();
        let metrics = acc.take_metrics();
        assert_eq!(field(&metrics[0], "metrics_gathered"), Some(2));
    }
}
