use async_trait::async_trait;
use ferry_agent::{Output, Plugin, PluginContext, PluginError};
use ferry_metrics::Metric;
use serde::Deserialize;

/// Options of the [`Discard`] output. There are none.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscardOptions {}

/// Accepts every batch without writing it anywhere.
#[derive(Debug)]
pub struct Discard;

#[async_trait]
impl Output for Discard {
    fn description() -> &'static str {
        "Send metrics to nowhere at all"
    }

    fn sample_config() -> &'static str {
        "  # no configuration\n"
    }

    async fn write(&mut self, metrics: &[Metric]) -> Result<(), PluginError> {
        ferry_log::trace!(count = metrics.len(), "discarding metrics");
        Ok(())
    }
}

impl Plugin for Discard {
    type Options = DiscardOptions;

    fn create(_: Self::Options, _: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self)
    }
}
