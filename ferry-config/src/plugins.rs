use std::collections::BTreeMap;
use std::time::Duration;

use ferry_metrics::FilterConfig;
use serde::{Deserialize, Serialize};

use crate::AgentConfig;

/// Plugin specific options of a plugin instance.
///
/// These are all keys of a plugin entry that the agent does not interpret itself. The plugin's
/// factory deserializes them into its own options type.
pub type PluginOptions = serde_json::Map<String, serde_json::Value>;

/// Default length of an aggregation window in seconds.
const DEFAULT_AGGREGATOR_PERIOD: u64 = 30;

/// Settings shared by all plugin entries.
pub trait PluginConfig {
    /// The registered plugin type, such as `mem` or `file`.
    fn plugin_type(&self) -> &str;

    /// The optional alias distinguishing several instances of the same type.
    fn alias(&self) -> Option<&str>;

    /// The options passed to the plugin factory.
    fn options(&self) -> &PluginOptions;

    /// The filter of this instance.
    fn filter(&self) -> &FilterConfig;

    /// Returns the name used in logs and statistics: the alias if set, otherwise the type.
    fn name(&self) -> &str {
        self.alias().unwrap_or_else(|| self.plugin_type())
    }
}

macro_rules! impl_plugin_config {
    ($ty:ident) => {
        impl PluginConfig for $ty {
            fn plugin_type(&self) -> &str {
                &self.ty
            }

            fn alias(&self) -> Option<&str> {
                self.alias.as_deref()
            }

            fn options(&self) -> &PluginOptions {
                &self.options
            }

            fn filter(&self) -> &FilterConfig {
                &self.filter
            }
        }
    };
}

/// Renaming of metrics and extra tags applied by the metric maker of inputs and aggregators.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricMakerConfig {
    /// Replaces the metric name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,
    /// Prepended to the metric name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
    /// Appended to the metric name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,
    /// Tags added to every metric unless the metric already has them.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// An input plugin instance.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct InputConfig {
    /// The registered input type.
    #[serde(rename = "type")]
    pub ty: String,
    /// Optional instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Gather interval in seconds, overriding `agent.interval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Maximum random delay in seconds added to each gather, overriding
    /// `agent.collection_jitter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_jitter: Option<u64>,
    /// Renaming and tagging of the gathered metrics.
    #[serde(flatten)]
    pub maker: MetricMakerConfig,
    /// Selection applied to the gathered metrics.
    #[serde(default, skip_serializing_if = "FilterConfig::is_empty")]
    pub filter: FilterConfig,
    /// Options of the plugin.
    #[serde(flatten)]
    pub options: PluginOptions,
}

impl InputConfig {
    /// Creates a config for the given input type with default settings.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Default::default()
        }
    }

    /// The gather interval, falling back to the agent default.
    pub fn interval(&self, agent: &AgentConfig) -> Duration {
        Duration::from_secs(self.interval.unwrap_or(agent.interval))
    }

    /// The collection jitter, falling back to the agent default.
    pub fn collection_jitter(&self, agent: &AgentConfig) -> Duration {
        Duration::from_secs(self.collection_jitter.unwrap_or(agent.collection_jitter))
    }
}

impl_plugin_config!(InputConfig);

/// An output plugin instance.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// The registered output type.
    #[serde(rename = "type")]
    pub ty: String,
    /// Optional instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Flush interval in seconds, overriding `agent.flush_interval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_interval: Option<u64>,
    /// Maximum random delay in seconds added to each flush, overriding `agent.flush_jitter`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_jitter: Option<u64>,
    /// Maximum number of metrics per write, overriding `agent.metric_batch_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_batch_size: Option<usize>,
    /// Capacity of the output buffer, overriding `agent.metric_buffer_limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_buffer_limit: Option<usize>,
    /// Selection of the metrics this output receives.
    #[serde(default, skip_serializing_if = "FilterConfig::is_empty")]
    pub filter: FilterConfig,
    /// Options of the plugin.
    #[serde(flatten)]
    pub options: PluginOptions,
}

impl OutputConfig {
    /// Creates a config for the given output type with default settings.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Default::default()
        }
    }

    /// The flush interval, falling back to the agent default.
    pub fn flush_interval(&self, agent: &AgentConfig) -> Duration {
        Duration::from_secs(self.flush_interval.unwrap_or(agent.flush_interval))
    }

    /// The flush jitter, falling back to the agent default.
    pub fn flush_jitter(&self, agent: &AgentConfig) -> Duration {
        Duration::from_secs(self.flush_jitter.unwrap_or(agent.flush_jitter))
    }

    /// The batch size, falling back to the agent default.
    pub fn metric_batch_size(&self, agent: &AgentConfig) -> usize {
        self.metric_batch_size.unwrap_or(agent.metric_batch_size)
    }

    /// The buffer capacity, falling back to the agent default.
    pub fn metric_buffer_limit(&self, agent: &AgentConfig) -> usize {
        self.metric_buffer_limit.unwrap_or(agent.metric_buffer_limit)
    }
}

impl_plugin_config!(OutputConfig);

/// A processor plugin instance.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// The registered processor type.
    #[serde(rename = "type")]
    pub ty: String,
    /// Optional instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Position in the chain. Processors without an order run after ordered ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// Selection of the metrics this processor sees.
    #[serde(default, skip_serializing_if = "FilterConfig::is_empty")]
    pub filter: FilterConfig,
    /// Options of the plugin.
    #[serde(flatten)]
    pub options: PluginOptions,
}

impl ProcessorConfig {
    /// Creates a config for the given processor type with default settings.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Default::default()
        }
    }
}

impl_plugin_config!(ProcessorConfig);

/// An aggregator plugin instance.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AggregatorConfig {
    /// The registered aggregator type.
    #[serde(rename = "type")]
    pub ty: String,
    /// Optional instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Length of an aggregation window in seconds. Defaults to 30.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    /// If set, metrics handed to this aggregator are not forwarded to outputs.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub drop_original: bool,
    /// Renaming and tagging of the aggregated metrics.
    #[serde(flatten)]
    pub maker: MetricMakerConfig,
    /// Selection of the metrics this aggregator sees.
    #[serde(default, skip_serializing_if = "FilterConfig::is_empty")]
    pub filter: FilterConfig,
    /// Options of the plugin.
    #[serde(flatten)]
    pub options: PluginOptions,
}

impl AggregatorConfig {
    /// Creates a config for the given aggregator type with default settings.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Default::default()
        }
    }

    /// The aggregation period.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period.unwrap_or(DEFAULT_AGGREGATOR_PERIOD))
    }
}

impl_plugin_config!(AggregatorConfig);
