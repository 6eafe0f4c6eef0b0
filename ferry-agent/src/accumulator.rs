use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_config::MetricMakerConfig;
use ferry_metrics::{
    DeliveryReceiver, Fields, Filter, Metric, MetricType, Precision, Tags, Tracker, TrackingId,
};
use tokio::sync::mpsc;

use crate::stats::PluginStats;

/// Applies the per-plugin settings to every metric entering the pipeline.
///
/// Renames the metric, adds plugin and global tags that are not yet set, applies the plugin's
/// filter, and rounds the timestamp to the configured precision.
#[derive(Clone, Debug, Default)]
pub struct MetricMaker {
    name_override: Option<String>,
    name_prefix: Option<String>,
    name_suffix: Option<String>,
    tags: Tags,
    global_tags: Tags,
    filter: Filter,
    precision: Precision,
}

impl MetricMaker {
    /// Creates a maker for a plugin.
    pub fn new(
        config: &MetricMakerConfig,
        filter: Filter,
        global_tags: Tags,
        precision: Precision,
    ) -> Self {
        Self {
            name_override: config.name_override.clone(),
            name_prefix: config.name_prefix.clone(),
            name_suffix: config.name_suffix.clone(),
            tags: config.tags.clone(),
            global_tags,
            filter,
            precision,
        }
    }

    /// Returns the metric with all settings applied, or `None` if the filter dropped it.
    pub fn make(&self, mut metric: Metric) -> Option<Metric> {
        if self.name_override.is_some() || self.name_prefix.is_some() || self.name_suffix.is_some()
        {
            let base = self.name_override.as_deref().unwrap_or(metric.name());
            let name = format!(
                "{}{}{}",
                self.name_prefix.as_deref().unwrap_or_default(),
                base,
                self.name_suffix.as_deref().unwrap_or_default(),
            );
            metric.set_name(name);
        }

        for (key, value) in self.tags.iter().chain(&self.global_tags) {
            if !metric.has_tag(key) {
                metric.add_tag(key.as_str(), value.as_str());
            }
        }

        let mut metric = self.filter.apply(metric)?;
        metric.set_timestamp(self.precision.truncate(metric.timestamp()));
        Some(metric)
    }
}

/// The write side of the pipeline handed to inputs and aggregators.
///
/// Every metric added here passes the plugin's [`MetricMaker`]. With an ingress channel attached,
/// metrics are sent to the pipeline as they are added. While the channel is full they wait here
/// and go out with the next add or once the runner forwards them. Without a channel they are
/// collected until [`take_metrics`](Self::take_metrics) is called.
///
/// Errors reported through [`add_error`](Self::add_error) are logged and counted.
#[derive(Debug)]
pub struct Accumulator {
    maker: Arc<MetricMaker>,
    stats: Arc<PluginStats>,
    metrics: Vec<Metric>,
    ingress: Option<mpsc::Sender<Vec<Metric>>>,
    tracker: Tracker,
    delivered: DeliveryReceiver,
}

impl Accumulator {
    /// Creates an accumulator for the plugin described by `stats`.
    pub fn new(maker: Arc<MetricMaker>, stats: Arc<PluginStats>) -> Self {
        let (tracker, delivered) = Tracker::new();
        Self {
            maker,
            stats,
            metrics: Vec::new(),
            ingress: None,
            tracker,
            delivered,
        }
    }

    /// Sends added metrics to the pipeline's ingress channel right away.
    pub fn with_ingress(mut self, ingress: mpsc::Sender<Vec<Metric>>) -> Self {
        self.ingress = Some(ingress);
        self
    }

    /// Adds an untyped metric.
    ///
    /// If no timestamp is given, the current time is used.
    pub fn add_fields(
        &mut self,
        measurement: &str,
        fields: Fields,
        tags: Tags,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, timestamp, MetricType::Untyped);
    }

    /// Adds a gauge metric.
    pub fn add_gauge(
        &mut self,
        measurement: &str,
        fields: Fields,
        tags: Tags,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, timestamp, MetricType::Gauge);
    }

    /// Adds a counter metric.
    pub fn add_counter(
        &mut self,
        measurement: &str,
        fields: Fields,
        tags: Tags,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, timestamp, MetricType::Counter);
    }

    /// Adds a summary metric.
    pub fn add_summary(
        &mut self,
        measurement: &str,
        fields: Fields,
        tags: Tags,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, timestamp, MetricType::Summary);
    }

    /// Adds a histogram metric.
    pub fn add_histogram(
        &mut self,
        measurement: &str,
        fields: Fields,
        tags: Tags,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.add_typed(measurement, fields, tags, timestamp, MetricType::Histogram);
    }

    fn add_typed(
        &mut self,
        measurement: &str,
        fields: Fields,
        tags: Tags,
        timestamp: Option<DateTime<Utc>>,
        ty: MetricType,
    ) {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        self.add_metric(Metric::from_parts(measurement, tags, fields, timestamp, ty));
    }

    /// Adds a complete metric.
    pub fn add_metric(&mut self, metric: Metric) {
        if metric.name().is_empty() {
            ferry_log::debug!(plugin = self.stats.name(), "discarding metric without name");
            return;
        }

        if metric.fields().is_empty() {
            ferry_log::debug!(
                plugin = self.stats.name(),
                metric = metric.name(),
                "discarding metric without fields",
            );
            return;
        }

        if let Some(metric) = self.maker.make(metric) {
            self.stats.add_gathered(1);
            self.metrics.push(metric);
            self.try_send();
        }
    }

    /// Hands the pending metrics to the ingress channel if it has capacity.
    fn try_send(&mut self) {
        let Some(ingress) = &self.ingress else {
            return;
        };

        match ingress.try_send(std::mem::take(&mut self.metrics)) {
            Ok(()) => (),
            Err(mpsc::error::TrySendError::Full(metrics)) => self.metrics = metrics,
            Err(mpsc::error::TrySendError::Closed(metrics)) => {
                ferry_log::error!(
                    plugin = self.stats.name(),
                    count = metrics.len(),
                    "pipeline stopped, dropping metrics",
                );
                self.stats.add_dropped(metrics.len() as u64);
                metrics.into_iter().for_each(Metric::reject);
            }
        }
    }

    /// Adds metrics as one tracking group and returns its identifier.
    ///
    /// Once every copy of these metrics has been written or dropped, a notification is available
    /// from [`delivered`](Self::delivered).
    pub fn add_tracking_group(&mut self, mut metrics: Vec<Metric>) -> TrackingId {
        let id = self.tracker.track(&mut metrics);
        for metric in metrics {
            self.add_metric(metric);
        }
        id
    }

    /// Reports an error without stopping the plugin.
    pub fn add_error(&mut self, error: &(dyn Error + 'static)) {
        self.stats.add_gather_error();
        ferry_log::error!(error = error, plugin = self.stats.name(), "error in plugin");
    }

    /// Returns the receiver of delivery notifications for tracked metrics.
    pub fn delivered(&mut self) -> &mut DeliveryReceiver {
        &mut self.delivered
    }

    /// Returns the number of metrics that have not been sent or taken yet.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if no metrics were collected.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Takes all metrics that have not been sent to the pipeline yet.
    pub fn take_metrics(&mut self) -> Vec<Metric> {
        std::mem::take(&mut self.metrics)
    }
}
