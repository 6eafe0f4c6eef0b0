use std::sync::Arc;

use ferry_metrics::{Filter, Metric};

use crate::buffer::MetricBuffer;

/// The buffer of one output together with the output's filter.
#[derive(Debug)]
struct OutputLink {
    filter: Filter,
    buffer: Arc<MetricBuffer>,
}

/// Copies metrics into the buffer of every output.
///
/// Each output receives its own deep copy, filtered by the output's filter. The last output
/// receives the original metrics.
#[derive(Debug, Default)]
pub struct OutputRouter {
    outputs: Vec<OutputLink>,
}

impl OutputRouter {
    /// Creates a router without outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output's buffer.
    pub fn add(&mut self, filter: Filter, buffer: Arc<MetricBuffer>) {
        self.outputs.push(OutputLink { filter, buffer });
    }

    /// Adds the metrics to all output buffers.
    pub fn route(&self, metrics: Vec<Metric>) {
        if metrics.is_empty() {
            return;
        }

        let Some((last, rest)) = self.outputs.split_last() else {
            return;
        };

        for output in rest {
            output.add(metrics.iter().cloned());
        }
        last.add(metrics);
    }

    /// Closes all output buffers, signaling that no more metrics follow.
    pub fn close(&self) {
        for output in &self.outputs {
            output.buffer.close();
        }
    }
}

impl OutputLink {
    fn add(&self, metrics: impl IntoIterator<Item = Metric>) {
        let metrics: Vec<_> = metrics
            .into_iter()
            .filter_map(|metric| self.filter.apply(metric))
            .collect();

        if !metrics.is_empty() {
            self.buffer.add(metrics);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ferry_metrics::FilterConfig;

    use super::*;
    use crate::plugin::PluginKind;
    use crate::stats::PluginStats;

    fn buffer(name: &str) -> Arc<MetricBuffer> {
        let stats = Arc::new(PluginStats::new(PluginKind::Output, name));
        Arc::new(MetricBuffer::new(100, 10, stats))
    }

    #[test]
    fn test_fan_out_with_filters() {
        let all = buffer("all");
        let cpu_only = buffer("cpu");

        let mut router = OutputRouter::new();
        router.add(Filter::default(), Arc::clone(&all));
        let filter = FilterConfig {
            namepass: vec!["cpu".to_owned()],
            ..Default::default()
        };
        router.add(Filter::new(&filter).unwrap(), Arc::clone(&cpu_only));

        let now = Utc::now();
        router.route(vec![
            Metric::new("cpu", now).with_field("usage", 1.0),
            Metric::new("mem", now).with_field("used", 2u64),
        ]);

        assert_eq!(all.len(), 2);
        assert_eq!(cpu_only.len(), 1);
        assert_eq!(cpu_only.peek(1)[0].name(), "cpu");

        router.close();
        assert!(all.is_closed() && cpu_only.is_closed());
    }
}
