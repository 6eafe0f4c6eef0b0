use std::collections::BTreeMap;

use ferry_agent::{Accumulator, Aggregator, Plugin, PluginContext, PluginError};
use ferry_metrics::{FieldValue, Fields, Metric, SeriesKey};
use hashbrown::HashMap;
use serde::Deserialize;

/// Options of the [`MinMax`] aggregator. There are none.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinMaxOptions {}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    fn insert(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Keeps the minimum and maximum of every numeric field per series.
///
/// For each field `x` of a series, the pushed metric carries `x_min` and `x_max` as floats.
/// Non-numeric fields are ignored.
#[derive(Debug, Default)]
pub struct MinMax {
    series: HashMap<SeriesKey, BTreeMap<String, Bounds>>,
}

impl Aggregator for MinMax {
    fn description() -> &'static str {
        "Keep the aggregate min/max of each metric passing through"
    }

    fn sample_config() -> &'static str {
        "\
  # General aggregation options:
  period: 30
  drop_original: false
"
    }

    fn add(&mut self, metric: &Metric) {
        let numeric: Vec<_> = metric
            .fields()
            .iter()
            .filter_map(|(key, value)| Some((key, value.as_f64()?)))
            .filter(|(_, value)| !value.is_nan())
            .collect();

        if numeric.is_empty() {
            return;
        }

        let fields = self.series.entry(metric.series_key()).or_default();
        for (key, value) in numeric {
            match fields.get_mut(key.as_str()) {
                Some(bounds) => bounds.insert(value),
                None => {
                    fields.insert(key.clone(), Bounds::new(value));
                }
            }
        }
    }

    fn push(&mut self, acc: &mut Accumulator) {
        let mut keys: Vec<_> = self.series.keys().collect();
        keys.sort_unstable();

        for key in keys {
            let Some(bounds) = self.series.get(key) else {
                continue;
            };

            let mut fields = Fields::new();
            for (field, bounds) in bounds {
                fields.insert(format!("{field}_min"), FieldValue::Float(bounds.min));
                fields.insert(format!("{field}_max"), FieldValue::Float(bounds.max));
            }

            acc.add_fields(key.name(), fields, key.tags().clone(), None);
        }
    }

    fn reset(&mut self) {
        self.series.clear();
    }
}

impl Plugin for MinMax {
    type Options = MinMaxOptions;

    fn create(_: Self::Options, _: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self::default())
    }
}
