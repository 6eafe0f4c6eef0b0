use ferry_agent::{Plugin, PluginContext, PluginError, Processor};
use ferry_metrics::{Metric, Tags};
use serde::Deserialize;

/// Options of the [`Override`] processor.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideOptions {
    /// Replaces the measurement name.
    pub name_override: Option<String>,
    /// Prepended to the measurement name.
    pub name_prefix: Option<String>,
    /// Appended to the measurement name.
    pub name_suffix: Option<String>,
    /// Tags added to every metric, replacing existing values.
    pub tags: Tags,
}

/// Renames metrics and sets tags.
///
/// The override is applied before prefix and suffix.
#[derive(Debug)]
pub struct Override {
    options: OverrideOptions,
}

impl Override {
    fn rename(&self, metric: &mut Metric) {
        let OverrideOptions {
            name_override,
            name_prefix,
            name_suffix,
            ..
        } = &self.options;

        if name_override.is_none() && name_prefix.is_none() && name_suffix.is_none() {
            return;
        }

        let base = name_override.as_deref().unwrap_or(metric.name());
        let name = format!(
            "{}{base}{}",
            name_prefix.as_deref().unwrap_or_default(),
            name_suffix.as_deref().unwrap_or_default(),
        );
        metric.set_name(name);
    }
}

impl Processor for Override {
    fn description() -> &'static str {
        "Apply metric modifications using override semantics"
    }

    fn sample_config() -> &'static str {
        "\
  # All modifications on inputs and aggregators can be overridden:
  # name_override: new_name
  # name_prefix: new_name_prefix
  # name_suffix: new_name_suffix

  # Tags can be overridden or added:
  tags:
    additional_tag: tag_value
"
    }

    fn apply(&mut self, mut metrics: Vec<Metric>) -> Result<Vec<Metric>, PluginError> {
        for metric in &mut metrics {
            self.rename(metric);
            for (key, value) in &self.options.tags {
                metric.add_tag(key.as_str(), value.as_str());
            }
        }

        Ok(metrics)
    }
}

impl Plugin for Override {
    type Options = OverrideOptions;

    fn create(options: Self::Options, _: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self { options })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn create(options: serde_json::Value) -> Override {
        let options = serde_json::from_value(options).unwrap();
        Override::create(options, &PluginContext::default()).unwrap()
    }

    fn metric() -> Metric {
        Metric::new("cpu", Utc::now())
            .with_tag("host", "a")
            .with_field("usage", 1.0)
    }

    #[test]
    fn test_rename() {
        let mut processor = create(serde_json::json!({
            "name_override": "system",
            "name_prefix": "edge_",
            "name_suffix": "_total",
        }));

        let metrics = processor.apply(vec![metric()]).unwrap();
        assert_eq!(metrics[0].name(), "edge_system_total");

        let mut processor = create(serde_json::json!({"name_prefix": "edge_"}));
        let metrics = processor.apply(vec![metric()]).unwrap();
        assert_eq!(metrics[0].name(), "edge_cpu");
    }

    #[test]
    fn test_tags_replace_existing() {
        let mut processor = create(serde_json::json!({
            "tags": {"host": "b", "dc": "eu"},
        }));

        let metrics = processor.apply(vec![metric(), metric()]).unwrap();
        assert_eq!(metrics.len(), 2);

        for metric in &metrics {
            assert_eq!(metric.name(), "cpu");
            assert_eq!(metric.tag("host"), Some("b"));
            assert_eq!(metric.tag("dc"), Some("eu"));
        }
    }

    #[test]
    fn test_unknown_option() {
        let options = serde_json::json!({"namepass": ["cpu"]});
        assert!(serde_json::from_value::<OverrideOptions>(options).is_err());
    }
}
