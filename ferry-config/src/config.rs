use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_log::LogConfig;
use ferry_metrics::Precision;
use serde::{Deserialize, Serialize};

use crate::{AggregatorConfig, InputConfig, OutputConfig, ProcessorConfig};

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error in a specific field of the configuration, or a field override from the CLI.
    Field(String),
}

/// The kind of a [`ConfigError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self {
            inner: Some(inner.into()),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: impl Into<String>) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: impl Into<String>) -> Self {
        self.source = ConfigErrorSource::Field(name.into());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        match &self.source {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(path) => write!(f, " (file {})", path.display()),
            ConfigErrorSource::Field(name) => write!(f, " (field {name})"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// What happens to a batch when a processor fails on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// The unmodified batch continues to the next stage.
    #[default]
    FailOpen,
    /// The batch is dropped and counted.
    FailClosed,
}

/// Agent-wide defaults and pipeline settings.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default gather interval of inputs in seconds.
    pub interval: u64,
    /// Default maximum random delay of each gather in seconds.
    pub collection_jitter: u64,
    /// Default flush interval of outputs in seconds.
    pub flush_interval: u64,
    /// Default maximum random delay of each flush in seconds.
    pub flush_jitter: u64,
    /// Default maximum number of metrics per write.
    pub metric_batch_size: usize,
    /// Default capacity of output buffers.
    pub metric_buffer_limit: usize,
    /// Resolution of metric timestamps.
    pub precision: Precision,
    /// Value of the `host` tag. Defaults to the machine's hostname.
    pub hostname: Option<String>,
    /// Do not add a `host` tag to metrics.
    pub omit_hostname: bool,
    /// Seconds to wait for in-flight gathers and final flushes at shutdown.
    pub shutdown_timeout: u64,
    /// Upper bound for the delay between write retries in seconds.
    pub max_retry_interval: u64,
    /// Behavior of the processor chain when a processor fails.
    pub processor_fault_policy: FaultPolicy,
    /// Exit with an error status when metrics were dropped at shutdown.
    pub exit_on_dropped: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            collection_jitter: 0,
            flush_interval: 10,
            flush_jitter: 0,
            metric_batch_size: 1000,
            metric_buffer_limit: 10_000,
            precision: Precision::default(),
            hostname: None,
            omit_hostname: false,
            shutdown_timeout: 10,
            max_retry_interval: 60,
            processor_fault_policy: FaultPolicy::default(),
            exit_on_dropped: true,
        }
    }
}

/// Reporting of the agent's own measurements to StatsD.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address of the StatsD server, such as `127.0.0.1:8125`. Reporting is off if unset.
    pub statsd: Option<String>,
    /// Prefix for all metric names.
    pub prefix: String,
    /// Tags added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Sample rate between `0.0` and `1.0`.
    pub sample_rate: f64,
    /// If set, the hostname is added to all metrics under this tag.
    pub hostname_tag: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "ferry".to_owned(),
            default_tags: BTreeMap::new(),
            sample_rate: 1.0,
            hostname_tag: None,
        }
    }
}

/// Settings of the async runtime.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads. Defaults to the number of CPUs.
    pub worker_threads: Option<usize>,
}

/// The raw values of a configuration file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigValues {
    /// Agent-wide defaults.
    pub agent: AgentConfig,
    /// Tags added to all metrics unless already present.
    pub global_tags: BTreeMap<String, String>,
    /// Logging of the agent.
    pub logging: LogConfig,
    /// Self-observability.
    pub metrics: MetricsConfig,
    /// The async runtime.
    pub runtime: RuntimeConfig,
    /// Input plugin instances.
    pub inputs: Vec<InputConfig>,
    /// Output plugin instances.
    pub outputs: Vec<OutputConfig>,
    /// Processor plugin instances.
    pub processors: Vec<ProcessorConfig>,
    /// Aggregator plugin instances.
    pub aggregators: Vec<AggregatorConfig>,
}

/// Values that can be overridden from the command line.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The log level.
    pub log_level: Option<String>,
    /// The shutdown timeout in seconds.
    pub shutdown_timeout: Option<String>,
}

/// Config struct.
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: ConfigValues,
    path: Option<PathBuf>,
}

impl Config {
    /// Loads a config from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let file = fs::File::open(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        let values: ConfigValues = serde_yaml::from_reader(io::BufReader::new(file))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path))?;

        Ok(Self {
            values,
            path: Some(path.to_path_buf()),
        })
    }

    /// Parses a config from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let values = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?;

        Ok(Self { values, path: None })
    }

    /// Creates a config from already parsed values.
    pub fn from_values(values: ConfigValues) -> Self {
        Self { values, path: None }
    }

    /// Override configuration with values coming from the command line.
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse()
                .map_err(|e| ConfigError::for_field(e, "log_level"))?;
        }

        if let Some(timeout) = overrides.shutdown_timeout {
            self.values.agent.shutdown_timeout = timeout
                .parse()
                .map_err(|e| ConfigError::for_field(e, "shutdown_timeout"))?;
        }

        Ok(self)
    }

    /// Checks settings that the agent cannot run with.
    ///
    /// Plugin options are validated separately by the plugins themselves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agent = &self.values.agent;

        let invalid = |field: String, reason: &str| {
            Err(ConfigError::for_field(reason.to_owned(), field))
        };

        for (field, value) in [
            ("agent.interval", agent.interval),
            ("agent.flush_interval", agent.flush_interval),
        ] {
            if value == 0 {
                return invalid(field.to_owned(), "interval must be positive");
            }
        }

        if agent.metric_batch_size == 0 {
            return invalid(
                "agent.metric_batch_size".to_owned(),
                "batch size must be positive",
            );
        }

        if agent.metric_batch_size > agent.metric_buffer_limit {
            return invalid(
                "agent.metric_batch_size".to_owned(),
                "batch size exceeds agent.metric_buffer_limit",
            );
        }

        if self.values.inputs.is_empty() {
            return invalid("inputs".to_owned(), "no inputs configured");
        }

        if self.values.outputs.is_empty() {
            return invalid("outputs".to_owned(), "no outputs configured");
        }

        for (index, input) in self.values.inputs.iter().enumerate() {
            if input.interval == Some(0) {
                return invalid(
                    format!("inputs[{index}].interval"),
                    "interval must be positive",
                );
            }
        }

        for (index, output) in self.values.outputs.iter().enumerate() {
            if output.flush_interval == Some(0) {
                return invalid(
                    format!("outputs[{index}].flush_interval"),
                    "interval must be positive",
                );
            }

            let batch_size = output.metric_batch_size(agent);
            if batch_size == 0 || batch_size > output.metric_buffer_limit(agent) {
                return invalid(
                    format!("outputs[{index}].metric_batch_size"),
                    "batch size must be positive and fit into the buffer",
                );
            }
        }

        for (index, aggregator) in self.values.aggregators.iter().enumerate() {
            if aggregator.period == Some(0) {
                return invalid(
                    format!("aggregators[{index}].period"),
                    "period must be positive",
                );
            }
        }

        Ok(())
    }

    /// Serializes the effective configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the path the config was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the raw config values.
    pub fn values(&self) -> &ConfigValues {
        &self.values
    }

    /// Returns the agent-wide settings.
    pub fn agent(&self) -> &AgentConfig {
        &self.values.agent
    }

    /// Returns the global tags.
    pub fn global_tags(&self) -> &BTreeMap<String, String> {
        &self.values.global_tags
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the self-observability configuration.
    pub fn metrics(&self) -> &MetricsConfig {
        &self.values.metrics
    }

    /// Returns the number of runtime worker threads, if configured.
    pub fn worker_threads(&self) -> Option<usize> {
        self.values.runtime.worker_threads
    }

    /// Returns the configured inputs.
    pub fn inputs(&self) -> &[InputConfig] {
        &self.values.inputs
    }

    /// Returns the configured outputs.
    pub fn outputs(&self) -> &[OutputConfig] {
        &self.values.outputs
    }

    /// Returns the configured processors.
    pub fn processors(&self) -> &[ProcessorConfig] {
        &self.values.processors
    }

    /// Returns the configured aggregators.
    pub fn aggregators(&self) -> &[AggregatorConfig] {
        &self.values.aggregators
    }

    /// Returns the graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.agent.shutdown_timeout)
    }

    /// Returns the upper bound for write retry delays.
    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.max_retry_interval)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use ferry_log::Level;

    use super::*;

    const MINIMAL: &str = r#"
inputs:
  - type: mem
outputs:
  - type: file
    files: ["stdout"]
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        let agent = config.agent();
        assert_eq!(agent.interval, 10);
        assert_eq!(agent.metric_batch_size, 1000);
        assert_eq!(agent.metric_buffer_limit, 10_000);
        assert_eq!(agent.processor_fault_policy, FaultPolicy::FailOpen);
        assert!(agent.exit_on_dropped);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_retry_interval(), Duration::from_secs(60));
        assert_eq!(config.metrics().prefix, "ferry");
        assert_eq!(config.outputs()[0].options["files"], serde_json::json!(["stdout"]));
    }

    #[test]
    fn test_fault_policy() {
        let yaml = format!("agent:\n  processor_fault_policy: fail_closed\n{MINIMAL}");
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(
            config.agent().processor_fault_policy,
            FaultPolicy::FailClosed
        );
    }

    #[test]
    fn test_bad_yaml() {
        let error = Config::from_yaml_str("agent: [").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.source().is_some());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.yml");

        let error = Config::from_path(&path).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
        assert!(error.to_string().contains("ferry.yml"));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.path(), Some(file.path()));
        assert_eq!(config.inputs().len(), 1);
    }

    #[test]
    fn test_validate_batch_size() {
        let yaml = format!("agent:\n  metric_batch_size: 20\n  metric_buffer_limit: 10\n{MINIMAL}");
        let config = Config::from_yaml_str(&yaml).unwrap();

        let error = config.validate().unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        insta::assert_snapshot!(error, @"invalid config value (field agent.metric_batch_size)");
    }

    #[test]
    fn test_validate_zero_interval() {
        let yaml = "inputs:\n  - type: mem\n    interval: 0\noutputs:\n  - type: discard\n";
        let config = Config::from_yaml_str(yaml).unwrap();

        let error = config.validate().unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field inputs[0].interval)");
    }

    #[test]
    fn test_validate_requires_outputs() {
        let config = Config::from_yaml_str("inputs:\n  - type: mem\n").unwrap();
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("outputs"));
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::from_yaml_str(MINIMAL).unwrap();
        config
            .apply_override(OverridableConfig {
                log_level: Some("debug".to_owned()),
                shutdown_timeout: Some("3".to_owned()),
            })
            .unwrap();

        assert_eq!(config.logging().level, Level::Debug);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));

        let error = config
            .apply_override(OverridableConfig {
                shutdown_timeout: Some("soon".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field shutdown_timeout)");
    }

    #[test]
    fn test_to_yaml_roundtrip() {
        let config = Config::from_yaml_str(MINIMAL).unwrap();
        let yaml = config.to_yaml_string().unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.values(), config.values());
    }
}
