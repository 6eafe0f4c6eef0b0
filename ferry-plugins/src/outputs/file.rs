use std::path::PathBuf;

use async_trait::async_trait;
use ferry_agent::{Output, Plugin, PluginContext, PluginError};
use ferry_metrics::Metric;
use serde::Deserialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::serializers::influx;

/// Name of the target writing to the standard output.
const STDOUT: &str = "stdout";

fn default_files() -> Vec<String> {
    vec![STDOUT.to_owned()]
}

/// Options of the [`File`] output.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOptions {
    /// Paths to append metrics to. `stdout` writes to the standard output.
    #[serde(default = "default_files")]
    pub files: Vec<String>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            files: default_files(),
        }
    }
}

/// Writes metrics in line protocol to the standard output or files.
///
/// Files are opened in append mode when the output connects and are created if missing.
pub struct File {
    files: Vec<String>,
    writers: Vec<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl File {
    async fn open(target: &str) -> Result<Box<dyn AsyncWrite + Send + Unpin>, PluginError> {
        if target == STDOUT {
            return Ok(Box::new(tokio::io::stdout()));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(PathBuf::from(target))
            .await?;

        Ok(Box::new(file))
    }
}

#[async_trait]
impl Output for File {
    fn description() -> &'static str {
        "Send metrics to file(s)"
    }

    fn sample_config() -> &'static str {
        "\
  # Files to write to, \"stdout\" is a specially handled file.
  files: [\"stdout\", \"/tmp/metrics.out\"]
"
    }

    async fn connect(&mut self) -> Result<(), PluginError> {
        self.writers.clear();
        for target in &self.files {
            self.writers.push(Self::open(target).await?);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        for mut writer in self.writers.drain(..) {
            writer.shutdown().await?;
        }
        Ok(())
    }

    async fn write(&mut self, metrics: &[Metric]) -> Result<(), PluginError> {
        let payload = influx::serialize(metrics);
        if payload.is_empty() {
            return Ok(());
        }

        for writer in &mut self.writers {
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await?;
        }

        Ok(())
    }
}

impl Plugin for File {
    type Options = FileOptions;

    fn create(options: Self::Options, _: &PluginContext) -> Result<Self, PluginError> {
        if options.files.is_empty() {
            return Err(PluginError::custom("at least one file is required"));
        }

        Ok(Self {
            files: options.files,
            writers: Vec::new(),
        })
    }
}
