use std::fmt::Write;

use anyhow::{Context, Result};
use ferry_agent::{PluginKind, PluginRegistry};
use ferry_config::Config;
use ferry_statsd::MetricsClientConfig;

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    match config.path() {
        Some(path) => ferry_log::info!("launching ferry from config file {}", path.display()),
        None => ferry_log::info!("launching ferry without config file"),
    }

    ferry_log::info!("  inputs: {}", config.inputs().len());
    ferry_log::info!("  processors: {}", config.processors().len());
    ferry_log::info!("  aggregators: {}", config.aggregators().len());
    ferry_log::info!("  outputs: {}", config.outputs().len());
    ferry_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the logging system.
pub fn init_logging(config: &Config) {
    ferry_log::init(config.logging());
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let metrics = config.metrics();
    let Some(ref host) = metrics.statsd else {
        return Ok(());
    };

    let mut default_tags = metrics.default_tags.clone();
    if let Some(ref hostname_tag) = metrics.hostname_tag
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.clone(), hostname);
    }

    ferry_statsd::init(MetricsClientConfig {
        prefix: &metrics.prefix,
        host: host.as_str(),
        default_tags,
        default_sample_rate: metrics.sample_rate.into(),
    })
    .with_context(|| format!("failed to set up statsd reporting to {host}"))?;

    Ok(())
}

/// Returns the top-level key of a plugin kind in the config file.
fn section(kind: PluginKind) -> &'static str {
    match kind {
        PluginKind::Input => "inputs",
        PluginKind::Processor => "processors",
        PluginKind::Aggregator => "aggregators",
        PluginKind::Output => "outputs",
    }
}

/// Builds a commented config with the agent defaults and every registered plugin.
pub fn sample_config(registry: &PluginRegistry) -> Result<String> {
    let defaults = Config::default()
        .to_yaml_string()
        .context("failed to serialize default config")?;

    let mut sample = String::from("# Ferry configuration\n\n");
    for line in defaults.lines() {
        // Plugin sections are rendered below with their sample options.
        if line.ends_with(": []") && !line.starts_with(' ') {
            continue;
        }
        sample.push_str(line);
        sample.push('\n');
    }

    let mut current = None;
    for info in registry.plugins() {
        if current != Some(info.kind) {
            current = Some(info.kind);
            let _ = write!(sample, "\n{}:\n", section(info.kind));
        }

        let _ = write!(
            sample,
            "\n# {}\n- type: {}\n{}",
            info.description, info.name, info.sample_config
        );
    }

    Ok(sample)
}
