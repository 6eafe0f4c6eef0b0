use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use ferry_agent::{Agent, PluginRegistry};
use ferry_config::{Config, OverridableConfig};
use ferry_system::Controller;

use crate::cliapp::make_app;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let matches = make_app().get_matches();
    let registry = ferry_plugins::builtin_registry();

    match matches.subcommand() {
        Some(("run", matches)) => run(load_config(matches)?, &registry),
        Some(("config", matches)) => manage_config(matches, &registry),
        Some(("plugins", _)) => list_plugins(&registry),
        _ => bail!("no command given"),
    }
}

/// Extracts the config overrides from the command line arguments.
fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    OverridableConfig {
        log_level: matches.get_one("log_level").cloned(),
        shutdown_timeout: matches.get_one("shutdown_timeout").cloned(),
    }
}

/// Loads the config file and applies overrides from the command line.
fn load_config(matches: &ArgMatches) -> Result<Config> {
    let path = matches
        .get_one::<String>("config")
        .context("no config file given")?;

    let mut config = Config::from_path(path)?;
    config.apply_override(extract_config_args(matches))?;
    config.validate()?;

    Ok(config)
}

pub fn manage_config(matches: &ArgMatches, registry: &PluginRegistry) -> Result<()> {
    match matches.subcommand() {
        Some(("init", _)) => init_config(registry),
        Some(("show", matches)) => show_config(&load_config(matches)?),
        _ => bail!("no subcommand given"),
    }
}

#[allow(clippy::print_stdout)]
pub fn init_config(registry: &PluginRegistry) -> Result<()> {
    print!("{}", setup::sample_config(registry)?);
    Ok(())
}

#[allow(clippy::print_stdout)]
pub fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

#[allow(clippy::print_stdout)]
pub fn list_plugins(registry: &PluginRegistry) -> Result<()> {
    for info in registry.plugins() {
        println!("{:<10}  {:<10}  {}", info.kind, info.name, info.description);
    }
    Ok(())
}

pub fn run(config: Config, registry: &PluginRegistry) -> Result<()> {
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    let agent = Agent::new(&config, registry).context("failed to create agent")?;

    let runtime = ferry_system::create_runtime("ferry-worker", config.worker_threads())
        .context("failed to create runtime")?;
    let controller = Controller::new(config.shutdown_timeout());

    let report = runtime.block_on(async {
        let agent = agent.start(&controller);

        tokio::select! {
            report = agent.join() => Ok(report),
            Err(error) = controller.listen_signals() => Err(error),
        }
    });

    let report = report.context("failed to listen for shutdown signals")?;
    if report.dropped > 0 && config.agent().exit_on_dropped {
        bail!("{} metrics were dropped at shutdown", report.dropped);
    }

    Ok(())
}
