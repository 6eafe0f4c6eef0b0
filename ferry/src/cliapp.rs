//! The definition of the command line app.
use clap::{Arg, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Ferry collects metrics from inputs and writes them to outputs.";

pub fn make_app() -> Command {
    Command::new("ferry")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .env("FERRY_CONFIG")
                .default_value("ferry.yaml")
                .global(true)
                .help("The path to the config file."),
        )
        .arg(
            Arg::new("log_level")
                .value_name("LEVEL")
                .long("log-level")
                .env("FERRY_LOG_LEVEL")
                .value_parser(["error", "warn", "info", "debug", "trace", "off"])
                .global(true)
                .help("Overrides the log level of the config file."),
        )
        .arg(
            Arg::new("shutdown_timeout")
                .value_name("SECONDS")
                .long("shutdown-timeout")
                .env("FERRY_SHUTDOWN_TIMEOUT")
                .global(true)
                .help("Overrides the graceful shutdown timeout of the config file."),
        )
        .subcommand(Command::new("run").about("Run the agent").after_help(
            "This runs the agent in the foreground until it receives SIGINT or SIGTERM.  The \
             first signal stops the inputs and lets outputs write their remaining metrics, a \
             second signal stops immediately.",
        ))
        .subcommand(
            Command::new("config")
                .about("Manage the agent config")
                .after_help(
                    "This command provides basic config management.  It can be used to \
                     create a new config and to print out the effective config.",
                )
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("init")
                        .about("Print a sample config")
                        .after_help(
                            "This prints a config with the agent defaults and the sample \
                             options of every built-in plugin.  Redirect it to a file and \
                             remove the plugins you do not need.",
                        ),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config out for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values which \
                             are not in the config file but filled in from defaults.",
                        ),
                ),
        )
        .subcommand(
            Command::new("plugins")
                .about("List the available plugins")
                .after_help("This prints the kind, type name and description of every plugin."),
        )
}
