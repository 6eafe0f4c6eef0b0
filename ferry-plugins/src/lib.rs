//! Built-in plugins of the Ferry agent.
//!
//! All plugins are registered under their type name with [`register_builtins`]:
//!
//! | Kind       | Type       | Plugin                         |
//! |------------|------------|--------------------------------|
//! | input      | `internal` | [`inputs::Internal`]           |
//! | input      | `mem`      | [`inputs::Mem`]                |
//! | processor  | `override` | [`processors::Override`]       |
//! | aggregator | `minmax`   | [`aggregators::MinMax`]        |
//! | output     | `discard`  | [`outputs::Discard`]           |
//! | output     | `file`     | [`outputs::File`]              |
#![warn(missing_docs)]

use ferry_agent::PluginRegistry;

pub mod aggregators;
pub mod inputs;
pub mod outputs;
pub mod processors;
pub mod serializers;

/// Registers all built-in plugins.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.add_input::<inputs::Internal>("internal");
    registry.add_input::<inputs::Mem>("mem");

    registry.add_processor::<processors::Override>("override");

    registry.add_aggregator::<aggregators::MinMax>("minmax");

    registry.add_output::<outputs::Discard>("discard");
    registry.add_output::<outputs::File>("file");
}

/// Creates a registry with all built-in plugins.
pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use ferry_agent::{Agent, PluginKind};
    use ferry_config::Config;

    use super::*;

    #[test]
    fn test_registered_plugins() {
        let names: Vec<_> = builtin_registry()
            .plugins()
            .into_iter()
            .map(|info| format!("{} {}", info.kind, info.name))
            .collect();

        insta::assert_debug_snapshot!(names, @r#"
        [
            "input internal",
            "input mem",
            "processor override",
            "aggregator minmax",
            "output discard",
            "output file",
        ]
        "#);
    }

    #[test]
    fn test_agent_from_config() {
        let config = Config::from_yaml_str(
            r#"
inputs:
  - type: mem
  - type: internal
    per_plugin: true
processors:
  - type: override
    tags:
      env: prod
aggregators:
  - type: minmax
    period: 60
outputs:
  - type: file
    files: ["stdout"]
  - type: discard
    alias: sink
"#,
        )
        .unwrap();

        let agent = Agent::new(&config, &builtin_registry()).unwrap();
        let outputs: Vec<_> = agent
            .stats()
            .plugins()
            .into_iter()
            .filter(|plugin| plugin.kind() == PluginKind::Output)
            .map(|plugin| plugin.name().to_owned())
            .collect();
        assert_eq!(outputs, ["file", "sink"]);
    }

    #[test]
    fn test_invalid_plugin_options() {
        let config = Config::from_yaml_str(
            "inputs:\n  - type: mem\n    percpu: true\noutputs:\n  - type: discard\n",
        )
        .unwrap();

        let error = Agent::new(&config, &builtin_registry()).err().unwrap();
        insta::assert_snapshot!(error.to_string(), @r#"failed to create input plugin "mem""#);
    }
}
