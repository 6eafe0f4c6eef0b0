use std::collections::BTreeMap;
use std::sync::Arc;

use ferry_config::PluginOptions;
use serde::de::DeserializeOwned;

use crate::plugin::{Aggregator, Input, Output, PluginError, PluginKind, Processor};
use crate::stats::Stats;

/// Shared state handed to plugin factories.
#[derive(Clone, Debug, Default)]
pub struct PluginContext {
    /// Statistics of all plugins of the agent.
    pub stats: Arc<Stats>,
    /// The hostname of the agent, unless omitted by configuration.
    pub hostname: Option<String>,
}

/// A plugin that can be created from deserialized options.
///
/// Implementing this trait allows to register a plugin type with [`PluginRegistry::add_input`]
/// and the corresponding methods of the other kinds.
pub trait Plugin: Sized {
    /// The options of this plugin. Use [`serde::de::IgnoredAny`] for plugins without options.
    type Options: DeserializeOwned;

    /// Creates an instance of the plugin.
    fn create(options: Self::Options, context: &PluginContext) -> Result<Self, PluginError>;
}

/// An error when creating a plugin instance from the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No plugin of this type is registered.
    #[error("unknown {kind} plugin {name:?}")]
    UnknownPlugin {
        /// The kind of plugin.
        kind: PluginKind,
        /// The requested type.
        name: String,
    },
    /// The factory rejected the options.
    #[error("failed to create {kind} plugin {name:?}")]
    Create {
        /// The kind of plugin.
        kind: PluginKind,
        /// The requested type.
        name: String,
        /// The factory's error.
        #[source]
        source: PluginError,
    },
}

/// Descriptive information about a registered plugin type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    /// The kind of plugin.
    pub kind: PluginKind,
    /// The type name used in configuration files.
    pub name: &'static str,
    /// A one-line description.
    pub description: &'static str,
    /// A commented YAML snippet with the plugin's options.
    pub sample_config: &'static str,
}

type Factory<T> =
    Box<dyn Fn(&PluginContext, &PluginOptions) -> Result<Box<T>, PluginError> + Send + Sync>;

struct Entry<T: ?Sized> {
    description: &'static str,
    sample_config: &'static str,
    factory: Factory<T>,
}

impl<T: ?Sized> Entry<T> {
    fn info(&self, kind: PluginKind, name: &'static str) -> PluginInfo {
        PluginInfo {
            kind,
            name,
            description: self.description,
            sample_config: self.sample_config,
        }
    }
}

fn deserialize<P: Plugin>(
    context: &PluginContext,
    options: &PluginOptions,
) -> Result<P, PluginError> {
    let options = serde_json::from_value(serde_json::Value::Object(options.clone()))?;
    P::create(options, context)
}

fn create<T: ?Sized>(
    entries: &BTreeMap<&'static str, Entry<T>>,
    kind: PluginKind,
    name: &str,
    context: &PluginContext,
    options: &PluginOptions,
) -> Result<Box<T>, RegistryError> {
    let entry = entries
        .get(name)
        .ok_or_else(|| RegistryError::UnknownPlugin {
            kind,
            name: name.to_owned(),
        })?;

    (entry.factory)(context, options).map_err(|source| RegistryError::Create {
        kind,
        name: name.to_owned(),
        source,
    })
}

/// All plugin types known to the agent, by kind and type name.
///
/// The registry is built once at startup, see `ferry_plugins::register_builtins`, and consulted
/// when the agent is created from its configuration.
#[derive(Default)]
pub struct PluginRegistry {
    inputs: BTreeMap<&'static str, Entry<dyn Input>>,
    outputs: BTreeMap<&'static str, Entry<dyn Output>>,
    processors: BTreeMap<&'static str, Entry<dyn Processor>>,
    aggregators: BTreeMap<&'static str, Entry<dyn Aggregator>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an input type with a custom factory.
    pub fn register_input<F>(
        &mut self,
        name: &'static str,
        description: &'static str,
        sample_config: &'static str,
        factory: F,
    ) where
        F: Fn(&PluginContext, &PluginOptions) -> Result<Box<dyn Input>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.inputs.insert(
            name,
            Entry {
                description,
                sample_config,
                factory: Box::new(factory),
            },
        );
    }

    /// Registers an output type with a custom factory.
    pub fn register_output<F>(
        &mut self,
        name: &'static str,
        description: &'static str,
        sample_config: &'static str,
        factory: F,
    ) where
        F: Fn(&PluginContext, &PluginOptions) -> Result<Box<dyn Output>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.outputs.insert(
            name,
            Entry {
                description,
                sample_config,
                factory: Box::new(factory),
            },
        );
    }

    /// Registers a processor type with a custom factory.
    pub fn register_processor<F>(
        &mut self,
        name: &'static str,
        description: &'static str,
        sample_config: &'static str,
        factory: F,
    ) where
        F: Fn(&PluginContext, &PluginOptions) -> Result<Box<dyn Processor>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.processors.insert(
            name,
            Entry {
                description,
                sample_config,
                factory: Box::new(factory),
            },
        );
    }

    /// Registers an aggregator type with a custom factory.
    pub fn register_aggregator<F>(
        &mut self,
        name: &'static str,
        description: &'static str,
        sample_config: &'static str,
        factory: F,
    ) where
        F: Fn(&PluginContext, &PluginOptions) -> Result<Box<dyn Aggregator>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.aggregators.insert(
            name,
            Entry {
                description,
                sample_config,
                factory: Box::new(factory),
            },
        );
    }

    /// Registers an input type that is created from its options.
    pub fn add_input<P: Input + Plugin>(&mut self, name: &'static str) {
        self.register_input(name, P::description(), P::sample_config(), |ctx, opts| {
            Ok(Box::new(deserialize::<P>(ctx, opts)?))
        });
    }

    /// Registers an output type that is created from its options.
    pub fn add_output<P: Output + Plugin>(&mut self, name: &'static str) {
        self.register_output(name, P::description(), P::sample_config(), |ctx, opts| {
            Ok(Box::new(deserialize::<P>(ctx, opts)?))
        });
    }

    /// Registers a processor type that is created from its options.
    pub fn add_processor<P: Processor + Plugin>(&mut self, name: &'static str) {
        self.register_processor(name, P::description(), P::sample_config(), |ctx, opts| {
            Ok(Box::new(deserialize::<P>(ctx, opts)?))
        });
    }

    /// Registers an aggregator type that is created from its options.
    pub fn add_aggregator<P: Aggregator + Plugin>(&mut self, name: &'static str) {
        self.register_aggregator(name, P::description(), P::sample_config(), |ctx, opts| {
            Ok(Box::new(deserialize::<P>(ctx, opts)?))
        });
    }

    /// Creates an input instance.
    pub fn create_input(
        &self,
        name: &str,
        context: &PluginContext,
        options: &PluginOptions,
    ) -> Result<Box<dyn Input>, RegistryError> {
        create(&self.inputs, PluginKind::Input, name, context, options)
    }

    /// Creates an output instance.
    pub fn create_output(
        &self,
        name: &str,
        context: &PluginContext,
        options: &PluginOptions,
    ) -> Result<Box<dyn Output>, RegistryError> {
        create(&self.outputs, PluginKind::Output, name, context, options)
    }

    /// Creates a processor instance.
    pub fn create_processor(
        &self,
        name: &str,
        context: &PluginContext,
        options: &PluginOptions,
    ) -> Result<Box<dyn Processor>, RegistryError> {
        create(&self.processors, PluginKind::Processor, name, context, options)
    }

    /// Creates an aggregator instance.
    pub fn create_aggregator(
        &self,
        name: &str,
        context: &PluginContext,
        options: &PluginOptions,
    ) -> Result<Box<dyn Aggregator>, RegistryError> {
        create(&self.aggregators, PluginKind::Aggregator, name, context, options)
    }

    /// Lists all registered plugins, ordered by kind and name.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let inputs = self
            .inputs
            .iter()
            .map(|(name, entry)| entry.info(PluginKind::Input, name));
        let processors = self
            .processors
            .iter()
            .map(|(name, entry)| entry.info(PluginKind::Processor, name));
        let aggregators = self
            .aggregators
            .iter()
            .map(|(name, entry)| entry.info(PluginKind::Aggregator, name));
        let outputs = self
            .outputs
            .iter()
            .map(|(name, entry)| entry.info(PluginKind::Output, name));

        inputs
            .chain(processors)
            .chain(aggregators)
            .chain(outputs)
            .collect()
    }

    /// Returns information about a single registered plugin.
    pub fn info(&self, kind: PluginKind, name: &str) -> Option<PluginInfo> {
        self.plugins()
            .into_iter()
            .find(|info| info.kind == kind && info.name == name)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .field("aggregators", &self.aggregators.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use async_trait::async_trait;
    use ferry_metrics::{FieldValue, Fields, Tags};
    use serde::Deserialize;

    use super::*;
    use crate::Accumulator;

    #[derive(Deserialize)]
    struct ConstantOptions {
        value: i64,
    }

    struct Constant {
        value: i64,
    }

    #[async_trait]
    impl Input for Constant {
        fn description() -> &'static str {
            "Emits a constant"
        }

        fn sample_config() -> &'static str {
            "value: 1\n"
        }

        async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
            let fields = Fields::from([("value".to_owned(), FieldValue::from(self.value))]);
            acc.add_fields("constant", fields, Tags::new(), None);
            Ok(())
        }
    }

    impl Plugin for Constant {
        type Options = ConstantOptions;

        fn create(options: Self::Options, _: &PluginContext) -> Result<Self, PluginError> {
            Ok(Self {
                value: options.value,
            })
        }
    }

    fn options(json: serde_json::Value) -> PluginOptions {
        match json {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_create_registered_input() {
        let mut registry = PluginRegistry::new();
        registry.add_input::<Constant>("constant");

        let context = PluginContext::default();
        let options = options(serde_json::json!({"value": 3}));
        assert!(registry.create_input("constant", &context, &options).is_ok());

        let info = registry.info(PluginKind::Input, "constant").unwrap();
        assert_eq!(info.description, "Emits a constant");
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        let error = registry
            .create_output("kafka", &PluginContext::default(), &PluginOptions::new())
            .err()
            .unwrap();
        assert_eq!(error.to_string(), r#"unknown output plugin "kafka""#);
    }

    #[test]
    fn test_invalid_options() {
        let mut registry = PluginRegistry::new();
        registry.add_input::<Constant>("constant");

        let error = registry
            .create_input(
                "constant",
                &PluginContext::default(),
                &options(serde_json::json!({"value": "three"})),
            )
            .err()
            .unwrap();

        assert_eq!(error.to_string(), r#"failed to create input plugin "constant""#);
        let source = error.source().unwrap();
        assert_eq!(source.to_string(), "invalid plugin options");
    }
}
