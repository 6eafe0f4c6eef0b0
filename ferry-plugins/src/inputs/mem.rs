use async_trait::async_trait;
use ferry_agent::{Accumulator, Input, Plugin, PluginContext, PluginError};
use ferry_metrics::{FieldValue, Fields, Tags};
use serde::Deserialize;
use sysinfo::System;

/// Options of the [`Mem`] input. There are none.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemOptions {}

/// Reports system memory and swap usage in bytes.
pub struct Mem {
    system: System,
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }

    part as f64 / total as f64 * 100.0
}

fn memory_fields(system: &System) -> Fields {
    let total = system.total_memory();
    let available = system.available_memory();
    let used = system.used_memory();

    Fields::from([
        ("total".to_owned(), FieldValue::Unsigned(total)),
        ("available".to_owned(), FieldValue::Unsigned(available)),
        ("used".to_owned(), FieldValue::Unsigned(used)),
        ("free".to_owned(), FieldValue::Unsigned(system.free_memory())),
        ("used_percent".to_owned(), FieldValue::Float(percent(used, total))),
        ("available_percent".to_owned(), FieldValue::Float(percent(available, total))),
        ("swap_total".to_owned(), FieldValue::Unsigned(system.total_swap())),
        ("swap_used".to_owned(), FieldValue::Unsigned(system.used_swap())),
        ("swap_free".to_owned(), FieldValue::Unsigned(system.free_swap())),
    ])
}

#[async_trait]
impl Input for Mem {
    fn description() -> &'static str {
        "Read metrics about system memory usage"
    }

    fn sample_config() -> &'static str {
        "  # no configuration\n"
    }

    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError> {
        self.system.refresh_memory();
        acc.add_gauge("mem", memory_fields(&self.system), Tags::new(), None);
        Ok(())
    }
}

impl Plugin for Mem {
    type Options = MemOptions;

    fn create(_: Self::Options, _: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self {
            system: System::new(),
        })
    }
}
