use std::collections::BTreeMap;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::Metric;

/// Selection of metrics, tags and fields for a plugin instance.
///
/// All options take glob patterns (`*` matches any sequence of characters). Options that are not
/// set do not restrict anything.
///
/// ```yaml
/// namepass: ["cpu*"]
/// tagdrop:
///   host: ["test-*"]
/// fielddrop: ["time_*"]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Only metrics whose name matches one of these patterns pass.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namepass: Vec<String>,
    /// Metrics whose name matches one of these patterns are dropped.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namedrop: Vec<String>,
    /// Only metrics with at least one of these tags matching one of its patterns pass.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tagpass: BTreeMap<String, Vec<String>>,
    /// Metrics with at least one of these tags matching one of its patterns are dropped.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tagdrop: BTreeMap<String, Vec<String>>,
    /// Only fields whose key matches one of these patterns are kept.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fieldpass: Vec<String>,
    /// Fields whose key matches one of these patterns are removed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fielddrop: Vec<String>,
    /// Only tags whose key matches one of these patterns are kept.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub taginclude: Vec<String>,
    /// Tags whose key matches one of these patterns are removed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tagexclude: Vec<String>,
}

impl FilterConfig {
    /// Returns `true` if no option is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// An invalid glob pattern in a [`FilterConfig`].
#[derive(Debug, thiserror::Error)]
#[error("invalid pattern {pattern:?} in {option}")]
pub struct FilterError {
    option: &'static str,
    pattern: String,
    #[source]
    source: globset::Error,
}

fn compile(option: &'static str, patterns: &[String]) -> Result<Option<GlobSet>, FilterError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let error = |pattern: &str, source| FilterError {
        option,
        pattern: pattern.to_owned(),
        source,
    };

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| error(pattern, e))?);
    }

    let set = builder
        .build()
        .map_err(|e| error(&patterns.join(","), e))?;
    Ok(Some(set))
}

fn compile_tags(
    option: &'static str,
    tags: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<(String, GlobSet)>, FilterError> {
    let mut compiled = Vec::with_capacity(tags.len());
    for (key, patterns) in tags {
        if let Some(set) = compile(option, patterns)? {
            compiled.push((key.clone(), set));
        }
    }
    Ok(compiled)
}

/// A compiled [`FilterConfig`].
///
/// [`select`](Self::select) decides whether a metric is handled at all, based on its name and
/// tags. [`modify`](Self::modify) then strips fields and tags. [`apply`](Self::apply) does both.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    namepass: Option<GlobSet>,
    namedrop: Option<GlobSet>,
    tagpass: Vec<(String, GlobSet)>,
    tagdrop: Vec<(String, GlobSet)>,
    fieldpass: Option<GlobSet>,
    fielddrop: Option<GlobSet>,
    taginclude: Option<GlobSet>,
    tagexclude: Option<GlobSet>,
}

impl Filter {
    /// Compiles all patterns of the config.
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        Ok(Self {
            namepass: compile("namepass", &config.namepass)?,
            namedrop: compile("namedrop", &config.namedrop)?,
            tagpass: compile_tags("tagpass", &config.tagpass)?,
            tagdrop: compile_tags("tagdrop", &config.tagdrop)?,
            fieldpass: compile("fieldpass", &config.fieldpass)?,
            fielddrop: compile("fielddrop", &config.fielddrop)?,
            taginclude: compile("taginclude", &config.taginclude)?,
            tagexclude: compile("tagexclude", &config.tagexclude)?,
        })
    }

    /// Returns `true` if the filter lets everything through unchanged.
    pub fn is_empty(&self) -> bool {
        self.namepass.is_none()
            && self.namedrop.is_none()
            && self.tagpass.is_empty()
            && self.tagdrop.is_empty()
            && !self.modifies()
    }

    fn modifies(&self) -> bool {
        self.fieldpass.is_some()
            || self.fielddrop.is_some()
            || self.taginclude.is_some()
            || self.tagexclude.is_some()
    }

    /// Returns `true` if the metric passes the name and tag selection.
    pub fn select(&self, metric: &Metric) -> bool {
        let name = metric.name();

        if self.namepass.as_ref().is_some_and(|set| !set.is_match(name)) {
            return false;
        }

        if self.namedrop.as_ref().is_some_and(|set| set.is_match(name)) {
            return false;
        }

        if !self.tagpass.is_empty() && !matches_any_tag(&self.tagpass, metric) {
            return false;
        }

        !matches_any_tag(&self.tagdrop, metric)
    }

    /// Removes fields and tags according to the field and tag inclusion options.
    pub fn modify(&self, metric: &mut Metric) {
        if !self.modifies() {
            return;
        }

        metric.retain_fields(|key, _| {
            self.fieldpass.as_ref().is_none_or(|set| set.is_match(key))
                && !self.fielddrop.as_ref().is_some_and(|set| set.is_match(key))
        });

        metric.retain_tags(|key, _| {
            self.taginclude.as_ref().is_none_or(|set| set.is_match(key))
                && !self.tagexclude.as_ref().is_some_and(|set| set.is_match(key))
        });
    }

    /// Selects and modifies a metric.
    ///
    /// Returns `None` if the metric was not selected or no fields remain after modification.
    pub fn apply(&self, mut metric: Metric) -> Option<Metric> {
        if !self.select(&metric) {
            return None;
        }

        self.modify(&mut metric);
        if metric.fields().is_empty() {
            return None;
        }

        Some(metric)
    }
}

fn matches_any_tag(filters: &[(String, GlobSet)], metric: &Metric) -> bool {
    filters.iter().any(|(key, set)| {
        metric
            .tag(key)
            .is_some_and(|value| set.is_match(value))
    })
}
