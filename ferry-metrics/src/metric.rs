use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracking::{TrackingId, TrackingRef};

/// Tags of a metric, sorted by key.
pub type Tags = BTreeMap<String, String>;

/// Fields of a metric, sorted by key.
pub type Fields = BTreeMap<String, FieldValue>;

/// The value of a single metric field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A signed 64-bit integer.
    Integer(i64),
    /// An unsigned 64-bit integer.
    Unsigned(u64),
    /// A 64-bit floating point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// A boolean.
    Boolean(bool),
}

impl FieldValue {
    /// Returns the value as float if it is numeric.
    ///
    /// Strings and booleans are not numeric. Large integers lose precision.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Integer(value) => Some(value as f64),
            Self::Unsigned(value) => Some(value as f64),
            Self::Float(value) => Some(value),
            Self::String(_) | Self::Boolean(_) => None,
        }
    }

    /// Returns the name of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Unsigned(_) => "unsigned",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
        }
    }
}

macro_rules! impl_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

impl_from!(Integer: i64, i32, i16, i8, u32, u16, u8);
impl_from!(Unsigned: u64);
impl_from!(Float: f64, f32);
impl_from!(String: String, &str);
impl_from!(Boolean: bool);

/// The kind of a metric as declared by its producer.
///
/// The type is a hint for outputs. It does not change how the agent treats the metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// No type information.
    #[default]
    Untyped,
    /// A monotonically increasing value.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// A distribution summarized into buckets.
    Histogram,
    /// A distribution summarized into quantiles.
    Summary,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Untyped => "untyped",
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        };
        f.write_str(name)
    }
}

/// The identity of a time series: a metric name with its full tag set.
///
/// Aggregators key their state by this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    name: String,
    tags: Tags,
}

impl SeriesKey {
    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags of the series.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

/// A single timestamped measurement.
///
/// Metrics are plain values: cloning produces an independent deep copy that can be mutated without
/// affecting the original. The only state shared between copies is the tracking handle, see
/// [`Tracker`](crate::Tracker).
///
/// Equality compares name, tags, fields, timestamp and type.
#[derive(Clone, Debug)]
pub struct Metric {
    name: String,
    tags: Tags,
    fields: Fields,
    timestamp: DateTime<Utc>,
    ty: MetricType,
    tracking: Option<TrackingRef>,
}

impl Metric {
    /// Creates a metric without tags and fields.
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::from_parts(name, Tags::new(), Fields::new(), timestamp, MetricType::Untyped)
    }

    /// Creates a metric from all of its parts.
    pub fn from_parts(
        name: impl Into<String>,
        tags: Tags,
        fields: Fields,
        timestamp: DateTime<Utc>,
        ty: MetricType,
    ) -> Self {
        Self {
            name: name.into(),
            tags,
            fields,
            timestamp,
            ty,
            tracking: None,
        }
    }

    /// Adds a tag and returns the metric.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_tag(key, value);
        self
    }

    /// Adds a field and returns the metric.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add_field(key, value);
        self
    }

    /// Sets the type and returns the metric.
    pub fn with_type(mut self, ty: MetricType) -> Self {
        self.ty = ty;
        self
    }

    /// Returns the name of the metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Returns the value of a tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns `true` if the metric has the given tag.
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    /// Returns all fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Returns the value of a field.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Returns the timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the declared type.
    pub fn ty(&self) -> MetricType {
        self.ty
    }

    /// Returns the series identity of this metric.
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            name: self.name.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Renames the metric.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Sets a tag, replacing an existing value.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Removes a tag and returns its value.
    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    /// Keeps only the tags for which `f` returns `true`.
    pub fn retain_tags(&mut self, mut f: impl FnMut(&str, &str) -> bool) {
        self.tags.retain(|key, value| f(key, value));
    }

    /// Sets a field, replacing an existing value.
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Removes a field and returns its value.
    pub fn remove_field(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    /// Keeps only the fields for which `f` returns `true`.
    pub fn retain_fields(&mut self, mut f: impl FnMut(&str, &FieldValue) -> bool) {
        self.fields.retain(|key, value| f(key, value));
    }

    /// Replaces the timestamp.
    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    /// Returns `true` if this metric carries a delivery tracking handle.
    pub fn is_tracked(&self) -> bool {
        self.tracking.is_some()
    }

    /// Returns the tracking group this metric belongs to.
    pub fn tracking_id(&self) -> Option<TrackingId> {
        self.tracking.as_ref().map(TrackingRef::id)
    }

    /// Marks this copy as successfully delivered and consumes it.
    pub fn accept(mut self) {
        self.tracking.take();
    }

    /// Marks this copy as failed and consumes it.
    ///
    /// The tracking group of this metric reports `delivered = false` once all copies are gone.
    pub fn reject(mut self) {
        if let Some(tracking) = self.tracking.take() {
            tracking.reject();
        }
    }

    pub(crate) fn set_tracking(&mut self, tracking: TrackingRef) {
        self.tracking = Some(tracking);
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tags == other.tags
            && self.fields == other.fields
            && self.timestamp == other.timestamp
            && self.ty == other.ty
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::from(42), FieldValue::Integer(42));
        assert_eq!(FieldValue::from(42u32), FieldValue::Integer(42));
        assert_eq!(FieldValue::from(42u64), FieldValue::Unsigned(42));
        assert_eq!(FieldValue::from(0.5f32), FieldValue::Float(0.5));
        assert_eq!(FieldValue::from("up"), FieldValue::String("up".to_owned()));
        assert_eq!(FieldValue::from(true), FieldValue::Boolean(true));
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(FieldValue::Integer(-3).as_f64(), Some(-3.0));
        assert_eq!(FieldValue::Unsigned(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Boolean(true).as_f64(), None);
        assert_eq!(FieldValue::String("1".to_owned()).as_f64(), None);
    }

    #[test]
    fn test_tags_are_sorted() {
        let metric = Metric::new("cpu", timestamp())
            .with_tag("zone", "eu")
            .with_tag("host", "a")
            .with_tag("cpu", "cpu0");

        let keys: Vec<_> = metric.tags().keys().map(String::as_str).collect();
        assert_eq!(keys, ["cpu", "host", "zone"]);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = Metric::new("cpu", timestamp())
            .with_tag("host", "a")
            .with_field("usage", 42.0);

        let mut copy = original.clone();
        copy.add_tag("host", "b");
        copy.remove_field("usage");
        copy.set_name("cpu2");

        assert_eq!(original.tag("host"), Some("a"));
        assert_eq!(original.field("usage"), Some(&FieldValue::Float(42.0)));
        assert_eq!(original.name(), "cpu");
        assert_ne!(original, copy);
    }

    #[test]
    fn test_series_key_ignores_fields() {
        let a = Metric::new("cpu", timestamp())
            .with_tag("host", "a")
            .with_field("usage", 1);
        let b = Metric::new("cpu", timestamp())
            .with_tag("host", "a")
            .with_field("idle", 2);
        let c = Metric::new("cpu", timestamp()).with_tag("host", "b");

        assert_eq!(a.series_key(), b.series_key());
        assert_ne!(a.series_key(), c.series_key());
        assert_eq!(a.series_key().name(), "cpu");
    }

    #[test]
    fn test_retain() {
        let mut metric = Metric::new("cpu", timestamp())
            .with_tag("host", "a")
            .with_tag("dc", "x")
            .with_field("usage", 1)
            .with_field("idle", 2);

        metric.retain_tags(|key, _| key != "dc");
        metric.retain_fields(|_, value| value.as_f64() > Some(1.0));

        assert_eq!(metric.tags().len(), 1);
        assert!(metric.has_tag("host"));
        assert_eq!(metric.fields().len(), 1);
        assert!(metric.field("idle").is_some());
    }

    #[test]
    fn test_metric_type_serde() {
        let ty: MetricType = serde_yaml::from_str("histogram").unwrap();
        assert_eq!(ty, MetricType::Histogram);
        assert_eq!(ty.to_string(), "histogram");
    }
}
