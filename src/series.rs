//! Wire model of a `/api/v1/series` submission.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A `[timestamp, value]` pair. Integral values are carried as floats too.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint(pub f64, pub f64);

/// A single metric series.
///
/// Optional fields that are absent or empty are left out of the encoded
/// form entirely. Wire fields this model does not name are kept in `extra`
/// and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    #[serde(
        rename = "metric",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub points: Vec<DataPoint>,
    #[serde(rename = "type", default, skip_serializing_if = "is_blank")]
    pub metric_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_list")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "is_blank")]
    pub source_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub interval: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// The full decoded body of one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesPayload {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub series: Vec<Metric>,
}

/// Agents may send `null` for a list or string; it reads as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn is_empty_list(value: &Option<Vec<String>>) -> bool {
    value.as_ref().map_or(true, Vec::is_empty)
}

fn is_zero(value: &Option<i64>) -> bool {
    value.map_or(true, |v| v == 0)
}

impl Metric {
    /// Create a metric with just a name and points.
    pub fn new(name: impl Into<String>, points: Vec<DataPoint>) -> Self {
        Self {
            name: name.into(),
            points,
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Tags as a slice, empty when absent.
    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }
}

impl SeriesPayload {
    pub fn new(series: Vec<Metric>) -> Self {
        Self { series }
    }

    /// Metric names in series order.
    pub fn names(&self) -> Vec<&str> {
        self.series.iter().map(|m| m.name.as_str()).collect()
    }
}
